use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    runtime::Tokio, trace::TracerProvider as SdkTracerProvider, Resource,
};
use std::{env::var, time::Duration};
use tonic::transport::ClientTlsConfig;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

fn normalize_endpoint(endpoint: String) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint
    } else {
        // Default to https for gRPC if no scheme supplied
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

/// Initialize tracing: fmt layer + env filter, and an OTLP gRPC span
/// exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is configured.
///
/// # Errors
/// Returns an error if exporter construction or subscriber installation fails.
pub fn init(verbosity: Option<Level>) -> Result<()> {
    let default_level = verbosity.unwrap_or(Level::ERROR);
    // RUST_LOG overrides the -v flags when set.
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    let registry = Registry::default().with(fmt_layer).with(env_filter);

    match var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => {
            let endpoint = normalize_endpoint(endpoint);
            let mut builder = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .with_timeout(Duration::from_secs(3));

            // TLS (https) support
            if let Some(host) = endpoint
                .strip_prefix("https://")
                .and_then(|rest| rest.split('/').next())
                .and_then(|host| host.split(':').next())
            {
                let tls = ClientTlsConfig::new()
                    .domain_name(host.to_string())
                    .with_native_roots();
                builder = builder.with_tls_config(tls);
            }

            let exporter = builder.build()?;

            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter, Tokio)
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ]))
                .build();

            let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
            let _ = TRACER_PROVIDER.set(provider.clone());
            global::set_tracer_provider(provider);

            let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
            tracing::subscriber::set_global_default(registry.with(telemetry))?;
        }
        Err(_) => {
            tracing::subscriber::set_global_default(registry)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_adds_https_scheme() {
        assert_eq!(
            normalize_endpoint("collector:4317/".to_string()),
            "https://collector:4317"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:4317".to_string()),
            "http://localhost:4317"
        );
    }
}
