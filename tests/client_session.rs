//! End-to-end tests: the crate's own client driving an in-process server
//! over real HTTP, with in-memory stores behind the handlers.

use renovo::api;
use renovo::api::handlers::auth::{
    hash_password, AuthConfig, AuthState, Identity, MemoryCredentialStore, MemoryIdentityDirectory,
    MemoryLockoutStore, NoopRateLimiter, RefreshRequest, TracingAuditSink,
};
use renovo::client::{
    ClientSessionConfig, ClientSessionStore, HttpSessionTransport, SessionTransport,
};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

const PASSWORD: &str = "Str0ngPass!";

struct TestServer {
    base_url: String,
}

impl TestServer {
    async fn start(two_factor_enabled: bool) -> Self {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            role: "patient".to_string(),
            password_hash: hash_password(PASSWORD).expect("hash"),
            two_factor_enabled,
        };
        let auth_state = Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:5173".to_string()),
            Arc::new(MemoryIdentityDirectory::with_users(vec![identity])),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemoryLockoutStore::new()),
            Arc::new(TracingAuditSink),
            Arc::new(NoopRateLimiter),
            SecretString::from("end-to-end-signing-secret".to_string()),
        ));

        let app = api::app(auth_state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .expect("serve");
        });

        Self {
            base_url: format!("http://{addr}"),
        }
    }

    fn store(&self) -> ClientSessionStore {
        let transport = HttpSessionTransport::new(self.base_url.clone()).expect("transport");
        ClientSessionStore::new(Arc::new(transport), ClientSessionConfig::new())
    }
}

#[tokio::test]
async fn login_without_second_factor_authenticates_the_client() {
    let server = TestServer::start(false).await;
    let store = server.store();

    let response = store
        .login("alice@example.com", PASSWORD, None)
        .await
        .expect("login");

    assert!(response.success);
    assert!(response.tokens.is_some());
    assert!(store.is_authenticated());
    assert!(!store.two_factor_pending());
    assert_eq!(
        store.user().map(|user| user.email),
        Some("alice@example.com".to_string())
    );
    // A fresh pair arms the proactive renewal timer.
    assert!(store.is_refresh_scheduled());
}

#[tokio::test]
async fn login_with_second_factor_leaves_client_pending() {
    let server = TestServer::start(true).await;
    let store = server.store();

    let response = store
        .login("alice@example.com", PASSWORD, None)
        .await
        .expect("login");

    assert!(response.success);
    assert_eq!(response.requires_two_fa, Some(true));
    assert!(response.session_id.is_some());
    assert!(store.two_factor_pending());
    assert!(!store.is_authenticated());
    assert!(store.access_token().is_none());
    assert!(!store.is_refresh_scheduled());
}

#[tokio::test]
async fn wrong_password_surfaces_remaining_attempts_hint() {
    let server = TestServer::start(false).await;
    let store = server.store();

    let mut last = None;
    for _ in 0..3 {
        let response = store
            .login("alice@example.com", "wrong-password", None)
            .await
            .expect("login attempt");
        assert!(!response.success);
        last = Some(response);
    }

    let response = last.expect("response");
    assert_eq!(response.error_code.as_deref(), Some("invalid_credentials"));
    assert_eq!(response.remaining_attempts, Some(2));
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn proactive_renewal_rotates_the_pair_over_http() {
    let server = TestServer::start(false).await;
    let store = server.store();

    store
        .login("alice@example.com", PASSWORD, None)
        .await
        .expect("login");
    let old_refresh = store.refresh_token().expect("refresh token");

    store.renew_now().await;

    assert!(store.is_authenticated());
    let new_refresh = store.refresh_token().expect("refresh token");
    assert_ne!(new_refresh, old_refresh);

    // Rotation is 1-for-1: the rotated-away secret no longer renews.
    let transport = HttpSessionTransport::new(server.base_url.clone()).expect("transport");
    let response = transport
        .renew(&RefreshRequest {
            refresh_token: old_refresh,
            device_id: None,
        })
        .await
        .expect("renew call");
    assert!(!response.success);
    assert_eq!(response.error_code.as_deref(), Some("invalid_refresh_token"));
}

#[tokio::test]
async fn logout_tears_down_the_session_end_to_end() {
    let server = TestServer::start(false).await;
    let store = server.store();

    store
        .login("alice@example.com", PASSWORD, None)
        .await
        .expect("login");
    let refresh = store.refresh_token().expect("refresh token");

    let logout = store.logout().await.expect("logout");
    assert!(logout.success);
    assert!(!store.is_authenticated());
    assert!(store.refresh_token().is_none());
    assert!(!store.is_refresh_scheduled());

    // The surrendered secret is dead server-side too.
    let transport = HttpSessionTransport::new(server.base_url.clone()).expect("transport");
    let response = transport
        .renew(&RefreshRequest {
            refresh_token: refresh,
            device_id: None,
        })
        .await
        .expect("renew call");
    assert!(!response.success);
}
