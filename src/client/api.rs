//! HTTP transport to the auth endpoints.
//!
//! The transport is a trait so the session store can be exercised against a
//! fake in tests; the real implementation is a thin typed `reqwest` wrapper.
//! Timeouts are the transport layer's concern, not imposed here.

use async_trait::async_trait;
use thiserror::Error;

use crate::api::handlers::auth::{
    AuthResponse, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest,
};
use crate::APP_USER_AGENT;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from auth service: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, TransportError>;
    async fn renew(&self, request: &RefreshRequest) -> Result<AuthResponse, TransportError>;
    async fn logout(&self, request: &LogoutRequest) -> Result<LogoutResponse, TransportError>;
}

pub struct HttpSessionTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSessionTransport {
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, TransportError> {
        // Error statuses still carry a structured body (error_code,
        // remaining_attempts, lockout_until), so decode unconditionally.
        let response = self
            .client
            .post(self.endpoint("/auth/login"))
            .json(request)
            .send()
            .await?;
        response
            .json::<AuthResponse>()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }

    async fn renew(&self, request: &RefreshRequest) -> Result<AuthResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint("/auth/refresh"))
            .json(request)
            .send()
            .await?;
        response
            .json::<AuthResponse>()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }

    async fn logout(&self, request: &LogoutRequest) -> Result<LogoutResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint("/auth/logout"))
            .json(request)
            .send()
            .await?;
        response
            .json::<LogoutResponse>()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }
}
