//! Caller-side session state and the proactive renewal loop.
//!
//! The store holds the reactive session snapshot (authenticated /
//! two-factor-pending / unauthenticated) and a single cancellable timer that
//! renews the credential pair ahead of expiry. At most one timer and one
//! in-flight renewal exist per store; the in-flight flag is the single-flight
//! gate and a prior timer is always cancelled before a new one is armed.
//! Exhausted renewal retries leave the session untouched — the reactive
//! on-401 interceptor owned by the HTTP layer is the second line of defense.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::api::handlers::auth::{
    AuthResponse, DeviceInfo, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest,
    TokenPair, UserSummary,
};

use super::api::{SessionTransport, TransportError};
use super::scheduler::ClientSessionConfig;
use super::token::access_token_expiry;

#[derive(Clone, Debug, Default)]
struct SessionState {
    is_authenticated: bool,
    user: Option<UserSummary>,
    two_factor_pending: bool,
    two_factor_enabled: bool,
    session_id: Option<String>,
    tokens: Option<TokenPair>,
}

struct StoreInner {
    transport: Arc<dyn SessionTransport>,
    config: ClientSessionConfig,
    state: Mutex<SessionState>,
    renewal_in_flight: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ClientSessionStore {
    inner: Arc<StoreInner>,
}

impl ClientSessionStore {
    #[must_use]
    pub fn new(transport: Arc<dyn SessionTransport>, config: ClientSessionConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                transport,
                config,
                state: Mutex::new(SessionState::default()),
                renewal_in_flight: AtomicBool::new(false),
                timer: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Submit credentials and apply the outcome to the local state.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device_info: Option<DeviceInfo>,
    ) -> Result<AuthResponse, TransportError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            device_info,
        };
        let response = self.inner.transport.login(&request).await?;
        self.apply_auth_result(&response, false);
        Ok(response)
    }

    /// Surrender the refresh credential and tear the session down locally.
    /// The local teardown happens even when the server-side revocation was a
    /// no-op.
    pub async fn logout(&self) -> Result<LogoutResponse, TransportError> {
        let refresh_token = self.state().tokens.as_ref().map(|tokens| tokens.refresh_token.clone());
        let Some(refresh_token) = refresh_token else {
            self.reset_all();
            return Ok(LogoutResponse {
                success: true,
                message: None,
            });
        };
        let result = self
            .inner
            .transport
            .logout(&LogoutRequest { refresh_token })
            .await;
        self.reset_all();
        result
    }

    /// Apply a login/renewal outcome to the local state machine.
    ///
    /// `register_without_login` marks the register-then-stay-signed-out flow:
    /// a failure outcome is swallowed and the state is left as-is instead of
    /// being torn down.
    pub fn apply_auth_result(&self, response: &AuthResponse, register_without_login: bool) {
        if response.success && response.requires_two_fa == Some(true) {
            // Pending and authenticated are mutually exclusive: entering the
            // pending state drops any credentials and the timer with them.
            {
                let mut state = self.state();
                *state = SessionState {
                    two_factor_pending: true,
                    two_factor_enabled: true,
                    session_id: response.session_id.clone(),
                    ..SessionState::default()
                };
            }
            self.stop_refresh_scheduler();
            return;
        }

        if response.success {
            if let Some(tokens) = &response.tokens {
                {
                    let mut state = self.state();
                    state.is_authenticated = true;
                    state.two_factor_pending = false;
                    state.session_id = None;
                    state.tokens = Some(tokens.clone());
                    // Renewals carry no user snapshot; keep the one from login.
                    if response.user.is_some() {
                        state.user = response.user.clone();
                    }
                }
                self.arm_scheduler(&tokens.access_token);
            }
            return;
        }

        if register_without_login {
            return;
        }

        {
            let mut state = self.state();
            *state = SessionState::default();
        }
        self.stop_refresh_scheduler();
    }

    /// Full client-side teardown: cancel the timer, clear every state field,
    /// and erase stored credentials. The only path that does all three.
    pub fn reset_all(&self) {
        self.stop_refresh_scheduler();
        let mut state = self.state();
        *state = SessionState::default();
    }

    /// Cancel the scheduled renewal, if any. Safe to call when no timer is
    /// armed.
    pub fn stop_refresh_scheduler(&self) {
        let mut timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    /// Whether a proactive renewal is currently outstanding.
    #[must_use]
    pub fn is_renewal_in_flight(&self) -> bool {
        self.inner.renewal_in_flight.load(Ordering::SeqCst)
    }

    /// Whether a renewal timer is armed and has not fired to completion.
    #[must_use]
    pub fn is_refresh_scheduled(&self) -> bool {
        let timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        timer.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Run one proactive renewal now, with the configured bounded retries.
    ///
    /// Single-flight: a second caller observes the in-flight flag and
    /// no-ops. Exhausting the retries leaves the session intact for the
    /// reactive fallback to deal with.
    pub async fn renew_now(&self) {
        if self.inner.renewal_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        self.renew_with_retries().await;
        self.inner.renewal_in_flight.store(false, Ordering::SeqCst);
    }

    async fn renew_with_retries(&self) {
        let attempts = self.inner.config.max_proactive_retries() + 1;
        for attempt in 1..=attempts {
            // Re-read each attempt: a logout between retries removes the
            // credential and ends the loop.
            let refresh_token = self
                .state()
                .tokens
                .as_ref()
                .map(|tokens| tokens.refresh_token.clone());
            let Some(refresh_token) = refresh_token else {
                return;
            };

            let request = RefreshRequest {
                refresh_token,
                device_id: None,
            };
            match self.inner.transport.renew(&request).await {
                Ok(response) if response.success && response.tokens.is_some() => {
                    self.apply_auth_result(&response, false);
                    return;
                }
                Ok(response) => {
                    debug!(
                        error_code = response.error_code.as_deref().unwrap_or("-"),
                        "proactive renewal rejected"
                    );
                }
                Err(err) => {
                    debug!("proactive renewal transport error: {err}");
                }
            }

            if attempt < attempts {
                sleep(self.inner.config.retry_delay()).await;
            }
        }
        debug!("proactive renewal retries exhausted; leaving session for reactive fallback");
    }

    fn arm_scheduler(&self, access_token: &str) {
        let expiry = match access_token_expiry(access_token) {
            Ok(expiry) => expiry,
            Err(err) => {
                debug!("cannot schedule renewal: {err}");
                return;
            }
        };
        let delay = self.inner.config.renewal_delay(expiry, Utc::now().timestamp());

        let store = self.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            store.renew_now().await;
        });

        let mut timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Single active timer per store. Re-arming from inside a firing
        // timer aborts a task that is already past its last await point, so
        // that abort is a no-op.
        if let Some(old) = timer.take() {
            old.abort();
        }
        *timer = Some(handle);
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated
    }

    #[must_use]
    pub fn two_factor_pending(&self) -> bool {
        self.state().two_factor_pending
    }

    #[must_use]
    pub fn two_factor_enabled(&self) -> bool {
        self.state().two_factor_enabled
    }

    #[must_use]
    pub fn user(&self) -> Option<UserSummary> {
        self.state().user.clone()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.state().session_id.clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.state()
            .tokens
            .as_ref()
            .map(|tokens| tokens.access_token.clone())
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.state()
            .tokens
            .as_ref()
            .map(|tokens| tokens.refresh_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::token::unsigned_token_with_expiry;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use uuid::Uuid;

    /// Transport double: configurable renewal outcome, call counting, and an
    /// optional artificial delay to hold a renewal in flight.
    struct FakeTransport {
        renew_calls: AtomicU32,
        renew_delay: Duration,
        renew_succeeds: bool,
    }

    impl FakeTransport {
        fn new(renew_succeeds: bool, renew_delay: Duration) -> Self {
            Self {
                renew_calls: AtomicU32::new(0),
                renew_delay,
                renew_succeeds,
            }
        }

        fn renew_calls(&self) -> u32 {
            self.renew_calls.load(Ordering::SeqCst)
        }

        fn fresh_tokens() -> TokenPair {
            TokenPair {
                access_token: unsigned_token_with_expiry(Utc::now().timestamp() + 3600),
                refresh_token: Uuid::new_v4().to_string(),
                expires_in: 900,
            }
        }
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
        async fn login(&self, _request: &LoginRequest) -> Result<AuthResponse, TransportError> {
            Ok(AuthResponse {
                success: true,
                user: Some(UserSummary {
                    id: Uuid::new_v4(),
                    email: "alice@example.com".to_string(),
                    role: "patient".to_string(),
                }),
                tokens: Some(Self::fresh_tokens()),
                ..AuthResponse::default()
            })
        }

        async fn renew(&self, _request: &RefreshRequest) -> Result<AuthResponse, TransportError> {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.renew_delay).await;
            if self.renew_succeeds {
                Ok(AuthResponse {
                    success: true,
                    tokens: Some(Self::fresh_tokens()),
                    ..AuthResponse::default()
                })
            } else {
                Ok(AuthResponse {
                    success: false,
                    error_code: Some("invalid_refresh_token".to_string()),
                    ..AuthResponse::default()
                })
            }
        }

        async fn logout(&self, _request: &LogoutRequest) -> Result<LogoutResponse, TransportError> {
            Ok(LogoutResponse {
                success: true,
                message: None,
            })
        }
    }

    fn store_with(transport: Arc<FakeTransport>) -> ClientSessionStore {
        ClientSessionStore::new(
            transport,
            ClientSessionConfig::new().with_retry_delay_base(Duration::from_millis(10)),
        )
    }

    fn authenticated_response() -> AuthResponse {
        AuthResponse {
            success: true,
            user: Some(UserSummary {
                id: Uuid::new_v4(),
                email: "alice@example.com".to_string(),
                role: "patient".to_string(),
            }),
            tokens: Some(FakeTransport::fresh_tokens()),
            ..AuthResponse::default()
        }
    }

    #[tokio::test]
    async fn success_result_authenticates_and_arms_timer() {
        let store = store_with(Arc::new(FakeTransport::new(true, Duration::ZERO)));
        store.apply_auth_result(&authenticated_response(), false);

        assert!(store.is_authenticated());
        assert!(!store.two_factor_pending());
        assert!(store.user().is_some());
        assert!(store.access_token().is_some());
        assert!(store.is_refresh_scheduled());
    }

    #[tokio::test]
    async fn two_factor_result_is_pending_without_credentials() {
        let store = store_with(Arc::new(FakeTransport::new(true, Duration::ZERO)));
        let response = AuthResponse {
            success: true,
            requires_two_fa: Some(true),
            session_id: Some("corr-1".to_string()),
            ..AuthResponse::default()
        };
        store.apply_auth_result(&response, false);

        // Pending and authenticated are mutually exclusive.
        assert!(store.two_factor_pending());
        assert!(store.two_factor_enabled());
        assert!(!store.is_authenticated());
        assert_eq!(store.session_id().as_deref(), Some("corr-1"));
        assert!(store.access_token().is_none());
        assert!(!store.is_refresh_scheduled());
    }

    #[tokio::test]
    async fn failure_result_resets_unless_register_flow() {
        let store = store_with(Arc::new(FakeTransport::new(true, Duration::ZERO)));
        store.apply_auth_result(&authenticated_response(), false);

        let failure = AuthResponse {
            success: false,
            error_code: Some("invalid_credentials".to_string()),
            ..AuthResponse::default()
        };

        // Register-without-auto-login: the failure is not surfaced as one.
        store.apply_auth_result(&failure, true);
        assert!(store.is_authenticated());

        store.apply_auth_result(&failure, false);
        assert!(!store.is_authenticated());
        assert!(store.access_token().is_none());
        assert!(!store.is_refresh_scheduled());
    }

    #[tokio::test]
    async fn reset_all_clears_state_and_timer() {
        let store = store_with(Arc::new(FakeTransport::new(true, Duration::ZERO)));
        store.apply_auth_result(&authenticated_response(), false);
        assert!(store.is_refresh_scheduled());

        store.reset_all();
        assert!(!store.is_authenticated());
        assert!(store.user().is_none());
        assert!(store.refresh_token().is_none());
        assert!(!store.is_refresh_scheduled());
    }

    #[tokio::test]
    async fn stop_refresh_scheduler_is_idempotent() {
        let store = store_with(Arc::new(FakeTransport::new(true, Duration::ZERO)));
        // No timer armed yet.
        store.stop_refresh_scheduler();
        store.apply_auth_result(&authenticated_response(), false);
        store.stop_refresh_scheduler();
        store.stop_refresh_scheduler();
        assert!(!store.is_refresh_scheduled());
    }

    #[tokio::test]
    async fn rearming_cancels_the_previous_timer() {
        let store = store_with(Arc::new(FakeTransport::new(true, Duration::ZERO)));
        store.apply_auth_result(&authenticated_response(), false);
        store.apply_auth_result(&authenticated_response(), false);
        // Two applies, still exactly one live timer.
        assert!(store.is_refresh_scheduled());
        store.stop_refresh_scheduler();
        assert!(!store.is_refresh_scheduled());
    }

    #[tokio::test]
    async fn renewal_is_single_flight() {
        let transport = Arc::new(FakeTransport::new(true, Duration::from_millis(100)));
        let store = store_with(Arc::clone(&transport));
        store.apply_auth_result(&authenticated_response(), false);

        let racing = store.clone();
        let first = tokio::spawn(async move { racing.renew_now().await });
        // Give the first renewal time to take the flag and park in the
        // transport delay.
        sleep(Duration::from_millis(20)).await;
        assert!(store.is_renewal_in_flight());

        // The second caller observes the flag and no-ops.
        store.renew_now().await;
        assert_eq!(transport.renew_calls(), 1);

        first.await.expect("join");
        assert_eq!(transport.renew_calls(), 1);
        assert!(!store.is_renewal_in_flight());
    }

    #[tokio::test]
    async fn successful_renewal_rotates_stored_tokens() {
        let transport = Arc::new(FakeTransport::new(true, Duration::ZERO));
        let store = store_with(Arc::clone(&transport));
        store.apply_auth_result(&authenticated_response(), false);
        let before = store.refresh_token();

        store.renew_now().await;
        assert_eq!(transport.renew_calls(), 1);
        assert!(store.is_authenticated());
        assert_ne!(store.refresh_token(), before);
        // User snapshot survives a renewal response that carries none.
        assert!(store.user().is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_session_intact() {
        let transport = Arc::new(FakeTransport::new(false, Duration::ZERO));
        let store = store_with(Arc::clone(&transport));
        store.apply_auth_result(&authenticated_response(), false);
        let before = store.refresh_token();

        store.renew_now().await;
        // One attempt plus the single configured retry.
        assert_eq!(transport.renew_calls(), 2);
        assert!(store.is_authenticated());
        assert_eq!(store.refresh_token(), before);
    }

    #[tokio::test]
    async fn renew_without_credentials_is_a_no_op() {
        let transport = Arc::new(FakeTransport::new(true, Duration::ZERO));
        let store = store_with(Arc::clone(&transport));
        store.renew_now().await;
        assert_eq!(transport.renew_calls(), 0);
    }

    #[tokio::test]
    async fn login_and_logout_round_trip() {
        let transport = Arc::new(FakeTransport::new(true, Duration::ZERO));
        let store = store_with(transport);

        let response = store
            .login("alice@example.com", "Str0ngPass!", None)
            .await
            .expect("login");
        assert!(response.success);
        assert!(store.is_authenticated());

        let logout = store.logout().await.expect("logout");
        assert!(logout.success);
        assert!(!store.is_authenticated());
        assert!(store.refresh_token().is_none());
        assert!(!store.is_refresh_scheduled());
    }
}
