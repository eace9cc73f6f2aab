//! Auth state, configuration and the clock used for expiry decisions.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

use super::rate_limit::RateLimiter;
use crate::{
    api::email::{CodeSender, DispatchConfig},
    store::CredentialStore,
};

const DEFAULT_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_OTP_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    otp_ttl_seconds: i64,
    otp_max_attempts: u32,
    session_ttl_seconds: i64,
    dispatch: DispatchConfig,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            dispatch: DispatchConfig::new(),
        }
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_max_attempts(mut self, attempts: u32) -> Self {
        self.otp_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    #[must_use]
    pub fn otp_max_attempts(&self) -> u32 {
        self.otp_max_attempts
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn dispatch(&self) -> DispatchConfig {
        self.dispatch
    }
}

/// Source of "now" for every expiry decision.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to; used to test expiry deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn CredentialStore>,
    sender: Arc<dyn CodeSender>,
    rate_limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        sender: Arc<dyn CodeSender>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            store,
            sender,
            rate_limiter,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    pub(crate) fn sender(&self) -> Arc<dyn CodeSender> {
        Arc::clone(&self.sender)
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::{AuthConfig, AuthState, Clock, ManualClock};
    use crate::api::email::{CodeSender, LogCodeSender};
    use crate::store::{memory::MemoryStore, CredentialStore};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://hdnotes.dev".to_string());

        assert_eq!(config.frontend_base_url(), "https://hdnotes.dev");
        assert_eq!(config.otp_ttl_seconds(), super::DEFAULT_OTP_TTL_SECONDS);
        assert_eq!(config.otp_max_attempts(), super::DEFAULT_OTP_MAX_ATTEMPTS);
        assert_eq!(
            config.session_ttl_seconds(),
            super::DEFAULT_SESSION_TTL_SECONDS
        );

        let config = config
            .with_otp_ttl_seconds(120)
            .with_otp_max_attempts(3)
            .with_session_ttl_seconds(60);

        assert_eq!(config.otp_ttl_seconds(), 120);
        assert_eq!(config.otp_max_attempts(), 3);
        assert_eq!(config.session_ttl_seconds(), 60);
    }

    #[test]
    fn manual_clock_advances_only_when_told() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(11));
        assert_eq!(clock.now(), start + Duration::minutes(11));
    }

    #[test]
    fn auth_state_uses_injected_clock() {
        let start = Utc::now() - Duration::days(1);
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        let sender: Arc<dyn CodeSender> = Arc::new(LogCodeSender);
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        let state = AuthState::new(
            AuthConfig::new("https://hdnotes.dev".to_string()),
            store,
            sender,
            limiter,
        )
        .with_clock(Arc::new(ManualClock::new(start)));
        assert_eq!(state.now(), start);
    }
}
