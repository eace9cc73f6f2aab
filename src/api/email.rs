//! One-time code delivery.
//!
//! The OTP issuer hands the raw code to a [`CodeSender`] exactly once, right
//! after the challenge is persisted. [`dispatch_code`] wraps the sender with
//! bounded retries (exponential backoff with jitter) and an overall deadline:
//!
//! - delivery succeeds inside the deadline: `DispatchOutcome::Sent`
//! - delivery fails inside the deadline: the last error is returned
//! - the deadline elapses: the task keeps running detached and the caller gets
//!   `DispatchOutcome::Pending`, so a slow provider never stalls the request
//!
//! `LogCodeSender` is the local dev sender; `WebhookCodeSender` posts to a
//! transactional email HTTP API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn, Instrument};

use crate::store::Purpose;

/// Delivery abstraction for one-time codes.
#[async_trait]
pub trait CodeSender: Send + Sync {
    /// Deliver `code` to `to_email` or return an error so the dispatcher can retry.
    async fn send_code(&self, to_email: &str, code: &str, purpose: Purpose) -> Result<()>;
}

/// Local dev sender that logs the code instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send_code(&self, to_email: &str, code: &str, purpose: Purpose) -> Result<()> {
        info!(to_email, %purpose, code, "otp email send stub");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// Sends codes through an HTTP email API (`POST <url>` with a bearer token).
#[derive(Clone, Debug)]
pub struct WebhookCodeSender {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
    from: String,
    code_ttl_seconds: i64,
}

impl WebhookCodeSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, token: Option<SecretString>, from: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build email HTTP client")?;
        Ok(Self {
            client,
            url,
            token,
            from,
            code_ttl_seconds: 600,
        })
    }

    /// Code lifetime quoted in the message text; match the issuer's setting.
    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }
}

fn subject(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::Signup => "Verify your email",
        Purpose::Signin => "Your sign-in code",
    }
}

fn lifetime(seconds: i64) -> String {
    let (amount, unit) = if seconds % 60 == 0 {
        (seconds / 60, "minute")
    } else {
        (seconds, "second")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural}")
}

fn body(code: &str, purpose: Purpose, code_ttl_seconds: i64) -> String {
    let action = match purpose {
        Purpose::Signup => "finish creating your account",
        Purpose::Signin => "sign in",
    };
    let expires_in = lifetime(code_ttl_seconds);
    format!("Use {code} to {action}. The code expires in {expires_in}.\n\nIf you did not request it you can ignore this email.")
}

#[async_trait]
impl CodeSender for WebhookCodeSender {
    async fn send_code(&self, to_email: &str, code: &str, purpose: Purpose) -> Result<()> {
        let message = WebhookMessage {
            from: &self.from,
            to: to_email,
            subject: subject(purpose),
            text: body(code, purpose, self.code_ttl_seconds),
        };
        let mut request = self.client.post(&self.url).json(&message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        request
            .send()
            .await
            .context("email API request failed")?
            .error_for_status()
            .context("email API rejected message")?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl DispatchConfig {
    /// Default dispatch config: 5s deadline, 3 attempts, 200ms->2s backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, millis: u64) -> Self {
        self.timeout = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_ms(mut self, millis: u64) -> Self {
        self.backoff_base = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn with_backoff_max_ms(mut self, millis: u64) -> Self {
        self.backoff_max = Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let timeout = if self.timeout.is_zero() {
            Duration::from_millis(1)
        } else {
            self.timeout
        };
        let backoff_max = if self.backoff_max < self.backoff_base {
            self.backoff_base
        } else {
            self.backoff_max
        };
        Self {
            timeout,
            max_attempts: self.max_attempts.max(1),
            backoff_base: self.backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// The deadline elapsed; delivery continues in the background.
    Pending,
}

/// Deliver a code with retries, bounded by the configured deadline.
///
/// # Errors
/// Returns the last delivery error when every attempt failed before the deadline.
pub async fn dispatch_code(
    sender: Arc<dyn CodeSender>,
    config: DispatchConfig,
    to_email: String,
    code: String,
    purpose: Purpose,
) -> Result<DispatchOutcome> {
    let config = config.normalize();
    let mut handle = tokio::spawn(
        async move { send_with_retries(sender.as_ref(), &config, &to_email, &code, purpose).await }
            .in_current_span(),
    );

    match tokio::time::timeout(config.timeout(), &mut handle).await {
        Ok(Ok(result)) => result.map(|()| DispatchOutcome::Sent),
        Ok(Err(err)) => Err(anyhow!(err).context("otp dispatch task failed")),
        Err(_) => {
            warn!(
                timeout_ms = u64::try_from(config.timeout().as_millis()).unwrap_or(u64::MAX),
                "otp dispatch still running after deadline"
            );
            Ok(DispatchOutcome::Pending)
        }
    }
}

async fn send_with_retries(
    sender: &dyn CodeSender,
    config: &DispatchConfig,
    to_email: &str,
    code: &str,
    purpose: Purpose,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match sender.send_code(to_email, code, purpose).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < config.max_attempts => {
                let delay = backoff_delay(attempt, config.backoff_base, config.backoff_max);
                warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "otp email send failed, retrying: {err:#}"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(err.context(format!("otp email send failed after {attempt} attempts")));
            }
        }
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySender {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakySender {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CodeSender for FlakySender {
        async fn send_code(&self, _to: &str, _code: &str, _purpose: Purpose) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(anyhow!("smtp unavailable"));
            }
            Ok(())
        }
    }

    struct SlowSender;

    #[async_trait]
    impl CodeSender for SlowSender {
        async fn send_code(&self, _to: &str, _code: &str, _purpose: Purpose) -> Result<()> {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn fast_config() -> DispatchConfig {
        DispatchConfig::new()
            .with_timeout_ms(2_000)
            .with_max_attempts(3)
            .with_backoff_base_ms(1)
            .with_backoff_max_ms(5)
    }

    #[test]
    fn dispatch_config_normalize_clamps_values() {
        let config = DispatchConfig::new()
            .with_timeout_ms(0)
            .with_max_attempts(0)
            .with_backoff_base_ms(50)
            .with_backoff_max_ms(10)
            .normalize();
        assert_eq!(config.timeout(), Duration::from_millis(1));
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_max, Duration::from_millis(50));
    }

    #[test]
    fn backoff_delay_respects_max() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(400);
        for attempt in 1..10 {
            let delay = backoff_delay(attempt, base, max);
            assert!(delay <= max);
        }
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = jitter_delay(delay);
            assert!(jittered >= Duration::from_millis(50));
            assert!(jittered <= delay);
        }
    }

    #[tokio::test]
    async fn dispatch_retries_transient_failures() -> Result<()> {
        let sender = Arc::new(FlakySender::new(2));
        let outcome = dispatch_code(
            sender.clone(),
            fast_config(),
            "a@x.com".to_string(),
            "123456".to_string(),
            Purpose::Signin,
        )
        .await?;
        assert_eq!(outcome, DispatchOutcome::Sent);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_surfaces_persistent_failure() {
        let sender = Arc::new(FlakySender::new(10));
        let result = dispatch_code(
            sender.clone(),
            fast_config(),
            "a@x.com".to_string(),
            "123456".to_string(),
            Purpose::Signup,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dispatch_returns_pending_after_deadline() -> Result<()> {
        let outcome = dispatch_code(
            Arc::new(SlowSender),
            fast_config().with_timeout_ms(20),
            "a@x.com".to_string(),
            "123456".to_string(),
            Purpose::Signin,
        )
        .await?;
        assert_eq!(outcome, DispatchOutcome::Pending);
        Ok(())
    }

    #[test]
    fn webhook_body_mentions_code() {
        assert!(body("042517", Purpose::Signup, 600).contains("042517"));
        assert_eq!(subject(Purpose::Signin), "Your sign-in code");
    }

    #[test]
    fn webhook_body_quotes_configured_lifetime() {
        assert!(body("042517", Purpose::Signin, 600).contains("expires in 10 minutes."));
        assert!(body("042517", Purpose::Signin, 60).contains("expires in 1 minute."));
        assert!(body("042517", Purpose::Signin, 90).contains("expires in 90 seconds."));
    }
}
