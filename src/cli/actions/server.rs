use crate::{
    api::{
        self,
        email::{CodeSender, DispatchConfig, LogCodeSender, WebhookCodeSender},
        handlers::auth::{AuthConfig, AuthState, MemoryRateLimiter, RateLimits},
        ServerConfig,
    },
    store::{memory::MemoryStore, postgres::PgStore, CredentialStore, NoteStore},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub frontend_base_url: String,
    pub otp_ttl_seconds: i64,
    pub otp_max_attempts: u32,
    pub session_ttl_seconds: i64,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_requests_per_ip: u32,
    pub rate_limit_send_code_per_ip: u32,
    pub rate_limit_send_code_per_email: u32,
    pub rate_limit_verify_code_per_ip: u32,
    pub rate_limit_verify_code_per_email: u32,
    pub request_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub email_webhook_url: Option<String>,
    pub email_api_token: Option<SecretString>,
    pub email_from: String,
    pub email_dispatch_timeout_ms: u64,
    pub email_dispatch_max_attempts: u32,
    pub email_dispatch_backoff_base_ms: u64,
    pub email_dispatch_backoff_max_ms: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the email sender cannot be
/// built, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let (credentials, notes) = open_store(args.dsn.as_deref()).await?;

    let sender: Arc<dyn CodeSender> = if let Some(url) = args.email_webhook_url.clone() {
        info!(%url, "delivering codes through the email webhook");
        Arc::new(
            WebhookCodeSender::new(url, args.email_api_token.clone(), args.email_from.clone())?
                .with_code_ttl_seconds(args.otp_ttl_seconds),
        )
    } else {
        warn!("no email webhook configured; one-time codes will be written to the log");
        Arc::new(LogCodeSender)
    };

    let rate_limiter = Arc::new(MemoryRateLimiter::new(
        Duration::from_secs(args.rate_limit_window_seconds),
        rate_limits(&args),
    ));

    let auth_state = AuthState::new(auth_config(&args), credentials, sender, rate_limiter);

    let server_config = ServerConfig::new()
        .with_request_timeout_seconds(args.request_timeout_seconds)
        .with_sweep_interval_seconds(args.sweep_interval_seconds);

    api::new(args.port, Arc::new(auth_state), notes, server_config).await
}

async fn open_store(dsn: Option<&str>) -> Result<(Arc<dyn CredentialStore>, Arc<dyn NoteStore>)> {
    if let Some(dsn) = dsn {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .max_lifetime(Duration::from_secs(60 * 30))
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        info!("connected to PostgreSQL");
        let store = Arc::new(PgStore::new(pool));
        let credentials: Arc<dyn CredentialStore> = store.clone();
        let notes: Arc<dyn NoteStore> = store;
        Ok((credentials, notes))
    } else {
        warn!("no DSN configured; data is kept in memory and lost on restart");
        let store = Arc::new(MemoryStore::new());
        let credentials: Arc<dyn CredentialStore> = store.clone();
        let notes: Arc<dyn NoteStore> = store;
        Ok((credentials, notes))
    }
}

fn auth_config(args: &Args) -> AuthConfig {
    let dispatch = DispatchConfig::new()
        .with_timeout_ms(args.email_dispatch_timeout_ms)
        .with_max_attempts(args.email_dispatch_max_attempts)
        .with_backoff_base_ms(args.email_dispatch_backoff_base_ms)
        .with_backoff_max_ms(args.email_dispatch_backoff_max_ms)
        .normalize();

    AuthConfig::new(args.frontend_base_url.clone())
        .with_otp_ttl_seconds(args.otp_ttl_seconds)
        .with_otp_max_attempts(args.otp_max_attempts)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_dispatch(dispatch)
}

const fn rate_limits(args: &Args) -> RateLimits {
    RateLimits {
        requests_per_ip: args.rate_limit_requests_per_ip,
        send_code_per_ip: args.rate_limit_send_code_per_ip,
        send_code_per_email: args.rate_limit_send_code_per_email,
        verify_code_per_ip: args.rate_limit_verify_code_per_ip,
        verify_code_per_email: args.rate_limit_verify_code_per_email,
    }
}
