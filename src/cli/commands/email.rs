use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_EMAIL_WEBHOOK_URL: &str = "email-webhook-url";
pub const ARG_EMAIL_API_TOKEN: &str = "email-api-token";
pub const ARG_EMAIL_FROM: &str = "email-from";
pub const ARG_DISPATCH_TIMEOUT_MS: &str = "email-dispatch-timeout-ms";
pub const ARG_DISPATCH_MAX_ATTEMPTS: &str = "email-dispatch-max-attempts";
pub const ARG_DISPATCH_BACKOFF_BASE_MS: &str = "email-dispatch-backoff-base-ms";
pub const ARG_DISPATCH_BACKOFF_MAX_MS: &str = "email-dispatch-backoff-max-ms";

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_WEBHOOK_URL)
                .long(ARG_EMAIL_WEBHOOK_URL)
                .help("HTTP endpoint that delivers code emails")
                .long_help(
                    "HTTP endpoint that delivers code emails. When unset, codes are written to the log instead of being sent.",
                )
                .env("HDNOTES_EMAIL_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_EMAIL_API_TOKEN)
                .long(ARG_EMAIL_API_TOKEN)
                .help("Bearer token for the email endpoint")
                .env("HDNOTES_EMAIL_API_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender address for code emails")
                .env("HDNOTES_EMAIL_FROM")
                .default_value("HD Notes <no-reply@hdnotes.dev>"),
        )
        .arg(
            Arg::new(ARG_DISPATCH_TIMEOUT_MS)
                .long(ARG_DISPATCH_TIMEOUT_MS)
                .help("How long a code request waits for delivery before answering")
                .env("HDNOTES_EMAIL_DISPATCH_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DISPATCH_MAX_ATTEMPTS)
                .long(ARG_DISPATCH_MAX_ATTEMPTS)
                .help("Delivery attempts per code")
                .env("HDNOTES_EMAIL_DISPATCH_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_DISPATCH_BACKOFF_BASE_MS)
                .long(ARG_DISPATCH_BACKOFF_BASE_MS)
                .help("Base delay for delivery retry backoff")
                .env("HDNOTES_EMAIL_DISPATCH_BACKOFF_BASE_MS")
                .default_value("200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DISPATCH_BACKOFF_MAX_MS)
                .long(ARG_DISPATCH_BACKOFF_MAX_MS)
                .help("Maximum delay for delivery retry backoff")
                .env("HDNOTES_EMAIL_DISPATCH_BACKOFF_MAX_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub webhook_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub from: String,
    pub dispatch_timeout_ms: u64,
    pub dispatch_max_attempts: u32,
    pub dispatch_backoff_base_ms: u64,
    pub dispatch_backoff_max_ms: u64,
}

impl Options {
    /// Parse email delivery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if an argument with a default is somehow missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        // clap passes through empty env values; treat them as unset
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let get_u64 = |id: &str| {
            matches
                .get_one::<u64>(id)
                .copied()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        Ok(Self {
            webhook_url: get_non_empty(ARG_EMAIL_WEBHOOK_URL),
            api_token: get_non_empty(ARG_EMAIL_API_TOKEN).map(SecretString::from),
            from: get_non_empty(ARG_EMAIL_FROM)
                .with_context(|| format!("missing required argument: --{ARG_EMAIL_FROM}"))?,
            dispatch_timeout_ms: get_u64(ARG_DISPATCH_TIMEOUT_MS)?,
            dispatch_max_attempts: matches
                .get_one::<u32>(ARG_DISPATCH_MAX_ATTEMPTS)
                .copied()
                .with_context(|| {
                    format!("missing required argument: --{ARG_DISPATCH_MAX_ATTEMPTS}")
                })?,
            dispatch_backoff_base_ms: get_u64(ARG_DISPATCH_BACKOFF_BASE_MS)?,
            dispatch_backoff_max_ms: get_u64(ARG_DISPATCH_BACKOFF_MAX_MS)?,
        })
    }
}
