use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_MAX_ATTEMPTS: &str = "otp-max-attempts";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_RATE_LIMIT_REQUESTS: &str = "rate-limit-requests";
pub const ARG_RATE_LIMIT_SEND_PER_IP: &str = "rate-limit-send-code-per-ip";
pub const ARG_RATE_LIMIT_SEND_PER_EMAIL: &str = "rate-limit-send-code-per-email";
pub const ARG_RATE_LIMIT_VERIFY_PER_IP: &str = "rate-limit-verify-code-per-ip";
pub const ARG_RATE_LIMIT_VERIFY_PER_EMAIL: &str = "rate-limit-verify-code-per-email";
pub const ARG_REQUEST_TIMEOUT_SECONDS: &str = "request-timeout-seconds";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

const MAX_OTP_TTL_SECONDS: i64 = 24 * 60 * 60;
const MAX_SESSION_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

pub fn with_args(command: Command) -> Command {
    let command = with_auth_otp_args(command);
    let command = with_rate_limit_args(command);
    with_server_args(command)
}

fn with_auth_otp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend origin allowed by CORS")
                .env("HDNOTES_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("One-time code lifetime in seconds")
                .env("HDNOTES_OTP_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_OTP_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_ATTEMPTS)
                .long(ARG_OTP_MAX_ATTEMPTS)
                .help("Verification attempts allowed per code")
                .env("HDNOTES_OTP_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds")
                .env("HDNOTES_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_TTL_SECONDS)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Rate limit window in seconds")
                .env("HDNOTES_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_REQUESTS)
                .long(ARG_RATE_LIMIT_REQUESTS)
                .help("Requests per IP per window, across all routes")
                .env("HDNOTES_RATE_LIMIT_REQUESTS")
                .default_value("100")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_SEND_PER_IP)
                .long(ARG_RATE_LIMIT_SEND_PER_IP)
                .help("Code requests per IP per window")
                .env("HDNOTES_RATE_LIMIT_SEND_CODE_PER_IP")
                .default_value("20")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_SEND_PER_EMAIL)
                .long(ARG_RATE_LIMIT_SEND_PER_EMAIL)
                .help("Code requests per email per window")
                .env("HDNOTES_RATE_LIMIT_SEND_CODE_PER_EMAIL")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_VERIFY_PER_IP)
                .long(ARG_RATE_LIMIT_VERIFY_PER_IP)
                .help("Code verifications per IP per window")
                .env("HDNOTES_RATE_LIMIT_VERIFY_CODE_PER_IP")
                .default_value("50")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_VERIFY_PER_EMAIL)
                .long(ARG_RATE_LIMIT_VERIFY_PER_EMAIL)
                .help("Code verifications per email per window")
                .env("HDNOTES_RATE_LIMIT_VERIFY_CODE_PER_EMAIL")
                .default_value("20")
                .value_parser(clap::value_parser!(u32)),
        )
}

fn with_server_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REQUEST_TIMEOUT_SECONDS)
                .long(ARG_REQUEST_TIMEOUT_SECONDS)
                .help("Per-request timeout in seconds")
                .env("HDNOTES_REQUEST_TIMEOUT_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between expired record sweeps, 0 disables")
                .env("HDNOTES_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOptions {
    pub window_seconds: u64,
    pub requests_per_ip: u32,
    pub send_code_per_ip: u32,
    pub send_code_per_email: u32,
    pub verify_code_per_ip: u32,
    pub verify_code_per_email: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub frontend_base_url: String,
    pub otp_ttl_seconds: i64,
    pub otp_max_attempts: u32,
    pub session_ttl_seconds: i64,
    pub rate_limit: RateLimitOptions,
    pub request_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

impl Options {
    /// Parse auth, rate limit and server arguments from matches.
    ///
    /// # Errors
    /// Returns an error if an argument is missing or the frontend URL is blank.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let frontend_base_url: String = required(matches, ARG_FRONTEND_BASE_URL)?;
        if frontend_base_url.trim().is_empty() {
            bail!("--{ARG_FRONTEND_BASE_URL} must not be empty");
        }

        Ok(Self {
            frontend_base_url: frontend_base_url.trim().to_string(),
            otp_ttl_seconds: required(matches, ARG_OTP_TTL_SECONDS)?,
            otp_max_attempts: required(matches, ARG_OTP_MAX_ATTEMPTS)?,
            session_ttl_seconds: required(matches, ARG_SESSION_TTL_SECONDS)?,
            rate_limit: RateLimitOptions {
                window_seconds: required(matches, ARG_RATE_LIMIT_WINDOW_SECONDS)?,
                requests_per_ip: required(matches, ARG_RATE_LIMIT_REQUESTS)?,
                send_code_per_ip: required(matches, ARG_RATE_LIMIT_SEND_PER_IP)?,
                send_code_per_email: required(matches, ARG_RATE_LIMIT_SEND_PER_EMAIL)?,
                verify_code_per_ip: required(matches, ARG_RATE_LIMIT_VERIFY_PER_IP)?,
                verify_code_per_email: required(matches, ARG_RATE_LIMIT_VERIFY_PER_EMAIL)?,
            },
            request_timeout_seconds: required(matches, ARG_REQUEST_TIMEOUT_SECONDS)?,
            sweep_interval_seconds: required(matches, ARG_SWEEP_INTERVAL_SECONDS)?,
        })
    }
}
