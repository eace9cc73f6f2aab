//! Maps validated CLI arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, email, ARG_DSN, ARG_PORT};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(ARG_PORT)
        .copied()
        .context("missing required argument: --port")?;
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty());

    let auth_opts = auth::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        otp_ttl_seconds: auth_opts.otp_ttl_seconds,
        otp_max_attempts: auth_opts.otp_max_attempts,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        rate_limit_window_seconds: auth_opts.rate_limit.window_seconds,
        rate_limit_requests_per_ip: auth_opts.rate_limit.requests_per_ip,
        rate_limit_send_code_per_ip: auth_opts.rate_limit.send_code_per_ip,
        rate_limit_send_code_per_email: auth_opts.rate_limit.send_code_per_email,
        rate_limit_verify_code_per_ip: auth_opts.rate_limit.verify_code_per_ip,
        rate_limit_verify_code_per_email: auth_opts.rate_limit.verify_code_per_email,
        request_timeout_seconds: auth_opts.request_timeout_seconds,
        sweep_interval_seconds: auth_opts.sweep_interval_seconds,
        email_webhook_url: email_opts.webhook_url,
        email_api_token: email_opts.api_token,
        email_from: email_opts.from,
        email_dispatch_timeout_ms: email_opts.dispatch_timeout_ms,
        email_dispatch_max_attempts: email_opts.dispatch_max_attempts,
        email_dispatch_backoff_base_ms: email_opts.dispatch_backoff_base_ms,
        email_dispatch_backoff_max_ms: email_opts.dispatch_backoff_max_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn server_action_without_dsn() -> Result<()> {
        temp_env::with_vars(
            [
                ("HDNOTES_DSN", None::<&str>),
                ("HDNOTES_PORT", None),
                ("HDNOTES_EMAIL_WEBHOOK_URL", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["hdnotes"]);
                let Action::Server(args) = handler(&matches)?;
                assert_eq!(args.port, 5000);
                assert!(args.dsn.is_none());
                assert!(args.email_webhook_url.is_none());
                assert_eq!(args.otp_max_attempts, 5);
                Ok(())
            },
        )
    }

    #[test]
    fn server_action_with_dsn_and_webhook() -> Result<()> {
        temp_env::with_vars(
            [
                (
                    "HDNOTES_DSN",
                    Some("postgres://hdnotes@localhost:5432/hdnotes"),
                ),
                ("HDNOTES_PORT", Some("8080")),
                (
                    "HDNOTES_EMAIL_WEBHOOK_URL",
                    Some("https://mail.example.com/send"),
                ),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "hdnotes",
                    "--session-ttl-seconds",
                    "3600",
                ]);
                let Action::Server(args) = handler(&matches)?;
                assert_eq!(args.port, 8080);
                assert_eq!(
                    args.dsn.as_deref(),
                    Some("postgres://hdnotes@localhost:5432/hdnotes")
                );
                assert_eq!(
                    args.email_webhook_url.as_deref(),
                    Some("https://mail.example.com/send")
                );
                assert_eq!(args.session_ttl_seconds, 3600);
                Ok(())
            },
        )
    }

    #[test]
    fn blank_dsn_uses_memory_store() -> Result<()> {
        temp_env::with_vars([("HDNOTES_DSN", Some(" "))], || {
            let matches = commands::new().get_matches_from(vec!["hdnotes"]);
            let Action::Server(args) = handler(&matches)?;
            assert!(args.dsn.is_none());
            Ok(())
        })
    }
}
