//! # hdnotes (Notes API with passwordless sign-in)
//!
//! `hdnotes` serves a JSON API for a notes application. Users sign up and sign
//! in with a one-time code delivered by email; a successful verification
//! mints an opaque session token carried in an `HttpOnly` cookie.
//!
//! ## Authentication (email OTP)
//!
//! - **Codes:** 6 decimal digits drawn from the OS CSPRNG. Only
//!   `SHA-256(salt || code)` is stored, with a fresh salt per challenge.
//! - **Challenges:** one per `(email, purpose)`; issuing a new code supersedes
//!   the previous one. Codes expire after 10 minutes and lock after 5 attempts.
//! - **Sessions:** random 256-bit tokens; the database stores only their hash.
//!
//! Signin never reveals whether an email is registered: unknown addresses get
//! the same response as known ones and a challenge no code can match, so every
//! verification failure (wrong code, lockout, expiry) reads the same.
//!
//! ## Notes
//!
//! Every note belongs to exactly one user. Requests for notes owned by someone
//! else answer `404 Not Found` so note ids cannot be probed.

pub mod api;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
