//! Small helpers for auth validation, OTP codes and session tokens.

use anyhow::{Context, Result};
use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap},
};
use base64::Engine;
use chrono::NaiveDate;
use rand::{rngs::OsRng, Rng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use subtle::ConstantTimeEq;

pub(crate) const CODE_DIGITS: usize = 6;
const CODE_SPACE: u32 = 1_000_000;
const SALT_LEN: usize = 16;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Parse an ISO-8601 calendar date (`YYYY-MM-DD`), also accepting a full timestamp.
pub(crate) fn parse_date_of_birth(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|ts| ts.date_naive())
        })
}

/// Generate a fixed-width decimal code from the OS CSPRNG.
pub(crate) fn generate_code() -> String {
    let value = OsRng.gen_range(0..CODE_SPACE);
    format!("{value:0width$}", width = CODE_DIGITS)
}

/// Per-challenge salt mixed into the code hash.
pub(crate) fn generate_salt() -> Result<Vec<u8>> {
    let mut salt = vec![0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate otp salt")?;
    Ok(salt)
}

/// `SHA-256(salt || code)`; the raw code is never stored.
pub(crate) fn hash_code(salt: &[u8], code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(code.as_bytes());
    hasher.finalize().to_vec()
}

/// Random digest stored for challenges that must never verify.
pub(crate) fn unmatchable_hash() -> Result<Vec<u8>> {
    let mut hash = vec![0u8; 32];
    OsRng
        .try_fill_bytes(&mut hash)
        .context("failed to generate challenge hash")?;
    Ok(hash)
}

/// Constant-time comparison of a submitted code against the stored hash.
pub(crate) fn code_matches(salt: &[u8], submitted: &str, expected_hash: &[u8]) -> bool {
    let candidate = hash_code(salt, submitted.trim());
    candidate.as_slice().ct_eq(expected_hash).into()
}

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the store keeps a hash.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the store.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Client address used for per-IP limits, resolved once by the request
/// throttle and stored in the request extensions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientIp(Option<String>);

impl ClientIp {
    /// Proxy headers first, then the peer address of the connection.
    pub(crate) fn resolve(headers: &HeaderMap, extensions: &Extensions) -> Self {
        let ip = extract_client_ip(headers).or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        Self(ip)
    }

    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
