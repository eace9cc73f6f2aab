//! Auth handlers and supporting modules.
//!
//! This module coordinates passwordless signup/signin with emailed one-time
//! codes, session management, and the guard protecting user data.
//!
//! ## Codes
//!
//! - **Format:** 6 digits, stored as `SHA-256(salt || code)` with a per-challenge salt.
//! - **Lifetime:** 10 minutes; a newer code for the same email and purpose replaces it.
//! - **Attempts:** 5 per code. Further attempts fail even with the right code.
//!
//! ## Sessions
//!
//! A verified code yields a random 256-bit token, returned in the body and in
//! the `hdnotes_session` cookie (`HttpOnly; Secure; SameSite=None`). Only its
//! hash is stored. Sessions last 7 days or until logout.

pub(crate) mod otp;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod session;
pub(crate) mod signin;
pub(crate) mod signup;
mod state;
pub(crate) mod types;
mod utils;

pub use otp::{request_code, verify_code, IssuedSession, OtpError, ProfileInput};
pub use principal::{require_session, Principal};
pub use rate_limit::{
    MemoryRateLimiter, NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter,
    RateLimits,
};
pub use session::SessionError;
pub use state::{AuthConfig, AuthState, Clock, ManualClock, SystemClock};
pub use utils::ClientIp;
