//! One-time code issuance and verification.
//!
//! Flow Overview:
//! 1) `request_code` normalizes the email, applies rate limits and purpose
//!    rules, then upserts a fresh challenge keyed by `(email, purpose)`.
//!    Any earlier challenge for the same key is superseded.
//! 2) The raw code leaves the process once, through the `CodeSender`; only
//!    `SHA-256(salt || code)` is stored.
//! 3) `verify_code` checks the challenge (present, unconsumed, unexpired),
//!    counts the attempt atomically, compares in constant time and flips
//!    `consumed` with a compare-and-swap, so at most one caller ever wins.
//! 4) The winner finalizes the user (create on signup, load on signin) and
//!    receives a new session token.
//!
//! Signin never reveals whether an email is registered: an unknown email gets
//! the same response on send and a stored challenge that no code matches, so
//! attempt counting, expiry and supersession behave exactly as for a real
//! account. Nothing is dispatched for it.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use super::{
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::AuthState,
    utils::{
        code_matches, generate_code, generate_salt, generate_session_token, hash_code,
        hash_session_token, normalize_email, parse_date_of_birth, unmatchable_hash, valid_email,
    },
};
use crate::{
    api::email::{dispatch_code, DispatchOutcome},
    store::{InsertUserOutcome, OtpChallenge, Profile, Purpose, SessionRecord, User},
};

const MAX_FULL_NAME_CHARS: usize = 100;
const SESSION_INSERT_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("Please provide a valid email address")]
    InvalidEmail,
    #[error("Full name and date of birth are required")]
    MissingProfile,
    #[error("{0}")]
    InvalidProfile(&'static str),
    #[error("User already exists with this email")]
    DuplicateUser,
    #[error("Too many requests, please try again later")]
    RateLimited,
    #[error("Invalid code")]
    NoChallenge,
    #[error("This code has already been used")]
    AlreadyConsumed,
    #[error("Code has expired, please request a new one")]
    Expired,
    #[error("Too many failed attempts, please request a new code")]
    TooManyAttempts,
    #[error("Invalid code")]
    Mismatch,
    #[error("Invalid code")]
    NoSuchUser,
    #[error("Failed to send verification code")]
    Dispatch(anyhow::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Raw profile fields as submitted by the client.
#[derive(Clone, Debug, Default)]
pub struct ProfileInput {
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
}

impl ProfileInput {
    fn is_empty(&self) -> bool {
        let blank = |value: &Option<String>| value.as_deref().map_or(true, |v| v.trim().is_empty());
        blank(&self.full_name) && blank(&self.date_of_birth)
    }
}

/// A session minted by a successful verification.
#[derive(Debug)]
pub struct IssuedSession {
    /// Raw bearer token; only its hash is stored.
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

/// Validate signup profile fields against `today`.
pub(crate) fn validate_profile(
    input: &ProfileInput,
    today: chrono::NaiveDate,
) -> Result<Profile, OtpError> {
    let full_name = input
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(OtpError::MissingProfile)?;
    let date_of_birth = input
        .date_of_birth
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(OtpError::MissingProfile)?;

    if full_name.chars().count() > MAX_FULL_NAME_CHARS {
        return Err(OtpError::InvalidProfile("Full name is too long"));
    }
    let date_of_birth = parse_date_of_birth(date_of_birth)
        .ok_or(OtpError::InvalidProfile("Date of birth must be YYYY-MM-DD"))?;
    if date_of_birth > today {
        return Err(OtpError::InvalidProfile(
            "Date of birth cannot be in the future",
        ));
    }
    Ok(Profile {
        full_name: full_name.to_string(),
        date_of_birth,
    })
}

fn checked_email(raw: &str) -> Result<String, OtpError> {
    let email = normalize_email(raw);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(OtpError::InvalidEmail)
    }
}

fn check_rate_limits(
    state: &AuthState,
    email: &str,
    client_ip: Option<&str>,
    action: RateLimitAction,
) -> Result<(), OtpError> {
    let limiter = state.rate_limiter();
    if limiter.check_ip(client_ip, action) == RateLimitDecision::Limited
        || limiter.check_email(email, action) == RateLimitDecision::Limited
    {
        return Err(OtpError::RateLimited);
    }
    Ok(())
}

/// `now + ttl_seconds`, rejecting lifetimes chrono cannot represent.
fn expiry(now: DateTime<Utc>, ttl_seconds: i64) -> Result<DateTime<Utc>, OtpError> {
    Duration::try_seconds(ttl_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| OtpError::Store(anyhow!("lifetime of {ttl_seconds}s is out of range")))
}

/// Issue a code for `(email, purpose)` and hand it to the configured sender.
///
/// Signin for an unknown email stores a challenge with a random hash and
/// skips delivery.
#[instrument(skip_all, fields(purpose = %purpose))]
pub async fn request_code(
    state: &AuthState,
    email: &str,
    purpose: Purpose,
    profile: Option<&ProfileInput>,
    client_ip: Option<&str>,
) -> Result<(), OtpError> {
    let email = checked_email(email)?;
    let now = state.now();

    let profile = match purpose {
        Purpose::Signup => Some(validate_profile(
            profile.ok_or(OtpError::MissingProfile)?,
            now.date_naive(),
        )?),
        Purpose::Signin => None,
    };

    check_rate_limits(state, &email, client_ip, RateLimitAction::SendCode)?;

    let existing = state.store().find_user_by_email(&email).await?;
    if purpose == Purpose::Signup && existing.is_some() {
        return Err(OtpError::DuplicateUser);
    }
    let unknown_signin = purpose == Purpose::Signin && existing.is_none();

    let code = generate_code();
    let salt = generate_salt()?;
    let code_hash = if unknown_signin {
        unmatchable_hash()?
    } else {
        hash_code(&salt, &code)
    };
    let challenge = OtpChallenge {
        id: uuid::Uuid::new_v4(),
        email: email.clone(),
        purpose,
        code_hash,
        salt,
        profile,
        issued_at: now,
        expires_at: expiry(now, state.config().otp_ttl_seconds())?,
        consumed: false,
        attempt_count: 0,
    };
    state.store().upsert_challenge(&challenge).await?;

    if unknown_signin {
        info!("signin code requested for unknown email");
        return Ok(());
    }

    match dispatch_code(
        state.sender(),
        state.config().dispatch(),
        email,
        code,
        purpose,
    )
    .await
    {
        Ok(DispatchOutcome::Sent) => {
            info!("otp code sent");
            Ok(())
        }
        Ok(DispatchOutcome::Pending) => Ok(()),
        Err(err) => Err(OtpError::Dispatch(err)),
    }
}

/// Check a submitted code and, on success, finalize the user and mint a session.
#[instrument(skip_all, fields(purpose = %purpose))]
pub async fn verify_code(
    state: &AuthState,
    email: &str,
    purpose: Purpose,
    code: &str,
    profile: Option<&ProfileInput>,
    client_ip: Option<&str>,
) -> Result<IssuedSession, OtpError> {
    let email = checked_email(email)?;
    let now = state.now();

    // Signup profile from the request wins; otherwise fall back to the one bound at issuance.
    let requested_profile = match profile {
        Some(input) if purpose == Purpose::Signup && !input.is_empty() => {
            Some(validate_profile(input, now.date_naive())?)
        }
        _ => None,
    };

    check_rate_limits(state, &email, client_ip, RateLimitAction::VerifyCode)?;

    let store = state.store();
    let challenge = store
        .find_challenge(&email, purpose)
        .await?
        .ok_or(OtpError::NoChallenge)?;
    if challenge.consumed {
        return Err(OtpError::AlreadyConsumed);
    }
    if now > challenge.expires_at {
        return Err(OtpError::Expired);
    }

    let Some(attempts) = store.register_attempt(challenge.id).await? else {
        // Consumed or superseded between the read and the increment.
        return Err(lost_challenge(state, &email, purpose, challenge.id).await?);
    };
    if attempts > state.config().otp_max_attempts() {
        warn!(attempts, "otp attempts exhausted");
        return Err(OtpError::TooManyAttempts);
    }
    if !code_matches(&challenge.salt, code, &challenge.code_hash) {
        return Err(OtpError::Mismatch);
    }
    if !store.consume_challenge(challenge.id, now).await? {
        return Err(OtpError::AlreadyConsumed);
    }

    let user = match purpose {
        Purpose::Signup => {
            let profile = requested_profile
                .or(challenge.profile)
                .ok_or(OtpError::MissingProfile)?;
            match store.insert_user(&email, &profile, now).await? {
                InsertUserOutcome::Created(user) => {
                    info!(user_id = %user.id, "user created");
                    user
                }
                InsertUserOutcome::Conflict => return Err(OtpError::DuplicateUser),
            }
        }
        Purpose::Signin => store
            .find_user_by_email(&email)
            .await?
            .ok_or(OtpError::NoSuchUser)?,
    };

    let (token, expires_at) = issue_session(state, &user, now).await?;
    info!(user_id = %user.id, "session issued");
    Ok(IssuedSession {
        token,
        user,
        expires_at,
    })
}

async fn lost_challenge(
    state: &AuthState,
    email: &str,
    purpose: Purpose,
    challenge_id: uuid::Uuid,
) -> Result<OtpError, OtpError> {
    let current = state.store().find_challenge(email, purpose).await?;
    Ok(match current {
        Some(current) if current.id == challenge_id && current.consumed => {
            OtpError::AlreadyConsumed
        }
        _ => OtpError::NoChallenge,
    })
}

async fn issue_session(
    state: &AuthState,
    user: &User,
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>), OtpError> {
    let expires_at = expiry(now, state.config().session_ttl_seconds())?;
    for _ in 0..SESSION_INSERT_ATTEMPTS {
        let token = generate_session_token()?;
        let record = SessionRecord {
            token_hash: hash_session_token(&token),
            user_id: user.id,
            issued_at: now,
            expires_at,
        };
        if state.store().insert_session(&record).await? {
            return Ok((token, expires_at));
        }
        warn!("session token collision, regenerating");
    }
    Err(OtpError::Store(anyhow::anyhow!(
        "failed to insert session after {SESSION_INSERT_ATTEMPTS} attempts"
    )))
}
