//! Persistence for users, OTP challenges, sessions and notes.
//!
//! Handlers and the OTP service only talk to the [`CredentialStore`] and
//! [`NoteStore`] traits. Two backends implement them:
//!
//! - [`postgres::PgStore`]: production backend on `sqlx`. Atomicity comes from
//!   single-statement upserts and conditional updates (`... AND NOT consumed
//!   RETURNING ...`), so concurrent requests never both win.
//! - [`memory::MemoryStore`]: a mutex-guarded in-process store used by tests
//!   and for local development without a database.
//!
//! Expiry is always checked by the caller at read time; [`CredentialStore::purge_expired`]
//! only reclaims space.

pub mod memory;
pub mod models;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use self::models::{
    InsertUserOutcome, Note, OtpChallenge, Profile, PurgeStats, Purpose, SessionRecord, User,
};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Check that the backend is reachable (used by `/api/health`).
    async fn ping(&self) -> Result<()>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>>;

    /// Create a user; returns `Conflict` if the email is already registered.
    async fn insert_user(
        &self,
        email: &str,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<InsertUserOutcome>;

    /// Insert or replace the challenge for `(challenge.email, challenge.purpose)`.
    async fn upsert_challenge(&self, challenge: &OtpChallenge) -> Result<()>;

    async fn find_challenge(&self, email: &str, purpose: Purpose) -> Result<Option<OtpChallenge>>;

    /// Increment the attempt counter of an unconsumed challenge.
    ///
    /// Returns the new count, or `None` when the challenge was consumed or superseded.
    async fn register_attempt(&self, challenge_id: Uuid) -> Result<Option<u32>>;

    /// Flip `consumed` from false to true. Only one caller can ever get `true`.
    async fn consume_challenge(&self, challenge_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Store a session; returns `false` if the token hash already exists.
    async fn insert_session(&self, session: &SessionRecord) -> Result<bool>;

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Idempotent; deleting a missing session is not an error.
    async fn delete_session(&self, token_hash: &[u8]) -> Result<()>;

    /// Remove challenges and sessions whose expiry is before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeStats>;
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Notes owned by `user_id`, newest first.
    async fn list_notes(&self, user_id: Uuid) -> Result<Vec<Note>>;

    async fn insert_note(&self, note: &Note) -> Result<()>;

    /// Update a note owned by `user_id`; `None` if it does not exist or belongs to someone else.
    async fn update_note(
        &self,
        user_id: Uuid,
        note_id: Uuid,
        title: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Note>>;

    /// Delete a note owned by `user_id`; `false` if nothing was deleted.
    async fn delete_note(&self, user_id: Uuid, note_id: Uuid) -> Result<bool>;
}
