//! `PostgreSQL` backend. Table layout lives in `sql/schema.sql`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{
    CredentialStore, InsertUserOutcome, Note, NoteStore, OtpChallenge, Profile, PurgeStats,
    Purpose, SessionRecord, User,
};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = r"
            SELECT id, email, full_name, date_of_birth, created_at
            FROM users
            WHERE email = $1
        ";
        sqlx::query_as::<_, User>(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by email")
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let query = r"
            SELECT id, email, full_name, date_of_birth, created_at
            FROM users
            WHERE id = $1
        ";
        sqlx::query_as::<_, User>(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user")
    }

    async fn insert_user(
        &self,
        email: &str,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<InsertUserOutcome> {
        let query = r"
            INSERT INTO users (id, email, full_name, date_of_birth, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, full_name, date_of_birth, created_at
        ";
        let result = sqlx::query_as::<_, User>(query)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(&profile.full_name)
            .bind(profile.date_of_birth)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match result {
            Ok(user) => Ok(InsertUserOutcome::Created(user)),
            Err(err) if is_unique_violation(&err) => Ok(InsertUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn upsert_challenge(&self, challenge: &OtpChallenge) -> Result<()> {
        // One row per (email, purpose): a new code replaces the id, hash, counters and expiry
        // in a single statement so concurrent issuers end with exactly one live challenge.
        let query = r"
            INSERT INTO otp_challenges
                (id, email, purpose, code_hash, salt, full_name, date_of_birth,
                 issued_at, expires_at, consumed, attempt_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, 0)
            ON CONFLICT (email, purpose) DO UPDATE
            SET id = EXCLUDED.id,
                code_hash = EXCLUDED.code_hash,
                salt = EXCLUDED.salt,
                full_name = EXCLUDED.full_name,
                date_of_birth = EXCLUDED.date_of_birth,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                consumed = FALSE,
                consumed_at = NULL,
                attempt_count = 0
        ";
        let profile = challenge.profile.as_ref();
        sqlx::query(query)
            .bind(challenge.id)
            .bind(&challenge.email)
            .bind(challenge.purpose.as_str())
            .bind(&challenge.code_hash)
            .bind(&challenge.salt)
            .bind(profile.map(|p| p.full_name.as_str()))
            .bind(profile.map(|p| p.date_of_birth))
            .bind(challenge.issued_at)
            .bind(challenge.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to upsert otp challenge")?;
        Ok(())
    }

    async fn find_challenge(&self, email: &str, purpose: Purpose) -> Result<Option<OtpChallenge>> {
        let query = r"
            SELECT id, email, purpose, code_hash, salt, full_name, date_of_birth,
                   issued_at, expires_at, consumed, attempt_count
            FROM otp_challenges
            WHERE email = $1 AND purpose = $2
        ";
        sqlx::query_as::<_, OtpChallenge>(query)
            .bind(email)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup otp challenge")
    }

    async fn register_attempt(&self, challenge_id: Uuid) -> Result<Option<u32>> {
        let query = r"
            UPDATE otp_challenges
            SET attempt_count = attempt_count + 1
            WHERE id = $1 AND NOT consumed
            RETURNING attempt_count
        ";
        let row = sqlx::query(query)
            .bind(challenge_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to register otp attempt")?;
        Ok(row.map(|row| {
            let count: i32 = row.get("attempt_count");
            u32::try_from(count).unwrap_or(u32::MAX)
        }))
    }

    async fn consume_challenge(&self, challenge_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE otp_challenges
            SET consumed = TRUE,
                consumed_at = $2
            WHERE id = $1 AND NOT consumed
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(challenge_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume otp challenge")?;
        Ok(row.is_some())
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<bool> {
        let query = r"
            INSERT INTO user_sessions (token_hash, user_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
        ";
        let result = sqlx::query(query)
            .bind(&session.token_hash)
            .bind(session.user_id)
            .bind(session.issued_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err).context("failed to insert session"),
        }
    }

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT token_hash, user_id, issued_at, expires_at
            FROM user_sessions
            WHERE token_hash = $1
        ";
        sqlx::query_as::<_, SessionRecord>(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session")
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM user_sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeStats> {
        let mut tx = self.pool.begin().await.context("begin purge transaction")?;

        let query = "DELETE FROM otp_challenges WHERE expires_at <= $1";
        let challenges = sqlx::query(query)
            .bind(now)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge otp challenges")?
            .rows_affected();

        let query = "DELETE FROM user_sessions WHERE expires_at <= $1";
        let sessions = sqlx::query(query)
            .bind(now)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge sessions")?
            .rows_affected();

        tx.commit().await.context("commit purge transaction")?;

        Ok(PurgeStats {
            challenges,
            sessions,
        })
    }
}

#[async_trait]
impl NoteStore for PgStore {
    async fn list_notes(&self, user_id: Uuid) -> Result<Vec<Note>> {
        let query = r"
            SELECT id, user_id, title, content, created_at, updated_at
            FROM notes
            WHERE user_id = $1
            ORDER BY created_at DESC
        ";
        sqlx::query_as::<_, Note>(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list notes")
    }

    async fn insert_note(&self, note: &Note) -> Result<()> {
        let query = r"
            INSERT INTO notes (id, user_id, title, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(note.id)
            .bind(note.user_id)
            .bind(&note.title)
            .bind(&note.content)
            .bind(note.created_at)
            .bind(note.updated_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert note")?;
        Ok(())
    }

    async fn update_note(
        &self,
        user_id: Uuid,
        note_id: Uuid,
        title: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Note>> {
        // Ownership is part of the predicate so foreign notes look missing.
        let query = r"
            UPDATE notes
            SET title = $3,
                content = $4,
                updated_at = $5
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, title, content, created_at, updated_at
        ";
        sqlx::query_as::<_, Note>(query)
            .bind(note_id)
            .bind(user_id)
            .bind(title)
            .bind(content)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update note")
    }

    async fn delete_note(&self, user_id: Uuid, note_id: Uuid) -> Result<bool> {
        let query = "DELETE FROM notes WHERE id = $1 AND user_id = $2";
        let result = sqlx::query(query)
            .bind(note_id)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete note")?;
        Ok(result.rows_affected() > 0)
    }
}
