//! In-process store backed by hash maps behind a single async mutex.
//!
//! Holding one lock for every operation gives the same guarantees the
//! Postgres backend gets from conditional updates: issuance is
//! last-writer-wins per `(email, purpose)` and a challenge is consumed once.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CredentialStore, InsertUserOutcome, Note, NoteStore, OtpChallenge, Profile, PurgeStats,
    Purpose, SessionRecord, User,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    challenges: HashMap<(String, Purpose), OtpChallenge>,
    sessions: HashMap<Vec<u8>, SessionRecord>,
    notes: HashMap<Uuid, Note>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|user| user.email == email).cloned())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn insert_user(
        &self,
        email: &str,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<InsertUserOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.users.values().any(|user| user.email == email) {
            return Ok(InsertUserOutcome::Conflict);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: profile.full_name.clone(),
            date_of_birth: profile.date_of_birth,
            created_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(InsertUserOutcome::Created(user))
    }

    async fn upsert_challenge(&self, challenge: &OtpChallenge) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.challenges.insert(
            (challenge.email.clone(), challenge.purpose),
            challenge.clone(),
        );
        Ok(())
    }

    async fn find_challenge(&self, email: &str, purpose: Purpose) -> Result<Option<OtpChallenge>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .challenges
            .get(&(email.to_string(), purpose))
            .cloned())
    }

    async fn register_attempt(&self, challenge_id: Uuid) -> Result<Option<u32>> {
        let mut inner = self.inner.lock().await;
        let challenge = inner
            .challenges
            .values_mut()
            .find(|challenge| challenge.id == challenge_id && !challenge.consumed);
        Ok(challenge.map(|challenge| {
            challenge.attempt_count = challenge.attempt_count.saturating_add(1);
            challenge.attempt_count
        }))
    }

    async fn consume_challenge(&self, challenge_id: Uuid, _now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .challenges
            .values_mut()
            .find(|challenge| challenge.id == challenge_id && !challenge.consumed)
        {
            Some(challenge) => {
                challenge.consumed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session.token_hash) {
            return Ok(false);
        }
        inner
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(true)
    }

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(token_hash).cloned())
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(token_hash);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeStats> {
        let mut inner = self.inner.lock().await;
        let challenges_before = inner.challenges.len();
        inner
            .challenges
            .retain(|_, challenge| challenge.expires_at > now);
        let sessions_before = inner.sessions.len();
        inner.sessions.retain(|_, session| session.expires_at > now);
        Ok(PurgeStats {
            challenges: (challenges_before - inner.challenges.len()) as u64,
            sessions: (sessions_before - inner.sessions.len()) as u64,
        })
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn list_notes(&self, user_id: Uuid) -> Result<Vec<Note>> {
        let inner = self.inner.lock().await;
        let mut notes: Vec<Note> = inner
            .notes
            .values()
            .filter(|note| note.user_id == user_id)
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notes)
    }

    async fn insert_note(&self, note: &Note) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.notes.insert(note.id, note.clone());
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
        let mut inner = self.inner.lock().await;
        let Some(note) = inner
            .notes
            .get_mut(&note_id)
            .filter(|note| note.user_id == user_id)
        else {
            return Ok(None);
        };
        note.title = title.to_string();
        note.content = content.to_string();
        note.updated_at = now;
        Ok(Some(note.clone()))
    }

    async fn delete_note(&self, user_id: Uuid, note_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let owned = inner
            .notes
            .get(&note_id)
            .is_some_and(|note| note.user_id == user_id);
        if owned {
            inner.notes.remove(&note_id);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn profile() -> Profile {
        Profile {
            full_name: "Ada Lovelace".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 12, 10).unwrap_or_default(),
        }
    }

    fn challenge(email: &str, purpose: Purpose, now: DateTime<Utc>) -> OtpChallenge {
        OtpChallenge {
            id: Uuid::new_v4(),
            email: email.to_string(),
            purpose,
            code_hash: vec![1, 2, 3],
            salt: vec![4, 5, 6],
            profile: None,
            issued_at: now,
            expires_at: now + Duration::minutes(10),
            consumed: false,
            attempt_count: 0,
        }
    }

    #[tokio::test]
    async fn insert_user_detects_duplicate_email() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = store.insert_user("a@x.com", &profile(), now).await?;
        assert!(matches!(first, InsertUserOutcome::Created(_)));
        let second = store.insert_user("a@x.com", &profile(), now).await?;
        assert!(matches!(second, InsertUserOutcome::Conflict));
        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_challenge_for_same_key() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = challenge("a@x.com", Purpose::Signin, now);
        let second = challenge("a@x.com", Purpose::Signin, now);
        store.upsert_challenge(&first).await?;
        store.upsert_challenge(&second).await?;

        let found = store.find_challenge("a@x.com", Purpose::Signin).await?;
        assert_eq!(found.map(|c| c.id), Some(second.id));
        // The superseded challenge can no longer be attempted or consumed.
        assert_eq!(store.register_attempt(first.id).await?, None);
        assert!(!store.consume_challenge(first.id, now).await?);
        Ok(())
    }

    #[tokio::test]
    async fn purposes_do_not_share_challenges() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .upsert_challenge(&challenge("a@x.com", Purpose::Signup, now))
            .await?;
        assert!(store
            .find_challenge("a@x.com", Purpose::Signin)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn consume_is_single_use() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let record = challenge("a@x.com", Purpose::Signup, now);
        store.upsert_challenge(&record).await?;
        assert_eq!(store.register_attempt(record.id).await?, Some(1));
        assert!(store.consume_challenge(record.id, now).await?);
        assert!(!store.consume_challenge(record.id, now).await?);
        assert_eq!(store.register_attempt(record.id).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut stale = challenge("old@x.com", Purpose::Signin, now - Duration::hours(1));
        stale.expires_at = now - Duration::minutes(1);
        store.upsert_challenge(&stale).await?;
        store
            .upsert_challenge(&challenge("new@x.com", Purpose::Signin, now))
            .await?;
        store
            .insert_session(&SessionRecord {
                token_hash: vec![9; 32],
                user_id: Uuid::new_v4(),
                issued_at: now - Duration::days(8),
                expires_at: now - Duration::days(1),
            })
            .await?;

        let stats = store.purge_expired(now).await?;
        assert_eq!(
            stats,
            PurgeStats {
                challenges: 1,
                sessions: 1
            }
        );
        assert!(store
            .find_challenge("new@x.com", Purpose::Signin)
            .await?
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn notes_are_scoped_to_owner() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let note = Note {
            id: Uuid::new_v4(),
            user_id: owner,
            title: "groceries".to_string(),
            content: "milk".to_string(),
            created_at: now,
            updated_at: now,
        };
        store.insert_note(&note).await?;

        assert!(store.list_notes(stranger).await?.is_empty());
        assert!(store
            .update_note(stranger, note.id, "x", "y", now)
            .await?
            .is_none());
        assert!(!store.delete_note(stranger, note.id).await?);

        let updated = store
            .update_note(owner, note.id, "groceries", "milk, eggs", now)
            .await?;
        assert_eq!(updated.map(|n| n.content), Some("milk, eggs".to_string()));
        assert!(store.delete_note(owner, note.id).await?);
        assert!(store.list_notes(owner).await?.is_empty());
        Ok(())
    }
}
