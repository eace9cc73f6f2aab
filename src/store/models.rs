use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What an OTP challenge is for; one challenge may exist per `(email, purpose)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Signup,
    Signin,
}

impl Purpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Signin => "signin",
        }
    }

    /// Parse the persisted `otp_challenges.purpose` textual value into a typed enum.
    fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        value.parse().map_err(|()| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid otp_challenges.purpose value: {value}"),
            )))
        })
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "signup" => Ok(Self::Signup),
            "signin" => Ok(Self::Signin),
            _ => Err(()),
        }
    }
}

/// Profile fields collected at signup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub full_name: String,
    pub date_of_birth: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            date_of_birth: row.try_get("date_of_birth")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Outcome when attempting to create a user.
#[derive(Debug)]
pub enum InsertUserOutcome {
    Created(User),
    Conflict,
}

/// A stored OTP challenge. The raw code is never persisted, only `SHA-256(salt || code)`.
#[derive(Debug, Clone)]
pub struct OtpChallenge {
    pub id: Uuid,
    pub email: String,
    pub purpose: Purpose,
    pub code_hash: Vec<u8>,
    pub salt: Vec<u8>,
    pub profile: Option<Profile>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub attempt_count: u32,
}

impl<'r> FromRow<'r, PgRow> for OtpChallenge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let purpose: String = row.try_get("purpose")?;
        let full_name: Option<String> = row.try_get("full_name")?;
        let date_of_birth: Option<NaiveDate> = row.try_get("date_of_birth")?;
        let attempt_count: i32 = row.try_get("attempt_count")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            purpose: Purpose::from_db(&purpose)?,
            code_hash: row.try_get("code_hash")?,
            salt: row.try_get("salt")?,
            profile: full_name
                .zip(date_of_birth)
                .map(|(full_name, date_of_birth)| Profile {
                    full_name,
                    date_of_birth,
                }),
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            consumed: row.try_get("consumed")?,
            attempt_count: u32::try_from(attempt_count).unwrap_or(0),
        })
    }
}

/// Session row; `token_hash` is the SHA-256 of the opaque token held by the client.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SessionRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            token_hash: row.try_get("token_hash")?,
            user_id: row.try_get("user_id")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Note {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Rows removed by a sweep of expired records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    pub challenges: u64,
    pub sessions: u64,
}

#[cfg(test)]
mod tests {
    use super::Purpose;

    #[test]
    fn purpose_parses_persisted_values() {
        assert_eq!("signup".parse::<Purpose>(), Ok(Purpose::Signup));
        assert_eq!("signin".parse::<Purpose>(), Ok(Purpose::Signin));
        assert!("login".parse::<Purpose>().is_err());
    }

    #[test]
    fn purpose_display_matches_db_value() {
        assert_eq!(Purpose::Signup.to_string(), "signup");
        assert_eq!(Purpose::Signin.as_str(), "signin");
    }

    #[test]
    fn purpose_from_db_rejects_unknown() {
        assert!(Purpose::from_db("admin").is_err());
    }
}
