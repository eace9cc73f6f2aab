//! Request/response types for auth endpoints.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::otp::ProfileInput;
use crate::store::User;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SignupSendOtpRequest {
    pub email: String,
    pub full_name: Option<String>,
    /// Calendar date, `YYYY-MM-DD`.
    pub date_of_birth: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SigninSendOtpRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifyOtpRequest {
    pub email: String,
    #[serde(alias = "code")]
    pub otp: String,
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
}

impl VerifyOtpRequest {
    pub(super) fn profile(&self) -> ProfileInput {
        ProfileInput {
            full_name: self.full_name.clone(),
            date_of_birth: self.date_of_birth.clone(),
        }
    }
}

impl SignupSendOtpRequest {
    pub(super) fn profile(&self) -> ProfileInput {
        ProfileInput {
            full_name: self.full_name.clone(),
            date_of_birth: self.date_of_birth.clone(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email,
            full_name: user.full_name,
            date_of_birth: user.date_of_birth,
            created_at: user.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub message: String,
    pub user: UserResponse,
    /// Also set as the session cookie.
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileResponse {
    pub user: UserResponse,
}
