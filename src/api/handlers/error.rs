//! JSON error responses shared by every handler.
//!
//! Every failure leaves the API as `{"error": "<message>"}`. Internal
//! failures are logged with their full chain and answered with a generic
//! message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use super::auth::{otp::OtpError, session::SessionError};

const INTERNAL_ERROR: &str = "Internal server error";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Log `err` and hide it behind a generic 500.
    pub fn internal(err: &anyhow::Error) -> Self {
        error!("request failed: {err:#}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        let status = match &err {
            OtpError::InvalidEmail | OtpError::MissingProfile | OtpError::InvalidProfile(_) => {
                StatusCode::BAD_REQUEST
            }
            OtpError::DuplicateUser => StatusCode::CONFLICT,
            OtpError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            OtpError::NoChallenge
            | OtpError::AlreadyConsumed
            | OtpError::Expired
            | OtpError::TooManyAttempts
            | OtpError::Mismatch
            | OtpError::NoSuchUser => StatusCode::UNAUTHORIZED,
            OtpError::Dispatch(source) => {
                error!("otp dispatch failed: {source:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            OtpError::Store(source) => return Self::internal(source),
        };
        Self::new(status, err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::Store(source) => Self::internal(source),
            _ => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
        }
    }
}
