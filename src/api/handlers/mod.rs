//! API handlers for hdnotes.
//!
//! `auth` owns the OTP flows, sessions and the guard; `notes` is the
//! owner-scoped CRUD that sits behind that guard.

pub mod auth;
pub mod error;
pub mod health;
pub mod notes;

use axum::{http::StatusCode, response::IntoResponse};

use self::error::ApiError;

// axum handler for `/`
pub async fn root() -> impl IntoResponse {
    format!(
        "{} {} API is running",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Route not found")
}
