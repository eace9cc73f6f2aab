//! Signin endpoints for existing accounts.
//!
//! `send-otp` answers identically whether or not the email is registered and
//! whether or not delivery succeeded, so it cannot be used to probe accounts.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::Response,
    Json,
};
use std::sync::Arc;
use tracing::error;

use super::{
    otp::{request_code, verify_code, OtpError},
    session::session_established,
    state::AuthState,
    types::{AuthResponse, MessageResponse, SigninSendOtpRequest, VerifyOtpRequest},
    utils::ClientIp,
};
use crate::{
    api::handlers::error::{ApiError, ErrorResponse},
    store::Purpose,
};

pub(super) const SIGNIN_CODE_SENT: &str = "If an account exists for this email, a sign-in code has been sent";

#[utoipa::path(
    post,
    path = "/api/auth/signin/send-otp",
    request_body = SigninSendOtpRequest,
    responses(
        (status = 200, description = "Code sent if the account exists", body = MessageResponse),
        (status = 400, description = "Invalid email", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn send_otp(
    client_ip: Option<Extension<ClientIp>>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SigninSendOtpRequest>>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Invalid request body"));
    };
    let client_ip = client_ip.map(|Extension(ip)| ip).unwrap_or_default();
    match request_code(
        &auth_state,
        &request.email,
        Purpose::Signin,
        None,
        client_ip.ip(),
    )
    .await
    {
        Ok(()) => {}
        Err(OtpError::Dispatch(err)) => {
            error!("signin code dispatch failed: {err:#}");
        }
        Err(err) => return Err(err.into()),
    }
    Ok((StatusCode::OK, Json(MessageResponse::new(SIGNIN_CODE_SENT))))
}

#[utoipa::path(
    post,
    path = "/api/auth/signin/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Session issued", body = AuthResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Code rejected", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    client_ip: Option<Extension<ClientIp>>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Invalid request body"));
    };
    if request.email.trim().is_empty() || request.otp.trim().is_empty() {
        return Err(ApiError::bad_request("Email and code are required"));
    }
    let client_ip = client_ip.map(|Extension(ip)| ip).unwrap_or_default();
    let issued = verify_code(
        &auth_state,
        &request.email,
        Purpose::Signin,
        &request.otp,
        None,
        client_ip.ip(),
    )
    .await?;
    session_established(auth_state.config(), issued, "Signed in successfully")
}
