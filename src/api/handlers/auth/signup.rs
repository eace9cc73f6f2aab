//! Signup endpoints: request a code for a new account, then verify it.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::Response,
    Json,
};
use std::sync::Arc;

use super::{
    otp::{request_code, verify_code},
    session::session_established,
    state::AuthState,
    types::{AuthResponse, MessageResponse, SignupSendOtpRequest, VerifyOtpRequest},
    utils::ClientIp,
};
use crate::{
    api::handlers::error::{ApiError, ErrorResponse},
    store::Purpose,
};

#[utoipa::path(
    post,
    path = "/api/auth/signup/send-otp",
    request_body = SignupSendOtpRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Invalid email or profile", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 500, description = "Code could not be delivered", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn send_otp(
    client_ip: Option<Extension<ClientIp>>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupSendOtpRequest>>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Invalid request body"));
    };
    let client_ip = client_ip.map(|Extension(ip)| ip).unwrap_or_default();
    request_code(
        &auth_state,
        &request.email,
        Purpose::Signup,
        Some(&request.profile()),
        client_ip.ip(),
    )
    .await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Verification code sent to your email")),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/signup/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Account created and session issued", body = AuthResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Code rejected", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
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
        Purpose::Signup,
        &request.otp,
        Some(&request.profile()),
        client_ip.ip(),
    )
    .await?;
    session_established(auth_state.config(), issued, "Account created successfully")
}
