//! Session cookie handling, the session check used by the guard, logout and profile.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::{
    otp::IssuedSession,
    principal::Principal,
    state::{AuthConfig, AuthState},
    types::{AuthResponse, MessageResponse, ProfileResponse},
    utils::hash_session_token,
};
use crate::api::handlers::error::{ApiError, ErrorResponse};

pub(crate) const SESSION_COOKIE_NAME: &str = "hdnotes_session";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Access denied. No session provided.")]
    NoCredential,
    #[error("Invalid session")]
    InvalidCredential,
    #[error("Session expired, please sign in again")]
    Expired,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Resolve the request credential (bearer header or session cookie) into a principal.
pub(crate) async fn authenticate(
    auth_state: &AuthState,
    headers: &HeaderMap,
) -> Result<Principal, SessionError> {
    let token = extract_session_token(headers).ok_or(SessionError::NoCredential)?;
    // Only the hash is stored; never compare raw tokens against the store.
    let token_hash = hash_session_token(&token);
    let store = auth_state.store();
    let session = store
        .find_session(&token_hash)
        .await?
        .ok_or(SessionError::InvalidCredential)?;

    if auth_state.now() > session.expires_at {
        if let Err(err) = store.delete_session(&token_hash).await {
            debug!("failed to delete expired session: {err:#}");
        }
        return Err(SessionError::Expired);
    }

    let user = store
        .find_user(session.user_id)
        .await?
        .ok_or(SessionError::InvalidCredential)?;
    Ok(Principal {
        user_id: user.id,
        email: user.email,
    })
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_session_token(&token);
        if let Err(err) = auth_state.store().delete_session(&token_hash).await {
            error!("Failed to delete session: {err:#}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie() {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Logged out successfully")),
    )
}

#[utoipa::path(
    get,
    path = "/api/auth/profile",
    responses(
        (status = 200, description = "Current user", body = ProfileResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 404, description = "User no longer exists", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn profile(
    principal: Extension<Principal>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = auth_state
        .store()
        .find_user(principal.user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(ProfileResponse { user: user.into() }))
}

/// Answer a successful verification: session cookie plus `{message, user, token}`.
pub(super) fn session_established(
    config: &AuthConfig,
    issued: IssuedSession,
    message: &str,
) -> Result<Response, ApiError> {
    let cookie = session_cookie(config, &issued.token)
        .map_err(|err| ApiError::internal(&anyhow::Error::new(err)))?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    let body = AuthResponse {
        message: message.to_string(),
        user: issued.user.into(),
        token: issued.token,
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

/// Build the `HttpOnly` session cookie.
///
/// `SameSite=None; Secure` lets the SPA on another origin send it with credentials.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; Secure; SameSite=None; Max-Age={ttl_seconds}"
    ))
}

fn clear_session_cookie() -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; Secure; SameSite=None; Max-Age=0"
    ))
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        let val = val.trim();
        if key.trim() == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
