//! Authenticated principal and the session guard middleware.
//!
//! Flow Overview: read the bearer header or session cookie, resolve it to a
//! user, and attach a `Principal` to the request extensions. Protected
//! handlers extract `Extension<Principal>`; they never run for requests the
//! guard rejects.

use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use super::{session::authenticate, state::AuthState};
use crate::api::handlers::error::ApiError;

/// Authenticated user context derived from the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: uuid::Uuid,
    pub email: String,
}

/// Reject requests without a valid session (401 `{error}`), otherwise
/// forward them with the resolved `Principal`.
pub async fn require_session(
    auth_state: Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&auth_state, request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => {
            debug!("session rejected: {err}");
            ApiError::from(err).into_response()
        }
    }
}
