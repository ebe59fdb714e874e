//! Request gates for axum.
//!
//! Three explicit modes, each its own middleware function:
//! [`require_auth`], [`require_admin`] and [`optional_auth`]. A gate that
//! accepts a credential stores the [`Identity`] in the request extensions,
//! where handlers read it back through [`CurrentUser`] or [`MaybeUser`].
//!
//! Tokens come from `Authorization: Bearer <token>` or, for clients that
//! cannot set headers (media elements, byte-range requests), a `token` query
//! parameter. The header wins when both are present.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, Query, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AuthError;
use super::service::AuthService;
use super::token::{Identity, TokenCodec};

/// Error body for every rejected request except rate limiting.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::InvalidCredentials | Self::InvalidToken(_) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
            }
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({ "error": "rate_limit_exceeded" })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
                return response;
            }
            Self::Storage(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Internal error while handling request");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: "Internal server error".to_string(),
                        code: "INTERNAL_ERROR",
                    }),
                )
                    .into_response();
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Find the credential on a request: bearer header first, then `?token=`.
#[must_use]
pub fn extract_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(TokenCodec::extract_from_header);

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

fn authenticate(auth: &AuthService, parts: &Parts) -> Result<Identity, AuthError> {
    let token = extract_token(parts)
        .ok_or_else(|| AuthError::InvalidToken("Missing credentials".to_string()))?;
    auth.validate_token(&token)
}

/// Reject requests without a valid access token.
///
/// # Errors
///
/// `InvalidToken` (401) if the credential is absent, malformed or expired.
pub async fn require_auth(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = request.into_parts();

    if parts.extensions.get::<Identity>().is_none() {
        let identity = authenticate(&auth, &parts)?;
        parts.extensions.insert(identity);
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Reject requests that are not from an admin.
///
/// Reuses an identity attached by an earlier gate, otherwise authenticates
/// the request itself.
///
/// # Errors
///
/// `InvalidToken` (401) without a valid token, `Forbidden` (403) for non-admins.
pub async fn require_admin(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = request.into_parts();

    let identity = match parts.extensions.get::<Identity>() {
        Some(identity) => identity.clone(),
        None => authenticate(&auth, &parts)?,
    };

    if !identity.is_admin() {
        tracing::debug!(user_id = identity.user_id, "Admin route refused");
        return Err(AuthError::Forbidden("Admin role required".to_string()));
    }

    parts.extensions.insert(identity);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Attach an identity when a valid token is present; never reject.
///
/// An invalid or expired credential is ignored and the request proceeds
/// anonymously.
pub async fn optional_auth(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    if extract_token(&parts).is_some() {
        match authenticate(&auth, &parts) {
            Ok(identity) => {
                parts.extensions.insert(identity);
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring invalid credential"),
        }
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Identity attached by [`require_auth`] or [`require_admin`].
///
/// Rejects with 401 when used on a route without a gate in front of it.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AuthError::InvalidToken("Missing credentials".to_string()))
    }
}

/// Identity attached by [`optional_auth`], if any.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Identity>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Identity>().cloned()))
    }
}
