use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::context::{RequestContext, UserIdentity};
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const CSRF_HEADER: &str = "x-csrf-verified";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Identity headers are set by the trusted session layer in front of this service.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;
        let email = header(parts, USER_EMAIL_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?
            .to_string();
        let name = header(parts, USER_NAME_HEADER).unwrap_or_default().to_string();

        let context = RequestContext::new(UserIdentity { id, email, name });
        Ok(match header(parts, REQUEST_ID_HEADER) {
            Some(request_id) => context.with_request_id(request_id),
            None => context,
        })
    }
}

/// Proof that the session layer validated the request's CSRF token.
#[derive(Debug, Clone, Copy)]
pub struct CsrfVerified;

#[async_trait]
impl<S> FromRequestParts<S> for CsrfVerified
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match header(parts, CSRF_HEADER) {
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(CsrfVerified),
            _ => Err(AppError::Forbidden("Invalid CSRF token".to_string())),
        }
    }
}
