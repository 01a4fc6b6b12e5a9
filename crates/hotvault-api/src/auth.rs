//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the account id in
//! [`USER_ID_HEADER`]. [`principal_middleware`] turns that header into a [`Principal`]
//! request extension and handlers extract it like any other argument.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hotvault_core::AppError;

use crate::error::HttpAppError;

pub const USER_ID_HEADER: &str = "x-hotvault-user-id";

/// The account a request acts on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
}

// Extract from the request extensions so it also works alongside Multipart
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Principal>().copied().ok_or_else(|| {
            HttpAppError(AppError::Unauthorized(
                "Missing caller identity".to_string(),
            ))
        })
    }
}

/// Attach a [`Principal`] when the identity header is present.
///
/// A missing header passes through so public routes keep working; a malformed one is
/// rejected outright.
pub async fn principal_middleware(mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(USER_ID_HEADER)
        .map(|value| value.to_str().map(str::trim).map(str::to_string));

    match header {
        None => {}
        Some(Ok(raw)) => match raw.parse::<i64>() {
            Ok(user_id) if user_id > 0 => {
                request.extensions_mut().insert(Principal { user_id });
            }
            _ => {
                tracing::debug!(value = %raw, "Rejected malformed caller identity");
                return HttpAppError(AppError::Unauthorized(
                    "Invalid caller identity".to_string(),
                ))
                .into_response();
            }
        },
        Some(Err(_)) => {
            return HttpAppError(AppError::Unauthorized(
                "Invalid caller identity".to_string(),
            ))
            .into_response();
        }
    }

    next.run(request).await
}
