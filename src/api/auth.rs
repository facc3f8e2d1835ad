use axum::{extract::Request, middleware::Next, response::Response};
use subtle::ConstantTimeEq;

use super::error::ApiError;

/// Extract a Bearer token from the Authorization header.
fn extract_bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Reject requests without a matching bearer token.
///
/// The comparison is constant-time. A wrong token is 403; a missing one is 401.
pub async fn require_auth(
    expected_token: String,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let valid = extract_bearer(&req)
        .map(|token| bool::from(token.as_bytes().ct_eq(expected_token.as_bytes())));
    match valid {
        Some(true) => Ok(next.run(req).await),
        Some(false) => {
            tracing::warn!(uri = %req.uri(), "rejected request with invalid token");
            Err(ApiError::AuthInvalid)
        }
        None => Err(ApiError::AuthRequired),
    }
}
