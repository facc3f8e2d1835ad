use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Errors returned by the HTTP layer itself, outside the MCP protocol.
#[derive(Debug)]
pub enum ApiError {
    /// 401 - No authentication credentials provided.
    AuthRequired,
    /// 403 - Credentials provided but invalid.
    AuthInvalid,
    /// 503 - Too many concurrent MCP sessions.
    TooManySessions,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthRequired => StatusCode::UNAUTHORIZED,
            ApiError::AuthInvalid => StatusCode::FORBIDDEN,
            ApiError::TooManySessions => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthRequired => "auth_required",
            ApiError::AuthInvalid => "auth_invalid",
            ApiError::TooManySessions => "too_many_sessions",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::AuthRequired => {
                "Authentication required. Provide a token via the Authorization header.".to_string()
            }
            ApiError::AuthInvalid => "Invalid authentication token.".to_string(),
            ApiError::TooManySessions => {
                "Maximum number of MCP sessions reached. Try again shortly.".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
