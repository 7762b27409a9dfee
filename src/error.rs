use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::auth::jwt::TokenRejection;

/// A single user-correctable input problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Identity field that collided with an existing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictField {
    Email,
    Username,
}

impl std::fmt::Display for ConflictField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictField::Email => f.write_str("email"),
            ConflictField::Username => f.write_str("username"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("user with the given {0} already exists")]
    Conflict(ConflictField),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthorized,

    #[error("invalid session token: {0}")]
    TokenInvalid(TokenRejection),

    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::InvalidCredentials
            | ServiceError::Unauthorized
            | ServiceError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Store(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::InvalidCredentials => "INVALID_CREDENTIALS",
            ServiceError::Unauthorized => "UNAUTHORIZED",
            ServiceError::TokenInvalid(_) => "TOKEN_INVALID",
            ServiceError::Store(_) => "STORE_ERROR",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let body = match &self {
            ServiceError::Validation(fields) => json!({
                "error": { "code": code, "message": self.to_string(), "fields": fields }
            }),
            ServiceError::Conflict(field) => json!({
                "error": { "code": code, "message": self.to_string(), "field": field }
            }),
            ServiceError::TokenInvalid(_) => json!({
                "error": { "code": code, "message": "invalid or expired session" }
            }),
            ServiceError::Store(e) | ServiceError::Internal(e) => {
                tracing::error!(error = ?e, code, "request failed");
                json!({
                    "error": { "code": code, "message": "something went wrong, please try again" }
                })
            }
            _ => json!({
                "error": { "code": code, "message": self.to_string() }
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ServiceError) -> (StatusCode, serde_json::Value) {
        let res = err.into_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_lists_every_field() {
        let (status, body) = body_json(ServiceError::Validation(vec![
            FieldError::new("email", "Please input a valid email."),
            FieldError::new("password", "too weak"),
        ]))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["fields"].as_array().unwrap().len(), 2);
        assert_eq!(body["error"]["fields"][0]["field"], "email");
    }

    #[tokio::test]
    async fn conflict_names_the_field() {
        let (status, body) = body_json(ServiceError::Conflict(ConflictField::Username)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["field"], "username");
    }

    #[tokio::test]
    async fn store_errors_do_not_leak_details() {
        let (status, body) =
            body_json(ServiceError::Store(anyhow::anyhow!("connection refused to 10.0.0.3"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let text = body.to_string();
        assert!(!text.contains("10.0.0.3"));
        assert_eq!(body["error"]["code"], "STORE_ERROR");
    }
}
