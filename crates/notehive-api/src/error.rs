use std::any::Any;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::error;

use notehive_types::api::MessageResponse;
use notehive_types::models::Identity;

use crate::state::AppState;

/// Handler error. Every variant renders as `{success: false, message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    /// `message` is what the client sees; `source` is only logged.
    #[error("{message}: {source:#}")]
    Internal {
        message: &'static str,
        source: anyhow::Error,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// For `map_err`: wraps any error as a 500 with a fixed client message.
    pub fn internal<E>(message: &'static str) -> impl FnOnce(E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        move |source| Self::Internal {
            message,
            source: source.into(),
        }
    }
}

/// Attached to 500 responses so `error_responder` can see what went wrong.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail {
    pub message: &'static str,
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal { message, source } => {
                let detail = format!("{:#}", source);
                error!(error = %detail, "{}", message);

                let mut response = (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(MessageResponse::failure(message)),
                )
                    .into_response();
                response
                    .extensions_mut()
                    .insert(InternalErrorDetail { message, detail });
                return response;
            }
        };

        (status, Json(MessageResponse::failure(message))).into_response()
    }
}

/// Matches the default JSON extractor limit.
const BUFFERED_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Body fields never written to the log.
const REDACTED_FIELDS: &[&str] = &["password", "newPassword", "otp"];

/// Loggable form of a request body with credential fields masked.
/// Non-JSON bodies are summarised by size only.
pub(crate) fn redacted_body(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(mut fields)) => {
            for field in REDACTED_FIELDS {
                if let Some(value) = fields.get_mut(*field) {
                    *value = Value::String("[redacted]".into());
                }
            }
            Value::Object(fields).to_string()
        }
        Ok(other) => other.to_string(),
        Err(_) => format!("<{} bytes>", bytes.len()),
    }
}

/// Outermost error hook: logs failed requests with their route, caller and
/// redacted body, and in development exposes the underlying error.
pub async fn error_responder(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let (parts, body) = req.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, BUFFERED_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(MessageResponse::failure("Request body too large")),
            )
                .into_response();
        }
    };
    let req = Request::from_parts(parts, Body::from(bytes.clone()));

    let response = next.run(req).await;

    let Some(failure) = response.extensions().get::<InternalErrorDetail>().cloned() else {
        return response;
    };

    let user_id = response
        .extensions()
        .get::<Identity>()
        .map(|identity| identity.id.to_string());
    error!(
        %method,
        %uri,
        user_id = user_id.as_deref().unwrap_or("anonymous"),
        body = %redacted_body(&bytes),
        error = %failure.detail,
        "Request failed"
    );

    if state.config.is_production() {
        return response;
    }

    let status = response.status();
    (
        status,
        Json(json!({
            "success": false,
            "message": failure.message,
            "error": failure.detail,
        })),
    )
        .into_response()
}

/// Panic hook for `CatchPanicLayer`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(MessageResponse::failure("Internal server error")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_their_source() {
        let err = ApiError::internal("Failed to fetch notes")(anyhow::anyhow!("disk on fire"));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = response.extensions().get::<InternalErrorDetail>().unwrap();
        assert_eq!(detail.message, "Failed to fetch notes");
        assert!(detail.detail.contains("disk on fire"));
    }

    #[test]
    fn logged_bodies_mask_credentials() {
        let body = redacted_body(
            br#"{"email":"a@x.com","otp":"123456","newPassword":"hunter22","password":"p"}"#,
        );
        let logged: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(logged["email"], "a@x.com");
        assert_eq!(logged["otp"], "[redacted]");
        assert_eq!(logged["newPassword"], "[redacted]");
        assert_eq!(logged["password"], "[redacted]");
        assert!(!body.contains("hunter22"));

        assert_eq!(redacted_body(b""), "");
        assert_eq!(redacted_body(b"password=hunter22"), "<17 bytes>");
    }

    #[test]
    fn client_errors_map_to_status() {
        assert_eq!(
            ApiError::not_found("Note not found").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::unauthorized("Invalid token.").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert!(
            ApiError::bad_request("x")
                .into_response()
                .extensions()
                .get::<InternalErrorDetail>()
                .is_none()
        );
    }
}
