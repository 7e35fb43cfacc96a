//! Typed application errors and their translation into wire responses.
//!
//! Every error that reaches the client goes through exactly one
//! translation point: the [`IntoResponse`] impl on [`HttpError`].
//! Components construct typed errors and return them up the chain;
//! nothing else writes error bodies or status codes.

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::request::context::ContextError;

/// Classification of an application error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credential absent or invalid per policy.
    Unauthorized,
    /// A well-formed signed token failed verification. This is a
    /// security event, not an absent credential, and is never swallowed.
    SignatureInvalid,
    /// No route matched. Always translates to 404 regardless of any
    /// carried status.
    NotFound,
    /// Per-request state was accessed outside a request lifetime --
    /// a programming error, not a client error.
    ContextUninitialized,
    /// Anything else, including listener bind/close failures that leak
    /// into a request path.
    Internal,
}

/// An application-level error carrying an optional explicit status and
/// optional structured detail.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HttpError {
    kind: ErrorKind,
    message: String,
    status: Option<StatusCode>,
    detail: Option<Value>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HttpError {
    /// A generic error with an explicit wire status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            status: Some(status),
            detail: None,
            source: None,
        }
    }

    /// Credential rejected: translates to 401 with `WWW-Authenticate`.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self {
            kind: ErrorKind::Unauthorized,
            message: "Unauthorized".to_string(),
            status: None,
            detail: None,
            source: None,
        }
    }

    /// A signed token with a valid shape failed verification.
    #[must_use]
    pub fn signature_invalid(source: jsonwebtoken::errors::Error) -> Self {
        Self {
            kind: ErrorKind::SignatureInvalid,
            message: "invalid token signature".to_string(),
            status: None,
            detail: None,
            source: Some(Box::new(source)),
        }
    }

    /// No route matched the request path.
    #[must_use]
    pub fn not_found(path: &str) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: format!("No route found for {path}"),
            status: None,
            detail: None,
            source: None,
        }
    }

    /// Internal error without an explicit status (defaults to 500).
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            status: None,
            detail: None,
            source: None,
        }
    }

    /// Attaches structured detail, included in the JSON body.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The wire status this error will translate to.
    ///
    /// `NotFound` is pinned to 404 regardless of any carried status;
    /// otherwise the explicit status wins, then the kind's default
    /// (401 for auth failures, 500 for everything else).
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        if self.kind == ErrorKind::NotFound {
            return StatusCode::NOT_FOUND;
        }
        self.status.unwrap_or(match self.kind {
            ErrorKind::Unauthorized | ErrorKind::SignatureInvalid => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    /// Coerces the error into the 500 class, preserving message and
    /// detail. Used where a failure must never surface as a client
    /// error (e.g. response schema validation).
    #[must_use]
    pub fn into_server_error(mut self) -> Self {
        if self.status_code().as_u16() < 500 {
            self.kind = ErrorKind::Internal;
            self.status = Some(StatusCode::INTERNAL_SERVER_ERROR);
        }
        self
    }
}

impl From<ContextError> for HttpError {
    fn from(err: ContextError) -> Self {
        let kind = match err {
            ContextError::Uninitialized => ErrorKind::ContextUninitialized,
            ContextError::ConsumerAlreadyAttached => ErrorKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
            status: None,
            detail: None,
            source: Some(Box::new(err)),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "status": status.as_u16(),
            "reason": self.message,
        });
        if let Some(detail) = self.detail {
            body["detail"] = detail;
        }
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
