//! Schema-validation seam for an external OpenAPI validator.
//!
//! The chassis does not implement OpenAPI validation; it only defines
//! the collaborator boundary and the pipeline position: after the body
//! limit, before route dispatch. A response failing validation must
//! never surface as a client error, so response-side failures are
//! coerced into the 500 class before translation.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use http::{HeaderMap, StatusCode};
use tower::{Layer, Service};

use crate::error::HttpError;

/// Configuration handed to the validation stage.
#[derive(Debug, Clone)]
pub struct OpenApiConfig {
    /// Path to the OpenAPI spec file.
    pub spec_file: PathBuf,
    /// Path to the controllers directory resolved by the validator.
    pub controllers_path: PathBuf,
    /// Whether responses are validated as well as requests.
    pub validate_response: bool,
}

/// External validation engine. Implementations are supplied by the
/// embedding application; the chassis only routes buffered request and
/// response data through them.
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    /// Validates an inbound request against the schema.
    ///
    /// # Errors
    ///
    /// An [`HttpError`] rejecting the request (translated as-is, so a
    /// validator may return client-class statuses).
    async fn validate_request(&self, parts: &Parts, body: &[u8]) -> Result<(), HttpError>;

    /// Validates an outbound response against the schema.
    ///
    /// # Errors
    ///
    /// An [`HttpError`]; whatever status it carries is coerced into
    /// the 500 class before translation.
    async fn validate_response(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), HttpError>;
}

/// Tower layer installing the schema-validation stage.
#[derive(Clone)]
pub struct ValidationLayer {
    validator: Arc<dyn SchemaValidator>,
    validate_response: bool,
    max_body: usize,
}

impl ValidationLayer {
    #[must_use]
    pub fn new(validator: Arc<dyn SchemaValidator>, validate_response: bool, max_body: usize) -> Self {
        Self {
            validator,
            validate_response,
            max_body,
        }
    }
}

impl<S> Layer<S> for ValidationLayer {
    type Service = ValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService {
            inner,
            validator: Arc::clone(&self.validator),
            validate_response: self.validate_response,
            max_body: self.max_body,
        }
    }
}

/// Service wrapper applied by [`ValidationLayer`].
#[derive(Clone)]
pub struct ValidationService<S> {
    inner: S,
    validator: Arc<dyn SchemaValidator>,
    validate_response: bool,
    max_body: usize,
}

impl<S> Service<Request> for ValidationService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let validator = Arc::clone(&self.validator);
        let validate_response = self.validate_response;
        let max_body = self.max_body;

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = match axum::body::to_bytes(body, max_body).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return Ok(HttpError::new(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "request body exceeds the configured limit",
                    )
                    .into_response())
                }
            };

            if let Err(err) = validator.validate_request(&parts, &bytes).await {
                return Ok(err.into_response());
            }

            let req = Request::from_parts(parts, Body::from(bytes));
            let response = inner.call(req).await?;

            if !validate_response {
                return Ok(response);
            }

            let (parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    return Ok(HttpError::internal(format!(
                        "failed to buffer response body for validation: {err}"
                    ))
                    .into_response())
                }
            };

            if let Err(err) = validator
                .validate_response(parts.status, &parts.headers, &bytes)
                .await
            {
                return Ok(err.into_server_error().into_response());
            }

            Ok(Response::from_parts(parts, Body::from(bytes)))
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request as HttpRequest;
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    /// Validator that rejects requests or responses containing "bad".
    struct ContainsBad;

    #[async_trait]
    impl SchemaValidator for ContainsBad {
        async fn validate_request(&self, _parts: &Parts, body: &[u8]) -> Result<(), HttpError> {
            if body.windows(3).any(|w| w == b"bad") {
                return Err(HttpError::new(StatusCode::BAD_REQUEST, "request schema mismatch"));
            }
            Ok(())
        }

        async fn validate_response(
            &self,
            _status: StatusCode,
            _headers: &HeaderMap,
            body: &[u8],
        ) -> Result<(), HttpError> {
            if body.windows(3).any(|w| w == b"bad") {
                return Err(HttpError::new(
                    StatusCode::BAD_REQUEST,
                    "response schema mismatch",
                ));
            }
            Ok(())
        }
    }

    fn app(validate_response: bool) -> Router {
        Router::new()
            .route(
                "/echo",
                post(|body: String| async move { body }),
            )
            .layer(ValidationLayer::new(
                Arc::new(ContainsBad),
                validate_response,
                1024,
            ))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn valid_request_passes_with_body_intact() {
        let response = app(false)
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_with_validator_status() {
        let response = app(false)
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::from("this is bad"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_response_surfaces_as_500_class() {
        // The offending payload originates in the handler, so only the
        // response-side check can catch it.
        let app = Router::new()
            .route("/fixed", post(|| async { "bad response payload" }))
            .layer(ValidationLayer::new(Arc::new(ContainsBad), true, 1024));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/fixed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!(500));
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let response = app(false)
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::from(vec![b'x'; 4096]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
