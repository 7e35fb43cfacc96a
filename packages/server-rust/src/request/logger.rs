//! Request logger: binds contextual fields for the remainder of the
//! request and emits one structured access record at completion.
//!
//! Runs after the authorization gate, so the resolved consumer (if
//! any) is already attached. The record fires from a drop guard on the
//! response body -- exactly once, no matter how many termination
//! signals arrive -- unless the context's suppress flag was set.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::request::context::{FinishOnDrop, RequestContext};

/// Serializes headers into a compact JSON object string for the access
/// record. Values that are not valid UTF-8 are replaced lossily.
fn headers_json(headers: &HeaderMap) -> String {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                serde_json::Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    serde_json::Value::Object(map).to_string()
}

/// Tower layer installing the per-request logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogLayer;

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService { inner }
    }
}

/// Service wrapper applied by [`RequestLogLayer`].
#[derive(Debug, Clone)]
pub struct RequestLogService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestLogService<S>
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

        Box::pin(async move {
            let ctx = req.extensions().get::<Arc<RequestContext>>().cloned();

            // The transport layer stamps x-request-id on every request;
            // the fallback only matters when the pipeline is composed
            // without it.
            let trace_id = req
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
            let consumer_name = ctx
                .as_ref()
                .and_then(|ctx| ctx.consumer())
                .map(|consumer| consumer.display_name().to_string());

            let span = info_span!(
                "request",
                trace_id = %trace_id,
                consumer = consumer_name.as_deref().unwrap_or(""),
                component = "http",
            );
            if let Some(ctx) = &ctx {
                ctx.set_logger(span.clone());
            }

            let url = req.uri().to_string();
            let method = req.method().to_string();
            let request_headers = headers_json(req.headers());

            let response = inner.call(req).instrument(span.clone()).await?;

            let status = response.status().as_u16();
            let response_headers = headers_json(response.headers());
            let log_ctx = ctx.clone();

            Ok(FinishOnDrop::wrap(response, move || {
                if log_ctx.as_ref().is_some_and(|ctx| ctx.suppress_logging()) {
                    return;
                }
                span.in_scope(|| {
                    info!(
                        target: "gantry::access",
                        url = %url,
                        method = %method,
                        status,
                        request_headers = %request_headers,
                        response_headers = %response_headers,
                        "http request"
                    );
                });
            }))
        })
    }
}
