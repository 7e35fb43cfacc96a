//! Transport-level middleware stack.
//!
//! Builds the Tower layers wrapped around the whole per-request
//! pipeline. Middleware ordering follows the outer-to-inner
//! convention: the first layer listed is the outermost (processes the
//! request first on the way in, and the response last on the way out).

use std::task::{Context as TaskContext, Poll};

use axum::http::header::HeaderName;
use axum::http::Request;
use tower::layer::util::{Identity, Stack};
use tower::{Layer, Service, ServiceBuilder};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// The composed Tower layer type produced by [`build_http_layers`].
///
/// Each layer wraps the next in a `Stack`, from outermost (first
/// applied) to innermost (last applied).
type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
        Stack<SetRequestIdLayer<MakeRequestUuid>, Stack<TrustProxyLayer, Identity>>,
    >,
>;

/// Builds the transport-level middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `TrustProxy` -- strips inbound `x-request-id` unless upstream
///    proxies are trusted, so untrusted clients cannot forge trace ids
/// 2. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` when absent
/// 3. `Tracing` -- structured trace spans per request
/// 4. `PropagateRequestId` -- copies `X-Request-Id` onto the response
///
/// This is transport-level middleware only; the per-request stages
/// (context, identity resolution, gate, logger) are composed in
/// `request::pipeline`.
#[must_use]
pub fn build_http_layers(trust_upstream: bool) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(TrustProxyLayer::new(trust_upstream))
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

// ---------------------------------------------------------------------------
// TrustProxyLayer
// ---------------------------------------------------------------------------

/// Tower layer applying the trust-proxy policy to inbound request ids.
///
/// When upstream proxies are not trusted, any client-supplied
/// `x-request-id` is removed before the request-id layer runs, so the
/// id is always freshly generated.
#[derive(Debug, Clone, Copy)]
pub struct TrustProxyLayer {
    trust_upstream: bool,
}

impl TrustProxyLayer {
    #[must_use]
    pub fn new(trust_upstream: bool) -> Self {
        Self { trust_upstream }
    }
}

impl<S> Layer<S> for TrustProxyLayer {
    type Service = TrustProxyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrustProxyService {
            inner,
            trust_upstream: self.trust_upstream,
        }
    }
}

/// Service wrapper applied by [`TrustProxyLayer`].
#[derive(Debug, Clone)]
pub struct TrustProxyService<S> {
    inner: S,
    trust_upstream: bool,
}

impl<S, B> Service<Request<B>> for TrustProxyService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if !self.trust_upstream {
            req.headers_mut().remove("x-request-id");
        }
        self.inner.call(req)
    }
}
