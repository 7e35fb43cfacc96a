//! Per-request context store with ambient propagation.
//!
//! Every inbound request gets exactly one [`RequestContext`], created
//! before any authentication logic runs and visible to everything
//! downstream -- without threading the context through call
//! signatures. Propagation uses `tokio::task_local!` rather than a
//! thread-local because tokio's work-stealing scheduler moves tasks
//! between OS threads at await points; the binding follows the logical
//! request, so two interleaved requests never observe each other's
//! state.
//!
//! The context's lifetime ends when the response body finishes, the
//! connection closes, or the response stream errors -- whichever comes
//! first. All three signals funnel through a drop guard on the wrapped
//! response body, and [`RequestContext::complete`] is first-signal-wins.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tower::{Layer, Service};
use tracing::Span;

use gantry_core::Consumer;

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

/// Errors from the context store.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Per-request state was accessed outside an active request scope.
    /// A programming error: reads and writes never silently default.
    #[error("request context accessed outside an active request scope")]
    Uninitialized,
    /// A consumer identity was already attached. Identities are
    /// immutable for the remainder of the request.
    #[error("a consumer identity is already attached to this request")]
    ConsumerAlreadyAttached,
}

#[derive(Debug, Default)]
struct ContextState {
    consumer: Option<Consumer>,
    suppress_log: bool,
    logger: Option<Span>,
    values: HashMap<String, Value>,
}

/// Isolated, request-scoped state container.
///
/// Shared via `Arc` between the task-local binding and the completion
/// guard on the response body; interior state sits behind a mutex so
/// the guard (which fires outside the task-local scope) can still
/// read it.
#[derive(Debug, Default)]
pub struct RequestContext {
    state: Mutex<ContextState>,
    completed: AtomicBool,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches the resolved consumer identity. Exactly one resolver
    /// may do this per request; a second attach is rejected.
    pub fn attach_consumer(&self, consumer: Consumer) -> Result<(), ContextError> {
        let mut state = self.state.lock();
        if state.consumer.is_some() {
            return Err(ContextError::ConsumerAlreadyAttached);
        }
        state.consumer = Some(consumer);
        Ok(())
    }

    #[must_use]
    pub fn consumer(&self) -> Option<Consumer> {
        self.state.lock().consumer.clone()
    }

    /// Marks the request's access-log record as suppressed.
    pub fn set_suppress_logging(&self, suppress: bool) {
        self.state.lock().suppress_log = suppress;
    }

    #[must_use]
    pub fn suppress_logging(&self) -> bool {
        self.state.lock().suppress_log
    }

    /// Installs the per-request logger span. Called once by the
    /// request logger; later calls replace the handle.
    pub fn set_logger(&self, span: Span) {
        self.state.lock().logger = Some(span);
    }

    /// The per-request logger span, if the request logger has run.
    #[must_use]
    pub fn logger(&self) -> Option<Span> {
        self.state.lock().logger.clone()
    }

    /// Reads a keyed value from the open slot.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().values.get(key).cloned()
    }

    /// Writes a keyed value into the open slot.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.state.lock().values.insert(key.into(), value);
    }

    /// Signals the end of the request's lifetime. Idempotent: returns
    /// `true` only for the first signal.
    pub fn complete(&self) -> bool {
        !self.completed.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// Runs a future with `ctx` bound as the ambient request context.
///
/// Everything awaited inside the future -- including timers and
/// deferred continuations -- observes `ctx` through [`try_current`].
pub fn scope<F>(ctx: Arc<RequestContext>, fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(ctx, fut)
}

/// The context of the currently executing logical request.
///
/// # Errors
///
/// [`ContextError::Uninitialized`] when called outside a request scope.
pub fn try_current() -> Result<Arc<RequestContext>, ContextError> {
    CURRENT
        .try_with(Arc::clone)
        .map_err(|_| ContextError::Uninitialized)
}

/// Convenience: the consumer attached to the current request, if any.
///
/// # Errors
///
/// [`ContextError::Uninitialized`] when called outside a request scope.
pub fn current_consumer() -> Result<Option<Consumer>, ContextError> {
    Ok(try_current()?.consumer())
}

// ---------------------------------------------------------------------------
// Completion guard
// ---------------------------------------------------------------------------

/// Response body wrapper that runs a closure when the body is dropped.
///
/// Drop covers every terminal signal: normal end of stream, connection
/// close, and stream error. The closure is `Option`-taken, so it fires
/// at most once no matter how the body terminates.
pub(crate) struct FinishOnDrop {
    inner: Body,
    on_finish: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl FinishOnDrop {
    /// Wraps a response body so `on_finish` runs when the exchange ends.
    pub(crate) fn wrap(
        response: Response,
        on_finish: impl FnOnce() + Send + 'static,
    ) -> Response {
        let (parts, body) = response.into_parts();
        let wrapped = Self {
            inner: body,
            on_finish: Some(Box::new(on_finish)),
        };
        Response::from_parts(parts, Body::new(wrapped))
    }
}

impl http_body::Body for FinishOnDrop {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish();
        }
    }
}

// ---------------------------------------------------------------------------
// ContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that establishes the per-request context.
///
/// Outermost of the per-request stages: the context exists before any
/// authentication logic runs. A clone is stored in the request
/// extensions for components that outlive the task-local scope (the
/// completion guards), and cleanup fires exactly once when the
/// response body is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextLayer;

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService { inner }
    }
}

/// Service wrapper applied by [`ContextLayer`].
#[derive(Debug, Clone)]
pub struct ContextService<S> {
    inner: S,
}

impl<S> Service<Request> for ContextService<S>
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

    fn call(&mut self, mut req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let ctx = RequestContext::new();
        req.extensions_mut().insert(Arc::clone(&ctx));

        Box::pin(async move {
            let response = scope(Arc::clone(&ctx), inner.call(req)).await?;
            Ok(FinishOnDrop::wrap(response, move || {
                ctx.complete();
            }))
        })
    }
}
