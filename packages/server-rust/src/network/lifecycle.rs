//! Server lifecycle state machine and shutdown signalling.
//!
//! Uses `ArcSwap` for lock-free state transitions and a `watch`
//! channel to broadcast the shutdown signal to every serving task.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle state of the server's listener set.
///
/// State machine: Stopped -> Starting -> Listening -> Stopping -> Stopped.
/// `Stopped` is both the initial and the terminal state; a fresh
/// `start()` is required after a clean stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No listeners bound.
    Stopped,
    /// Binding listeners.
    Starting,
    /// Accepting connections.
    Listening,
    /// Draining in-flight exchanges and closing listeners.
    Stopping,
}

/// Coordinates lifecycle transitions and the shutdown broadcast.
#[derive(Debug)]
pub struct LifecycleController {
    state: ArcSwap<LifecycleState>,
    shutdown: Mutex<watch::Sender<bool>>,
}

impl LifecycleController {
    /// Creates a controller in the `Stopped` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: ArcSwap::from_pointee(LifecycleState::Stopped),
            shutdown: Mutex::new(tx),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Transitions to the given state.
    pub fn set(&self, state: LifecycleState) {
        self.state.store(Arc::new(state));
    }

    /// Returns a receiver notified when shutdown is signalled.
    ///
    /// Serving tasks select on this alongside their accept loop.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.lock().subscribe()
    }

    /// Broadcasts the shutdown signal to all subscribers.
    pub fn signal_shutdown(&self) {
        // Ignore send errors -- receivers may have been dropped.
        let _ = self.shutdown.lock().send(true);
    }

    /// Re-arms the shutdown signal so a later `start()` gets a fresh
    /// channel instead of an already-fired one.
    pub fn reset(&self) {
        let (tx, _rx) = watch::channel(false);
        *self.shutdown.lock() = tx;
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_stopped() {
        let controller = LifecycleController::new();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let controller = LifecycleController::new();

        controller.set(LifecycleState::Starting);
        assert_eq!(controller.state(), LifecycleState::Starting);

        controller.set(LifecycleState::Listening);
        assert_eq!(controller.state(), LifecycleState::Listening);

        controller.set(LifecycleState::Stopping);
        assert_eq!(controller.state(), LifecycleState::Stopping);

        controller.set(LifecycleState::Stopped);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn subscribers_observe_the_shutdown_signal() {
        let controller = LifecycleController::new();
        let mut rx = controller.subscribe();
        assert!(!*rx.borrow());

        controller.signal_shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn reset_rearms_the_signal() {
        let controller = LifecycleController::new();
        controller.signal_shutdown();
        controller.reset();

        let rx = controller.subscribe();
        assert!(!*rx.borrow(), "a fresh channel must not be pre-fired");
    }

    #[test]
    fn signal_without_subscribers_is_harmless() {
        let controller = LifecycleController::new();
        controller.signal_shutdown();
    }
}
