//! Listener configuration, lifecycle control, transport middleware,
//! and the server module.

pub mod config;
pub mod lifecycle;
pub mod middleware;
pub mod module;

pub use config::{InvalidBindConfig, NetworkConfig, TlsMaterial};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use module::{BoundAddress, Microservice, ServerError, ServiceHooks};
