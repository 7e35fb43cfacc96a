//! Gantry Server — microservice chassis: per-request context,
//! identity resolver chain, request logging, and server lifecycle.

pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod request;

pub use config::{ConfigError, MicroserviceConfig, TrustProxy};
pub use error::{ErrorKind, HttpError};
pub use network::{BoundAddress, LifecycleState, Microservice, ServerError, ServiceHooks};
pub use request::auth::{IdentityResolver, Resolution};
pub use request::context::{current_consumer, try_current, ContextError, RequestContext};
pub use request::validate::{OpenApiConfig, SchemaValidator};
