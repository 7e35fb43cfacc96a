//! Gantry Core — consumer identity model and credential parsing.

pub mod credentials;
pub mod types;

pub use credentials::{bearer_token, looks_like_signed_token, AppKeyTable};
pub use types::{Consumer, ConsumerAttributes, ConsumerType};
