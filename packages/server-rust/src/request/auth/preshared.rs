//! Pre-shared token resolver.
//!
//! First strategy in the chain: static tokens distributed out of band
//! to known internal applications. Checked before the signed-token
//! resolver so an app key never needs a valid signature.

use async_trait::async_trait;
use axum::http::request::Parts;
use tracing::{debug, trace};

use gantry_core::{AppKeyTable, Consumer};

use super::{IdentityResolver, Resolution};
use crate::error::HttpError;

/// Resolves identities from the configured token-to-application table.
///
/// Enabled only when the table is non-empty. A token matching the
/// configured prefix but absent from the table is rejected outright
/// unless unknown-bearer forwarding is enabled, in which case it falls
/// through to the next resolver.
pub struct PreSharedTokenResolver {
    table: AppKeyTable,
    forward_unknown_bearer: bool,
}

impl PreSharedTokenResolver {
    #[must_use]
    pub fn new(table: AppKeyTable, forward_unknown_bearer: bool) -> Self {
        Self {
            table,
            forward_unknown_bearer,
        }
    }
}

#[async_trait]
impl IdentityResolver for PreSharedTokenResolver {
    fn name(&self) -> &'static str {
        "pre-shared-token"
    }

    async fn resolve(&self, _parts: &Parts, token: Option<&str>) -> Result<Resolution, HttpError> {
        let Some(token) = token else {
            trace!("no bearer token found");
            return Ok(Resolution::Skip);
        };
        if !self.table.matches_prefix(token) {
            trace!("not a pre-shared token");
            return Ok(Resolution::Skip);
        }
        match self.table.resolve(token) {
            Some((app, roles)) => {
                trace!(app, "found pre-shared token");
                Ok(Resolution::Attached(Consumer::service(app, roles.to_vec())))
            }
            None => {
                debug!("unknown bearer token");
                if self.forward_unknown_bearer {
                    trace!("unknown-bearer forwarding is enabled, moving on");
                    Ok(Resolution::Skip)
                } else {
                    Err(HttpError::unauthorized())
                }
            }
        }
    }
}
