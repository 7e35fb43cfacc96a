use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Category of caller behind a resolved identity.
///
/// Serialized as a lowercase string so it round-trips through JSON
/// claim payloads (`"user"`, `"service"`, `"unknown"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    /// A human end user.
    User,
    /// Another application or service account.
    Service,
    /// A caller whose category could not be determined.
    Unknown,
}

/// Attributes describing a consumer beyond its identifier and roles.
///
/// `name` and `type` are always present; any additional keys carried by
/// a token payload are preserved in `extra`. Uses `BTreeMap` for
/// deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerAttributes {
    /// Display name of the consumer (used in log records).
    pub name: String,
    /// Category discriminator.
    #[serde(rename = "type")]
    pub kind: ConsumerType,
    /// Application-specific attributes not interpreted by the chassis.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A resolved caller identity: a user, another service, or an unknown
/// actor. Created by exactly one identity resolver per request,
/// immutable once attached to the request context, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    /// Unique identifier within the consumer's namespace.
    pub id: String,
    /// Roles held by the consumer. Order carries no meaning.
    pub roles: Vec<String>,
    /// Descriptive attributes, including the `type` discriminator.
    pub attr: ConsumerAttributes,
}

impl Consumer {
    /// Builds the identity for an application authenticated by a
    /// pre-shared token: `id` is the application name and the type is
    /// `service`.
    #[must_use]
    pub fn service(name: &str, roles: Vec<String>) -> Self {
        Self {
            id: name.to_string(),
            roles,
            attr: ConsumerAttributes {
                name: name.to_string(),
                kind: ConsumerType::Service,
                extra: BTreeMap::new(),
            },
        }
    }

    /// Display name for log records.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.attr.name
    }

    /// Whether the consumer holds the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
