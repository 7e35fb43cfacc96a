//! Credential parsing: bearer-token extraction, signed-token shape
//! detection, and the pre-shared app-key table.
//!
//! Everything here is pure string/map logic so it can be exercised
//! without a running server.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// `Authorization` header shape: `Bearer <token>` with a case-tolerant
/// scheme, matching the header form accepted on the wire.
static BEARER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[Bb]earer\s+(\S+)$").expect("bearer regex"));

/// Three-segment JWS shape. Deliberately loose: this only decides
/// whether a credential is worth handing to signature verification.
static SIGNED_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9_=]+)\.([a-zA-Z0-9_=]+)\.([a-zA-Z0-9_\-+/=]*)")
        .expect("signed token regex")
});

/// Extracts the bearer credential from a request, if any.
///
/// The `Authorization: Bearer <token>` header wins; the `access_token`
/// query parameter is only consulted when the header is absent
/// entirely (a malformed header does not fall back).
#[must_use]
pub fn bearer_token(authorization: Option<&str>, query: Option<&str>) -> Option<String> {
    if let Some(header) = authorization {
        return BEARER_RE
            .captures(header)
            .map(|caps| caps[1].to_string());
    }
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "access_token")
        .map(|(_, value)| value.into_owned())
}

/// Whether a credential has the three-segment shape of a signed token.
///
/// A `false` here means "not a signed token, keep looking", never an
/// error: only shapes that pass this check are subjected to signature
/// verification.
#[must_use]
pub fn looks_like_signed_token(token: &str) -> bool {
    SIGNED_TOKEN_RE.is_match(token)
}

/// Pre-shared token table: maps static tokens to application names and
/// carries the role sets handed to resolved applications.
///
/// Built once at configuration load; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct AppKeyTable {
    tokens: HashMap<String, String>,
    roles: HashMap<String, Vec<String>>,
    default_roles: Vec<String>,
    prefix: String,
}

impl AppKeyTable {
    /// Creates an empty table with the given token prefix and default
    /// role set. An empty prefix matches every token.
    #[must_use]
    pub fn new(prefix: impl Into<String>, default_roles: Vec<String>) -> Self {
        Self {
            tokens: HashMap::new(),
            roles: HashMap::new(),
            default_roles,
            prefix: prefix.into(),
        }
    }

    /// Registers a token for an application. Application names are
    /// lower-cased so lookups are stable however the environment
    /// spells them.
    ///
    /// Returns `false` (and logs a warning) when the token does not
    /// start with the configured prefix; such tokens could never be
    /// presented successfully, so they are dropped at load time.
    pub fn insert(&mut self, app: &str, token: &str) -> bool {
        if !self.prefix.is_empty() && !token.starts_with(&self.prefix) {
            warn!(app, "dropping app key: token does not start with the configured prefix");
            return false;
        }
        self.tokens.insert(token.to_string(), app.to_lowercase());
        true
    }

    /// Sets the explicit role list for an application, overriding the
    /// default role set.
    pub fn set_roles(&mut self, app: &str, roles: Vec<String>) {
        self.roles.insert(app.to_lowercase(), roles);
    }

    /// Whether the token carries the configured prefix.
    #[must_use]
    pub fn matches_prefix(&self, token: &str) -> bool {
        token.starts_with(&self.prefix)
    }

    /// Looks up a token and returns the application name plus its
    /// effective roles (explicit if configured, else the defaults).
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<(&str, &[String])> {
        let app = self.tokens.get(token)?;
        let roles = self
            .roles
            .get(app)
            .map_or(self.default_roles.as_slice(), Vec::as_slice);
        Some((app, roles))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
