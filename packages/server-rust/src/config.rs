//! Service configuration and environment loading.
//!
//! All knobs can be set programmatically; `from_env` fills them from
//! `GANTRY_*` variables plus the dynamic `APP_KEY_*` namespace for
//! pre-shared tokens. Loading is driven by an injected `(key, value)`
//! iterator so the environment contract is testable without touching
//! the process environment.
//!
//! Environment variables:
//! - `GANTRY_PORT` (default 8080), `GANTRY_ADDRESS`, `GANTRY_ADDRESSES`
//!   (comma-separated)
//! - `GANTRY_TRUST_PROXY`: `true`, `false`, or a comma-separated list
//! - `GANTRY_MAX_UPLOAD_SIZE`: bytes or a human size (`128kb`, `1mb`)
//! - `GANTRY_PRE_SHARED_TOKEN_PREFIX`
//! - `APP_KEY_<NAME>`: pre-shared token for `<NAME>`;
//!   `APP_KEY_<NAME>_FILE`: path to a file with one token per line
//! - `APP_<NAME>_ROLES`: roles for `<NAME>`; `APP_DEFAULT_ROLES`
//! - `GANTRY_JWT_PUBLIC_KEY`: path to the verification key PEM
//! - `GANTRY_TLS_KEY` / `GANTRY_TLS_KEY_FILE`, `GANTRY_TLS_CERT` /
//!   `GANTRY_TLS_CERT_FILE` (inline wins over the file variant)
//! - `GANTRY_FORWARD_UNKNOWN_BEARER`, `GANTRY_LOG_404`
//! - `GANTRY_OPENAPI_SPEC_FILE`, `GANTRY_OPENAPI_CONTROLLERS_PATH`,
//!   `GANTRY_OPENAPI_VALIDATE_RESPONSE` (default true)

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use gantry_core::AppKeyTable;

use crate::request::validate::OpenApiConfig;

/// Which upstream hops are trusted to supply accurate client metadata.
///
/// Evaluation of individual hops is delegated to the transport
/// collaborator; the chassis itself only distinguishes "some proxies
/// are trusted" from "none are" (see the request-id handling in
/// `network::middleware`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustProxy {
    /// Trust every upstream hop.
    Always,
    /// Trust no upstream hop.
    Never,
    /// Trust the named subnets/hops.
    List(Vec<String>),
}

impl TrustProxy {
    /// Whether any upstream hop is trusted.
    #[must_use]
    pub fn trusts_upstream(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::List(list) => !list.is_empty(),
        }
    }

    fn parse(value: &str) -> Self {
        match value.trim() {
            "true" => Self::Always,
            "false" => Self::Never,
            other => {
                let list: Vec<String> = other
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect();
                if list.is_empty() {
                    Self::Never
                } else {
                    Self::List(list)
                }
            }
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Full configuration for a [`crate::Microservice`].
#[derive(Debug, Clone)]
pub struct MicroserviceConfig {
    /// Listening port. 0 requests an OS-assigned port.
    pub port: u16,
    /// Whether unmatched routes are access-logged.
    pub log_404: bool,
    /// Single bind address.
    pub address: Option<String>,
    /// Multiple bind addresses sharing `port`.
    pub addresses: Vec<String>,
    /// Trust-proxy policy.
    pub trust_proxy: TrustProxy,
    /// Maximum request body size in bytes.
    pub max_upload_size: usize,
    /// Prefix identifying pre-shared tokens. Empty matches all.
    pub pre_shared_token_prefix: String,
    /// Path to the signed-token verification key (PEM).
    pub jwt_public_key: Option<PathBuf>,
    /// Pre-shared token table.
    pub app_keys: AppKeyTable,
    /// Inline PEM private key enabling the encrypted transport.
    pub tls_key: Option<String>,
    /// Inline PEM certificate chain for the encrypted transport.
    pub tls_cert: Option<String>,
    /// Whether bearer credentials unknown to every resolver are
    /// forwarded unauthenticated instead of rejected.
    pub forward_unknown_bearer: bool,
    /// Optional OpenAPI validation stage configuration.
    pub open_api: Option<OpenApiConfig>,
}

impl Default for MicroserviceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_404: false,
            address: None,
            addresses: Vec::new(),
            trust_proxy: TrustProxy::List(vec![
                "loopback".to_string(),
                "linklocal".to_string(),
                "uniquelocal".to_string(),
            ]),
            max_upload_size: 128 * 1024,
            pre_shared_token_prefix: String::new(),
            jwt_public_key: None,
            app_keys: AppKeyTable::new("", vec!["admin".to_string()]),
            tls_key: None,
            tls_cert: None,
            forward_unknown_bearer: false,
            open_api: None,
        }
    }
}

impl MicroserviceConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on unparseable values or unreadable files.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Loads configuration from an explicit `(key, value)` set.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on unparseable values or unreadable files.
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let map: HashMap<String, String> = vars.into_iter().collect();
        let mut config = Self::default();

        if let Some(value) = map.get("GANTRY_PORT") {
            config.port = value.parse().map_err(|_| ConfigError::Invalid {
                key: "GANTRY_PORT",
                reason: format!("not a port number: {value}"),
            })?;
        }
        if let Some(value) = map.get("GANTRY_LOG_404") {
            config.log_404 = parse_bool("GANTRY_LOG_404", value)?;
        }
        config.address = map.get("GANTRY_ADDRESS").cloned();
        if let Some(value) = map.get("GANTRY_ADDRESSES") {
            config.addresses = parse_list(value);
        }
        if let Some(value) = map.get("GANTRY_TRUST_PROXY") {
            config.trust_proxy = TrustProxy::parse(value);
        }
        if let Some(value) = map.get("GANTRY_MAX_UPLOAD_SIZE") {
            config.max_upload_size =
                parse_size(value).ok_or_else(|| ConfigError::Invalid {
                    key: "GANTRY_MAX_UPLOAD_SIZE",
                    reason: format!("not a size: {value}"),
                })?;
        }
        if let Some(value) = map.get("GANTRY_PRE_SHARED_TOKEN_PREFIX") {
            config.pre_shared_token_prefix = value.clone();
        }
        config.jwt_public_key = map.get("GANTRY_JWT_PUBLIC_KEY").map(PathBuf::from);
        config.tls_key = inline_or_file(&map, "GANTRY_TLS_KEY", "GANTRY_TLS_KEY_FILE")?;
        config.tls_cert = inline_or_file(&map, "GANTRY_TLS_CERT", "GANTRY_TLS_CERT_FILE")?;
        if let Some(value) = map.get("GANTRY_FORWARD_UNKNOWN_BEARER") {
            config.forward_unknown_bearer = parse_bool("GANTRY_FORWARD_UNKNOWN_BEARER", value)?;
        }

        let default_roles = map
            .get("APP_DEFAULT_ROLES")
            .map_or_else(|| vec!["admin".to_string()], |value| parse_list(value));
        config.app_keys =
            load_app_keys(&map, &config.pre_shared_token_prefix, default_roles)?;

        config.open_api = load_open_api(&map)?;

        Ok(config)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("not a boolean: {other}"),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a byte size: plain bytes (`"131072"`) or a human suffix
/// (`"128kb"`, `"1mb"`, `"2gb"`).
fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim().to_ascii_lowercase();
    let (number, multiplier) = if let Some(number) = value.strip_suffix("gb") {
        (number, 1024 * 1024 * 1024)
    } else if let Some(number) = value.strip_suffix("mb") {
        (number, 1024 * 1024)
    } else if let Some(number) = value.strip_suffix("kb") {
        (number, 1024)
    } else if let Some(number) = value.strip_suffix('b') {
        (number, 1)
    } else {
        (value.as_str(), 1)
    };
    number
        .trim()
        .parse::<usize>()
        .ok()
        .map(|n| n * multiplier)
}

fn inline_or_file(
    map: &HashMap<String, String>,
    inline_key: &'static str,
    file_key: &'static str,
) -> Result<Option<String>, ConfigError> {
    if let Some(value) = map.get(inline_key) {
        if !value.is_empty() {
            return Ok(Some(value.clone()));
        }
    }
    match map.get(file_key) {
        Some(path) if !path.is_empty() => {
            let content =
                std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: PathBuf::from(path),
                    source,
                })?;
            Ok(Some(content))
        }
        _ => Ok(None),
    }
}

fn load_app_keys(
    map: &HashMap<String, String>,
    prefix: &str,
    default_roles: Vec<String>,
) -> Result<AppKeyTable, ConfigError> {
    let mut table = AppKeyTable::new(prefix, default_roles);
    for (name, value) in map {
        let Some(suffix) = name.strip_prefix("APP_KEY_") else {
            continue;
        };
        if suffix.is_empty() || value.is_empty() {
            continue;
        }
        let (app, tokens) = if let Some(app) = suffix.strip_suffix("_FILE") {
            let content = std::fs::read_to_string(value).map_err(|source| ConfigError::Io {
                path: PathBuf::from(value),
                source,
            })?;
            let tokens: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            (app, tokens)
        } else {
            (suffix, vec![value.clone()])
        };
        for token in &tokens {
            table.insert(app, token);
        }
        if let Some(roles) = map.get(&format!("APP_{app}_ROLES")) {
            table.set_roles(app, parse_list(roles));
        }
    }
    Ok(table)
}

fn load_open_api(map: &HashMap<String, String>) -> Result<Option<OpenApiConfig>, ConfigError> {
    let spec_file = map.get("GANTRY_OPENAPI_SPEC_FILE").filter(|v| !v.is_empty());
    let controllers_path = map
        .get("GANTRY_OPENAPI_CONTROLLERS_PATH")
        .filter(|v| !v.is_empty());
    let validate_response = match map.get("GANTRY_OPENAPI_VALIDATE_RESPONSE") {
        Some(value) => parse_bool("GANTRY_OPENAPI_VALIDATE_RESPONSE", value)?,
        None => true,
    };
    match (spec_file, controllers_path) {
        (Some(spec_file), Some(controllers_path)) => Ok(Some(OpenApiConfig {
            spec_file: PathBuf::from(spec_file),
            controllers_path: PathBuf::from(controllers_path),
            validate_response,
        })),
        (None, None) => Ok(None),
        _ => {
            warn!("OpenAPI configuration is incomplete");
            Ok(None)
        }
    }
}
