//! Gateway configuration
//!
//! Loaded from a TOML file when present, then overridden by environment
//! variables so containerized deployments can configure the gateway without
//! a file. An empty host-key path means an ephemeral key.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "TERMGATE_";

/// Configuration for the gateway daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the enrollment SSH server binds to
    pub bind_address: String,

    /// Path to the enrollment host key file; empty = ephemeral key
    pub host_key_path: PathBuf,

    /// Host key algorithm: "ed25519" (default), "ecdsa" or "rsa"
    pub host_key_algorithm: String,

    /// Directory holding the CA / api-client / worker certificate bundle
    pub cert_dir: PathBuf,

    /// Failed enrollment attempts from one IP before lockout
    pub rate_limit_threshold: u32,

    /// Per-call worker RPC timeout in seconds
    #[serde(with = "duration_secs")]
    pub rpc_timeout: Duration,

    /// Outbound SSH connect timeout in seconds
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// TCP port worker processes listen on (mTLS)
    pub worker_port: u16,

    /// Token-validation endpoint; when unset, the static validator is used
    pub token_endpoint: Option<String>,

    /// Static enrollment token for offline/dev deployments
    pub static_token: Option<String>,

    /// Optional shared secret required alongside the enrollment token
    pub shared_secret: Option<String>,

    /// Default namespace stamped onto new sessions
    pub namespace: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let config_dir = default_config_dir();

        Self {
            bind_address: "0.0.0.0:2022".to_string(),
            host_key_path: config_dir.join("host_key"),
            host_key_algorithm: "ed25519".to_string(),
            cert_dir: config_dir.join("certs"),
            rate_limit_threshold: 5,
            rpc_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            worker_port: 7070,
            token_endpoint: None,
            static_token: None,
            shared_secret: None,
            namespace: "default".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound(path.to_path_buf()))?;
        let mut config: GatewayConfig = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for file-less deployments.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `TERMGATE_*` environment variables on top of current values.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_var("BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = env_var("HOST_KEY_PATH") {
            self.host_key_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("HOST_KEY_ALGORITHM") {
            self.host_key_algorithm = v;
        }
        if let Some(v) = env_var("CERT_DIR") {
            self.cert_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("RATE_LIMIT_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.rate_limit_threshold = v;
        }
        if let Some(v) = env_var("RPC_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.rpc_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_var("CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.connect_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_var("WORKER_PORT").and_then(|v| v.parse().ok()) {
            self.worker_port = v;
        }
        if let Some(v) = env_var("TOKEN_ENDPOINT") {
            self.token_endpoint = Some(v);
        }
        if let Some(v) = env_var("STATIC_TOKEN") {
            self.static_token = Some(v);
        }
        if let Some(v) = env_var("SHARED_SECRET") {
            self.shared_secret = Some(v);
        }
        if let Some(v) = env_var("NAMESPACE") {
            self.namespace = v;
        }
    }

    /// Reject configurations that cannot work.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.host_key_algorithm.as_str() {
            "ed25519" | "ecdsa" | "rsa" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported host key algorithm: {other}"
                )))
            }
        }
        if self.rate_limit_threshold == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_threshold must be at least 1".to_string(),
            ));
        }
        if self.token_endpoint.is_none() && self.static_token.is_none() {
            return Err(ConfigError::Invalid(
                "either token_endpoint or static_token must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration directory (`~/.config/termgate` on Linux).
pub fn default_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termgate")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("gateway.toml")
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

// Helper module for Duration serialization as whole seconds
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
