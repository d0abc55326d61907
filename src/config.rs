//! Gateway configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/guac-gateway/gateway.toml`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Per-protocol-type argument policy read from config and applied read-only
/// at runtime by the argument merger (§4.C).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentPolicy {
    pub default_arguments: HashMap<String, HashMap<String, String>>,
    pub unencrypted_arguments: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub port: u16,
    pub max_inactivity: Duration,
}

#[derive(Debug, Clone)]
pub struct GuacdConfig {
    pub hostname: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Top-level, immutable gateway configuration, shared read-only after
/// startup via `Arc<GatewayConfig>`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub websocket: WebSocketConfig,
    pub guacd: GuacdConfig,
    pub password: String,
    pub client: ArgumentPolicy,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (all-Option, defaults applied after parse)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    websocket: Option<RawWebSocketConfig>,
    guacd: Option<RawGuacdConfig>,
    password: Option<String>,
    client: Option<RawClientConfig>,
}

#[derive(Debug, Deserialize)]
struct RawWebSocketConfig {
    port: Option<u16>,
    #[serde(rename = "maxInactivityMin")]
    max_inactivity_min: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawGuacdConfig {
    hostname: Option<String>,
    port: Option<u16>,
    #[serde(rename = "timeoutMs")]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawClientConfig {
    #[serde(rename = "defaultArguments")]
    default_arguments: Option<HashMap<String, HashMap<String, String>>>,
    #[serde(rename = "unencryptedArguments")]
    unencrypted_arguments: Option<HashMap<String, Vec<String>>>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

/// Resolves the config path from the first CLI argument, then
/// `GATEWAY_CONFIG`, then the documented default, and loads it.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .unwrap_or_else(|| "/etc/guac-gateway/gateway.toml".to_owned());
    load_config_from_path(Path::new(&path))
}

pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let raw_ws = raw.websocket.unwrap_or(RawWebSocketConfig { port: None, max_inactivity_min: None });
    let websocket = WebSocketConfig {
        port: raw_ws.port.unwrap_or(8080),
        max_inactivity: Duration::from_secs(raw_ws.max_inactivity_min.unwrap_or(5) * 60),
    };

    let raw_guacd = raw
        .guacd
        .ok_or_else(|| ConfigError::MissingField("guacd".to_owned()))?;
    let guacd = GuacdConfig {
        hostname: raw_guacd
            .hostname
            .ok_or_else(|| ConfigError::MissingField("guacd.hostname".to_owned()))?,
        port: raw_guacd
            .port
            .ok_or_else(|| ConfigError::MissingField("guacd.port".to_owned()))?,
        timeout: Duration::from_millis(raw_guacd.timeout_ms.unwrap_or(10_000)),
    };

    let password = raw
        .password
        .ok_or_else(|| ConfigError::MissingField("password".to_owned()))?;

    let client = match raw.client {
        Some(c) => ArgumentPolicy {
            default_arguments: c.default_arguments.unwrap_or_default(),
            unencrypted_arguments: c.unencrypted_arguments.unwrap_or_default(),
        },
        None => ArgumentPolicy::default(),
    };

    Ok(GatewayConfig { websocket, guacd, password, client })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let toml_str = r#"
            password = "s3cret"

            [guacd]
            hostname = "127.0.0.1"
            port = 4822
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.websocket.port, 8080);
        assert_eq!(cfg.websocket.max_inactivity, Duration::from_secs(300));
        assert_eq!(cfg.guacd.timeout, Duration::from_secs(10));
    }

    #[test]
    fn missing_password_fails() {
        let toml_str = r#"
            [guacd]
            hostname = "127.0.0.1"
            port = 4822
        "#;
        let err = load_config_from_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn loads_full_client_policy() {
        let toml_str = r#"
            password = "pw"

            [guacd]
            hostname = "127.0.0.1"
            port = 4822

            [client.defaultArguments.rdp]
            security = "any"

            [client.unencryptedArguments]
            rdp = ["width", "height"]
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(
            cfg.client.default_arguments.get("rdp").unwrap().get("security").unwrap(),
            "any"
        );
        assert_eq!(
            cfg.client.unencrypted_arguments.get("rdp").unwrap(),
            &vec!["width".to_owned(), "height".to_owned()]
        );
    }
}
