//! # Configuration Module
//!
//! Gateway settings: where to listen, how to size sandbox pools, how to reach
//! the container engine, which runtimes exist and how to log. Everything has a
//! default, so the settings file is optional.
//!
//! ## Key Features
//! - YAML (or JSON) settings parsing with serde
//! - Human readable durations (`"3s"`, `"5m"`) via `humantime-serde`
//! - Environment variable overrides (`GATEWAY_*`)
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};
use crate::invocation::runtime::RuntimeSpec;

/// Default stage token used by HTTP APIs
pub const DEFAULT_STAGE: &str = "$default";

/// Main gateway settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP front settings
    pub server: ServerConfig,

    /// Sandbox pool sizing
    pub pool: PoolConfig,

    /// Container engine settings
    pub engine: EngineConfig,

    /// Invocation defaults
    pub invocation: InvocationConfig,

    /// Additional or overridden runtimes, keyed by runtime identifier
    pub runtimes: BTreeMap<String, RuntimeSpec>,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load settings from a YAML (or JSON) file and apply environment overrides
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::config(format!("Failed to read settings file {}: {}", path.display(), e))
        })?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse settings: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GATEWAY_*` environment variable overrides
    ///
    /// For example: `GATEWAY_SERVER_PORT=4004`
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Some(addr) = lookup("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(stage) = lookup("GATEWAY_STAGE") {
            self.server.stage = stage;
        }

        if let Some(timeout) = lookup("GATEWAY_DEFAULT_TIMEOUT") {
            self.invocation.default_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_DEFAULT_TIMEOUT: {}", e)))?;
        }

        if let Some(max) = lookup("GATEWAY_POOL_MAX_CONCURRENCY") {
            self.pool.max_concurrency = max.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_POOL_MAX_CONCURRENCY: {}", e))
            })?;
        }

        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        if let Some(binary) = lookup("GATEWAY_DOCKER_BINARY") {
            self.engine.binary = binary;
        }

        Ok(())
    }

    /// Configuration validation with detailed error messages
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.parse::<IpAddr>().is_err() {
            errors.push(format!(
                "bind_address '{}' is not a valid IP address",
                self.server.bind_address
            ));
        }

        if self.server.stage.trim().is_empty() {
            errors.push("stage cannot be empty".to_string());
        }

        if self.server.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        if self.pool.max_concurrency == 0 {
            errors.push("pool.max_concurrency must be at least 1".to_string());
        }

        if self.pool.max_idle > self.pool.max_concurrency {
            errors.push(format!(
                "pool.max_idle ({}) cannot exceed pool.max_concurrency ({})",
                self.pool.max_idle, self.pool.max_concurrency
            ));
        }

        if self.pool.reap_interval.is_zero() {
            errors.push("pool.reap_interval must be greater than 0".to_string());
        }

        if self.invocation.default_timeout.is_zero() {
            errors.push("invocation.default_timeout must be greater than 0".to_string());
        }

        if self.engine.binary.trim().is_empty() {
            errors.push("engine.binary cannot be empty".to_string());
        }

        if self.engine.create_timeout.is_zero() {
            errors.push("engine.create_timeout must be greater than 0".to_string());
        }

        if self.engine.keepalive.is_empty() {
            errors.push("engine.keepalive must name a command".to_string());
        }

        if let Some(layer) = &self.engine.layer_dir {
            if !layer.is_dir() {
                errors.push(format!("Invalid layer directory: \"{}\"", layer.display()));
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Settings validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Socket address the HTTP front binds to
    pub fn bind_addr(&self) -> GatewayResult<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

/// HTTP front configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (loopback by default)
    pub bind_address: String,

    /// Listen port (0 picks a free port)
    pub port: u16,

    /// Stage token reported in `requestContext.stage`
    pub stage: String,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Answer CORS preflights and add permissive CORS headers
    pub cors: bool,

    /// Time allowed for in-flight requests to finish on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5000,
            stage: DEFAULT_STAGE.to_string(),
            max_body_size: 6 * 1024 * 1024, // Lambda's synchronous payload limit
            cors: true,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Sandbox pool sizing, applied to every function
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent invocations (and sandboxes) per function
    pub max_concurrency: usize,

    /// Warm-idle sandboxes retained per function after use
    pub max_idle: usize,

    /// Idle sandboxes unused for this long are destroyed
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,

    /// How often idle sandboxes are checked for expiry
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_idle: 1,
            idle_ttl: Duration::from_secs(300),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine CLI binary
    pub binary: String,

    /// Network sandboxes join, to reach services running next to them
    pub network: Option<String>,

    /// Directory mounted read-only at `/opt` as the function layer
    pub layer_dir: Option<PathBuf>,

    /// Pull runtime images that are not present locally at startup
    pub pull_missing_images: bool,

    /// Command keeping a sandbox alive between invocations
    pub keepalive: Vec<String>,

    /// Label attached to every sandbox container
    pub label: String,

    /// Longest a sandbox may take to start before the request fails
    #[serde(with = "humantime_serde")]
    pub create_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            network: None,
            layer_dir: None,
            pull_missing_images: false,
            keepalive: vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()],
            label: "function-gateway".to_string(),
            create_timeout: Duration::from_secs(30),
        }
    }
}

/// Invocation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Timeout for functions that declare none (Lambda's default is 3 seconds)
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio::fs;

    #[test]
    fn test_default_config_validation() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.stage, "$default");
        assert_eq!(config.invocation.default_timeout, Duration::from_secs(3));
        assert_eq!(
            config.bind_addr().unwrap(),
            "127.0.0.1:5000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_config_serialization_yaml() {
        let config = GatewayConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.server.port, deserialized.server.port);
        assert_eq!(config.pool.idle_ttl, deserialized.pool.idle_ttl);
        assert_eq!(config.engine.keepalive, deserialized.engine.keepalive);
    }

    #[tokio::test]
    async fn test_load_partial_config_from_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gateway.yaml");

        let config_content = r#"
server:
  port: 4004
  stage: "dev"
pool:
  max_concurrency: 2
  idle_ttl: "90s"
invocation:
  default_timeout: "6s"
runtimes:
  provided.al2:
    image: "my/bootstrap:latest"
    extensions: ["sh"]
    shim: ["/bootstrap", "{handler}"]
logging:
  level: "debug"
  format: "json"
"#;

        fs::write(&config_path, config_content).await.unwrap();

        let config = GatewayConfig::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.server.port, 4004);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.stage, "dev");
        assert_eq!(config.pool.max_concurrency, 2);
        assert_eq!(config.pool.max_idle, 1);
        assert_eq!(config.pool.idle_ttl, Duration::from_secs(90));
        assert_eq!(config.invocation.default_timeout, Duration::from_secs(6));
        assert!(config.runtimes.contains_key("provided.al2"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[tokio::test]
    async fn test_missing_settings_file_is_config_error() {
        let err = GatewayConfig::load_from_file("/definitely/not/here.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GATEWAY_SERVER_PORT", "4100"),
            ("GATEWAY_STAGE", "test"),
            ("GATEWAY_DEFAULT_TIMEOUT", "10s"),
            ("GATEWAY_POOL_MAX_CONCURRENCY", "8"),
            ("GATEWAY_LOG_FORMAT", "json"),
            ("GATEWAY_DOCKER_BINARY", "podman"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.stage, "test");
        assert_eq!(config.invocation.default_timeout, Duration::from_secs(10));
        assert_eq!(config.pool.max_concurrency, 8);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.engine.binary, "podman");
    }

    #[test]
    fn test_invalid_environment_overrides() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == "GATEWAY_SERVER_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());

        let mut config = GatewayConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == "GATEWAY_DEFAULT_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = GatewayConfig::default();
        config.server.bind_address = "localhost:80".to_string();
        config.pool.max_concurrency = 0;
        config.invocation.default_timeout = Duration::ZERO;
        config.engine.create_timeout = Duration::ZERO;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("bind_address"));
        assert!(err.contains("max_concurrency"));
        assert!(err.contains("default_timeout"));
        assert!(err.contains("create_timeout"));
    }

    #[test]
    fn test_max_idle_bounded_by_concurrency() {
        let mut config = GatewayConfig::default();
        config.pool.max_concurrency = 2;
        config.pool.max_idle = 3;
        assert!(config.validate().is_err());
    }
}
