//! Configuration loading and validation (§11).
//!
//! Grounded on `ultrafast-gateway::config`: TOML-loaded structs, a
//! `FLOWFORGE_*`-prefixed environment override pass (renamed from the
//! teacher's `GATEWAY_*`), and field-by-field `validate_*` methods that each
//! return a descriptive `anyhow::anyhow!` rather than a typed error, since
//! config problems are a startup concern rather than a client-facing one.

use std::env;
use std::time::Duration;

use flowforge_runtime::common::duration_serde;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
    pub gateway: GatewayConfig,
    pub orchestrator: OrchestratorConfig,
    pub platform_services: PlatformServicesConfig,
    pub logging: LoggingConfig,
}

/// Connection details for the shared companion services a manifest may
/// declare a `Dependency::Platform` on (§4.4.1 step 8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformServicesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<PlatformEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relational_store: Option<PlatformEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store: Option<PlatformEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// The HTTP surface this process serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

/// Connection details for the Persistent Store (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Where the Container Driver (§4.2/§4.3) reaches the container daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub endpoint: String,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

/// Where the Gateway Publisher (§4.5) reaches the external API gateway's
/// admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub admin_url: String,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

/// Naming and pooling conventions the orchestrator applies to everything it
/// manages (§4.2, §4.3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub container_name_prefix: String,
    pub volume_name_prefix: String,
    pub network_name: String,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub default_registry_path: Option<String>,
    #[serde(with = "duration_serde")]
    pub health_check_interval: Duration,
    #[serde(with = "duration_serde")]
    pub reconciliation_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("FLOWFORGE_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }

        if let Ok(port_str) = env::var("FLOWFORGE_PORT") {
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid FLOWFORGE_PORT: {port_str}"))?;
            self.server.port = port;
        }

        if let Ok(host) = env::var("FLOWFORGE_STORE_HOST") {
            self.store.host = host;
        }
        if let Ok(port_str) = env::var("FLOWFORGE_STORE_PORT") {
            self.store.port = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid FLOWFORGE_STORE_PORT: {port_str}"))?;
        }
        if let Ok(user) = env::var("FLOWFORGE_STORE_USER") {
            self.store.user = user;
        }
        if let Ok(password) = env::var("FLOWFORGE_STORE_PASSWORD") {
            self.store.password = password;
        }
        if let Ok(database) = env::var("FLOWFORGE_STORE_DATABASE") {
            self.store.database = database;
        }

        if let Ok(endpoint) = env::var("FLOWFORGE_DAEMON_ENDPOINT") {
            self.daemon.endpoint = endpoint;
        }

        if let Ok(admin_url) = env::var("FLOWFORGE_GATEWAY_ADMIN_URL") {
            self.gateway.admin_url = admin_url;
        }

        if let Ok(path) = env::var("FLOWFORGE_DEFAULT_REGISTRY_PATH") {
            self.orchestrator.default_registry_path = Some(path);
        }

        if let Ok(level) = env::var("FLOWFORGE_LOG_LEVEL") {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if !valid_levels.contains(&level.as_str()) {
                return Err(anyhow::anyhow!(
                    "invalid FLOWFORGE_LOG_LEVEL: {level}. use one of {valid_levels:?}"
                ));
            }
            self.logging.level = level;
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_server()?;
        self.validate_store()?;
        self.validate_daemon()?;
        self.validate_gateway()?;
        self.validate_orchestrator()?;
        self.validate_logging()?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server.host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be between 1 and 65535"));
        }
        if self.server.request_timeout.as_secs() == 0 {
            return Err(anyhow::anyhow!("server.request_timeout cannot be 0"));
        }
        Ok(())
    }

    fn validate_store(&self) -> anyhow::Result<()> {
        if self.store.host.is_empty() {
            return Err(anyhow::anyhow!("store.host cannot be empty"));
        }
        if self.store.database.is_empty() {
            return Err(anyhow::anyhow!("store.database cannot be empty"));
        }
        if self.store.max_connections == 0 {
            return Err(anyhow::anyhow!("store.max_connections cannot be 0"));
        }
        Ok(())
    }

    fn validate_daemon(&self) -> anyhow::Result<()> {
        if self.daemon.endpoint.is_empty() {
            return Err(anyhow::anyhow!("daemon.endpoint cannot be empty"));
        }
        if !self.daemon.endpoint.starts_with("http://")
            && !self.daemon.endpoint.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "daemon.endpoint must be an http(s) URL: {}",
                self.daemon.endpoint
            ));
        }
        Ok(())
    }

    fn validate_gateway(&self) -> anyhow::Result<()> {
        if !self.gateway.admin_url.starts_with("http://")
            && !self.gateway.admin_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "gateway.admin_url must be an http(s) URL: {}",
                self.gateway.admin_url
            ));
        }
        Ok(())
    }

    fn validate_orchestrator(&self) -> anyhow::Result<()> {
        if self.orchestrator.container_name_prefix.is_empty() {
            return Err(anyhow::anyhow!(
                "orchestrator.container_name_prefix cannot be empty"
            ));
        }
        if self.orchestrator.port_range_start >= self.orchestrator.port_range_end {
            return Err(anyhow::anyhow!(
                "orchestrator.port_range_start ({}) must be less than port_range_end ({})",
                self.orchestrator.port_range_start,
                self.orchestrator.port_range_end
            ));
        }
        if self.orchestrator.health_check_interval.as_secs() == 0 {
            return Err(anyhow::anyhow!(
                "orchestrator.health_check_interval cannot be 0"
            ));
        }
        if self.orchestrator.reconciliation_interval.as_secs() == 0 {
            return Err(anyhow::anyhow!(
                "orchestrator.reconciliation_interval cannot be 0"
            ));
        }
        Ok(())
    }

    fn validate_logging(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "logging.level must be one of {valid_levels:?}, got: {}",
                self.logging.level
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 7070,
                request_timeout: Duration::from_secs(30),
            },
            store: StoreConfig {
                host: "localhost".to_string(),
                port: 5432,
                user: "flowforge".to_string(),
                password: String::new(),
                database: "flowforge".to_string(),
                max_connections: 10,
            },
            daemon: DaemonConfig {
                endpoint: "http://localhost:2375".to_string(),
                request_timeout: Duration::from_secs(30),
            },
            gateway: GatewayConfig {
                admin_url: "http://localhost:8001".to_string(),
                request_timeout: Duration::from_secs(10),
            },
            orchestrator: OrchestratorConfig {
                container_name_prefix: "flowforge-plugin-".to_string(),
                volume_name_prefix: "flowforge-vol-".to_string(),
                network_name: "flowforge-plugins".to_string(),
                port_range_start: 20000,
                port_range_end: 21000,
                default_registry_path: None,
                health_check_interval: Duration::from_secs(15),
                reconciliation_interval: Duration::from_secs(60),
            },
            platform_services: PlatformServicesConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_an_inverted_port_range() {
        let mut config = Config::default();
        config.orchestrator.port_range_start = 21000;
        config.orchestrator.port_range_end = 20000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_a_non_http_daemon_endpoint() {
        let mut config = Config::default();
        config.daemon.endpoint = "/var/run/daemon.sock".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn store_connection_url_interpolates_fields() {
        let config = Config::default();
        let url = config.store.connection_url();
        assert!(url.starts_with("postgres://flowforge:@localhost:5432/flowforge"));
    }
}
