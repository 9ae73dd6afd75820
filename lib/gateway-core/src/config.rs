//! Gateway configuration loaded from YAML with environment overrides

use crate::{Address, GatewayError, Result, Route, RouteTable, ServiceRegistration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "GATEWAY_CONFIG";
/// Environment variable overriding the listen address
pub const LISTEN_ENV: &str = "GATEWAY_LISTEN";
/// Environment variable overriding the Consul agent address
pub const CONSUL_ADDR_ENV: &str = "CONSUL_HTTP_ADDR";
/// Environment variable carrying the Consul ACL token
pub const CONSUL_TOKEN_ENV: &str = "CONSUL_HTTP_TOKEN";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    pub registry: RegistryConfig,
    pub routes: Vec<Route>,
    pub timeouts: TimeoutConfig,
    pub resolution: ResolutionConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            registry: RegistryConfig::default(),
            routes: vec![Route::new("/auth", "auth-service")],
            timeouts: TimeoutConfig::default(),
            resolution: ResolutionConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Which registry backend answers resolution queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    #[default]
    Consul,
    Static,
}

/// A registration declared directly in the configuration file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticService {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl StaticService {
    fn to_registration(&self, index: usize) -> ServiceRegistration {
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.name, index));
        ServiceRegistration {
            id,
            name: self.name.clone(),
            address: Address::new(self.host.clone(), self.port),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub kind: RegistryKind,
    /// Consul agent base URL
    pub address: String,
    /// Consul ACL token
    pub token: Option<String>,
    /// Registrations for the `static` kind
    pub services: Vec<StaticService>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Consul,
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            services: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Registrations declared for the static registry, in file order
    pub fn static_registrations(&self) -> Vec<ServiceRegistration> {
        self.services
            .iter()
            .enumerate()
            .map(|(index, service)| service.to_registration(index))
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on a single registry query
    #[serde(with = "humantime_serde")]
    pub registry: Duration,
    /// Bound on the whole backend exchange, body included
    #[serde(with = "humantime_serde")]
    pub upstream: Duration,
    /// TCP connect timeout towards backends
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    /// Bound on receiving the caller's request body
    #[serde(with = "humantime_serde")]
    pub request_body: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            registry: Duration::from_secs(5),
            upstream: Duration::from_secs(30),
            connect: Duration::from_secs(10),
            request_body: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request body buffered for forwarding, in bytes
    pub max_request_body: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_body: 10 * 1024 * 1024,
        }
    }
}

/// How one registration is picked among several with the same name
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First registration in snapshot order
    #[default]
    First,
    RoundRobin,
    Random,
}

impl FromStr for SelectionPolicy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first" => Ok(Self::First),
            "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(GatewayError::InvalidConfiguration(format!(
                "unknown selection policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub policy: SelectionPolicy,
    /// Cache successful resolutions for this long; disabled when unset
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,
    pub cache_capacity: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::First,
            cache_ttl: None,
            cache_capacity: 256,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Parse a configuration document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Read a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        debug!("Read configuration from {}", path.display());
        Self::from_yaml(&contents)
    }

    /// Load from `path`, falling back to `GATEWAY_CONFIG`, then to defaults.
    ///
    /// Environment overrides are applied and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok();
        let mut config = match path.map(Path::to_path_buf).or(env_path.map(Into::into)) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(LISTEN_ENV) {
            self.listen = listen.parse().map_err(|e| {
                GatewayError::InvalidConfiguration(format!(
                    "{} '{}' is not a socket address: {}",
                    LISTEN_ENV, listen, e
                ))
            })?;
        }
        if let Some(address) = lookup(CONSUL_ADDR_ENV) {
            self.registry.address = normalize_consul_address(&address);
        }
        if let Some(token) = lookup(CONSUL_TOKEN_ENV) {
            self.registry.token = Some(token);
        }
        Ok(())
    }

    /// Check the configuration for errors that would only surface at request time
    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            return Err(GatewayError::InvalidConfiguration(
                "at least one route is required".to_string(),
            ));
        }
        RouteTable::new(self.routes.clone())?;

        match self.registry.kind {
            RegistryKind::Consul => {
                if self.registry.address.trim().is_empty() {
                    return Err(GatewayError::InvalidConfiguration(
                        "registry.address is required for the consul registry".to_string(),
                    ));
                }
            }
            RegistryKind::Static => {
                for service in &self.registry.services {
                    if service.name.trim().is_empty() {
                        return Err(GatewayError::InvalidConfiguration(
                            "static service with empty name".to_string(),
                        ));
                    }
                    if service.port == 0 {
                        return Err(GatewayError::InvalidConfiguration(format!(
                            "static service '{}' has port 0",
                            service.name
                        )));
                    }
                }
            }
        }

        if self.limits.max_request_body == 0 {
            return Err(GatewayError::InvalidConfiguration(
                "limits.max_request_body must be positive".to_string(),
            ));
        }

        if self.resolution.cache_ttl.is_some() && self.resolution.cache_capacity == 0 {
            return Err(GatewayError::InvalidConfiguration(
                "resolution.cache_capacity must be positive when caching is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Routing table built from the configured routes
    pub fn route_table(&self) -> Result<RouteTable> {
        RouteTable::new(self.routes.clone())
    }
}

// Consul's CLI accepts `host:port` without a scheme
fn normalize_consul_address(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", address.trim_end_matches('/'))
    }
}
