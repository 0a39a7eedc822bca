use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use gateproxy_cache::{BackendKind, RedisConfig};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Signing key authority and refresh cadence
    #[serde(default)]
    pub keys: KeysConfig,
    /// Credential extraction and failure policy
    #[serde(default)]
    pub auth: AuthConfig,
    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Redis configuration, used when `cache.backend = "redis"`
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Upstream validations
        let upstream = parse_http_url("upstream.url", &self.upstream.url)?;
        if upstream.query().is_some() {
            return Err("upstream.url must not carry a query string".into());
        }
        if self.upstream.timeout.is_zero() {
            return Err("upstream.timeout must be > 0".into());
        }
        // Key authority validations
        parse_http_url("keys.authority_url", &self.keys.authority_url)?;
        if self.keys.poll_interval.is_zero() || self.keys.fetch_timeout.is_zero() {
            return Err("keys.poll_interval and keys.fetch_timeout must be > 0".into());
        }
        // Auth validation
        if self.auth.cookie_name.is_empty() {
            return Err("auth.cookie_name must not be empty".into());
        }
        // Cache validation
        if self.cache.enabled {
            if self.cache.ttl.is_zero() {
                return Err("cache.ttl must be > 0".into());
            }
            if self.cache.sweep_interval.is_zero() {
                return Err("cache.sweep_interval must be > 0".into());
            }
            if self.cache.backend == BackendKind::Redis && self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
        }
        if !is_valid_namespace(&self.cache.namespace) {
            return Err("cache.namespace must be non-empty and use only [A-Za-z0-9_.-]".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

fn parse_http_url(field: &str, value: &str) -> Result<Url, String> {
    if value.is_empty() {
        return Err(format!("{field} is required"));
    }
    let url = Url::parse(value).map_err(|e| format!("{field} is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{field} must use http or https"));
    }
    Ok(url)
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// How long in-flight requests may run after a shutdown signal.
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to. Path and query of the inbound
    /// request are appended.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_upstream_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Replaces the inbound `Origin` header when set.
    #[serde(default)]
    pub override_origin: Option<String>,
    /// Outbound `User-Agent`; the caller's goes to `x-user-agent`.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: default_upstream_timeout(),
            override_origin: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("reverse-proxy/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// GraphQL endpoint of the signing key authority.
    #[serde(default)]
    pub authority_url: String,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Polling intervals below this are raised to it.
    #[serde(default = "default_min_poll_interval", with = "humantime_serde")]
    pub min_poll_interval: Duration,
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            authority_url: String::new(),
            poll_interval: default_poll_interval(),
            min_poll_interval: default_min_poll_interval(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_min_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Where the bearer credential is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// `Authorization: Bearer <token>`
    Header,
    /// The configured cookie
    Cookie,
    /// Header first, cookie as fallback
    #[default]
    Both,
}

/// What happens to requests without a valid credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Forward without identity headers.
    #[default]
    Open,
    /// Answer 401 without forwarding.
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub credential_source: CredentialSource,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Leeway for `exp` and `nbf`.
    #[serde(default, with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_source: CredentialSource::default(),
            cookie_name: default_cookie_name(),
            failure_policy: FailurePolicy::default(),
            clock_skew: Duration::ZERO,
        }
    }
}

fn default_cookie_name() -> String {
    "access_token".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    /// Key prefix; `clear` only removes keys under it.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Local backend only.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Exposes `DELETE /_gateway/cache`.
    #[serde(default)]
    pub admin_clear: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: BackendKind::default(),
            ttl: default_cache_ttl(),
            namespace: default_namespace(),
            sweep_interval: default_sweep_interval(),
            admin_clear: false,
        }
    }
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_namespace() -> String {
    "gql_cache".to_string()
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, `*`, or `*.example.com` subdomain wildcards.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
    #[serde(default = "default_cors_max_age", with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: true,
            max_age: default_cors_max_age(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cors_max_age() -> Duration {
    Duration::from_secs(86_400)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "gateproxy.toml";

    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("config build error: {0}")]
        Build(#[source] config::ConfigError),

        #[error("config deserialize error: {0}")]
        Deserialize(#[source] config::ConfigError),

        #[error("invalid configuration: {0}")]
        Invalid(String),
    }

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., GATEPROXY__CACHE__TTL=10m
        builder = builder.add_source(
            Environment::with_prefix("GATEPROXY")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cors.allowed_origins"),
        );
        let cfg = builder.build().map_err(ConfigError::Build)?;
        let merged: AppConfig = cfg.try_deserialize().map_err(ConfigError::Deserialize)?;
        merged.validate().map_err(ConfigError::Invalid)?;
        Ok(merged)
    }
}
