//! Configuration Module
//!
//! Handles configuration loading from files, environment variables, and command-line arguments.
//! Values are resolved once at startup and are immutable afterwards.

use crate::{GatewayError, Result};
use clap::{Arg, ArgMatches, Command};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// YAML file the configuration was read from, if any
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    S3,
    /// In-process store, for local runs without a bucket
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(BackendKind::S3),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("Unknown backend '{}' (expected s3 or memory)", other)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted PUT body in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: u64,
    #[serde(default)]
    pub backend: BackendKind,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_size() -> u64 {
    5 * 1024 * 1024 * 1024 // single PutObject limit
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_body_size: default_max_body_size(),
            backend: BackendKind::default(),
        }
    }
}

/// S3 backend configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub bucket: Option<String>,
    /// Endpoint of an S3-compatible store; implies path-style addressing
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            bucket: None,
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Object probed by the health endpoint
    #[serde(default = "default_health_file")]
    pub file: String,
    /// Minimum gap between live probes, in seconds
    #[serde(default = "default_health_cache_interval")]
    pub cache_interval_secs: u64,
}

fn default_health_file() -> String {
    ".rest-s3-proxy".to_string()
}

fn default_health_cache_interval() -> u64 {
    120
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            file: default_health_file(),
            cache_interval_secs: default_health_cache_interval(),
        }
    }
}

impl HealthConfig {
    pub fn cache_interval(&self) -> Duration {
        Duration::from_secs(self.cache_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rotated application logs; console only when unset
    #[serde(default)]
    pub app_log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            app_log_dir: None,
        }
    }
}

impl Config {
    /// Resolve configuration from CLI arguments, config file and environment.
    /// Not validated; call [`Config::validate`] once logging is up.
    pub fn load() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::resolve(&matches, |name| std::env::var(name).ok())
    }

    /// Resolve and validate configuration from parsed arguments and an
    /// environment lookup
    pub fn from_matches<F>(matches: &ArgMatches, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::resolve(matches, env)?;
        config.validate()?;
        Ok(config)
    }

    /// Later sources win: defaults, file, environment, command line
    pub fn resolve<F>(matches: &ArgMatches, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(config_path) = matches.get_one::<String>("config") {
            config = Self::load_from_file(config_path)?;
            config.source_file = Some(PathBuf::from(config_path));
        }

        config.apply_env_overrides(env)?;
        config.apply_cli_overrides(matches)?;
        Ok(config)
    }

    /// Build CLI argument parser
    pub fn build_cli() -> Command {
        Command::new("s3-rest-gateway")
            .version(env!("CARGO_PKG_VERSION"))
            .about("REST gateway for objects in an S3 bucket")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path"),
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .value_name("PORT")
                    .help("HTTP port (default: 8000)"),
            )
            .arg(
                Arg::new("region")
                    .long("region")
                    .value_name("REGION")
                    .help("AWS region (default: eu-west-1)"),
            )
            .arg(
                Arg::new("bucket")
                    .long("bucket")
                    .value_name("BUCKET")
                    .help("Bucket holding the served objects"),
            )
            .arg(
                Arg::new("endpoint-url")
                    .long("endpoint-url")
                    .value_name("URL")
                    .help("Endpoint of an S3-compatible store"),
            )
            .arg(
                Arg::new("health-file")
                    .long("health-file")
                    .value_name("KEY")
                    .help("Object read by health checks (default: .rest-s3-proxy)"),
            )
            .arg(
                Arg::new("health-cache-interval")
                    .long("health-cache-interval")
                    .value_name("SECONDS")
                    .help("Minimum seconds between live health probes (default: 120)"),
            )
            .arg(
                Arg::new("max-body-size")
                    .long("max-body-size")
                    .value_name("BYTES")
                    .help("Largest accepted upload in bytes (default: 5368709120)"),
            )
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level filter (default: info)"),
            )
            .arg(
                Arg::new("backend")
                    .long("backend")
                    .value_name("KIND")
                    .help("Storage backend: s3 (default) or memory"),
            )
    }

    /// Load configuration from YAML file
    fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to read config file {}: {}", path, e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| env(name).filter(|value| !value.is_empty());

        if let Some(port) = env("PORT") {
            self.server.port = parse_value("PORT", &port)?;
        }

        if let Some(region) = env("AWS_REGION") {
            self.s3.region = region;
        }

        if let Some(bucket) = env("AWS_BUCKET") {
            self.s3.bucket = Some(bucket);
        }

        if let Some(access_key_id) = env("AWS_ACCESS_KEY_ID") {
            self.s3.access_key_id = Some(access_key_id);
        }

        if let Some(secret_access_key) = env("AWS_SECRET_ACCESS_KEY") {
            self.s3.secret_access_key = Some(secret_access_key);
        }

        if let Some(endpoint_url) = env("AWS_ENDPOINT_URL") {
            self.s3.endpoint_url = Some(endpoint_url);
        }

        if let Some(health_file) = env("HEALTH_FILE") {
            self.health.file = health_file;
        }

        if let Some(interval) = env("HEALTH_CACHE_INTERVAL") {
            self.health.cache_interval_secs = parse_value("HEALTH_CACHE_INTERVAL", &interval)?;
        }

        if let Some(max_body_size) = env("MAX_BODY_SIZE") {
            self.server.max_body_size = parse_value("MAX_BODY_SIZE", &max_body_size)?;
        }

        if let Some(log_level) = env("LOG_LEVEL") {
            self.logging.log_level = log_level;
        }

        if let Some(app_log_dir) = env("APP_LOG_DIR") {
            self.logging.app_log_dir = Some(PathBuf::from(app_log_dir));
        }

        Ok(())
    }

    /// Apply command-line argument overrides
    pub fn apply_cli_overrides(&mut self, matches: &ArgMatches) -> Result<()> {
        if let Some(port) = matches.get_one::<String>("port") {
            self.server.port = parse_value("--port", port)?;
        }

        if let Some(region) = matches.get_one::<String>("region") {
            self.s3.region = region.clone();
        }

        if let Some(bucket) = matches.get_one::<String>("bucket") {
            self.s3.bucket = Some(bucket.clone());
        }

        if let Some(endpoint_url) = matches.get_one::<String>("endpoint-url") {
            self.s3.endpoint_url = Some(endpoint_url.clone());
        }

        if let Some(health_file) = matches.get_one::<String>("health-file") {
            self.health.file = health_file.clone();
        }

        if let Some(interval) = matches.get_one::<String>("health-cache-interval") {
            self.health.cache_interval_secs = parse_value("--health-cache-interval", interval)?;
        }

        if let Some(max_body_size) = matches.get_one::<String>("max-body-size") {
            self.server.max_body_size = parse_value("--max-body-size", max_body_size)?;
        }

        if let Some(log_level) = matches.get_one::<String>("log-level") {
            self.logging.log_level = log_level.clone();
        }

        if let Some(backend) = matches.get_one::<String>("backend") {
            self.server.backend = backend
                .parse()
                .map_err(GatewayError::ConfigError)?;
        }

        Ok(())
    }

    /// Reject configurations the gateway cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.server.max_body_size == 0 {
            return Err(GatewayError::ConfigError(
                "max_body_size must be greater than zero".to_string(),
            ));
        }

        if self.health.file.is_empty() {
            return Err(GatewayError::ConfigError(
                "Health check file cannot be empty".to_string(),
            ));
        }

        if self.server.backend == BackendKind::S3 {
            let required = [
                ("AWS_BUCKET", &self.s3.bucket),
                ("AWS_ACCESS_KEY_ID", &self.s3.access_key_id),
                ("AWS_SECRET_ACCESS_KEY", &self.s3.secret_access_key),
            ];
            for (name, value) in required {
                if value.as_deref().map_or(true, str::is_empty) {
                    return Err(GatewayError::ConfigError(format!(
                        "Unable to start as env {} is not defined",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Log the resolved values, secrets excluded
    pub fn log_summary(&self) {
        if let Some(path) = &self.source_file {
            info!("Configuration loaded from file: {}", path.display());
        }
        debug!("Configuration: {:?}", self);
        info!("PORT: {}", self.server.port);
        info!("Backend: {:?}", self.server.backend);
        info!("AWS_REGION: {}", self.s3.region);
        if let Some(bucket) = &self.s3.bucket {
            info!("AWS_BUCKET: {}", bucket);
        }
        if let Some(endpoint) = &self.s3.endpoint_url {
            info!("AWS_ENDPOINT_URL: {}", endpoint);
        }
        info!("HEALTH_FILE: {}", self.health.file);
        info!("HEALTH_CACHE_INTERVAL: {}s", self.health.cache_interval_secs);
        info!("MAX_BODY_SIZE: {} bytes", self.server.max_body_size);
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| {
        GatewayError::ConfigError(format!("Invalid value '{}' for {}: {}", value, name, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn required_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("AWS_BUCKET", "my-bucket"),
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ]
    }

    fn matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["s3-rest-gateway"];
        argv.extend_from_slice(args);
        Config::build_cli().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_matches(&matches(&[]), env_from(&required_env())).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.s3.region, "eu-west-1");
        assert_eq!(config.s3.bucket.as_deref(), Some("my-bucket"));
        assert_eq!(config.health.file, ".rest-s3-proxy");
        assert_eq!(config.health.cache_interval(), Duration::from_secs(120));
        assert_eq!(config.server.backend, BackendKind::S3);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_missing_bucket_is_fatal() {
        let env = env_from(&[
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ]);
        match Config::from_matches(&matches(&[]), env) {
            Err(GatewayError::ConfigError(msg)) => assert!(msg.contains("AWS_BUCKET")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let env = env_from(&[("AWS_BUCKET", "b"), ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE")]);
        match Config::from_matches(&matches(&[]), env) {
            Err(GatewayError::ConfigError(msg)) => assert!(msg.contains("AWS_SECRET_ACCESS_KEY")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_env_value_counts_as_missing() {
        let mut pairs = required_env();
        pairs[0] = ("AWS_BUCKET", "");
        assert!(Config::from_matches(&matches(&[]), env_from(&pairs)).is_err());
    }

    #[test]
    fn test_invalid_interval_is_fatal() {
        let mut pairs = required_env();
        pairs.push(("HEALTH_CACHE_INTERVAL", "two minutes"));
        match Config::from_matches(&matches(&[]), env_from(&pairs)) {
            Err(GatewayError::ConfigError(msg)) => {
                assert!(msg.contains("HEALTH_CACHE_INTERVAL"))
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut pairs = required_env();
        pairs.extend([
            ("PORT", "9000"),
            ("AWS_REGION", "us-east-1"),
            ("HEALTH_FILE", "status/ping"),
            ("HEALTH_CACHE_INTERVAL", "30"),
            ("MAX_BODY_SIZE", "1048576"),
            ("AWS_ENDPOINT_URL", "http://localhost:9000"),
        ]);
        let config = Config::from_matches(&matches(&[]), env_from(&pairs)).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.health.file, "status/ping");
        assert_eq!(config.health.cache_interval_secs, 30);
        assert_eq!(config.server.max_body_size, 1_048_576);
        assert_eq!(config.s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut pairs = required_env();
        pairs.push(("PORT", "9000"));
        let config = Config::from_matches(
            &matches(&["--port", "9100", "--health-cache-interval", "5"]),
            env_from(&pairs),
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.health.cache_interval_secs, 5);
    }

    #[test]
    fn test_memory_backend_needs_no_credentials() {
        let config =
            Config::from_matches(&matches(&["--backend", "memory"]), env_from(&[])).unwrap();
        assert_eq!(config.server.backend, BackendKind::Memory);
    }

    #[test]
    fn test_resolve_defers_validation() {
        let config = Config::resolve(&matches(&[]), env_from(&[])).unwrap();
        assert!(config.s3.bucket.is_none());
        match config.validate() {
            Err(e) => assert_eq!(
                e.to_string(),
                "Configuration error: Unable to start as env AWS_BUCKET is not defined"
            ),
            Ok(()) => panic!("expected missing bucket to fail validation"),
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Config::from_matches(&matches(&["--backend", "gcs"]), env_from(&[])).is_err());
    }

    #[test]
    fn test_zero_body_size_rejected() {
        let mut pairs = required_env();
        pairs.push(("MAX_BODY_SIZE", "0"));
        assert!(Config::from_matches(&matches(&[]), env_from(&pairs)).is_err());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  port: 8080
  max_body_size: 1024
s3:
  region: "ap-southeast-2"
  bucket: "yaml-bucket"
health:
  file: ".probe"
  cache_interval_secs: 60
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let env = env_from(&[
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
        ]);
        let config = Config::from_matches(&matches(&["--config", &path]), env).unwrap();
        assert_eq!(config.source_file.as_deref(), Some(file.path()));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_body_size, 1024);
        assert_eq!(config.s3.region, "ap-southeast-2");
        assert_eq!(config.s3.bucket.as_deref(), Some("yaml-bucket"));
        assert_eq!(config.health.file, ".probe");
        assert_eq!(config.health.cache_interval_secs, 60);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = S3Config {
            secret_access_key: Some("super-secret".to_string()),
            ..S3Config::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
