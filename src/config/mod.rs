//! Configuration module for the exporter.
//!
//! Parses TOML or YAML (auto-detected from the file extension), validates,
//! and publishes the result behind an atomic swap so a reload never exposes
//! a half-built configuration to readers.

use arc_swap::ArcSwap;
use log::{error, info};
use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::errors::Error;

// Sub-modules
mod bridge;
mod byte_size;
mod duration;
mod general;
mod server;
mod user;


// Re-exports
pub use bridge::{endpoint_host_port, normalize_endpoint};
pub use byte_size::ByteSize;
pub use duration::Duration;
pub use general::General;
pub use server::{ServerConfig, RESERVED_SERVER_NAMES};
pub use user::User;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// Detect configuration format from file path extension.
    /// Returns Yaml for .yaml/.yml files, Toml for everything else.
    pub fn detect(path: &str) -> Self {
        let path_lower = path.to_lowercase();
        if path_lower.ends_with(".yaml") || path_lower.ends_with(".yml") {
            ConfigFormat::Yaml
        } else {
            ConfigFormat::Toml
        }
    }
}

fn parse_config_content<T: serde::de::DeserializeOwned>(
    contents: &str,
    format: ConfigFormat,
) -> Result<T, Error> {
    match format {
        ConfigFormat::Toml => toml::from_str(contents)
            .map_err(|err| Error::BadConfig(format!("TOML parse error: {err}"))),
        ConfigFormat::Yaml => serde_yaml::from_str(contents)
            .map_err(|err| Error::BadConfig(format!("YAML parse error: {err}"))),
    }
}

/// Globally available configuration.
static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Configuration wrapper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    // General and global settings.
    #[serde(default)]
    pub general: General,

    // Monitored servers.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    // Credentials used against PostgreSQL.
    #[serde(default)]
    pub users: Vec<User>,

    // Credentials accepted on the management surface.
    #[serde(default)]
    pub admins: Vec<User>,

    // Metric catalog, loaded from `general.metrics_path` at parse time.
    #[serde(skip)]
    pub catalog: Arc<Catalog>,

    // Bridge endpoints after normalization, in declaration order.
    #[serde(skip)]
    pub bridge_endpoints: Vec<String>,
}

impl Config {
    /// Print current configuration.
    pub fn show(&self) {
        info!("Metrics endpoint: {}:{}", self.general.host, self.general.metrics_port);
        if self.general.management_port > 0 {
            info!("Management endpoint: {}:{}", self.general.host, self.general.management_port);
        }
        if self.general.bridge_port > 0 {
            info!("Bridge endpoint: {}:{}", self.general.host, self.general.bridge_port);
            info!("Bridge upstreams: {:?}", self.bridge_endpoints);
        }
        info!("Blocking timeout: {}ms", self.general.blocking_timeout);
        if self.general.cache && !self.general.metrics_cache_max_age.is_zero() {
            info!(
                "Metrics cache: max_age {}ms, max_size {} bytes",
                self.general.metrics_cache_max_age, self.general.metrics_cache_max_size
            );
        } else {
            info!("Metrics cache is disabled");
        }
        match self.general.metrics_cert_file {
            Some(ref cert) => info!("Metrics TLS certificate: {cert}"),
            None => info!("Metrics TLS is disabled"),
        }
        info!("Metric definitions: {}", self.catalog.metrics.len());
        for server in &self.servers {
            info!(
                "[server: {}] {}:{}/{} as {}",
                server.name, server.host, server.port, server.database, server.user
            );
        }
    }

    /// Look up a PostgreSQL credential by username.
    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    /// Validate the configuration.
    pub fn validate(&mut self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for server in &self.servers {
            if RESERVED_SERVER_NAMES.contains(&server.name.as_str()) {
                return Err(Error::BadConfig(format!(
                    "server name {:?} is reserved",
                    server.name
                )));
            }
            if !names.insert(server.name.clone()) {
                return Err(Error::BadConfig(format!(
                    "duplicate server name {:?}",
                    server.name
                )));
            }
            if self.user(&server.user).is_none() {
                return Err(Error::BadConfig(format!(
                    "server {:?} references unknown user {:?}",
                    server.name, server.user
                )));
            }
            if server.tls_cert_file.is_some() != server.tls_key_file.is_some() {
                return Err(Error::BadConfig(format!(
                    "server {:?} must set tls_cert_file and tls_key_file together",
                    server.name
                )));
            }
        }

        if self.general.metrics_cert_file.is_some() != self.general.metrics_key_file.is_some() {
            return Err(Error::BadConfig(
                "metrics_cert_file and metrics_key_file must be set together".to_string(),
            ));
        }

        if self.general.metrics_cache_max_size.as_bytes() > General::MAX_METRICS_CACHE_SIZE {
            self.general.metrics_cache_max_size = ByteSize(General::MAX_METRICS_CACHE_SIZE);
        }
        if self.general.bridge_cache_max_size.as_bytes() > General::MAX_BRIDGE_CACHE_SIZE {
            self.general.bridge_cache_max_size = ByteSize(General::MAX_BRIDGE_CACHE_SIZE);
        }

        // Normalize bridge endpoints and reject duplicates.
        let mut normalized = Vec::new();
        for raw in &self.general.bridge_endpoints {
            let endpoint = normalize_endpoint(raw);
            if endpoint.is_empty() {
                return Err(Error::BadConfig(format!(
                    "bridge endpoint {raw:?} is empty after normalization"
                )));
            }
            if normalized.contains(&endpoint) {
                return Err(Error::BadConfig(format!(
                    "duplicate bridge endpoint {endpoint:?}"
                )));
            }
            normalized.push(endpoint);
        }
        self.bridge_endpoints = normalized;

        Ok(())
    }

    /// Worker pool bound: configured value or servers x 4.
    pub fn worker_bound(&self) -> usize {
        if self.general.workers > 0 {
            self.general.workers
        } else {
            (self.servers.len() * 4).max(1)
        }
    }

    /// Fields whose change cannot be applied by a reload. Returns the list
    /// of offending keys when `candidate` differs from `self` in any of them.
    pub fn restart_required_changes(&self, candidate: &Config) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let old = &self.general;
        let new = &candidate.general;
        if old.host != new.host {
            changed.push("host");
        }
        if old.metrics_port != new.metrics_port {
            changed.push("metrics_port");
        }
        if old.management_port != new.management_port {
            changed.push("management_port");
        }
        if old.bridge_port != new.bridge_port {
            changed.push("bridge_port");
        }
        if self.worker_bound() != candidate.worker_bound() {
            changed.push("workers");
        }
        if old.metrics_cert_file != new.metrics_cert_file
            || old.metrics_key_file != new.metrics_key_file
            || old.metrics_ca_file != new.metrics_ca_file
        {
            changed.push("metrics_tls");
        }
        changed
    }
}

/// Get a read-only instance of the configuration
/// from anywhere in the app.
/// ArcSwap makes this cheap and quick.
pub fn get_config() -> Arc<Config> {
    CONFIG.load_full()
}

fn load_file(path: &str) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|err| Error::BadConfig(format!("Could not open '{path}': {err}")))
}

/// Build a configuration from a file without publishing it.
pub fn build(path: &str) -> Result<Config, Error> {
    let format = ConfigFormat::detect(path);
    let contents = load_file(path)?;
    let mut config: Config = parse_config_content(&contents, format)?;

    config.catalog = match config.general.metrics_path {
        Some(ref metrics_path) => Arc::new(Catalog::load(metrics_path)?),
        None => Arc::new(Catalog::builtin()?),
    };

    config.validate()?;
    config.path = path.to_string();
    Ok(config)
}

/// Parse the configuration file located at the path and publish it.
/// Supports both TOML (.toml) and YAML (.yaml, .yml) formats.
pub fn parse(path: &str) -> Result<(), Error> {
    let config = build(path)?;
    CONFIG.store(Arc::new(config));
    Ok(())
}

/// Publish a configuration object directly. Used by `conf set` and tests.
pub fn store(config: Config) {
    CONFIG.store(Arc::new(config));
}

/// Reload the configuration from its original path.
///
/// The candidate is fully built and validated before the swap; a change to
/// any restart-required field aborts the swap.
pub fn reload_config() -> Result<bool, Error> {
    let old_config = get_config();

    let candidate = match build(&old_config.path) {
        Ok(candidate) => candidate,
        Err(err) => {
            error!("Config reload error: {err}");
            return Err(err);
        }
    };

    let restart = old_config.restart_required_changes(&candidate);
    if !restart.is_empty() {
        return Err(Error::RestartRequired(restart.join(", ")));
    }

    if *old_config != candidate {
        info!("Config changed, reloading");
        CONFIG.store(Arc::new(candidate));
        crate::cache::bump_epoch();
        Ok(true)
    } else {
        Ok(false)
    }
}
