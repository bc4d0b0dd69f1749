//! General configuration settings for the exporter.

use serde_derive::{Deserialize, Serialize};

use super::{ByteSize, Duration};

/// General configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct General {
    #[serde(default = "General::default_host")]
    pub host: String,

    /// Port of the main metrics endpoint.
    #[serde(default = "General::default_metrics_port")]
    pub metrics_port: u16,

    /// Port of the management endpoint. 0 disables it.
    #[serde(default = "General::default_management_port")]
    pub management_port: u16,

    /// Port of the bridge endpoint. 0 disables the bridge.
    #[serde(default)]
    pub bridge_port: u16,

    /// Upper bound for every outgoing operation: connect, query, HTTP fetch.
    #[serde(default = "General::default_blocking_timeout")]
    pub blocking_timeout: Duration,

    /// Whether the exposition cache is used at all.
    #[serde(default = "General::default_cache")]
    pub cache: bool,

    #[serde(default = "General::default_metrics_cache_max_age")]
    pub metrics_cache_max_age: Duration,

    #[serde(default = "General::default_metrics_cache_max_size")]
    pub metrics_cache_max_size: ByteSize,

    #[serde(default = "General::default_bridge_cache_max_age")]
    pub bridge_cache_max_age: Duration,

    #[serde(default = "General::default_bridge_cache_max_size")]
    pub bridge_cache_max_size: ByteSize,

    /// Size of the bridge JSON cache. 0 disables `/metrics/bridge.json`.
    #[serde(default)]
    pub bridge_json_cache_max_size: ByteSize,

    /// External scrape endpoints re-exported by the bridge, `host:port`.
    #[serde(default)]
    pub bridge_endpoints: Vec<String>,

    /// Worker pool bound for concurrent collectors. 0 means servers x 4.
    #[serde(default)]
    pub workers: usize,

    /// Path to the metric catalog (YAML). Absent means the built-in catalog.
    #[serde(default)]
    pub metrics_path: Option<String>,

    /// Whether gzip is offered on the exposition surfaces.
    #[serde(default = "General::default_compression")]
    pub compression: bool,

    // TLS material for the metrics surface.
    pub metrics_cert_file: Option<String>,
    pub metrics_key_file: Option<String>,
    pub metrics_ca_file: Option<String>,
}

impl General {
    pub fn default_host() -> String {
        "0.0.0.0".into()
    }

    pub fn default_metrics_port() -> u16 {
        5001
    }

    pub fn default_management_port() -> u16 {
        5002
    }

    pub fn default_blocking_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn default_cache() -> bool {
        true
    }

    pub fn default_metrics_cache_max_age() -> Duration {
        Duration::from_secs(0)
    }

    pub fn default_metrics_cache_max_size() -> ByteSize {
        ByteSize::from_kb(256)
    }

    pub fn default_bridge_cache_max_age() -> Duration {
        Duration::from_secs(300)
    }

    pub fn default_bridge_cache_max_size() -> ByteSize {
        ByteSize::from_mb(8)
    }

    pub fn default_compression() -> bool {
        true
    }

    /// Hard caps applied after parsing, matching the exposition buffers the
    /// HTTP surface is willing to hold.
    pub const MAX_METRICS_CACHE_SIZE: u64 = 8 * 1024 * 1024;
    pub const MAX_BRIDGE_CACHE_SIZE: u64 = 32 * 1024 * 1024;

    pub fn tls_enabled(&self) -> bool {
        self.metrics_cert_file.is_some() && self.metrics_key_file.is_some()
    }
}

impl Default for General {
    fn default() -> General {
        General {
            host: Self::default_host(),
            metrics_port: Self::default_metrics_port(),
            management_port: Self::default_management_port(),
            bridge_port: 0,
            blocking_timeout: Self::default_blocking_timeout(),
            cache: Self::default_cache(),
            metrics_cache_max_age: Self::default_metrics_cache_max_age(),
            metrics_cache_max_size: Self::default_metrics_cache_max_size(),
            bridge_cache_max_age: Self::default_bridge_cache_max_age(),
            bridge_cache_max_size: Self::default_bridge_cache_max_size(),
            bridge_json_cache_max_size: ByteSize::from_bytes(0),
            bridge_endpoints: Vec::new(),
            workers: 0,
            metrics_path: None,
            compression: Self::default_compression(),
            metrics_cert_file: None,
            metrics_key_file: None,
            metrics_ca_file: None,
        }
    }
}
