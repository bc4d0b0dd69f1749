//! Per-server configuration records.

use serde_derive::{Deserialize, Serialize};

/// Names that cannot be used for a server: `pgexporter` labels the
/// exporter's own meta-metrics and `all` addresses every server at once.
pub const RESERVED_SERVER_NAMES: &[&str] = &["pgexporter", "all"];

/// One monitored PostgreSQL server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,

    /// Host name, IP address, or a Unix socket directory (starts with `/`).
    pub host: String,

    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    /// Username from the credential table used when connecting.
    pub user: String,

    /// Database the exporter connects to by default.
    #[serde(default = "ServerConfig::default_database")]
    pub database: String,

    #[serde(default)]
    pub data_dir: Option<String>,

    #[serde(default)]
    pub wal_dir: Option<String>,

    // Per-server TLS material for the PostgreSQL connection.
    #[serde(default)]
    pub tls: bool,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    pub tls_ca_file: Option<String>,
}

impl ServerConfig {
    pub fn default_port() -> u16 {
        5432
    }

    pub fn default_database() -> String {
        "postgres".into()
    }

    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }
}
