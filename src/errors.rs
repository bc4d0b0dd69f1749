//! Errors.

use std::io;

/// Various errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket error occurred: {0}")]
    SocketError(String),
    #[error("protocol synchronization error: {0}")]
    ProtocolSyncError(String),
    #[error("error during startup of {1}: {0}")]
    ServerStartupError(String, ServerIdentifier),
    #[error("authentication failed for {1}: {0}")]
    ServerAuthError(String, ServerIdentifier),
    #[error("authentication method {method} requested by {id} is not supported")]
    AuthUnsupported { id: ServerIdentifier, method: i32 },
    #[error("server error {sqlstate}: {message}")]
    QueryError { sqlstate: String, message: String },
    #[error("query exceeded the blocking timeout")]
    QueryTimeout,
    #[error("invalid configuration: {0}")]
    BadConfig(String),
    #[error("restart required: {0}")]
    RestartRequired(String),
    #[error("invalid metric catalog: {0}")]
    BadCatalog(String),
    #[error("metric {metric} returned a malformed result: {reason}")]
    RenderShape { metric: String, reason: String },
    #[error("bridge endpoint {endpoint} failed: {reason}")]
    BridgeFetch { endpoint: String, reason: String },
    #[error("SCRAM exchange failed: {0}")]
    ScramClientError(String),
    #[error(transparent)]
    Tls(#[from] native_tls::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::SocketError(err.to_string())
    }
}

/// Identifies one configured PostgreSQL server and the database a
/// connection targets. Carried inside connection errors so log lines can
/// be attributed without extra context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentifier {
    pub server: String,
    pub database: String,
}

impl ServerIdentifier {
    pub fn new(server: &str, database: &str) -> ServerIdentifier {
        ServerIdentifier {
            server: server.into(),
            database: database.into(),
        }
    }
}

impl std::fmt::Display for ServerIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let Self { server, database } = self;
        write!(f, "{{ server: {server}, database: {database} }}")
    }
}
