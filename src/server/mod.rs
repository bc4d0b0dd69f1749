// Implementation of the PostgreSQL client (frontend) protocol.

// Standard library imports
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

// External crate imports
use bytes::{Buf, BytesMut};
use log::{debug, error, warn};
use tokio::io::BufStream;

// Internal crate imports
use crate::auth::ScramSha256;
use crate::config::{ServerConfig, User};
use crate::errors::{Error, ServerIdentifier};
use crate::messages::constants::*;
use crate::messages::{
    md5_password_message, parse_data_row, parse_row_description, password_message,
    read_message_body, read_message_header, sasl_initial_response, sasl_response, simple_query,
    terminate, write_all_flush, BytesMutReader, FieldDescription, PgErrorMsg,
};

mod stream;

use stream::{create_tcp_stream_inner, create_unix_stream_inner, StreamInner};

/// Result of a simple query: the row descriptor followed by the raw tuples.
/// Field values are the wire bytes, tagged by type OID in the descriptor;
/// NULL is `None`.
#[derive(Debug, Default)]
pub struct Rows {
    pub fields: Vec<FieldDescription>,
    pub tuples: Vec<Vec<Option<Vec<u8>>>>,
}

impl Rows {
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<Option<Vec<u8>>>> {
        self.tuples.iter()
    }
}

/// An open connection to one PostgreSQL server.
pub struct Server {
    /// Which configured server and database this connection belongs to.
    identifier: ServerIdentifier,

    /// Server connection.
    stream: BufStream<StreamInner>,

    /// Parameters the server sent us on startup, e.g. server_version.
    parameters: HashMap<String, String>,

    /// Backend pid, kept for log attribution.
    process_id: i32,

    /// Is the connection known broken? Broken connections are dropped
    /// instead of being returned to the per-server slot.
    bad: bool,

    /// Last time a message was successfully exchanged.
    pub last_activity: SystemTime,
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "[{}]-{}/{}",
            self.process_id, self.identifier.server, self.identifier.database
        )
    }
}

impl Server {
    /// Connect to the server, authenticate, and return a connection in the
    /// ready-for-query state.
    pub async fn startup(
        server: &ServerConfig,
        user: &User,
        database: &str,
    ) -> Result<Server, Error> {
        let server_identifier = ServerIdentifier::new(&server.name, database);

        let mut stream = if server.is_unix_socket() {
            create_unix_stream_inner(&server.host, server.port).await?
        } else {
            create_tcp_stream_inner(server).await?
        };

        // StartupMessage
        crate::messages::startup(&mut stream, &user.username, database).await?;

        let mut process_id: i32 = 0;
        let mut scram: Option<ScramSha256> = None;
        let mut parameters = HashMap::new();

        loop {
            let (code, len) = match read_message_header(&mut stream).await {
                Ok(header) => header,
                Err(err) => {
                    return Err(Error::ServerStartupError(
                        format!("failed to read message header: {err}"),
                        server_identifier,
                    ));
                }
            };

            match code {
                // Authentication
                MESSAGE_AUTHENTICATION => {
                    let mut payload = read_message_body(&mut stream, len).await?;
                    let auth_code = payload.get_i32();
                    handle_authentication(
                        &mut stream,
                        auth_code,
                        payload,
                        user,
                        &mut scram,
                        &server_identifier,
                    )
                    .await?;
                }

                // ErrorResponse
                MESSAGE_ERROR_RESPONSE => {
                    let payload = read_message_body(&mut stream, len).await?;
                    return match PgErrorMsg::parse(&payload) {
                        Ok(f) => {
                            error!(
                                "Server {server_identifier} refused startup - {} {}: {}",
                                f.severity, f.code, f.message
                            );
                            Err(Error::ServerStartupError(f.message, server_identifier))
                        }
                        Err(err) => Err(Error::ServerStartupError(
                            format!("received an unparsable error: {err}"),
                            server_identifier,
                        )),
                    };
                }

                // NoticeResponse
                MESSAGE_NOTICE_RESPONSE => {
                    let payload = read_message_body(&mut stream, len).await?;
                    if let Ok(msg) = PgErrorMsg::parse(&payload) {
                        warn!(
                            "Server startup notice (severity: {} code: {} message: {})",
                            msg.severity, msg.code, msg.message
                        );
                    }
                }

                // ParameterStatus
                MESSAGE_PARAMETER_STATUS => {
                    let mut payload = read_message_body(&mut stream, len).await?;
                    let key = payload.read_string()?;
                    let value = payload.read_string()?;
                    parameters.insert(key, value);
                }

                // BackendKeyData
                MESSAGE_BACKEND_KEY_DATA => {
                    let mut payload = read_message_body(&mut stream, len).await?;
                    process_id = payload.get_i32();
                    let _secret_key = payload.get_i32();
                }

                // ReadyForQuery
                MESSAGE_READY_FOR_QUERY => {
                    let _status = read_message_body(&mut stream, len).await?;

                    debug!("Connected to {server_identifier} as pid {process_id}");

                    return Ok(Server {
                        identifier: server_identifier,
                        stream: BufStream::new(stream),
                        parameters,
                        process_id,
                        bad: false,
                        last_activity: SystemTime::now(),
                    });
                }

                // We have an unexpected message from the server during this exchange.
                _ => {
                    return Err(Error::ProtocolSyncError(format!(
                        "Received unexpected message code '{}' (ASCII: {}) during server startup",
                        code as char, code
                    )));
                }
            };
        }
    }

    /// Execute a simple query and collect the result set.
    ///
    /// Reads until ReadyForQuery. A server ErrorResponse surfaces as
    /// `QueryError` with the SQLSTATE and message verbatim, after the
    /// stream has been drained back to the ready state.
    pub async fn simple_query(&mut self, sql: &str) -> Result<Rows, Error> {
        let query = simple_query(sql);
        write_all_flush(&mut self.stream, &query).await.map_err(|err| {
            self.bad = true;
            err
        })?;

        let mut rows = Rows::default();
        let mut server_error: Option<PgErrorMsg> = None;

        loop {
            let (code, len) = match read_message_header(&mut self.stream).await {
                Ok(header) => header,
                Err(err) => {
                    self.bad = true;
                    return Err(err);
                }
            };

            match code {
                MESSAGE_ROW_DESCRIPTION => {
                    let payload = read_message_body(&mut self.stream, len).await?;
                    rows.fields = parse_row_description(payload)?;
                }
                MESSAGE_DATA_ROW => {
                    let payload = read_message_body(&mut self.stream, len).await?;
                    rows.tuples.push(parse_data_row(payload)?);
                }
                MESSAGE_COMMAND_COMPLETE | MESSAGE_EMPTY_QUERY_RESPONSE => {
                    let _ = read_message_body(&mut self.stream, len).await?;
                }
                MESSAGE_ERROR_RESPONSE => {
                    let payload = read_message_body(&mut self.stream, len).await?;
                    server_error = Some(PgErrorMsg::parse(&payload)?);
                }
                MESSAGE_NOTICE_RESPONSE => {
                    let payload = read_message_body(&mut self.stream, len).await?;
                    if let Ok(msg) = PgErrorMsg::parse(&payload) {
                        debug!("Server {self} notice: {}", msg.message);
                    }
                }
                MESSAGE_PARAMETER_STATUS => {
                    let mut payload = read_message_body(&mut self.stream, len).await?;
                    let key = payload.read_string()?;
                    let value = payload.read_string()?;
                    self.parameters.insert(key, value);
                }
                MESSAGE_NOTIFICATION_RESPONSE => {
                    let _ = read_message_body(&mut self.stream, len).await?;
                }
                MESSAGE_READY_FOR_QUERY => {
                    let _status = read_message_body(&mut self.stream, len).await?;
                    self.last_activity = SystemTime::now();

                    return match server_error {
                        Some(err) => Err(Error::QueryError {
                            sqlstate: err.code,
                            message: err.message,
                        }),
                        None => Ok(rows),
                    };
                }
                _ => {
                    self.bad = true;
                    return Err(Error::ProtocolSyncError(format!(
                        "Received unexpected message code '{}' (ASCII: {}) in query response",
                        code as char, code
                    )));
                }
            }
        }
    }

    /// Execute a simple query bounded by a deadline. On expiry the
    /// connection is unusable (the simple protocol has no mid-query cancel
    /// over the same socket) and is marked bad.
    pub async fn simple_query_timeout(
        &mut self,
        sql: &str,
        timeout: Duration,
    ) -> Result<Rows, Error> {
        match tokio::time::timeout(timeout, self.simple_query(sql)).await {
            Ok(result) => result,
            Err(_) => {
                self.bad = true;
                Err(Error::QueryTimeout)
            }
        }
    }

    /// Detect the major server version, preferring `server_version_num`.
    pub async fn version_number(&mut self) -> Result<u32, Error> {
        let rows = self.simple_query("SHOW server_version_num").await?;
        let raw = rows
            .tuples
            .first()
            .and_then(|t| t.first())
            .and_then(|v| v.as_deref())
            .map(|v| String::from_utf8_lossy(v).to_string());

        let number = match raw {
            Some(raw) => raw.parse::<u32>().ok(),
            None => None,
        };

        match number {
            // server_version_num is e.g. 160001; the major version is on top.
            Some(n) => Ok(n / 10000),
            None => {
                // Fall back to the server_version startup parameter.
                self.parameters
                    .get("server_version")
                    .and_then(|v| v.split('.').next())
                    .and_then(|major| major.parse::<u32>().ok())
                    .ok_or_else(|| {
                        Error::ProtocolSyncError(format!(
                            "Server {self} did not report a parsable version"
                        ))
                    })
            }
        }
    }

    /// Detect the server role.
    pub async fn in_recovery(&mut self) -> Result<bool, Error> {
        let rows = self.simple_query("SELECT pg_is_in_recovery()").await?;
        let value = rows
            .tuples
            .first()
            .and_then(|t| t.first())
            .and_then(|v| v.as_deref());
        Ok(value == Some(b"t"))
    }

    /// Databases the exporter iterates for all-database metrics.
    pub async fn databases(&mut self) -> Result<Vec<String>, Error> {
        let rows = self
            .simple_query(
                "SELECT datname FROM pg_database WHERE datistemplate = false AND datallowconn ORDER BY datname",
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|t| t.first().cloned().flatten())
            .map(|v| String::from_utf8_lossy(&v).to_string())
            .collect())
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(|v| v.as_str())
    }

    /// Indicate that this server connection cannot be re-used and must be
    /// discarded.
    pub fn mark_bad(&mut self, reason: &str) {
        error!("Server {self} marked bad, reason: {reason}");
        self.bad = true;
    }

    pub fn is_bad(&self) -> bool {
        self.bad
    }
}

impl Drop for Server {
    /// Try to do a clean shut down. Best effort because
    /// the socket is in non-blocking mode, so it may not be ready
    /// for a write.
    fn drop(&mut self) {
        if !self.is_bad() {
            let bytes = terminate();
            match self.stream.get_mut().try_write(&bytes) {
                Ok(5) | Ok(0) => (),
                Err(err) => debug!("Dirty server {self} shutdown: {err}"),
                _ => debug!("Dirty server {self} shutdown"),
            };
        }
        debug!("Server connection {self} closed");
    }
}

/// Handles authentication during server startup.
/// Processes trust, cleartext, MD5, and SCRAM-SHA-256; anything else is
/// reported as unsupported.
async fn handle_authentication(
    stream: &mut StreamInner,
    auth_code: i32,
    mut payload: BytesMut,
    user: &User,
    scram: &mut Option<ScramSha256>,
    server_identifier: &ServerIdentifier,
) -> Result<(), Error> {
    match auth_code {
        AUTHENTICATION_SUCCESSFUL => Ok(()),

        // Cleartext password authentication
        AUTHENTICATION_CLEAR_PASSWORD => {
            let res = password_message(&user.password);
            write_all_flush(stream, &res).await
        }

        // MD5 password authentication
        MD5_ENCRYPTED_PASSWORD => {
            if payload.remaining() < 4 {
                return Err(Error::ServerStartupError(
                    "MD5 challenge without salt".into(),
                    server_identifier.clone(),
                ));
            }
            let salt = payload.split_to(4);
            let res = md5_password_message(&user.username, &user.password, &salt);
            write_all_flush(stream, &res).await
        }

        // SASL authentication
        SASL => {
            let mechanisms = String::from_utf8_lossy(&payload);
            if !mechanisms.contains(SCRAM_SHA_256) {
                error!("Unsupported SCRAM mechanism list: {mechanisms}");
                return Err(Error::ServerAuthError(
                    format!("unsupported SCRAM mechanisms: {mechanisms}"),
                    server_identifier.clone(),
                ));
            }

            let client = ScramSha256::new(&user.password);
            let res = sasl_initial_response(&client.message());
            *scram = Some(client);
            write_all_flush(stream, &res).await
        }

        // SASL continuation
        SASL_CONTINUE => {
            let client = scram.as_mut().ok_or_else(|| {
                Error::ServerAuthError(
                    "SASL continue without an exchange in progress".into(),
                    server_identifier.clone(),
                )
            })?;
            let client_final = client.update(&payload)?;
            let res = sasl_response(&client_final);
            write_all_flush(stream, &res).await
        }

        // SASL final
        SASL_FINAL => {
            let client = scram.as_mut().ok_or_else(|| {
                Error::ServerAuthError(
                    "SASL final without an exchange in progress".into(),
                    server_identifier.clone(),
                )
            })?;
            client.finish(&payload)?;
            Ok(())
        }

        _ => {
            error!(
                "Authentication method {auth_code} requested by {server_identifier} is not supported"
            );
            Err(Error::AuthUnsupported {
                id: server_identifier.clone(),
                method: auth_code,
            })
        }
    }
}
