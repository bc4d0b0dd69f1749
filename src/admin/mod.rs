//! Management interface.
//!
//! Verbs arrive over TCP as a length-prefixed JSON envelope:
//! `{command, subcommand?, args?, timestamp}`. Responses carry an outcome
//! object (`status`, `elapsed_ms` on success; `code`, `message` on
//! failure) plus a verb-specific `response` payload.

mod commands;

use std::time::Instant;

use log::{debug, error, info, warn};
use serde_derive::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::get_config;

#[cfg(test)]
mod tests;

/// Upper bound on one management request.
const MAX_REQUEST_SIZE: u32 = 64 * 1024;

// Stable error codes of the management protocol.
pub const ERROR_UNKNOWN_COMMAND: i32 = 1;
pub const ERROR_BAD_REQUEST: i32 = 2;
pub const ERROR_UNAUTHORIZED: i32 = 4;
pub const ERROR_CONF_GET_UNKNOWN_KEY: i32 = 100;
pub const ERROR_CONF_SET_UNKNOWN_KEY: i32 = 200;
pub const ERROR_CONF_SET_RESTART_REQUIRED: i32 = 201;
pub const ERROR_RELOAD_INVALID: i32 = 300;
pub const ERROR_RELOAD_RESTART_REQUIRED: i32 = 301;

#[derive(Deserialize, Debug)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub subcommand: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Starts the management server.
pub async fn start_management_server() {
    let config = get_config();
    if config.general.management_port == 0 {
        return;
    }

    let addr = format!("{}:{}", config.general.host, config.general.management_port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind management server to {addr}: {err}");
            return;
        }
    };

    info!("Management server listening on {addr}");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream).await {
                        debug!("Management client {peer} failed: {err}");
                    }
                });
            }
            Err(err) => {
                error!("Failed to accept management connection: {err}");
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream) -> std::io::Result<()> {
    let len = stream.read_u32().await?;
    if len > MAX_REQUEST_SIZE {
        let response = error_response(ERROR_BAD_REQUEST, "request exceeds the size bound");
        return write_envelope(&mut stream, &response).await;
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;

    let response = match serde_json::from_slice::<Request>(&payload) {
        Ok(request) => {
            debug!(
                "Management request: {} {}",
                request.command,
                request.subcommand.as_deref().unwrap_or("")
            );
            dispatch(&request).await
        }
        Err(err) => error_response(ERROR_BAD_REQUEST, &format!("malformed request: {err}")),
    };

    write_envelope(&mut stream, &response).await
}

async fn write_envelope(stream: &mut TcpStream, response: &Value) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(response).unwrap_or_default();
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}

/// Route one request to its verb, checking admin credentials first.
pub async fn dispatch(request: &Request) -> Value {
    if let Some(response) = authorize(request) {
        return response;
    }

    let started = Instant::now();

    let result = match (
        request.command.as_str(),
        request.subcommand.as_deref().unwrap_or(""),
    ) {
        ("ping", _) => Ok(json!({})),
        ("shutdown", _) => commands::shutdown(),
        ("status", "") => Ok(commands::status()),
        ("status", "details") => Ok(commands::status_details()),
        ("conf", "reload") => commands::conf_reload(),
        ("conf", "ls") => Ok(commands::conf_ls()),
        ("conf", "get") => commands::conf_get(request.args.as_ref()),
        ("conf", "set") => commands::conf_set(request.args.as_ref()),
        ("clear", "prometheus") => Ok(commands::clear_prometheus()),
        (command, subcommand) => {
            warn!("Unsupported management verb: {command} {subcommand}");
            Err((
                ERROR_UNKNOWN_COMMAND,
                format!("unknown command: {command} {subcommand}"),
            ))
        }
    };

    match result {
        Ok(response) => json!({
            "outcome": {
                "status": "ok",
                "elapsed_ms": started.elapsed().as_millis() as u64,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
            "response": response,
        }),
        Err((code, message)) => error_response(code, &message),
    }
}

fn authorize(request: &Request) -> Option<Value> {
    let config = get_config();
    if config.admins.is_empty() {
        return None;
    }

    let empty = json!({});
    let args = request.args.as_ref().unwrap_or(&empty);
    let username = args.get("username").and_then(|v| v.as_str()).unwrap_or("");
    let password = args.get("password").and_then(|v| v.as_str()).unwrap_or("");

    let authorized = config
        .admins
        .iter()
        .any(|admin| admin.username == username && admin.password == password);

    if authorized {
        None
    } else {
        warn!("Management authentication failed for user {username:?}");
        Some(error_response(ERROR_UNAUTHORIZED, "authentication failed"))
    }
}

fn error_response(code: i32, message: &str) -> Value {
    json!({
        "outcome": {
            "status": "error",
            "code": code,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }
    })
}
