//! The bridge: fetch external Prometheus endpoints and re-expose them as
//! one merged payload, in text and optionally JSON form.

use log::warn;
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use crate::config::{endpoint_host_port, get_config};
use crate::errors::Error;
use crate::prometheus::parse;
use crate::stats;

#[cfg(test)]
mod tests;

/// Fetch every configured endpoint and concatenate the returned exposition
/// bodies verbatim, in endpoint order. A failed endpoint contributes
/// nothing; the merged payload still carries the successful ones.
pub async fn merged_text() -> Vec<u8> {
    let config = get_config();
    let timeout = config.general.blocking_timeout.as_std();

    let mut set: JoinSet<(usize, Result<Vec<u8>, Error>)> = JoinSet::new();
    for (index, endpoint) in config.bridge_endpoints.iter().enumerate() {
        let endpoint = endpoint.clone();
        set.spawn(async move {
            let result = fetch_endpoint(&endpoint, timeout).await;
            (index, result)
        });
    }

    let mut bodies: Vec<Option<Vec<u8>>> = Vec::new();
    bodies.resize_with(config.bridge_endpoints.len(), || None);

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(body))) => bodies[index] = Some(body),
            Ok((index, Err(err))) => {
                stats::BRIDGE_FAILED.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Bridge endpoint {} failed: {err}",
                    config.bridge_endpoints[index]
                );
            }
            Err(err) => warn!("Bridge fetch task failed: {err}"),
        }
    }

    let mut merged = Vec::new();
    for body in bodies.into_iter().flatten() {
        merged.extend_from_slice(&body);
    }
    merged
}

/// The merged exposition parsed into a JSON document of families and
/// samples.
pub fn text_to_json(text: &str) -> Result<Vec<u8>, Error> {
    let families = parse(text)?;

    let families: Vec<_> = families
        .iter()
        .map(|family| {
            json!({
                "name": family.name,
                "help": family.help,
                "type": family.kind.as_str(),
                "samples": family
                    .samples
                    .iter()
                    .map(|sample| {
                        let labels: serde_json::Map<String, serde_json::Value> = sample
                            .labels
                            .iter()
                            .map(|(k, v)| (k.clone(), json!(v)))
                            .collect();
                        json!({
                            "name": sample.name,
                            "labels": labels,
                            "value": json_value(sample.value),
                        })
                    })
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::to_vec(&json!({ "families": families }))
        .map_err(|err| Error::BridgeFetch {
            endpoint: "json".to_string(),
            reason: err.to_string(),
        })
}

/// JSON has no NaN or infinities; spell them the way the text format does.
fn json_value(value: f64) -> serde_json::Value {
    if value.is_finite() {
        json!(value)
    } else {
        json!(crate::prometheus::format_value(value))
    }
}

/// Dial `GET /metrics` on one endpoint and return the response body.
pub async fn fetch_endpoint(endpoint: &str, timeout: std::time::Duration) -> Result<Vec<u8>, Error> {
    let fetch_err = |reason: String| Error::BridgeFetch {
        endpoint: endpoint.to_string(),
        reason,
    };

    let (host, port) = endpoint_host_port(endpoint);

    let fetch = async {
        let mut stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|err| fetch_err(format!("connect: {err}")))?;

        let request = format!(
            "GET /metrics HTTP/1.1\r\nHost: {host}\r\nAccept: text/plain\r\nConnection: close\r\n\r\n"
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|err| fetch_err(format!("write: {err}")))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|err| fetch_err(format!("read: {err}")))?;

        parse_http_response(&response).map_err(fetch_err)
    };

    match tokio::time::timeout(timeout, fetch).await {
        Ok(result) => result,
        Err(_) => Err(Error::BridgeFetch {
            endpoint: endpoint.to_string(),
            reason: "timed out".to_string(),
        }),
    }
}

/// Minimal HTTP/1.1 response handling: status check, header split, and
/// body extraction honoring chunked transfer encoding.
fn parse_http_response(raw: &[u8]) -> Result<Vec<u8>, String> {
    let header_end = find_header_end(raw).ok_or("response without header terminator")?;
    let head = String::from_utf8_lossy(&raw[..header_end]);
    let body = &raw[header_end + 4..];

    let mut lines = head.lines();
    let status_line = lines.next().ok_or("empty response")?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .ok_or("malformed status line")?;
    if status != "200" {
        return Err(format!("unexpected status {status}"));
    }

    let mut chunked = false;
    let mut content_length: Option<usize> = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name == "transfer-encoding" && value.to_ascii_lowercase().contains("chunked") {
            chunked = true;
        } else if name == "content-length" {
            content_length = value.parse().ok();
        }
    }

    if chunked {
        return decode_chunked(body);
    }

    match content_length {
        Some(len) if len <= body.len() => Ok(body[..len].to_vec()),
        Some(len) => Err(format!(
            "truncated body: expected {len} bytes, received {}",
            body.len()
        )),
        // Connection-close delimited.
        None => Ok(body.to_vec()),
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn decode_chunked(mut body: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();

    loop {
        let line_end = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or("chunk size line without terminator")?;
        let size_line = String::from_utf8_lossy(&body[..line_end]);
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| format!("invalid chunk size {size_str:?}"))?;

        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if body.len() < size + 2 {
            return Err("truncated chunk".to_string());
        }
        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}
