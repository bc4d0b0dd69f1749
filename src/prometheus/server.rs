//! HTTP server for the exposition endpoints.

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error, info};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::cache::{self, Flight, MetricsCache, BRIDGE_CACHE, BRIDGE_JSON_CACHE, METRICS_CACHE};
use crate::config::get_config;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Starts the exposition server on `port`. The same routes are served on
/// the metrics port and, when enabled, on the bridge port.
pub async fn start_exposition_server(port: u16) {
    let config = get_config();
    let host = config.general.host.clone();

    let addr = format!("{host}:{port}");

    let acceptor = match crate::app::tls::metrics_acceptor() {
        Ok(acceptor) => acceptor,
        Err(err) => {
            error!("Failed to load metrics TLS material: {err}");
            return;
        }
    };

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind exposition server to {addr}: {err}");
            return;
        }
    };

    info!("Exposition server listening on {addr}");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let _ = stream.set_nodelay(true);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => handle_request(tls_stream, true).await,
                            Err(err) => debug!("TLS handshake failed: {err}"),
                        },
                        None => handle_request(stream, false).await,
                    }
                });
            }
            Err(err) => {
                error!("Failed to accept connection: {err}");
            }
        }
    }
}

/// Handles one HTTP request on an accepted connection.
async fn handle_request<S>(stream: S, tls: bool)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = tokio::io::BufStream::new(stream);
    let mut headers = [0; 8192];

    let n = match stream.read(&mut headers).await {
        Ok(0) => return,
        Ok(n) => n,
        Err(err) => {
            debug!("Failed to read HTTP request: {err}");
            return;
        }
    };

    let headers_str = String::from_utf8_lossy(&headers[..n]).to_string();
    let mut lines = headers_str.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();

    let config = get_config();
    let accepts_gzip = config.general.compression
        && headers_str
            .lines()
            .any(|line| {
                let lower = line.to_ascii_lowercase();
                lower.starts_with("accept-encoding:") && lower.contains("gzip")
            });

    if method != "GET" {
        let _ = write_response(&mut stream, 405, "Method Not Allowed", "", &[]).await;
        return;
    }

    match path {
        "/" | "/metrics" => serve_metrics(&mut stream, accepts_gzip, tls).await,
        "/metrics/bridge" => serve_bridge_text(&mut stream, accepts_gzip).await,
        "/metrics/bridge.json" => {
            if config.general.bridge_json_cache_max_size.is_zero() {
                let _ = write_response(&mut stream, 404, "Not Found", "", &[]).await;
            } else {
                serve_bridge_json(&mut stream, accepts_gzip).await;
            }
        }
        _ => {
            let _ = write_response(&mut stream, 404, "Not Found", "", &[]).await;
        }
    }
}

async fn serve_metrics<S>(stream: &mut S, gzip: bool, tls: bool)
where
    S: AsyncWrite + Unpin,
{
    let config = get_config();
    let fingerprint = format!("metrics|gzip={gzip}|tls={tls}|epoch={}", cache::epoch());

    let (max_size, max_age) = if config.general.cache {
        (
            config.general.metrics_cache_max_size.as_bytes(),
            config.general.metrics_cache_max_age.as_std(),
        )
    } else {
        (0, std::time::Duration::ZERO)
    };

    let body = match METRICS_CACHE.begin(&fingerprint, max_size, max_age) {
        Flight::Cached(bytes) => Ok(bytes),
        Flight::Follower(rx) => cache::wait(rx).await,
        Flight::Leader(guard) => match crate::scrape::scrape().await {
            Ok(text) => {
                let bytes = encode_body(text.into_bytes(), gzip);
                Ok(guard.publish(bytes))
            }
            Err(err) => {
                error!("Scrape failed: {err}");
                guard.fail(&err.to_string());
                Err(err.to_string())
            }
        },
    };

    match body {
        Ok(bytes) => {
            let _ = write_exposition(stream, EXPOSITION_CONTENT_TYPE, &bytes, gzip).await;
        }
        Err(_) => {
            let _ = write_response(stream, 503, "Service Unavailable", "", &[]).await;
        }
    }
}

async fn serve_bridge_text<S>(stream: &mut S, gzip: bool)
where
    S: AsyncWrite + Unpin,
{
    let config = get_config();
    let max_size = config.general.bridge_cache_max_size.as_bytes();
    let max_age = config.general.bridge_cache_max_age.as_std();
    let fingerprint = format!("bridge|gzip={gzip}|epoch={}", cache::epoch());

    let body = serve_cached(&BRIDGE_CACHE, &fingerprint, max_size, max_age, || async {
        Ok(crate::bridge::merged_text().await)
    }, gzip)
    .await;

    match body {
        Ok(bytes) => {
            let _ = write_exposition(stream, EXPOSITION_CONTENT_TYPE, &bytes, gzip).await;
        }
        Err(_) => {
            let _ = write_response(stream, 503, "Service Unavailable", "", &[]).await;
        }
    }
}

async fn serve_bridge_json<S>(stream: &mut S, gzip: bool)
where
    S: AsyncWrite + Unpin,
{
    let config = get_config();
    let max_size = config.general.bridge_json_cache_max_size.as_bytes();
    // The JSON cache shares its age with the text cache.
    let max_age = config.general.bridge_cache_max_age.as_std();
    let fingerprint = format!("bridge.json|gzip={gzip}|epoch={}", cache::epoch());

    let body = serve_cached(&BRIDGE_JSON_CACHE, &fingerprint, max_size, max_age, || async {
        let text = crate::bridge::merged_text().await;
        let text = String::from_utf8_lossy(&text).to_string();
        crate::bridge::text_to_json(&text).map_err(|err| err.to_string())
    }, gzip)
    .await;

    match body {
        Ok(bytes) => {
            let _ = write_exposition(stream, JSON_CONTENT_TYPE, &bytes, gzip).await;
        }
        Err(_) => {
            let _ = write_response(stream, 503, "Service Unavailable", "", &[]).await;
        }
    }
}

async fn serve_cached<F, Fut>(
    cache: &MetricsCache,
    fingerprint: &str,
    max_size: u64,
    max_age: std::time::Duration,
    produce: F,
    gzip: bool,
) -> Result<Arc<Vec<u8>>, String>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<u8>, String>>,
{
    match cache.begin(fingerprint, max_size, max_age) {
        Flight::Cached(bytes) => Ok(bytes),
        Flight::Follower(rx) => cache::wait(rx).await,
        Flight::Leader(guard) => match produce().await {
            Ok(bytes) => Ok(guard.publish(encode_body(bytes, gzip))),
            Err(err) => {
                error!("Bridge payload failed: {err}");
                guard.fail(&err);
                Err(err)
            }
        },
    }
}

/// Compress the body with gzip when the fingerprint says so; cached bytes
/// are stored in their final encoding.
fn encode_body(bytes: Vec<u8>, gzip: bool) -> Vec<u8> {
    if !gzip {
        return bytes;
    }

    let mut compressed = Vec::new();
    {
        let mut encoder = GzEncoder::new(&mut compressed, Compression::default());
        if encoder.write_all(&bytes).is_err() {
            return bytes;
        }
        if encoder.finish().is_err() {
            return bytes;
        }
    }
    compressed
}

async fn write_exposition<S>(
    stream: &mut S,
    content_type: &str,
    body: &[u8],
    gzipped: bool,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut extra_headers = Vec::new();
    if gzipped {
        extra_headers.push("Content-Encoding: gzip".to_string());
    }
    write_response_bytes(stream, 200, "OK", content_type, body, &extra_headers).await
}

async fn write_response<S>(
    stream: &mut S,
    status: u16,
    reason: &str,
    body: &str,
    extra_headers: &[String],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_response_bytes(stream, status, reason, "text/plain", body.as_bytes(), extra_headers).await
}

async fn write_response_bytes<S>(
    stream: &mut S,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
    extra_headers: &[String],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for header in extra_headers {
        response.push_str(header);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");

    stream.write_all(response.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}
