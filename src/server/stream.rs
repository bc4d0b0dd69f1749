//! Byte streams connecting to PostgreSQL: plain TCP, Unix socket, or TLS.

use crate::config::ServerConfig;
use crate::errors::Error;
use crate::messages::ssl_request;

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_native_tls::TlsStream;

pin_project! {
    #[project = StreamInnerProj]
    pub enum StreamInner {
        TcpPlain {
            #[pin]
            stream: TcpStream,
        },
        Tls {
            #[pin]
            stream: TlsStream<TcpStream>,
        },
        UnixSocket {
            #[pin]
            stream: UnixStream,
        },
    }
}

impl AsyncWrite for StreamInner {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        let this = self.project();
        match this {
            StreamInnerProj::TcpPlain { stream } => stream.poll_write(cx, buf),
            StreamInnerProj::Tls { stream } => stream.poll_write(cx, buf),
            StreamInnerProj::UnixSocket { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        let this = self.project();
        match this {
            StreamInnerProj::TcpPlain { stream } => stream.poll_flush(cx),
            StreamInnerProj::Tls { stream } => stream.poll_flush(cx),
            StreamInnerProj::UnixSocket { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        let this = self.project();
        match this {
            StreamInnerProj::TcpPlain { stream } => stream.poll_shutdown(cx),
            StreamInnerProj::Tls { stream } => stream.poll_shutdown(cx),
            StreamInnerProj::UnixSocket { stream } => stream.poll_shutdown(cx),
        }
    }
}

impl AsyncRead for StreamInner {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.project();
        match this {
            StreamInnerProj::TcpPlain { stream } => stream.poll_read(cx, buf),
            StreamInnerProj::Tls { stream } => stream.poll_read(cx, buf),
            StreamInnerProj::UnixSocket { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl StreamInner {
    /// Best-effort non-blocking write, used by Drop for the Terminate
    /// message. TLS streams cannot be written without polling; skip them.
    pub fn try_write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            StreamInner::TcpPlain { stream } => stream.try_write(buf),
            StreamInner::Tls { .. } => Ok(0),
            StreamInner::UnixSocket { stream } => stream.try_write(buf),
        }
    }
}

pub(crate) async fn create_unix_stream_inner(host: &str, port: u16) -> Result<StreamInner, Error> {
    let stream = match UnixStream::connect(&format!("{host}/.s.PGSQL.{port}")).await {
        Ok(s) => s,
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Could not connect to server: {err}"
            )));
        }
    };

    Ok(StreamInner::UnixSocket { stream })
}

pub(crate) async fn create_tcp_stream_inner(server: &ServerConfig) -> Result<StreamInner, Error> {
    let mut stream = match TcpStream::connect(&format!("{}:{}", server.host, server.port)).await {
        Ok(stream) => stream,
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Could not connect to server: {err}"
            )));
        }
    };

    let _ = stream.set_nodelay(true);

    if !server.tls {
        return Ok(StreamInner::TcpPlain { stream });
    }

    // Request a TLS connection
    ssl_request(&mut stream).await?;

    let response = match stream.read_u8().await {
        Ok(response) => response as char,
        Err(err) => {
            return Err(Error::SocketError(format!(
                "Failed to read TLS response from server: {err}"
            )));
        }
    };

    match response {
        // Server supports TLS
        'S' => {
            let connector = tls_connector(server)?;
            let stream = connector
                .connect(&server.host, stream)
                .await
                .map_err(|err| {
                    Error::SocketError(format!("TLS handshake with server failed: {err}"))
                })?;
            Ok(StreamInner::Tls { stream })
        }
        // Server does not support TLS
        'N' => Err(Error::SocketError(
            "Server does not support TLS but tls is required for it".to_string(),
        )),
        m => Err(Error::SocketError(format!(
            "Received unexpected response '{}' (ASCII: {}) during TLS negotiation",
            m, m as u8
        ))),
    }
}

fn tls_connector(server: &ServerConfig) -> Result<tokio_native_tls::TlsConnector, Error> {
    let mut builder = native_tls::TlsConnector::builder();

    match server.tls_ca_file {
        Some(ref ca_file) => {
            let pem = std::fs::read(ca_file).map_err(|err| {
                Error::BadConfig(format!("Could not read tls_ca_file '{ca_file}': {err}"))
            })?;
            let cert = native_tls::Certificate::from_pem(&pem)?;
            builder.add_root_certificate(cert);
        }
        None => {
            // Without a CA to verify against, behave like libpq sslmode=require.
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
    }

    if let (Some(cert_file), Some(key_file)) = (&server.tls_cert_file, &server.tls_key_file) {
        let cert = std::fs::read(cert_file).map_err(|err| {
            Error::BadConfig(format!("Could not read tls_cert_file '{cert_file}': {err}"))
        })?;
        let key = std::fs::read(key_file).map_err(|err| {
            Error::BadConfig(format!("Could not read tls_key_file '{key_file}': {err}"))
        })?;
        let identity = native_tls::Identity::from_pkcs8(&cert, &key)?;
        builder.identity(identity);
    }

    Ok(tokio_native_tls::TlsConnector::from(builder.build()?))
}
