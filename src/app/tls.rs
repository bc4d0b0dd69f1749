//! TLS identity loading for the exposition surfaces.

use crate::errors::Error;

/// Load a PKCS#8 certificate/key pair into a native-tls identity.
pub fn load_identity(cert_file: &str, key_file: &str) -> Result<native_tls::Identity, Error> {
    let cert = std::fs::read(cert_file).map_err(|err| {
        Error::BadConfig(format!("Could not read certificate '{cert_file}': {err}"))
    })?;
    let key = std::fs::read(key_file)
        .map_err(|err| Error::BadConfig(format!("Could not read key '{key_file}': {err}")))?;

    native_tls::Identity::from_pkcs8(&cert, &key).map_err(Error::from)
}

/// Build the acceptor for the metrics surface, if TLS is configured.
pub fn metrics_acceptor() -> Result<Option<tokio_native_tls::TlsAcceptor>, Error> {
    let config = crate::config::get_config();
    let (cert_file, key_file) = match (
        &config.general.metrics_cert_file,
        &config.general.metrics_key_file,
    ) {
        (Some(cert), Some(key)) => (cert.clone(), key.clone()),
        _ => return Ok(None),
    };

    let identity = load_identity(&cert_file, &key_file)?;
    let acceptor = native_tls::TlsAcceptor::new(identity)?;
    Ok(Some(tokio_native_tls::TlsAcceptor::from(acceptor)))
}
