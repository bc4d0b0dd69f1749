// Builders for the one-off frontend messages the exporter sends and
// helpers for password hashing.

// External crate imports
use bytes::{BufMut, BytesMut};
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;

// Internal crate imports
use crate::errors::Error;
use crate::messages::constants::*;

/// Create a simple query message.
pub fn simple_query(query: &str) -> BytesMut {
    let mut bytes = BytesMut::new();
    bytes.put_u8(b'Q');
    bytes.put_i32(4 + query.len() as i32 + 1);
    bytes.put_slice(query.as_bytes());
    bytes.put_u8(0);
    bytes
}

/// Create a terminate message.
pub fn terminate() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(b'X');
    bytes.put_i32(4);
    bytes
}

/// Send startup message to the server.
pub async fn startup<S>(stream: &mut S, user: &str, database: &str) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    let mut bytes = BytesMut::new();

    // Protocol version
    bytes.put_i32(PROTOCOL_VERSION);

    for (key, value) in [
        ("user", user),
        ("database", database),
        ("application_name", "pgexporter"),
        ("client_encoding", "UTF8"),
    ] {
        bytes.put_slice(key.as_bytes());
        bytes.put_u8(0);
        bytes.put_slice(value.as_bytes());
        bytes.put_u8(0);
    }
    bytes.put_u8(0); // Null terminator

    let len = bytes.len() as i32 + 4i32;

    let mut startup = BytesMut::with_capacity(len as usize);
    startup.put_i32(len);
    startup.put(bytes);

    match stream.write_all(&startup).await {
        Ok(_) => Ok(()),
        Err(err) => Err(Error::SocketError(format!(
            "Failed to write startup message to server socket: {err}"
        ))),
    }
}

/// Send SSL request to the server.
pub async fn ssl_request(stream: &mut tokio::net::TcpStream) -> Result<(), Error> {
    let mut bytes = BytesMut::with_capacity(8);

    bytes.put_i32(8);
    bytes.put_i32(SSL_REQUEST_CODE);

    match stream.write_all(&bytes).await {
        Ok(_) => Ok(()),
        Err(err) => Err(Error::SocketError(format!(
            "Failed to write SSL request to server socket: {err}"
        ))),
    }
}

/// Create a cleartext password response.
pub fn password_message(password: &str) -> BytesMut {
    let mut message = BytesMut::with_capacity(password.len() + 6);
    message.put_u8(b'p');
    message.put_i32(4 + password.len() as i32 + 1);
    message.put_slice(password.as_bytes());
    message.put_u8(0);
    message
}

/// Create an MD5 password response given the server's salt.
pub fn md5_password_message(user: &str, password: &str, salt: &[u8]) -> BytesMut {
    let hash = md5_hash_password(user, password, salt);

    let mut message = BytesMut::with_capacity(hash.len() + 5);
    message.put_u8(b'p');
    message.put_i32(hash.len() as i32 + 4);
    message.put_slice(&hash);
    message
}

/// Create md5 password hash given a salt.
pub fn md5_hash_password(user: &str, password: &str, salt: &[u8]) -> Vec<u8> {
    let mut md5 = Md5::new();

    // First pass
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());

    let output = md5.finalize_reset();

    // Second pass
    md5_hash_second_pass(&format!("{output:x}"), salt)
}

pub fn md5_hash_second_pass(hash: &str, salt: &[u8]) -> Vec<u8> {
    let mut md5 = Md5::new();
    md5.update(hash);
    md5.update(salt);

    let mut password = format!("md5{:x}", md5.finalize()).into_bytes();
    password.push(0);

    password
}

/// Create a SASLInitialResponse for SCRAM-SHA-256.
pub fn sasl_initial_response(client_first: &[u8]) -> BytesMut {
    let mut res = BytesMut::new();
    res.put_u8(b'p');
    // length + mechanism name + nul + response length + response
    res.put_i32(4 + SCRAM_SHA_256.len() as i32 + 1 + 4 + client_first.len() as i32);
    res.put_slice(SCRAM_SHA_256.as_bytes());
    res.put_u8(0);
    res.put_i32(client_first.len() as i32);
    res.put_slice(client_first);
    res
}

/// Create a SASLResponse carrying the client-final message.
pub fn sasl_response(client_final: &[u8]) -> BytesMut {
    let mut res = BytesMut::new();
    res.put_u8(b'p');
    res.put_i32(4 + client_final.len() as i32);
    res.put_slice(client_final);
    res
}
