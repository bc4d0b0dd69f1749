//! SCRAM-SHA-256 client-side state machine (RFC 7677, RFC 5802).
//!
//! The exporter only ever plays the client role: `message()` produces the
//! client-first message, `update()` answers the server-first challenge, and
//! `finish()` verifies the server signature.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::errors::Error;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LENGTH: usize = 24;
// base64("n,,"), the GS2 header for no channel binding.
const CHANNEL_BINDING: &str = "c=biws";

pub struct ScramSha256 {
    password: String,
    nonce: String,
    client_first_bare: String,
    state: State,
}

enum State {
    Initial,
    AwaitingFinal {
        server_key: [u8; 32],
        auth_message: String,
    },
    Done,
}

impl ScramSha256 {
    pub fn new(password: &str) -> ScramSha256 {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LENGTH)
            .map(char::from)
            .collect();
        Self::with_nonce(password, nonce)
    }

    fn with_nonce(password: &str, nonce: String) -> ScramSha256 {
        let client_first_bare = format!("n=,r={nonce}");
        ScramSha256 {
            password: password.to_string(),
            nonce,
            client_first_bare,
            state: State::Initial,
        }
    }

    /// The client-first message, including the GS2 header.
    pub fn message(&self) -> BytesMut {
        BytesMut::from(format!("n,,{}", self.client_first_bare).as_bytes())
    }

    /// Process the server-first message and produce the client-final one.
    pub fn update(&mut self, server_first: &[u8]) -> Result<BytesMut, Error> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| Error::ScramClientError("server-first message is not UTF-8".into()))?
            .to_string();

        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => server_nonce = Some(v.to_string()),
                Some(("s", v)) => salt = Some(v.to_string()),
                Some(("i", v)) => iterations = v.parse::<u32>().ok(),
                _ => (),
            }
        }
        let server_nonce = server_nonce
            .ok_or_else(|| Error::ScramClientError("server-first lacks nonce".into()))?;
        let salt =
            salt.ok_or_else(|| Error::ScramClientError("server-first lacks salt".into()))?;
        let iterations = iterations
            .ok_or_else(|| Error::ScramClientError("server-first lacks iteration count".into()))?;

        if !server_nonce.starts_with(&self.nonce) {
            return Err(Error::ScramClientError(
                "server nonce does not extend the client nonce".into(),
            ));
        }

        let salt = BASE64
            .decode(&salt)
            .map_err(|_| Error::ScramClientError("salt is not valid base64".into()))?;

        let salted_password = hi(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let server_key = hmac(&salted_password, b"Server Key");

        let without_proof = format!("{CHANNEL_BINDING},r={server_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        self.state = State::AwaitingFinal {
            server_key,
            auth_message,
        };

        let client_final = format!("{without_proof},p={}", BASE64.encode(proof));
        Ok(BytesMut::from(client_final.as_bytes()))
    }

    /// Verify the server-final message.
    pub fn finish(&mut self, server_final: &[u8]) -> Result<(), Error> {
        let (server_key, auth_message) = match &self.state {
            State::AwaitingFinal {
                server_key,
                auth_message,
            } => (server_key, auth_message),
            _ => {
                return Err(Error::ScramClientError(
                    "server-final received out of order".into(),
                ))
            }
        };

        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| Error::ScramClientError("server-final message is not UTF-8".into()))?;

        let verifier = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| Error::ScramClientError("server-final lacks verifier".into()))?;
        let verifier = BASE64
            .decode(verifier)
            .map_err(|_| Error::ScramClientError("verifier is not valid base64".into()))?;

        let expected = hmac(server_key, auth_message.as_bytes());
        if expected[..] != verifier[..] {
            return Err(Error::ScramClientError(
                "server signature does not verify".into(),
            ));
        }

        self.state = State::Done;
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Hi(), i.e. PBKDF2 with HMAC-SHA-256 as the PRF.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut block = salt.to_vec();
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac(password, &block);
    let mut result = u;

    for _ in 1..iterations {
        u = hmac(password, &u);
        for (r, x) in result.iter_mut().zip(u.iter()) {
            *r ^= x;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vector from RFC 7677 §3, adjusted for PostgreSQL's empty username
    // in the client-first message.
    #[test]
    fn test_exchange_against_known_server() {
        let mut scram = ScramSha256::with_nonce("pencil", "rOprNGfwEbeRWgbNEkqO".into());

        let first = scram.message();
        assert_eq!(&first[..], b"n,,n=,r=rOprNGfwEbeRWgbNEkqO");

        let server_first =
            b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let client_final = scram.update(server_first).unwrap();
        let client_final = std::str::from_utf8(&client_final).unwrap().to_string();
        assert!(client_final
            .starts_with("c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p="));
    }

    #[test]
    fn test_rejects_foreign_nonce() {
        let mut scram = ScramSha256::with_nonce("secret", "abcdef".into());
        let err = scram.update(b"r=zzzzzz,s=c2FsdA==,i=4096").unwrap_err();
        assert!(matches!(err, Error::ScramClientError(_)));
    }

    #[test]
    fn test_finish_out_of_order() {
        let mut scram = ScramSha256::new("secret");
        assert!(scram.finish(b"v=AAAA").is_err());
    }

    #[test]
    fn test_hi_iterates() {
        // One iteration is plain HMAC over salt || INT(1).
        let mut block = b"salt".to_vec();
        block.extend_from_slice(&1u32.to_be_bytes());
        assert_eq!(hi(b"pw", b"salt", 1), hmac(b"pw", &block));
        assert_ne!(hi(b"pw", b"salt", 1), hi(b"pw", b"salt", 2));
    }
}
