//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677) as used by Postgres 10+.
//!
//! Channel binding is not offered (`n,,` GS2 header); Postgres ignores the
//! SCRAM username and takes it from the startup packet, so it is sent empty.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const GS2_HEADER: &str = "n,,";

/// SCRAM exchange failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScramError {
    /// Server message could not be parsed
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),
    /// Server signature did not match
    #[error("invalid server proof")]
    InvalidServerProof,
    /// Client API used out of order
    #[error("SCRAM exchange out of order: {0}")]
    OutOfOrder(&'static str),
}

/// SCRAM-SHA-256 client state machine
pub struct ScramClient {
    password: String,
    nonce: String,
    /// Set by `client_final`: (auth message, server key)
    pending: Option<(Vec<u8>, Vec<u8>)>,
}

impl ScramClient {
    /// Create a client with a fresh random nonce
    pub fn new(password: impl Into<String>) -> Self {
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(password: impl Into<String>, nonce: String) -> Self {
        Self {
            password: password.into(),
            nonce,
            pending: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Client first message
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Consume the server first message and produce the client final message
    pub fn client_final(&mut self, server_first: &str) -> Result<String, ScramError> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            match part.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                _ => {}
            }
        }
        let (nonce, salt, iterations) = match (nonce, salt, iterations) {
            (Some(n), Some(s), Some(i)) => (n, s, i),
            _ => {
                return Err(ScramError::InvalidServerMessage(
                    "missing r, s or i attribute".into(),
                ))
            }
        };
        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(ScramError::InvalidServerMessage(
                "server nonce does not extend client nonce".into(),
            ));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|_| ScramError::InvalidServerMessage("salt is not base64".into()))?;
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| ScramError::InvalidServerMessage("invalid iteration count".into()))?;

        let salted = salted_password(&self.password, &salt, iterations);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(&client_key);

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );
        let signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.pending = Some((auth_message.into_bytes(), hmac(&salted, b"Server Key")));
        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)))
    }

    /// Check the server final message (`v=<signature>`)
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), ScramError> {
        let (auth_message, server_key) = self
            .pending
            .as_ref()
            .ok_or(ScramError::OutOfOrder("client_final not called"))?;
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::InvalidServerMessage(err.to_string()));
        }
        let received = server_final
            .strip_prefix("v=")
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or_else(|| ScramError::InvalidServerMessage("missing server signature".into()))?;
        let expected = hmac(server_key, auth_message);
        if constant_time_eq(&received, &expected) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof)
        }
    }
}

fn salted_password(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    // Only fails for an invalid output length, which 32 is not
    let _ = pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
