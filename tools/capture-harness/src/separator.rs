//! The record separator and the secret it is built from.
//!
//! A run writes `--<secret>-- SEP` to every broadcast sink. Anything a
//! submission prints to stdout or stderr lands between those tokens, so a
//! reader splits each stream on the token rather than counting lines.

use crate::errors::HarnessError;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SECRET_LEN: usize = 9;

static SECRET_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatorToken {
    secret: String,
    token: String,
}

impl SeparatorToken {
    pub fn new(secret: &str) -> Result<Self, HarnessError> {
        validate_secret(secret)?;
        Ok(Self {
            secret: secret.to_string(),
            token: format!("--{secret}-- SEP"),
        })
    }

    pub fn generate() -> Self {
        let secret = generate_secret();
        Self {
            token: format!("--{secret}-- SEP"),
            secret,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }
}

pub fn validate_secret(secret: &str) -> Result<(), HarnessError> {
    if secret.is_empty() {
        return Err(HarnessError::InvalidConfig(
            "harness.secret must not be empty".to_string(),
        ));
    }
    if !secret.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(HarnessError::InvalidConfig(format!(
            "harness.secret must be ascii alphanumeric, got {secret:?}"
        )));
    }
    Ok(())
}

/// Nine letters drawn from a digest of the pid, the clock and a counter.
pub fn generate_secret() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = SECRET_SEQ.fetch_add(1, Ordering::Relaxed);

    let mut digest = Sha256::new();
    digest.update(std::process::id().to_le_bytes());
    digest.update(nanos.to_le_bytes());
    digest.update(seq.to_le_bytes());
    let bytes = digest.finalize();

    bytes
        .iter()
        .take(SECRET_LEN)
        .map(|byte| letter(*byte))
        .collect()
}

fn letter(byte: u8) -> char {
    let index = byte % 52;
    if index < 26 {
        char::from(b'A' + index)
    } else {
        char::from(b'a' + index - 26)
    }
}

/// Splits a channel's content into segments.
///
/// Whatever precedes the first separator is not a segment; a harness channel
/// never has anything there, a standard stream may. Content without any
/// separator yields no segments.
pub fn split_segments<'a>(content: &'a str, token: &SeparatorToken) -> Vec<&'a str> {
    content.split(token.as_str()).skip(1).collect()
}
