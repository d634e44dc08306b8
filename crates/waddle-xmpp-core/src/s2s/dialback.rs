//! Server Dialback keys (XEP-0220 2.4).
//!
//! ```text
//! key = HEX(HMAC-SHA256(SHA256(secret), receiving || ' ' || originating || ' ' || stream_id))
//! ```

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Outcome reported in a `type` attribute of `db:result` / `db:verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialbackOutcome {
    Valid,
    Invalid,
}

impl DialbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for DialbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialbackOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            other => Err(format!("unknown dialback type: {other}")),
        }
    }
}

impl From<bool> for DialbackOutcome {
    fn from(valid: bool) -> Self {
        if valid {
            Self::Valid
        } else {
            Self::Invalid
        }
    }
}

/// Generates and checks dialback keys with one server secret.
#[derive(Clone)]
pub struct DialbackKey {
    hashed_secret: [u8; 32],
}

impl DialbackKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            hashed_secret: Sha256::digest(secret.as_ref()).into(),
        }
    }

    /// A key generator with a fresh random secret. Keys it issues cannot be
    /// verified after a restart.
    pub fn random() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::new(secret)
    }

    pub fn generate(&self, receiving: &str, originating: &str, stream_id: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hashed_secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(receiving.as_bytes());
        mac.update(b" ");
        mac.update(originating.as_bytes());
        mac.update(b" ");
        mac.update(stream_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Compare `key` with the expected key in constant time.
    pub fn verify(&self, key: &str, receiving: &str, originating: &str, stream_id: &str) -> bool {
        let expected = self.generate(receiving, originating, stream_id);
        constant_time_eq(key.trim().as_bytes(), expected.as_bytes())
    }
}

impl fmt::Debug for DialbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialbackKey").finish_non_exhaustive()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
