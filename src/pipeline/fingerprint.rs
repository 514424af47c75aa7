//! Content fingerprints for the audio cache.
//!
//! SHA-256 over the whitespace-collapsed summary and the voice id. Two
//! articles that summarize to the same text share audio for the same voice.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

const VERSION_TAG: &[u8] = b"newsvoice-fp-v1";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheFingerprint([u8; 32]);

impl CacheFingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheFingerprint({})", &self.to_hex()[..12])
    }
}

impl FromStr for CacheFingerprint {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CacheError::InvalidFingerprint(s.to_string());
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(out))
    }
}

impl Serialize for CacheFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Collapse runs of whitespace to single spaces; case is preserved.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fingerprint(summary_text: &str, voice_id: &str) -> CacheFingerprint {
    let normalized = normalize_text(summary_text);
    let mut hasher = Sha256::new();
    hasher.update(VERSION_TAG);
    hasher.update((normalized.len() as u64).to_le_bytes());
    hasher.update(normalized.as_bytes());
    hasher.update((voice_id.len() as u64).to_le_bytes());
    hasher.update(voice_id.as_bytes());
    CacheFingerprint(hasher.finalize().into())
}
