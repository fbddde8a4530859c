//! Project-scoped API keys.
//!
//! Plaintext keys are `ask_` followed by 64 hex characters. Only the SHA-256
//! digest is persisted, so a lookup hashes the presented key and matches on
//! the digest column.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const KEY_PREFIX: &str = "ask_";

/// Number of leading plaintext characters kept for display.
pub const DISPLAY_PREFIX_LEN: usize = 8;

/// A freshly minted key. `plaintext` must be handed to the caller once and
/// never stored.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub hash: String,
    pub prefix: String,
}

pub fn generate_key() -> GeneratedKey {
    let plaintext = format!(
        "{}{}{}",
        KEY_PREFIX,
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    GeneratedKey {
        hash: hash_key(&plaintext),
        prefix: display_prefix(&plaintext),
        plaintext,
    }
}

pub fn hash_key(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

pub fn display_prefix(plaintext: &str) -> String {
    plaintext.chars().take(DISPLAY_PREFIX_LEN).collect()
}
