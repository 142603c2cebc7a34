//! Tape at-rest encryption.
//!
//! When `CHAOS_TAPE_KEY` is set, tapes are sealed with ChaCha20-Poly1305.
//! The file layout is `AGCTAPE1 || nonce(12) || ciphertext`; the magic
//! prefix lets the player distinguish encrypted from plaintext tapes
//! without guessing.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::TapeError;

/// Magic prefix marking an encrypted tape.
pub const MAGIC: &[u8; 8] = b"AGCTAPE1";

const NONCE_LEN: usize = 12;

/// Derives a 256-bit key from `CHAOS_TAPE_KEY`.
///
/// A 64-hex-char value is taken as the raw key; any other string is
/// digested with SHA-256. Returns `None` when the variable is unset.
///
/// # Errors
///
/// Returns [`TapeError::Key`] when the variable is set but empty.
pub fn key_from_env() -> Result<Option<[u8; 32]>, TapeError> {
    match std::env::var("CHAOS_TAPE_KEY") {
        Ok(value) if value.is_empty() => Err(TapeError::Key(
            "CHAOS_TAPE_KEY is set but empty".to_string(),
        )),
        Ok(value) => Ok(Some(key_from_str(&value))),
        Err(_) => Ok(None),
    }
}

/// Turns arbitrary key material into a 256-bit key.
#[must_use]
pub fn key_from_str(value: &str) -> [u8; 32] {
    if value.len() == 64 {
        if let Some(raw) = decode_hex_32(value) {
            return raw;
        }
    }
    Sha256::digest(value.as_bytes()).into()
}

fn decode_hex_32(s: &str) -> Option<[u8; 32]> {
    let mut out = [0u8; 32];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(s.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}

/// Seals a plaintext tape payload.
///
/// # Errors
///
/// Returns [`TapeError::Crypto`] on AEAD failure.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, TapeError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| TapeError::Crypto(format!("encrypt failed: {e}")))?;

    let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a tape file body, decrypting when the magic prefix is present.
///
/// # Errors
///
/// - [`TapeError::Key`] when the tape is encrypted but no key is available.
/// - [`TapeError::Crypto`] on truncated or tampered ciphertext (wrong key
///   included — the AEAD tag catches it).
pub fn open(key: Option<&[u8; 32]>, data: &[u8]) -> Result<Vec<u8>, TapeError> {
    if !data.starts_with(MAGIC) {
        return Ok(data.to_vec());
    }

    let Some(key) = key else {
        return Err(TapeError::Key(
            "tape is encrypted but CHAOS_TAPE_KEY is not set".to_string(),
        ));
    };

    let rest = &data[MAGIC.len()..];
    if rest.len() < NONCE_LEN {
        return Err(TapeError::Crypto("truncated encrypted tape".to_string()));
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| TapeError::Crypto("decrypt failed: wrong key or corrupted tape".to_string()))
}
