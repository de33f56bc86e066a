//! Authenticated blob encryption with XChaCha20-Poly1305
//!
//! Output format: `[24-byte random nonce][ciphertext + 16-byte tag]`.
//! A fresh nonce is drawn per call, so repeated sealing of identical
//! plaintext is permitted and always yields a new ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use haven_core::{HavenError, HavenResult};
use rand::RngCore;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` under `key`.
///
/// Returns `[nonce][ciphertext + tag]`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> HavenResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| HavenError::CryptoFailure)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a blob produced by [`seal`].
///
/// Fails with `CryptoFailure` on a wrong key, truncation, or any tampering.
pub fn open(key: &[u8; KEY_SIZE], blob: &[u8]) -> HavenResult<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(HavenError::CryptoFailure);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| HavenError::CryptoFailure)
}
