//! haven-crypto: key derivation and data encryption for the Haven vault
//!
//! Key hierarchy:
//! ```text
//! Wrap Key (256-bit, Argon2id from password + salt)
//!   └── Master Key (256-bit random, sealed by the wrap key in the vault header)
//!         └── Per-File Key: SHA-256(master key || file UUID), recomputed on demand
//! ```
//!
//! Blob format: `[24-byte random nonce][ciphertext + 16-byte Poly1305 tag]`,
//! XChaCha20-Poly1305. Fresh nonce per seal, so sealing the same plaintext
//! twice yields distinct ciphertexts.

pub mod blob;
pub mod filekey;
pub mod kdf;

pub use blob::{open, seal};
pub use filekey::{derive_file_key, FileKey};
pub use kdf::{derive_wrap_key, KdfParams, MasterKey, WrapKey};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the Argon2id salt stored in the vault header
pub const SALT_SIZE: usize = 32;
