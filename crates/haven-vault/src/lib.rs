//! haven-vault: the encrypted single-file container and its catalogue
//!
//! On-disk layout:
//! ```text
//! offset 0..=255   fixed header: version, salt, wrapped master key (see `header`)
//! offset 256..EOF  encrypted file payloads and reusable gaps, placed by the
//!                  allocator and tracked in the `free_spaces` table
//! ```
//!
//! The catalogue (folders, files, free spaces, temp-file audit) lives in a
//! separate SQLCipher database keyed with the master key; the vault file
//! itself only ever holds ciphertext.

pub mod db;
pub mod engine;
pub mod export;
pub mod header;
pub mod store;

pub use engine::{FileMetadata, VaultEngine};
pub use header::{read_header, write_header, HEADER_SIZE, WRAPPED_KEY_CAPACITY};
