//! Per-file key schedule: SHA-256(master key || file UUID)
//!
//! File keys are deterministic derivatives of the master key and are never
//! persisted; the storage engine recomputes them on demand.

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// A per-file 256-bit encryption key. Zeroized on drop.
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the encryption key for a single file from the master key and the
/// file's UUID string.
pub fn derive_file_key(master: &MasterKey, file_uuid: &str) -> FileKey {
    let mut hasher = Sha256::new();
    hasher.update(master.as_bytes());
    hasher.update(file_uuid.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&digest);
    FileKey { bytes }
}
