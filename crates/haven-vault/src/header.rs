//! Fixed 256-byte vault header
//!
//! Layout, all lengths little-endian:
//! ```text
//! [1: version][4: salt length][32: salt][4: wrapped key length][wrapped key][zero padding]
//! ```
//! Both variable fields are length-prefixed so the reader recovers their
//! exact sizes; the zero padding carries no information.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use haven_core::{HavenError, HavenResult};
use haven_crypto::SALT_SIZE;

/// Total header size; file payloads start at this offset.
pub const HEADER_SIZE: usize = 256;

/// Current header format version.
pub const CURRENT_VERSION: u8 = 1;

const LENGTH_FIELD_SIZE: usize = 4;

/// Maximum wrapped-key size the header can carry.
pub const WRAPPED_KEY_CAPACITY: usize =
    HEADER_SIZE - 1 - LENGTH_FIELD_SIZE - SALT_SIZE - LENGTH_FIELD_SIZE;

/// Smallest byte count a readable header can have: version plus the two
/// length prefixes and the salt.
const MIN_HEADER_BYTES: u64 = (1 + LENGTH_FIELD_SIZE + SALT_SIZE) as u64;

/// Create the vault file and write the header, zero-padded to 256 bytes.
///
/// The file is created with mode 0600. Any existing file is truncated: the
/// header is only ever written at password creation, before payloads exist.
pub fn write_header(path: &Path, salt: &[u8; SALT_SIZE], wrapped_key: &[u8]) -> HavenResult<()> {
    if wrapped_key.len() > WRAPPED_KEY_CAPACITY {
        return Err(HavenError::HeaderTooLarge);
    }

    let mut open_options = OpenOptions::new();
    open_options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open_options.mode(0o600);
    }
    let mut file = open_options.open(path)?;

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.push(CURRENT_VERSION);
    header.extend_from_slice(&(salt.len() as u32).to_le_bytes());
    header.extend_from_slice(salt);
    header.extend_from_slice(&(wrapped_key.len() as u32).to_le_bytes());
    header.extend_from_slice(wrapped_key);
    header.resize(HEADER_SIZE, 0);

    file.write_all(&header)?;
    file.sync_all()?;
    Ok(())
}

/// Read the salt and wrapped master key back out of the header.
///
/// Fails with `VaultMissing` when the file does not exist, `VaultCorrupted`
/// when the file is too short or a length prefix runs past the header, and
/// `UnsupportedVersion` when the version byte is above the current format.
pub fn read_header(path: &Path) -> HavenResult<([u8; SALT_SIZE], Vec<u8>)> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(HavenError::VaultMissing),
        Err(err) => return Err(err.into()),
    };

    if file.metadata()?.len() < MIN_HEADER_BYTES {
        return Err(HavenError::VaultCorrupted);
    }

    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)
        .map_err(|_| HavenError::VaultCorrupted)?;

    let version = header[0];
    if version == 0 {
        return Err(HavenError::VaultCorrupted);
    }
    if version > CURRENT_VERSION {
        return Err(HavenError::UnsupportedVersion);
    }

    let mut cursor = 1;
    let salt_bytes = read_length_prefixed(&header, &mut cursor)?;
    if salt_bytes.len() != SALT_SIZE {
        return Err(HavenError::VaultCorrupted);
    }
    let wrapped_key = read_length_prefixed(&header, &mut cursor)?.to_vec();

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(salt_bytes);
    Ok((salt, wrapped_key))
}

fn read_length_prefixed<'a>(header: &'a [u8], cursor: &mut usize) -> HavenResult<&'a [u8]> {
    let length_end = cursor
        .checked_add(LENGTH_FIELD_SIZE)
        .filter(|end| *end <= header.len())
        .ok_or(HavenError::VaultCorrupted)?;
    let mut length_bytes = [0u8; LENGTH_FIELD_SIZE];
    length_bytes.copy_from_slice(&header[*cursor..length_end]);
    let length = u32::from_le_bytes(length_bytes) as usize;

    let data_end = length_end
        .checked_add(length)
        .filter(|end| *end <= header.len())
        .ok_or(HavenError::VaultCorrupted)?;

    *cursor = data_end;
    Ok(&header[length_end..data_end])
}
