//! SQLCipher catalogue database: keying, durability pragmas, schema
//!
//! The catalogue is opened only after a successful unlock and closed when
//! the application locks. A single read/write connection is used; SQLite
//! serialises concurrent writers behind it.

use std::path::Path;

use haven_core::{HavenError, HavenResult};
use haven_crypto::MasterKey;
use rusqlite::Connection;
use zeroize::Zeroizing;

pub(crate) fn db_err(err: rusqlite::Error) -> HavenError {
    HavenError::Store(err.to_string())
}

/// Open (or create) the encrypted catalogue at `path`, keyed with the
/// master key.
pub fn open_database(path: &Path, master: &MasterKey) -> HavenResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        restrict_dir_permissions(parent)?;
    }

    let conn = Connection::open(path).map_err(db_err)?;
    restrict_file_permissions(path)?;

    apply_key(&conn, master)?;
    configure_connection(&conn)?;
    verify_decryption(&conn)?;
    ensure_schema(&conn)?;

    Ok(conn)
}

/// Applies SQLCipher keying and validates cipher availability.
fn apply_key(conn: &Connection, master: &MasterKey) -> HavenResult<()> {
    let key_hex = Zeroizing::new(hex::encode(master.as_bytes()));
    let pragma = Zeroizing::new(format!("PRAGMA key = \"x'{}'\";", key_hex.as_str()));
    conn.execute_batch(&pragma).map_err(db_err)?;

    let cipher_version: String = conn
        .query_row("PRAGMA cipher_version;", [], |row| row.get(0))
        .map_err(db_err)?;
    if cipher_version.trim().is_empty() {
        return Err(HavenError::Store("sqlcipher not available".into()));
    }
    Ok(())
}

// Foreign keys stay off: deleted files keep their rows (soft delete) while
// their folder rows are removed outright.
fn configure_connection(conn: &Connection) -> HavenResult<()> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 30000;
         PRAGMA journal_mode = WAL;",
    )
    .map_err(db_err)
}

/// Probe that the key actually decrypts the database.
fn verify_decryption(conn: &Connection) -> HavenResult<()> {
    conn.query_row("SELECT count(*) FROM sqlite_master;", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|_| HavenError::Store("failed to verify database decryption".into()))?;
    Ok(())
}

fn ensure_schema(conn: &Connection) -> HavenResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS folders (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL,
            parent_id   INTEGER,
            created_at  TEXT    NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT    NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS files (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid        TEXT    NOT NULL UNIQUE,
            name        TEXT    NOT NULL,
            size        INTEGER NOT NULL,
            mime_type   TEXT    NOT NULL,
            folder_id   INTEGER NOT NULL,
            offset      INTEGER NOT NULL,
            length      INTEGER NOT NULL,
            is_deleted  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT    NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT    NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_files_by_folder
        ON files (folder_id, is_deleted);

        CREATE TABLE IF NOT EXISTS free_spaces (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            offset      INTEGER NOT NULL,
            length      INTEGER NOT NULL,
            created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_free_spaces_by_length
        ON free_spaces (length, offset);

        CREATE TABLE IF NOT EXISTS temp_files (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id     INTEGER NOT NULL,
            temp_path   TEXT    NOT NULL,
            created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(db_err)
}

fn restrict_file_permissions(path: &Path) -> HavenResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn restrict_dir_permissions(path: &Path) -> HavenResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_crypto::KEY_SIZE;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let master = MasterKey::from_bytes([3u8; KEY_SIZE]);
        let conn = open_database(&dir.path().join("haven.db"), &master).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('folders', 'files', 'free_spaces', 'temp_files')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_reopen_with_same_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("haven.db");
        let master = MasterKey::from_bytes([4u8; KEY_SIZE]);

        {
            let conn = open_database(&path, &master).unwrap();
            conn.execute(
                "INSERT INTO folders (name, parent_id) VALUES (?1, NULL)",
                ["stash"],
            )
            .unwrap();
        }

        let conn = open_database(&path, &master).unwrap();
        let name: String = conn
            .query_row("SELECT name FROM folders LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "stash");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("haven.db");

        open_database(&path, &MasterKey::from_bytes([5u8; KEY_SIZE])).unwrap();
        let result = open_database(&path, &MasterKey::from_bytes([6u8; KEY_SIZE]));
        assert!(result.is_err());
    }
}
