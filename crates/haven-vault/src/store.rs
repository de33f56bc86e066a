//! Catalogue queries: folders, file records, free spaces, temp-file audit
//!
//! These helpers run against a plain connection or inside a transaction
//! (`rusqlite::Transaction` derefs to `Connection`); the engine decides the
//! transaction boundaries.

use haven_core::{HavenError, HavenResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::db_err;

/// Well-known destination for incoming transfers without a dedicated folder.
pub const RECEIVED_FOLDER_NAME: &str = "Received Files";

/// A folder with its live file count, for sidebar listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderOverview {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub file_count: i64,
}

/// A live file as shown in folder listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: i64,
    pub name: String,
    pub mime_type: String,
    pub created_at: String,
    pub size: i64,
}

/// Placement and key material needed to decrypt one stored file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub mime_type: String,
    pub offset: u64,
    pub length: u64,
}

/// Return the id of the "Received Files" root folder, creating it if absent.
pub fn ensure_received_folder(conn: &Connection) -> HavenResult<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM folders WHERE name = ?1 AND parent_id IS NULL",
            [RECEIVED_FOLDER_NAME],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;

    match existing {
        Some(id) => Ok(id),
        None => create_folder(conn, RECEIVED_FOLDER_NAME),
    }
}

/// Create a root folder and return its id.
pub fn create_folder(conn: &Connection, name: &str) -> HavenResult<i64> {
    conn.execute(
        "INSERT INTO folders (name, parent_id) VALUES (?1, NULL)",
        [name],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

pub fn folder_name(conn: &Connection, folder_id: i64) -> HavenResult<String> {
    conn.query_row(
        "SELECT name FROM folders WHERE id = ?1",
        [folder_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HavenError::NotFound(format!("folder {folder_id}")))
}

/// Folders that currently hold at least one live file.
pub fn folders_with_files(conn: &Connection) -> HavenResult<Vec<FolderOverview>> {
    let mut stmt = conn
        .prepare(
            "SELECT f.id, f.name, f.created_at, COUNT(files.id) AS file_count
             FROM folders f
             LEFT JOIN files ON f.id = files.folder_id AND files.is_deleted = 0
             GROUP BY f.id, f.name, f.created_at
             HAVING COUNT(files.id) > 0
             ORDER BY f.created_at DESC",
        )
        .map_err(db_err)?;

    let rows = stmt
        .query_map([], |row| {
            Ok(FolderOverview {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
                file_count: row.get(3)?,
            })
        })
        .map_err(db_err)?;

    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

/// Live files in a folder, newest first.
pub fn files_in_folder(conn: &Connection, folder_id: i64) -> HavenResult<Vec<FileEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, mime_type, created_at, size
             FROM files
             WHERE folder_id = ?1 AND is_deleted = 0
             ORDER BY created_at DESC",
        )
        .map_err(db_err)?;

    let rows = stmt
        .query_map([folder_id], |row| {
            Ok(FileEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                mime_type: row.get(2)?,
                created_at: row.get(3)?,
                size: row.get(4)?,
            })
        })
        .map_err(db_err)?;

    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

/// A selected subset of live files within one folder.
pub fn selected_files_in_folder(
    conn: &Connection,
    folder_id: i64,
    file_ids: &[i64],
) -> HavenResult<Vec<FileEntry>> {
    if file_ids.is_empty() {
        return Err(HavenError::InvalidRequest("no file IDs provided".into()));
    }

    let sql = format!(
        "SELECT id, name, mime_type, created_at, size
         FROM files
         WHERE folder_id = ?1 AND id IN ({}) AND is_deleted = 0
         ORDER BY created_at DESC",
        placeholders(file_ids.len(), 2)
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;

    let mut args: Vec<&dyn rusqlite::ToSql> = vec![&folder_id];
    for id in file_ids {
        args.push(id);
    }

    let rows = stmt
        .query_map(args.as_slice(), |row| {
            Ok(FileEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                mime_type: row.get(2)?,
                created_at: row.get(3)?,
                size: row.get(4)?,
            })
        })
        .map_err(db_err)?;

    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

/// Ids of all live files under the given folders.
pub fn file_ids_in_folders(conn: &Connection, folder_ids: &[i64]) -> HavenResult<Vec<i64>> {
    // one static query per folder; no dynamic SQL over caller input
    let mut stmt = conn
        .prepare("SELECT id FROM files WHERE folder_id = ?1 AND is_deleted = 0")
        .map_err(db_err)?;

    let mut file_ids = Vec::new();
    for folder_id in folder_ids {
        let rows = stmt
            .query_map([folder_id], |row| row.get::<_, i64>(0))
            .map_err(db_err)?;
        for id in rows {
            file_ids.push(id.map_err(db_err)?);
        }
    }
    Ok(file_ids)
}

/// Insert a stored file's record; returns the new row id.
#[allow(clippy::too_many_arguments)]
pub fn insert_file(
    conn: &Connection,
    uuid: &str,
    name: &str,
    size: i64,
    mime_type: &str,
    folder_id: i64,
    offset: u64,
    length: u64,
) -> HavenResult<i64> {
    conn.execute(
        "INSERT INTO files (uuid, name, size, mime_type, folder_id, offset, length, is_deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![
            uuid,
            name,
            size,
            mime_type,
            folder_id,
            offset as i64,
            length as i64
        ],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

/// Load the placement of a live file for decryption.
pub fn file_for_read(conn: &Connection, file_id: i64) -> HavenResult<FileRecord> {
    conn.query_row(
        "SELECT id, uuid, name, mime_type, offset, length
         FROM files
         WHERE id = ?1 AND is_deleted = 0",
        [file_id],
        |row| {
            Ok(FileRecord {
                id: row.get(0)?,
                uuid: row.get(1)?,
                name: row.get(2)?,
                mime_type: row.get(3)?,
                offset: row.get::<_, i64>(4)? as u64,
                length: row.get::<_, i64>(5)? as u64,
            })
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HavenError::NotFound(format!("file {file_id}")))
}

/// Load placements of the given live files ahead of deletion.
pub fn files_for_deletion(conn: &Connection, file_ids: &[i64]) -> HavenResult<Vec<FileRecord>> {
    if file_ids.is_empty() {
        return Err(HavenError::InvalidRequest(
            "no file IDs provided for deletion".into(),
        ));
    }

    let sql = format!(
        "SELECT id, uuid, name, mime_type, offset, length
         FROM files
         WHERE id IN ({}) AND is_deleted = 0",
        placeholders(file_ids.len(), 1)
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;

    let args: Vec<&dyn rusqlite::ToSql> =
        file_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

    let rows = stmt
        .query_map(args.as_slice(), |row| {
            Ok(FileRecord {
                id: row.get(0)?,
                uuid: row.get(1)?,
                name: row.get(2)?,
                mime_type: row.get(3)?,
                offset: row.get::<_, i64>(4)? as u64,
                length: row.get::<_, i64>(5)? as u64,
            })
        })
        .map_err(db_err)?;

    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

pub fn mark_file_deleted(conn: &Connection, file_id: i64) -> HavenResult<()> {
    conn.execute(
        "UPDATE files SET is_deleted = 1, updated_at = datetime('now') WHERE id = ?1",
        [file_id],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn add_free_space(conn: &Connection, offset: u64, length: u64) -> HavenResult<()> {
    conn.execute(
        "INSERT INTO free_spaces (offset, length) VALUES (?1, ?2)",
        params![offset as i64, length as i64],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Best-fit allocation: consume the smallest free space that holds `size`
/// bytes and return its offset. Ties break on ascending offset. `None`
/// means no gap fits and the caller should append.
pub fn take_best_fit(conn: &Connection, size: u64) -> HavenResult<Option<u64>> {
    let found: Option<(i64, i64)> = conn
        .query_row(
            "SELECT id, offset FROM free_spaces
             WHERE length >= ?1
             ORDER BY length ASC, offset ASC
             LIMIT 1",
            [size as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;

    match found {
        Some((free_space_id, offset)) => {
            conn.execute("DELETE FROM free_spaces WHERE id = ?1", [free_space_id])
                .map_err(db_err)?;
            Ok(Some(offset as u64))
        }
        None => Ok(None),
    }
}

pub fn delete_folder_row(conn: &Connection, folder_id: i64) -> HavenResult<()> {
    conn.execute("DELETE FROM folders WHERE id = ?1", [folder_id])
        .map_err(db_err)?;
    Ok(())
}

/// Record a temporary decrypted artifact for later cleanup.
pub fn record_temp_file(conn: &Connection, file_id: i64, temp_path: &str) -> HavenResult<()> {
    conn.execute(
        "INSERT INTO temp_files (file_id, temp_path) VALUES (?1, ?2)",
        params![file_id, temp_path],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Drain the temp-file audit table, returning the recorded paths.
pub fn take_temp_files(conn: &Connection) -> HavenResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT temp_path FROM temp_files")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(db_err)?;
    let paths = rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?;

    conn.execute("DELETE FROM temp_files", []).map_err(db_err)?;
    Ok(paths)
}

/// Occupied extents of all live files and free-space gaps, as
/// `(offset, length)` pairs.
pub fn all_extents(conn: &Connection) -> HavenResult<(Vec<(u64, u64)>, Vec<(u64, u64)>)> {
    let mut stmt = conn
        .prepare("SELECT offset, length FROM files WHERE is_deleted = 0")
        .map_err(db_err)?;
    let live = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64))
        })
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare("SELECT offset, length FROM free_spaces")
        .map_err(db_err)?;
    let free = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64))
        })
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok((live, free))
}

fn placeholders(count: usize, start: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start + i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_database;
    use haven_crypto::{MasterKey, KEY_SIZE};
    use tempfile::TempDir;

    fn test_conn(dir: &TempDir) -> Connection {
        let master = MasterKey::from_bytes([1u8; KEY_SIZE]);
        open_database(&dir.path().join("haven.db"), &master).unwrap()
    }

    #[test]
    fn test_ensure_received_folder_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let conn = test_conn(&dir);

        let first = ensure_received_folder(&conn).unwrap();
        let second = ensure_received_folder(&conn).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_for_read_not_found() {
        let dir = TempDir::new().unwrap();
        let conn = test_conn(&dir);

        let result = file_for_read(&conn, 42);
        assert!(matches!(result, Err(HavenError::NotFound(_))));
    }

    #[test]
    fn test_best_fit_prefers_smallest_then_lowest_offset() {
        let dir = TempDir::new().unwrap();
        let conn = test_conn(&dir);

        add_free_space(&conn, 1000, 80).unwrap();
        add_free_space(&conn, 500, 50).unwrap();
        add_free_space(&conn, 300, 50).unwrap();

        // smallest length wins; among equals, the lower offset
        assert_eq!(take_best_fit(&conn, 40).unwrap(), Some(300));
        assert_eq!(take_best_fit(&conn, 40).unwrap(), Some(500));
        assert_eq!(take_best_fit(&conn, 40).unwrap(), Some(1000));
        assert_eq!(take_best_fit(&conn, 40).unwrap(), None);
    }

    #[test]
    fn test_best_fit_skips_too_small_gaps() {
        let dir = TempDir::new().unwrap();
        let conn = test_conn(&dir);

        add_free_space(&conn, 256, 10).unwrap();
        assert_eq!(take_best_fit(&conn, 40).unwrap(), None);

        // the undersized gap is still there
        assert_eq!(take_best_fit(&conn, 10).unwrap(), Some(256));
    }

    #[test]
    fn test_folders_with_files_hides_empty_folders() {
        let dir = TempDir::new().unwrap();
        let conn = test_conn(&dir);

        let empty = create_folder(&conn, "Empty").unwrap();
        let full = create_folder(&conn, "Full").unwrap();
        insert_file(&conn, "u1", "a.txt", 3, "text/plain", full, 256, 60).unwrap();

        let folders = folders_with_files(&conn).unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].id, full);
        assert_eq!(folders[0].file_count, 1);
        assert!(folders.iter().all(|f| f.id != empty));
    }

    #[test]
    fn test_temp_file_audit_drains() {
        let dir = TempDir::new().unwrap();
        let conn = test_conn(&dir);

        record_temp_file(&conn, 1, "/tmp/haven/one").unwrap();
        record_temp_file(&conn, 2, "/tmp/haven/two").unwrap();

        let paths = take_temp_files(&conn).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(take_temp_files(&conn).unwrap().is_empty());
    }
}
