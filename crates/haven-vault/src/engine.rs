//! Vault storage engine: allocation, write, read, secure delete
//!
//! The engine owns the open vault file descriptor and the catalogue
//! connection. Every mutation runs in a single transaction; vault writes use
//! absolute offsets so concurrent reads of committed ranges never move.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use haven_core::{HavenError, HavenResult};
use haven_crypto::{derive_file_key, MasterKey};
use rand::RngCore;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::db::db_err;
use crate::header::HEADER_SIZE;
use crate::store::{self, FileEntry, FileRecord, FolderOverview};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Metadata of a freshly stored file.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    /// Pre-encryption payload size
    pub size: i64,
    pub mime_type: String,
    pub folder_id: i64,
    /// Ciphertext placement inside the vault
    pub offset: u64,
    pub length: u64,
}

/// The storage engine. Owns the vault file and the catalogue connection for
/// the lifetime of an unlocked session.
pub struct VaultEngine {
    conn: Mutex<Connection>,
    file: File,
    vault_path: PathBuf,
    master: MasterKey,
}

impl VaultEngine {
    /// Open the engine over an existing vault file and an unlocked
    /// catalogue connection.
    pub fn open(vault_path: &Path, conn: Connection, master: MasterKey) -> HavenResult<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(vault_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(HavenError::VaultMissing)
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            conn: Mutex::new(conn),
            file,
            vault_path: vault_path.to_path_buf(),
            master,
        })
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("catalogue lock poisoned")
    }

    /// Encrypt `data` and persist it under `folder_id`.
    ///
    /// Runs as one transaction: allocation, vault write and record insert
    /// either all land or none do. The plaintext buffer is zeroed before
    /// returning.
    pub fn store_file(
        &self,
        folder_id: i64,
        name: &str,
        mime_type: &str,
        mut data: Vec<u8>,
    ) -> HavenResult<FileMetadata> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction().map_err(db_err)?;

        let file_uuid = Uuid::new_v4().to_string();
        let original_size = data.len() as i64;

        let file_key = derive_file_key(&self.master, &file_uuid);
        let mut ciphertext = haven_crypto::seal(file_key.as_bytes(), &data)?;
        data.zeroize();

        let ciphertext_len = ciphertext.len() as u64;
        let offset = match store::take_best_fit(&tx, ciphertext_len)? {
            Some(offset) => offset,
            None => self.vault_len()?,
        };

        let write_result = self.write_at(&ciphertext, offset);
        ciphertext.zeroize();
        write_result?;

        let file_id = store::insert_file(
            &tx,
            &file_uuid,
            name,
            original_size,
            mime_type,
            folder_id,
            offset,
            ciphertext_len,
        )?;

        tx.commit().map_err(db_err)?;

        info!(
            file = %file_uuid,
            name,
            offset,
            length = ciphertext_len,
            "stored file in vault"
        );

        Ok(FileMetadata {
            id: file_id,
            uuid: file_uuid,
            name: name.to_string(),
            size: original_size,
            mime_type: mime_type.to_string(),
            folder_id,
            offset,
            length: ciphertext_len,
        })
    }

    /// Decrypt a stored file back into memory.
    pub fn read_file(&self, file_id: i64) -> HavenResult<Vec<u8>> {
        let record = {
            let conn = self.lock_conn();
            store::file_for_read(&conn, file_id)?
        };
        self.decrypt_record(&record)
    }

    pub(crate) fn decrypt_record(&self, record: &FileRecord) -> HavenResult<Vec<u8>> {
        let mut ciphertext = vec![0u8; record.length as usize];
        self.read_at(&mut ciphertext, record.offset)?;

        let file_key = derive_file_key(&self.master, &record.uuid);
        let plaintext = haven_crypto::open(file_key.as_bytes(), &ciphertext);
        ciphertext.zeroize();
        plaintext
    }

    /// Securely delete files: mark the records deleted and free their
    /// ranges in one transaction, then overwrite the ciphertext with random
    /// bytes. The overwrite is best-effort; the records are already
    /// unreachable once the transaction commits.
    pub fn delete_files(&self, file_ids: &[i64]) -> HavenResult<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction().map_err(db_err)?;

        let records = store::files_for_deletion(&tx, file_ids)?;
        if records.is_empty() {
            return Err(HavenError::NotFound("no files found for deletion".into()));
        }

        for record in &records {
            store::mark_file_deleted(&tx, record.id)?;
            store::add_free_space(&tx, record.offset, record.length)?;
        }

        tx.commit().map_err(db_err)?;

        // Overwrite while still holding the catalogue lock so a concurrent
        // store cannot claim a freed range before it has been scrubbed.
        for record in &records {
            if let Err(err) = self.overwrite_range(record.offset, record.length) {
                warn!(
                    file = %record.uuid,
                    offset = record.offset,
                    "secure overwrite failed: {err}"
                );
            }
        }

        info!(count = records.len(), "deleted files from vault");
        Ok(())
    }

    /// Delete folders and everything inside them.
    pub fn delete_folders(&self, folder_ids: &[i64]) -> HavenResult<()> {
        if folder_ids.is_empty() {
            return Err(HavenError::InvalidRequest(
                "no folder IDs provided for deletion".into(),
            ));
        }

        let file_ids = {
            let conn = self.lock_conn();
            store::file_ids_in_folders(&conn, folder_ids)?
        };

        if !file_ids.is_empty() {
            self.delete_files(&file_ids)?;
        }

        let mut conn = self.lock_conn();
        let tx = conn.transaction().map_err(db_err)?;
        for folder_id in folder_ids {
            store::delete_folder_row(&tx, *folder_id)?;
        }
        tx.commit().map_err(db_err)
    }

    /// Create the destination folder for an accepted transfer.
    pub fn create_transfer_folder(&self, title: &str) -> HavenResult<i64> {
        let conn = self.lock_conn();
        let folder_id = store::create_folder(&conn, title)?;
        info!(folder_id, title, "created transfer folder");
        Ok(folder_id)
    }

    /// Return the id of the "Received Files" folder, creating it if absent.
    pub fn ensure_received_folder(&self) -> HavenResult<i64> {
        let conn = self.lock_conn();
        store::ensure_received_folder(&conn)
    }

    pub fn folders_with_files(&self) -> HavenResult<Vec<FolderOverview>> {
        let conn = self.lock_conn();
        store::folders_with_files(&conn)
    }

    /// Folder name plus its live files, newest first.
    pub fn files_in_folder(&self, folder_id: i64) -> HavenResult<(String, Vec<FileEntry>)> {
        let conn = self.lock_conn();
        let name = store::folder_name(&conn, folder_id)?;
        let files = store::files_in_folder(&conn, folder_id)?;
        Ok((name, files))
    }

    pub(crate) fn folder_name(&self, folder_id: i64) -> HavenResult<String> {
        let conn = self.lock_conn();
        store::folder_name(&conn, folder_id)
    }

    pub(crate) fn selected_files_in_folder(
        &self,
        folder_id: i64,
        file_ids: &[i64],
    ) -> HavenResult<Vec<FileEntry>> {
        let conn = self.lock_conn();
        store::selected_files_in_folder(&conn, folder_id, file_ids)
    }

    pub(crate) fn file_for_read(&self, file_id: i64) -> HavenResult<FileRecord> {
        let conn = self.lock_conn();
        store::file_for_read(&conn, file_id)
    }

    /// Record a decrypted temp artifact in the audit table.
    pub fn record_temp_file(&self, file_id: i64, temp_path: &str) -> HavenResult<()> {
        let conn = self.lock_conn();
        store::record_temp_file(&conn, file_id, temp_path)
    }

    /// Remove audited temp artifacts from disk and drain the table.
    pub fn purge_temp_files(&self) -> HavenResult<()> {
        let paths = {
            let conn = self.lock_conn();
            store::take_temp_files(&conn)?
        };
        for path in paths {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(%path, "failed to remove temp file: {err}");
                }
            }
        }
        Ok(())
    }

    /// Integrity probe: live file ranges and free gaps must be pairwise
    /// disjoint and lie past the header, inside the vault file.
    pub fn layout_is_consistent(&self) -> HavenResult<bool> {
        let (live, free) = {
            let conn = self.lock_conn();
            store::all_extents(&conn)?
        };
        let vault_len = self.vault_len()?;

        let mut extents: Vec<(u64, u64)> = live.iter().chain(free.iter()).copied().collect();
        extents.sort_unstable();

        let mut previous_end = HEADER_SIZE as u64;
        for (offset, length) in extents {
            if offset < previous_end {
                return Ok(false);
            }
            let Some(end) = offset.checked_add(length) else {
                return Ok(false);
            };
            previous_end = end;
        }

        // a free gap may extend to EOF, but live data never past it
        Ok(live
            .iter()
            .all(|(offset, length)| offset + length <= vault_len))
    }

    fn vault_len(&self) -> HavenResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn write_at(&self, data: &[u8], offset: u64) -> HavenResult<()> {
        debug_assert!(offset >= HEADER_SIZE as u64);
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> HavenResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn overwrite_range(&self, offset: u64, length: u64) -> HavenResult<()> {
        let mut random = vec![0u8; length as usize];
        rand::thread_rng().fill_bytes(&mut random);
        self.file.write_all_at(&random, offset)?;
        self.file.sync_all()?;
        Ok(())
    }
}
