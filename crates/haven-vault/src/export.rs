//! Plaintext export: single files to the export directory, folders to ZIP
//!
//! Exports tolerate partial failure: each file is decrypted independently
//! and the paths of the successful ones are returned.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use haven_core::{HavenError, HavenResult};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::engine::VaultEngine;
use crate::store::FileEntry;

impl VaultEngine {
    /// Decrypt the given files into `export_dir`, one plain file each.
    ///
    /// Names are disambiguated with a `-N` suffix and get an extension
    /// derived from the mime type when the stored name lacks one. Files
    /// that fail to export are skipped; the successful paths are returned.
    pub fn export_files(&self, file_ids: &[i64], export_dir: &Path) -> HavenResult<Vec<PathBuf>> {
        if file_ids.is_empty() {
            return Err(HavenError::InvalidRequest("no file IDs provided".into()));
        }
        create_export_dir(export_dir)?;

        let mut exported = Vec::new();
        for &file_id in file_ids {
            match self.export_single(file_id, export_dir) {
                Ok(path) => {
                    info!(file_id, path = %path.display(), "exported file");
                    exported.push(path);
                }
                Err(err) => {
                    warn!(file_id, "failed to export file: {err}");
                }
            }
        }

        if exported.is_empty() {
            return Err(HavenError::Store("all files failed to export".into()));
        }
        Ok(exported)
    }

    fn export_single(&self, file_id: i64, export_dir: &Path) -> HavenResult<PathBuf> {
        let record = self.file_for_read(file_id)?;
        let plaintext = self.decrypt_record(&record)?;

        let file_name = ensure_extension(&record.name, &record.mime_type);
        let destination = unique_destination(export_dir, &file_name);

        write_restricted(&destination, &plaintext)?;
        Ok(destination)
    }

    /// Export folders as ZIP archives.
    ///
    /// With an empty `file_ids`, each folder's full contents become one
    /// archive. A non-empty `file_ids` with exactly one folder exports that
    /// subset into a single archive.
    pub fn export_zip_folders(
        &self,
        folder_ids: &[i64],
        file_ids: &[i64],
        export_dir: &Path,
    ) -> HavenResult<Vec<PathBuf>> {
        if folder_ids.is_empty() {
            return Err(HavenError::InvalidRequest("no folder IDs provided".into()));
        }
        create_export_dir(export_dir)?;

        let subset_export = !file_ids.is_empty() && folder_ids.len() == 1;
        let mut archives = Vec::new();

        for &folder_id in folder_ids {
            let folder_name = match self.folder_name(folder_id) {
                Ok(name) => name,
                Err(err) => {
                    warn!(folder_id, "skipping folder: {err}");
                    continue;
                }
            };

            let files = if subset_export {
                self.selected_files_in_folder(folder_id, file_ids)
            } else {
                self.files_in_folder(folder_id).map(|(_, files)| files)
            };
            let files = match files {
                Ok(files) => files,
                Err(err) => {
                    warn!(folder_id, "skipping folder: {err}");
                    continue;
                }
            };
            if files.is_empty() {
                warn!(folder_id, folder = %folder_name, "no files to export");
                continue;
            }

            match self.write_zip(&folder_name, &files, export_dir) {
                Ok(path) => {
                    info!(folder = %folder_name, path = %path.display(), "created archive");
                    archives.push(path);
                }
                Err(err) => {
                    warn!(folder = %folder_name, "failed to create archive: {err}");
                }
            }
        }

        if archives.is_empty() {
            return Err(HavenError::Store("no archives were created".into()));
        }
        Ok(archives)
    }

    fn write_zip(
        &self,
        folder_name: &str,
        files: &[FileEntry],
        export_dir: &Path,
    ) -> HavenResult<PathBuf> {
        let zip_path = unique_destination(export_dir, &format!("{folder_name}.zip"));
        let zip_file = File::create(&zip_path)?;
        restrict_file(&zip_path)?;

        let mut writer = ZipWriter::new(zip_file);
        let options = SimpleFileOptions::default();

        for entry in files {
            let record = match self.file_for_read(entry.id) {
                Ok(record) => record,
                Err(err) => {
                    warn!(file_id = entry.id, "skipping archive entry: {err}");
                    continue;
                }
            };
            let plaintext = match self.decrypt_record(&record) {
                Ok(plaintext) => plaintext,
                Err(err) => {
                    warn!(file_id = entry.id, "skipping archive entry: {err}");
                    continue;
                }
            };

            let entry_name = ensure_extension(&record.name, &record.mime_type);
            writer
                .start_file(entry_name, options)
                .map_err(|err| HavenError::Store(format!("zip entry failed: {err}")))?;
            writer.write_all(&plaintext)?;
        }

        writer
            .finish()
            .map_err(|err| HavenError::Store(format!("zip finish failed: {err}")))?;
        Ok(zip_path)
    }
}

/// Pick a destination path that does not collide with an existing file by
/// appending `-1`, `-2`, ... before the extension.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
        _ => (file_name, ""),
    };

    let mut counter = 1;
    loop {
        let next = dir.join(format!("{stem}-{counter}{extension}"));
        if !next.exists() {
            return next;
        }
        counter += 1;
    }
}

/// Append a mime-derived extension when the stored name has none.
pub fn ensure_extension(file_name: &str, mime_type: &str) -> String {
    let has_extension = Path::new(file_name)
        .extension()
        .is_some_and(|ext| !ext.is_empty());
    if has_extension {
        return file_name.to_string();
    }
    format!("{file_name}{}", extension_for_mime(mime_type))
}

/// Map a mime type to a file extension, falling back to the subtype for the
/// common top-level families and `.file` otherwise.
pub fn extension_for_mime(mime_type: &str) -> String {
    let known = match mime_type {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/tiff" => ".tiff",
        "image/bmp" => ".bmp",
        "image/heic" => ".heic",
        "image/heif" => ".heif",
        "video/mp4" => ".mp4",
        "video/avi" => ".avi",
        "video/mov" | "video/quicktime" => ".mov",
        "video/wmv" => ".wmv",
        "video/flv" => ".flv",
        "video/webm" => ".webm",
        "video/3gpp" => ".3gp",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/wav" => ".wav",
        "audio/aac" => ".aac",
        "audio/ogg" => ".ogg",
        "audio/flac" => ".flac",
        "audio/m4a" => ".m4a",
        "application/pdf" => ".pdf",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/vnd.ms-powerpoint" => ".ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/css" => ".css",
        "application/javascript" | "text/javascript" => ".js",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/zip" => ".zip",
        "application/x-rar-compressed" => ".rar",
        "application/x-tar" => ".tar",
        "application/gzip" => ".gz",
        _ => "",
    };
    if !known.is_empty() {
        return known.to_string();
    }

    for prefix in ["image/", "video/", "audio/", "text/"] {
        if let Some(subtype) = mime_type.strip_prefix(prefix) {
            return format!(".{subtype}");
        }
    }
    ".file".to_string()
}

fn create_export_dir(dir: &Path) -> HavenResult<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

fn write_restricted(path: &Path, data: &[u8]) -> HavenResult<()> {
    std::fs::write(path, data)?;
    restrict_file(path)
}

fn restrict_file(path: &Path) -> HavenResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_for_mime_known_types() {
        assert_eq!(extension_for_mime("image/jpeg"), ".jpg");
        assert_eq!(extension_for_mime("application/pdf"), ".pdf");
        assert_eq!(extension_for_mime("audio/flac"), ".flac");
    }

    #[test]
    fn test_extension_for_mime_fallbacks() {
        assert_eq!(extension_for_mime("image/x-custom"), ".x-custom");
        assert_eq!(extension_for_mime("application/x-unknown"), ".file");
    }

    #[test]
    fn test_ensure_extension_keeps_existing() {
        assert_eq!(ensure_extension("photo.jpeg", "image/jpeg"), "photo.jpeg");
        assert_eq!(ensure_extension("notes", "text/plain"), "notes.txt");
    }

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("report-1.pdf"), b"x").unwrap();

        let picked = unique_destination(dir.path(), "report.pdf");
        assert_eq!(picked, dir.path().join("report-2.pdf"));
    }

    #[test]
    fn test_unique_destination_without_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes"), b"x").unwrap();

        let picked = unique_destination(dir.path(), "notes");
        assert_eq!(picked, dir.path().join("notes-1"));
    }
}
