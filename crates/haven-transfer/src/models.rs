use haven_core::{FileInfo, HavenError, HavenResult};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/prepare-upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadRequest {
    pub session_id: String,
    pub title: String,
    pub files: Vec<FileInfo>,
}

impl PrepareUploadRequest {
    pub fn validate(&self) -> HavenResult<()> {
        if self.session_id.is_empty() {
            return Err(HavenError::InvalidRequest("sessionId is required".into()));
        }
        if self.files.is_empty() {
            return Err(HavenError::InvalidRequest(
                "at least one file is required".into(),
            ));
        }
        Ok(())
    }

    pub fn total_size(&self) -> i64 {
        self.files.iter().map(|file| file.size).sum()
    }
}

/// Per-file transmission authorisations returned on accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareUploadResponse {
    pub files: Vec<FileTransmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransmission {
    pub id: String,
    pub transmission_id: String,
}
