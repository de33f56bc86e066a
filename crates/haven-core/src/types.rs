use serde::{Deserialize, Serialize};

/// A file as announced by the sender in `prepare-upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Sender-chosen opaque file id, unique within the transfer
    pub id: String,
    pub file_name: String,
    pub size: i64,
    /// Mime type of the payload (e.g. "image/jpeg")
    pub file_type: String,
    /// Optional content digest announced by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Identity metadata returned by the ping handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub alias: String,
    pub version: String,
    pub port: u16,
    pub protocol: String,
    /// SHA-256 fingerprint of the serving certificate (hex), shown to the
    /// user for out-of-band verification
    pub fingerprint: String,
}
