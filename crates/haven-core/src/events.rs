//! One-way event channel from the core to UI observers.
//!
//! Delivery is best-effort: emitting with no live subscribers is not an
//! error, and a slow subscriber only loses its own backlog. Core logic never
//! blocks on the bus.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::FileInfo;

/// Notifications observable by the UI shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    CertificateHash {
        hash: String,
    },
    PingReceived {
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RegisterRequestReceived {
        nonce: String,
    },
    #[serde(rename_all = "camelCase")]
    PrepareUploadRequest {
        session_id: String,
        title: String,
        files: Vec<FileInfo>,
        total_files: usize,
        transferred_files: usize,
        total_size: i64,
    },
    #[serde(rename_all = "camelCase")]
    FileReceiving {
        session_id: String,
        file_id: String,
        file_name: String,
        file_size: i64,
    },
    #[serde(rename_all = "camelCase")]
    FileReceived {
        session_id: String,
        file_id: String,
        file_name: String,
        file_size: i64,
    },
    #[serde(rename_all = "camelCase")]
    FileReceiveFailed {
        session_id: String,
        file_id: String,
        file_name: String,
        file_size: i64,
    },
    #[serde(rename_all = "camelCase")]
    TransferCancelled {
        session_id: String,
    },
}

/// Broadcast fan-out to UI observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. A send with no subscribers is silently dropped.
    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event emitted with no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
