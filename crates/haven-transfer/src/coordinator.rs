//! Transfer coordinator: prepare → accept/reject → upload → teardown
//!
//! Pending transfers wait on a oneshot decision channel raced against the
//! user-decision timeout. Accepted transfers get a destination folder, one
//! single-use transmission id per file, and a rolling session expiry that
//! each accepted upload refreshes. The all-files-resolved check runs inside
//! the same critical section that flips a file's status, so two concurrent
//! completions cannot both miss the teardown.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use haven_core::config::TransferConfig;
use haven_core::{Event, EventBus, FileInfo, HavenError, HavenResult};
use haven_vault::VaultEngine;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{FileTransmission, PrepareUploadRequest, PrepareUploadResponse};

/// Capability asking the registration service whether a session is live.
pub type SessionIsValid = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Capability telling the registration service to drop a session.
pub type ForgetSession = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

/// One expected file within an accepted transfer, keyed by file id.
struct FileTransfer {
    transmission_id: String,
    session_id: String,
    file_info: FileInfo,
    status: TransferStatus,
}

/// A transfer past the accept gate.
struct ActiveSession {
    folder_id: i64,
    file_ids: Vec<String>,
    seen_transmissions: HashSet<String>,
    expires_at: Instant,
}

/// A transfer awaiting the recipient's accept/reject decision.
struct PendingTransfer {
    title: String,
    files: Vec<FileInfo>,
    created_at: SystemTime,
    responder: Option<oneshot::Sender<HavenResult<PrepareUploadResponse>>>,
}

#[derive(Default)]
struct TransferState {
    pending: HashMap<String, PendingTransfer>,
    transfers: HashMap<String, FileTransfer>,
    sessions: HashMap<String, ActiveSession>,
}

pub struct TransferCoordinator {
    state: Arc<Mutex<TransferState>>,
    engine: Arc<VaultEngine>,
    events: EventBus,
    session_is_valid: SessionIsValid,
    forget_session: ForgetSession,
    decision_timeout: Duration,
    refresh_timeout: Duration,
    cleanup_timeout: Duration,
    shutdown: broadcast::Sender<()>,
}

impl TransferCoordinator {
    pub fn new(
        engine: Arc<VaultEngine>,
        events: EventBus,
        session_is_valid: SessionIsValid,
        forget_session: ForgetSession,
        config: &TransferConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            state: Arc::new(Mutex::new(TransferState::default())),
            engine,
            events,
            session_is_valid,
            forget_session,
            decision_timeout: Duration::from_secs(config.decision_timeout_secs),
            refresh_timeout: Duration::from_secs(config.refresh_timeout_mins * 60),
            cleanup_timeout: Duration::from_secs(config.session_cleanup_timeout_mins * 60),
            shutdown,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().expect("transfer lock poisoned")
    }

    /// Announce an incoming transfer and wait for the recipient's decision.
    ///
    /// Blocks for up to the decision timeout; this is the protocol's only
    /// intentional long wait, cancellable by reject and by lock.
    pub async fn prepare_upload(
        &self,
        request: PrepareUploadRequest,
    ) -> HavenResult<PrepareUploadResponse> {
        request.validate()?;
        let session_id = request.session_id.clone();

        let rx = {
            let mut state = self.lock_state();
            if state.pending.contains_key(&session_id) {
                return Err(HavenError::DuplicateSession(session_id));
            }
            if !(self.session_is_valid)(&session_id) {
                return Err(HavenError::InvalidSession);
            }

            let (tx, rx) = oneshot::channel();
            state.pending.insert(
                session_id.clone(),
                PendingTransfer {
                    title: request.title.clone(),
                    files: request.files.clone(),
                    created_at: SystemTime::now(),
                    responder: Some(tx),
                },
            );
            rx
        };

        self.events.emit(Event::PrepareUploadRequest {
            session_id: session_id.clone(),
            title: request.title.clone(),
            files: request.files.clone(),
            total_files: request.files.len(),
            transferred_files: 0,
            total_size: request.total_size(),
        });
        info!(session = %session_id, files = request.files.len(), "transfer awaiting decision");

        let result = tokio::select! {
            decision = rx => match decision {
                Ok(result) => result,
                // the responder was dropped by lock(): treat as a rejection
                Err(_) => Err(HavenError::Rejected),
            },
            _ = tokio::time::sleep(self.decision_timeout) => Err(HavenError::Timeout),
        };

        self.lock_state().pending.remove(&session_id);
        result
    }

    /// Accept a pending transfer: create a destination folder named after
    /// its title, issue one transmission id per file and unblock the
    /// waiting sender.
    pub async fn accept_transfer(&self, session_id: &str) -> HavenResult<()> {
        let title = {
            let state = self.lock_state();
            state
                .pending
                .get(session_id)
                .map(|pending| pending.title.clone())
                .ok_or_else(|| {
                    HavenError::NotFound(format!("no pending transfer for session {session_id}"))
                })?
        };

        let engine = Arc::clone(&self.engine);
        let folder_id = tokio::task::spawn_blocking(move || engine.create_transfer_folder(&title))
            .await
            .map_err(|err| HavenError::Store(format!("folder task failed: {err}")))??;

        let (responder, response, file_ids) = {
            let mut state = self.lock_state();
            let pending = state.pending.get_mut(session_id).ok_or_else(|| {
                HavenError::NotFound(format!("no pending transfer for session {session_id}"))
            })?;
            let responder = pending
                .responder
                .take()
                .ok_or_else(|| HavenError::DuplicateSession(session_id.to_string()))?;
            let files = pending.files.clone();

            let mut file_ids = Vec::with_capacity(files.len());
            let mut response_files = Vec::with_capacity(files.len());
            for file_info in files {
                let transmission_id = Uuid::new_v4().to_string();
                file_ids.push(file_info.id.clone());
                response_files.push(FileTransmission {
                    id: file_info.id.clone(),
                    transmission_id: transmission_id.clone(),
                });
                state.transfers.insert(
                    file_info.id.clone(),
                    FileTransfer {
                        transmission_id,
                        session_id: session_id.to_string(),
                        file_info,
                        status: TransferStatus::Pending,
                    },
                );
            }

            state.sessions.insert(
                session_id.to_string(),
                ActiveSession {
                    folder_id,
                    file_ids: file_ids.clone(),
                    seen_transmissions: HashSet::new(),
                    expires_at: Instant::now() + self.refresh_timeout,
                },
            );

            (
                responder,
                PrepareUploadResponse {
                    files: response_files,
                },
                file_ids,
            )
        };

        self.spawn_cleanup_watchdog(session_id.to_string(), file_ids);

        if responder.send(Ok(response)).is_err() {
            // the sender stopped waiting; roll the acceptance back
            let mut state = self.lock_state();
            teardown_locked(&mut state, session_id, &self.forget_session);
            return Err(HavenError::Timeout);
        }

        info!(session = %session_id, "transfer accepted");
        Ok(())
    }

    /// Reject a pending transfer, unblocking the waiting sender with an
    /// error.
    pub fn reject_transfer(&self, session_id: &str) -> HavenResult<()> {
        let responder = {
            let mut state = self.lock_state();
            let pending = state.pending.get_mut(session_id).ok_or_else(|| {
                HavenError::NotFound(format!("no pending transfer for session {session_id}"))
            })?;
            pending
                .responder
                .take()
                .ok_or_else(|| HavenError::DuplicateSession(session_id.to_string()))?
        };

        let _ = responder.send(Err(HavenError::Rejected));
        self.events.emit(Event::TransferCancelled {
            session_id: session_id.to_string(),
        });
        info!(session = %session_id, "transfer rejected");
        Ok(())
    }

    /// Validate and store one uploaded file.
    pub async fn handle_upload(
        &self,
        session_id: &str,
        transmission_id: &str,
        file_id: &str,
        data: Vec<u8>,
        fallback_folder: i64,
    ) -> HavenResult<()> {
        if !(self.session_is_valid)(session_id) {
            return Err(HavenError::InvalidSession);
        }

        // Validation and the one-shot transmission check-and-insert happen
        // atomically; a replayed transmission id can never pass twice.
        let (folder_id, file_name, mime_type, declared_size) = {
            let mut state = self.lock_state();

            let transfer = state
                .transfers
                .get(file_id)
                .ok_or(HavenError::TransferNotFound)?;
            if transfer.session_id != session_id {
                return Err(HavenError::InvalidSession);
            }
            let file_name = transfer.file_info.file_name.clone();
            let mime_type = transfer.file_info.file_type.clone();
            let declared_size = transfer.file_info.size;
            let status = transfer.status;
            let expected_transmission = transfer.transmission_id.clone();

            // None marks an expired session that must be torn down below
            let admitted = match state.sessions.get_mut(session_id) {
                Some(session) => {
                    // one-shot: a spent transmission id answers before any
                    // status considerations
                    if session.seen_transmissions.contains(transmission_id) {
                        return Err(HavenError::InvalidTransmission);
                    }
                    if status == TransferStatus::Completed {
                        return Err(HavenError::TransferComplete);
                    }
                    if expected_transmission != transmission_id {
                        return Err(HavenError::InvalidTransmission);
                    }
                    if Instant::now() > session.expires_at {
                        None
                    } else {
                        session
                            .seen_transmissions
                            .insert(transmission_id.to_string());
                        session.expires_at = Instant::now() + self.refresh_timeout;
                        Some(session.folder_id)
                    }
                }
                None => {
                    if status == TransferStatus::Completed {
                        return Err(HavenError::TransferComplete);
                    }
                    if expected_transmission != transmission_id {
                        return Err(HavenError::InvalidTransmission);
                    }
                    Some(fallback_folder)
                }
            };

            let Some(folder_id) = admitted else {
                teardown_locked(&mut state, session_id, &self.forget_session);
                return Err(HavenError::InvalidSession);
            };

            (folder_id, file_name, mime_type, declared_size)
        };

        self.events.emit(Event::FileReceiving {
            session_id: session_id.to_string(),
            file_id: file_id.to_string(),
            file_name: file_name.clone(),
            file_size: declared_size,
        });

        let engine = Arc::clone(&self.engine);
        let store_name = file_name.clone();
        let store_mime = mime_type.clone();
        let store_result = tokio::task::spawn_blocking(move || {
            engine.store_file(folder_id, &store_name, &store_mime, data)
        })
        .await
        .map_err(|err| HavenError::Store(format!("store task failed: {err}")))?;

        let stored = match &store_result {
            Ok(metadata) => {
                info!(
                    session = %session_id,
                    file = %metadata.uuid,
                    folder = folder_id,
                    "file received into vault"
                );
                true
            }
            Err(err) => {
                warn!(session = %session_id, file_id, "failed to store upload: {err}");
                false
            }
        };

        // Flip the status and decide teardown in one critical section.
        let session_open = {
            let mut state = self.lock_state();
            match state.transfers.get_mut(file_id) {
                Some(transfer) => {
                    transfer.status = if stored {
                        TransferStatus::Completed
                    } else {
                        TransferStatus::Failed
                    };

                    let all_resolved = match state.sessions.get(session_id) {
                        Some(session) => session.file_ids.iter().all(|id| {
                            state
                                .transfers
                                .get(id)
                                .map(|t| t.status.is_terminal())
                                .unwrap_or(true)
                        }),
                        None => true,
                    };
                    if all_resolved {
                        debug!(session = %session_id, "all transfers resolved");
                        teardown_locked(&mut state, session_id, &self.forget_session);
                    }
                    true
                }
                // the session was torn down concurrently; stay silent
                None => false,
            }
        };

        match store_result {
            Ok(_) => {
                if session_open {
                    self.events.emit(Event::FileReceived {
                        session_id: session_id.to_string(),
                        file_id: file_id.to_string(),
                        file_name,
                        file_size: declared_size,
                    });
                }
                Ok(())
            }
            Err(err) => {
                if session_open {
                    self.events.emit(Event::FileReceiveFailed {
                        session_id: session_id.to_string(),
                        file_id: file_id.to_string(),
                        file_name,
                        file_size: declared_size,
                    });
                }
                Err(err)
            }
        }
    }

    /// Immediate teardown requested by the recipient.
    pub fn stop_transfer(&self, session_id: &str) {
        let mut state = self.lock_state();
        teardown_locked(&mut state, session_id, &self.forget_session);
        drop(state);

        self.events.emit(Event::TransferCancelled {
            session_id: session_id.to_string(),
        });
        info!(session = %session_id, "transfer stopped");
    }

    /// Session teardown requested by the sender.
    pub fn close_connection(&self, session_id: &str) -> HavenResult<()> {
        if !(self.session_is_valid)(session_id) {
            return Err(HavenError::InvalidSession);
        }
        let mut state = self.lock_state();
        teardown_locked(&mut state, session_id, &self.forget_session);
        info!(session = %session_id, "connection closed by sender");
        Ok(())
    }

    /// Drop all pending and active transfers and drain watchdogs.
    pub fn lock(&self) {
        let mut state = self.lock_state();
        state.pending.clear();
        state.transfers.clear();
        state.sessions.clear();
        drop(state);

        let _ = self.shutdown.send(());
        info!("transfer state cleared");
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn active_session_count(&self) -> usize {
        self.lock_state().sessions.len()
    }

    /// Age of a pending transfer, for UI display.
    pub fn pending_age(&self, session_id: &str) -> Option<Duration> {
        let state = self.lock_state();
        let pending = state.pending.get(session_id)?;
        pending.created_at.elapsed().ok()
    }

    fn spawn_cleanup_watchdog(&self, session_id: String, file_ids: Vec<String>) {
        let mut shutdown = self.shutdown.subscribe();
        let timeout = self.cleanup_timeout;
        let state = Arc::clone(&self.state);
        let forget = Arc::clone(&self.forget_session);

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {}
                _ = tokio::time::sleep(timeout) => {
                    let mut state = state.lock().expect("transfer lock poisoned");
                    for file_id in &file_ids {
                        state.transfers.remove(file_id);
                    }
                    if state.sessions.remove(&session_id).is_some() {
                        debug!(session = %session_id, "transfer cleanup watchdog fired");
                    }
                    drop(state);
                    (forget)(&session_id);
                }
            }
        });
    }
}

fn teardown_locked(
    state: &mut TransferState,
    session_id: &str,
    forget_session: &ForgetSession,
) {
    if let Some(session) = state.sessions.remove(session_id) {
        for file_id in &session.file_ids {
            state.transfers.remove(file_id);
        }
    }
    state.pending.remove(session_id);
    (forget_session)(session_id);
}
