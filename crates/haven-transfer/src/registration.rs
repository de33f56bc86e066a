//! PIN-gated registration sessions with per-nonce rate limiting
//!
//! A session is created by presenting the current PIN together with an
//! opaque nonce chosen by the sender. Three wrong PINs burn the nonce until
//! the service is reset. Every session carries a watchdog that forgets it
//! after a hard timeout; `lock` drains all outstanding watchdogs at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use haven_core::{HavenError, HavenResult};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_PIN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub nonce: String,
    pub created_at: SystemTime,
}

#[derive(Default)]
struct RegistrationState {
    pin: Option<String>,
    sessions: HashMap<String, Session>,
    failures: HashMap<String, u32>,
}

pub struct RegistrationService {
    state: Arc<Mutex<RegistrationState>>,
    shutdown: broadcast::Sender<()>,
    session_timeout: Duration,
}

impl RegistrationService {
    pub fn new(session_timeout: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            state: Arc::new(Mutex::new(RegistrationState::default())),
            shutdown,
            session_timeout,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistrationState> {
        self.state.lock().expect("registration lock poisoned")
    }

    /// Install the PIN for the current server run, replacing any previous
    /// one.
    pub fn set_pin(&self, pin: String) {
        self.lock_state().pin = Some(pin);
    }

    /// Validate the PIN and open a session for the nonce.
    ///
    /// The attempt counter and the session insert live under one lock, so a
    /// burst of concurrent guesses cannot slip past the limit.
    pub fn create_session(&self, pin: &str, nonce: &str) -> HavenResult<String> {
        let session_id = {
            let mut state = self.lock_state();

            if state.failures.get(nonce).copied().unwrap_or(0) >= MAX_PIN_ATTEMPTS {
                return Err(HavenError::TooManyAttempts);
            }

            if state.pin.as_deref() != Some(pin) {
                *state.failures.entry(nonce.to_string()).or_insert(0) += 1;
                debug!(nonce, "rejected registration attempt: wrong pin");
                return Err(HavenError::InvalidPin);
            }

            let session_id = Uuid::new_v4().to_string();
            state.sessions.insert(
                session_id.clone(),
                Session {
                    id: session_id.clone(),
                    nonce: nonce.to_string(),
                    created_at: SystemTime::now(),
                },
            );
            state.failures.remove(nonce);
            session_id
        };

        // Fallback cleanup in case the transfer never concludes; the normal
        // path forgets the session at teardown long before this fires.
        let state = Arc::clone(&self.state);
        let watchdog_id = session_id.clone();
        let mut shutdown = self.shutdown.subscribe();
        let timeout = self.session_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {}
                _ = tokio::time::sleep(timeout) => {
                    let mut state = state.lock().expect("registration lock poisoned");
                    if state.sessions.remove(&watchdog_id).is_some() {
                        debug!(session = %watchdog_id, "session watchdog fired");
                    }
                }
            }
        });

        info!(session = %session_id, "registration session created");
        Ok(session_id)
    }

    pub fn is_valid(&self, session_id: &str) -> bool {
        self.lock_state().sessions.contains_key(session_id)
    }

    pub fn forget_session(&self, session_id: &str) {
        self.lock_state().sessions.remove(session_id);
    }

    /// Clear all sessions and rate counters and drain outstanding
    /// watchdogs.
    pub fn lock(&self) {
        let mut state = self.lock_state();
        state.sessions.clear();
        state.failures.clear();
        drop(state);

        let _ = self.shutdown.send(());
        info!("registration sessions cleared");
    }

    pub fn session_count(&self) -> usize {
        self.lock_state().sessions.len()
    }
}
