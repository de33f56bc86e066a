//! Server lifecycle: fresh PIN and certificate per start, graceful stop
//!
//! Start binds the rustls listener and waits until it is actually
//! accepting before reporting success. Stop gives in-flight requests a
//! short grace window, force-closes the rest, and then pauses briefly so
//! the port is immediately reusable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use haven_core::config::ServerConfig;
use haven_core::{DeviceInfo, Event, EventBus, HavenError, HavenResult};
use haven_transfer::{RegistrationService, TransferCoordinator};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::routes::{self, ApiState};
use crate::tls;

const PIN_LEN: usize = 6;
const PORT_RELEASE_DELAY: Duration = Duration::from_secs(1);

/// Collaborators the server wires into its request handlers.
pub struct ServerDeps {
    pub registration: Arc<RegistrationService>,
    pub coordinator: Arc<TransferCoordinator>,
    pub events: EventBus,
    pub default_folder_id: i64,
}

/// Pairing material reported after a successful start.
#[derive(Debug, Clone)]
pub struct ServerStartInfo {
    pub port: u16,
    pub pin: String,
    pub fingerprint: String,
}

struct RunningServer {
    handle: Handle,
    join: tokio::task::JoinHandle<()>,
    pin: String,
    fingerprint: String,
}

pub struct ReceiveServer {
    config: ServerConfig,
    running: Mutex<Option<RunningServer>>,
}

impl ReceiveServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    /// Start serving on the configured port with a fresh PIN and
    /// certificate. The caller supplies the host's local IPs for the
    /// certificate SANs.
    pub async fn start(
        &self,
        deps: ServerDeps,
        local_ips: Vec<IpAddr>,
    ) -> HavenResult<ServerStartInfo> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(HavenError::AlreadyRunning);
        }

        let pin = generate_random_pin();
        deps.registration.set_pin(pin.clone());

        let san_ips = if local_ips.is_empty() {
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
        } else {
            local_ips
        };
        let identity =
            tls::generate_identity(&self.config.alias, &self.config.organization, &san_ips)?;
        let fingerprint = identity.fingerprint.clone();
        deps.events.emit(Event::CertificateHash {
            hash: fingerprint.clone(),
        });

        // rustls needs a process-wide crypto provider; repeat installs are
        // fine and report an error we can ignore
        let _ = rustls::crypto::ring::default_provider().install_default();

        let tls_config = RustlsConfig::from_der(vec![identity.cert_der], identity.key_der)
            .await
            .map_err(|err| HavenError::Tls(format!("tls config: {err}")))?;

        let state = ApiState {
            registration: deps.registration,
            coordinator: deps.coordinator,
            events: deps.events,
            device_info: DeviceInfo {
                alias: self.config.alias.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                port: self.config.port,
                protocol: "https".to_string(),
                fingerprint: fingerprint.clone(),
            },
            default_folder_id: deps.default_folder_id,
        };
        let app = routes::router(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let handle = Handle::new();
        let serve_handle = handle.clone();
        let join = tokio::spawn(async move {
            if let Err(err) = axum_server::bind_rustls(addr, tls_config)
                .handle(serve_handle)
                .serve(app.into_make_service())
                .await
            {
                error!("https server error: {err}");
            }
        });

        // listening() resolves with None when the bind fails
        if handle.listening().await.is_none() {
            join.abort();
            return Err(HavenError::Tls(format!("failed to bind port {}", addr.port())));
        }

        info!(port = self.config.port, fingerprint = %fingerprint, "https server started");
        *running = Some(RunningServer {
            handle,
            join,
            pin: pin.clone(),
            fingerprint: fingerprint.clone(),
        });

        Ok(ServerStartInfo {
            port: self.config.port,
            pin,
            fingerprint,
        })
    }

    /// Stop the listener. In-flight requests get the configured grace
    /// window before being force-closed.
    pub async fn stop(&self) -> HavenResult<()> {
        let mut running = self.running.lock().await;
        let Some(server) = running.take() else {
            return Ok(());
        };

        info!("stopping https server");
        server
            .handle
            .graceful_shutdown(Some(Duration::from_secs(self.config.shutdown_grace_secs)));
        let _ = server.join.await;

        // let the OS release the port before a restart
        tokio::time::sleep(PORT_RELEASE_DELAY).await;
        info!("https server stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// The PIN for the current run, if the server is up.
    pub async fn pin(&self) -> Option<String> {
        self.running.lock().await.as_ref().map(|s| s.pin.clone())
    }

    pub async fn fingerprint(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|s| s.fingerprint.clone())
    }
}

/// Six crypto-random decimal digits.
fn generate_random_pin() -> String {
    let mut rng = rand::thread_rng();
    (0..PIN_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_is_six_digits() {
        for _ in 0..100 {
            let pin = generate_random_pin();
            assert_eq!(pin.len(), PIN_LEN);
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_pins_vary_between_starts() {
        let pins: std::collections::HashSet<String> =
            (0..32).map(|_| generate_random_pin()).collect();
        assert!(pins.len() > 1, "a fresh pin per start");
    }
}
