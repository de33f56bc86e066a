//! Lifecycle controller: bootstrap, unlock/lock, service composition
//!
//! The controller exclusively owns the master key, the storage engine and
//! the protocol services. States move `Uninitialized → FirstTime | Locked →
//! Unlocked → Locked`; locking stops the listener, closes the catalogue and
//! zeroes the master key.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use haven_core::config::CryptoConfig;
use haven_core::{EventBus, HavenConfig, HavenError, HavenResult};
use haven_crypto::{derive_wrap_key, KdfParams, MasterKey, KEY_SIZE, SALT_SIZE};
use haven_server::{ReceiveServer, ServerDeps, ServerStartInfo};
use haven_transfer::{RegistrationService, TransferCoordinator};
use haven_vault::{db, header, VaultEngine};
use rand::RngCore;
use secrecy::SecretString;
use tracing::info;

const PASSWORD_MIN_LEN: usize = 6;
const PASSWORD_MAX_LEN: usize = 1000;

pub struct App {
    config: HavenConfig,
    events: EventBus,
    vault_path: PathBuf,
    database_path: PathBuf,
    master: Option<MasterKey>,
    engine: Option<Arc<VaultEngine>>,
    registration: Option<Arc<RegistrationService>>,
    coordinator: Option<Arc<TransferCoordinator>>,
    server: Option<ReceiveServer>,
    default_folder_id: Option<i64>,
}

impl App {
    pub fn new(config: HavenConfig) -> Self {
        let vault_path = config.storage.vault_path();
        let database_path = config.storage.database_path();
        Self {
            config,
            events: EventBus::default(),
            vault_path,
            database_path,
            master: None,
            engine: None,
            registration: None,
            coordinator: None,
            server: None,
            default_folder_id: None,
        }
    }

    /// Create the data and temp directories with owner-only permissions.
    pub fn initialize(&self) -> HavenResult<()> {
        for dir in [
            self.vault_path.parent().map(PathBuf::from),
            Some(self.config.storage.temp_path()),
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(&dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
            }
        }
        info!("application directories ready");
        Ok(())
    }

    pub fn is_first_time_setup(&self) -> bool {
        !self.vault_path.exists()
    }

    pub fn is_unlocked(&self) -> bool {
        self.master.is_some()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// First-time setup: derive a wrap key, mint the master key, write the
    /// vault header and unlock.
    pub fn create_password(&mut self, password: &str) -> HavenResult<()> {
        if password.len() < PASSWORD_MIN_LEN {
            return Err(HavenError::PasswordTooShort);
        }
        if password.len() > PASSWORD_MAX_LEN {
            return Err(HavenError::PasswordTooLong);
        }

        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let wrap_key = derive_wrap_key(
            &SecretString::from(password.to_string()),
            &salt,
            &kdf_params(&self.config.crypto),
        )?;
        let master = MasterKey::generate();
        let wrapped = haven_crypto::seal(wrap_key.as_bytes(), master.as_bytes())?;

        header::write_header(&self.vault_path, &salt, &wrapped)?;
        info!("vault created");

        self.unlock_with(master)
    }

    /// Unwrap the master key with the given password and unlock.
    ///
    /// Any unwrap failure maps to `InvalidPassword`; the caller learns
    /// nothing about the root cause.
    pub fn verify_password(&mut self, password: &str) -> HavenResult<()> {
        let (salt, wrapped) = header::read_header(&self.vault_path)?;

        let wrap_key = derive_wrap_key(
            &SecretString::from(password.to_string()),
            &salt,
            &kdf_params(&self.config.crypto),
        )?;

        let master_bytes = haven_crypto::open(wrap_key.as_bytes(), &wrapped)
            .map_err(|_| HavenError::InvalidPassword)?;
        let master_bytes: [u8; KEY_SIZE] = master_bytes
            .try_into()
            .map_err(|_| HavenError::InvalidPassword)?;

        info!("password verified");
        self.unlock_with(MasterKey::from_bytes(master_bytes))
    }

    fn unlock_with(&mut self, master: MasterKey) -> HavenResult<()> {
        let conn = db::open_database(&self.database_path, &master)?;
        let engine = Arc::new(VaultEngine::open(&self.vault_path, conn, master.clone())?);

        let default_folder_id = engine.ensure_received_folder()?;
        engine.purge_temp_files()?;

        let registration = Arc::new(RegistrationService::new(Duration::from_secs(
            self.config.transfer.session_cleanup_timeout_mins * 60,
        )));
        let valid = Arc::clone(&registration);
        let forget = Arc::clone(&registration);
        let coordinator = Arc::new(TransferCoordinator::new(
            Arc::clone(&engine),
            self.events.clone(),
            Arc::new(move |session_id: &str| valid.is_valid(session_id)),
            Arc::new(move |session_id: &str| forget.forget_session(session_id)),
            &self.config.transfer,
        ));

        self.master = Some(master);
        self.engine = Some(engine);
        self.registration = Some(registration);
        self.coordinator = Some(coordinator);
        self.server = Some(ReceiveServer::new(self.config.server.clone()));
        self.default_folder_id = Some(default_folder_id);

        info!("vault unlocked");
        Ok(())
    }

    /// Start the HTTPS listener with a fresh PIN and certificate.
    pub async fn start_server(&self, local_ips: Vec<IpAddr>) -> HavenResult<ServerStartInfo> {
        let server = self.server.as_ref().ok_or(HavenError::NotInitialized("server"))?;
        let deps = ServerDeps {
            registration: Arc::clone(
                self.registration
                    .as_ref()
                    .ok_or(HavenError::NotInitialized("registration service"))?,
            ),
            coordinator: Arc::clone(
                self.coordinator
                    .as_ref()
                    .ok_or(HavenError::NotInitialized("transfer service"))?,
            ),
            events: self.events.clone(),
            default_folder_id: self
                .default_folder_id
                .ok_or(HavenError::NotInitialized("file storage"))?,
        };
        server.start(deps, local_ips).await
    }

    pub async fn stop_server(&self) -> HavenResult<()> {
        match &self.server {
            Some(server) => server.stop().await,
            None => Ok(()),
        }
    }

    pub async fn is_server_running(&self) -> bool {
        match &self.server {
            Some(server) => server.is_running().await,
            None => false,
        }
    }

    pub async fn server_pin(&self) -> Option<String> {
        match &self.server {
            Some(server) => server.pin().await,
            None => None,
        }
    }

    /// Lock the application: stop the listener, drop all protocol state,
    /// close the catalogue and zero the master key.
    pub async fn lock(&mut self) -> HavenResult<()> {
        self.stop_server().await?;
        self.server = None;

        if let Some(coordinator) = self.coordinator.take() {
            coordinator.lock();
        }
        if let Some(registration) = self.registration.take() {
            registration.lock();
        }

        // dropping the engine closes the catalogue connection and releases
        // the vault file; dropping the key zeroizes it
        self.engine = None;
        self.default_folder_id = None;
        self.master = None;

        info!("application locked");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> HavenResult<()> {
        self.lock().await?;
        info!("application shut down");
        Ok(())
    }

    /// Recipient decision: accept the pending transfer for `session_id`.
    pub async fn accept_transfer(&self, session_id: &str) -> HavenResult<()> {
        self.coordinator()?.accept_transfer(session_id).await
    }

    /// Recipient decision: reject the pending transfer for `session_id`.
    pub fn reject_transfer(&self, session_id: &str) -> HavenResult<()> {
        self.coordinator()?.reject_transfer(session_id)
    }

    /// Abort an in-flight transfer and drop its session state.
    pub fn stop_transfer(&self, session_id: &str) -> HavenResult<()> {
        self.coordinator()?.stop_transfer(session_id);
        Ok(())
    }

    pub async fn export_files(&self, file_ids: Vec<i64>) -> HavenResult<Vec<PathBuf>> {
        let engine = self.engine()?;
        let export_dir = self.config.storage.export_path();
        tokio::task::spawn_blocking(move || engine.export_files(&file_ids, &export_dir))
            .await
            .map_err(|err| HavenError::Store(format!("export task failed: {err}")))?
    }

    pub async fn export_zip_folders(
        &self,
        folder_ids: Vec<i64>,
        file_ids: Vec<i64>,
    ) -> HavenResult<Vec<PathBuf>> {
        let engine = self.engine()?;
        let export_dir = self.config.storage.export_path();
        tokio::task::spawn_blocking(move || {
            engine.export_zip_folders(&folder_ids, &file_ids, &export_dir)
        })
        .await
        .map_err(|err| HavenError::Store(format!("export task failed: {err}")))?
    }

    pub async fn delete_files(&self, file_ids: Vec<i64>) -> HavenResult<()> {
        let engine = self.engine()?;
        tokio::task::spawn_blocking(move || engine.delete_files(&file_ids))
            .await
            .map_err(|err| HavenError::Store(format!("delete task failed: {err}")))?
    }

    pub async fn delete_folders(&self, folder_ids: Vec<i64>) -> HavenResult<()> {
        let engine = self.engine()?;
        tokio::task::spawn_blocking(move || engine.delete_folders(&folder_ids))
            .await
            .map_err(|err| HavenError::Store(format!("delete task failed: {err}")))?
    }

    pub fn stored_folders(&self) -> HavenResult<Vec<haven_vault::store::FolderOverview>> {
        self.engine()?.folders_with_files()
    }

    pub fn files_in_folder(
        &self,
        folder_id: i64,
    ) -> HavenResult<(String, Vec<haven_vault::store::FileEntry>)> {
        self.engine()?.files_in_folder(folder_id)
    }

    pub fn engine(&self) -> HavenResult<Arc<VaultEngine>> {
        self.engine
            .as_ref()
            .map(Arc::clone)
            .ok_or(HavenError::NotInitialized("file storage"))
    }

    pub fn registration(&self) -> HavenResult<Arc<RegistrationService>> {
        self.registration
            .as_ref()
            .map(Arc::clone)
            .ok_or(HavenError::NotInitialized("registration service"))
    }

    pub fn coordinator(&self) -> HavenResult<Arc<TransferCoordinator>> {
        self.coordinator
            .as_ref()
            .map(Arc::clone)
            .ok_or(HavenError::NotInitialized("transfer service"))
    }
}

fn kdf_params(config: &CryptoConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: config.argon2_mem_cost_kib,
        time_cost: config.argon2_time_cost,
        parallelism: config.argon2_parallelism,
    }
}
