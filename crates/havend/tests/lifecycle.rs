//! Lifecycle scenarios: first-time setup, unlock, lock-clears-all.

use haven_core::{HavenConfig, HavenError};
use havend::App;
use tempfile::TempDir;

const PASSWORD: &str = "correct horse battery staple";

fn test_config(dir: &TempDir) -> HavenConfig {
    let mut config = HavenConfig::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.temp_dir = dir.path().join("temp");
    config.storage.export_dir = dir.path().join("exports");
    // fast KDF parameters so tests stay quick
    config.crypto.argon2_mem_cost_kib = 1024;
    config.crypto.argon2_time_cost = 1;
    config.crypto.argon2_parallelism = 1;
    config
}

fn new_app(dir: &TempDir) -> App {
    let app = App::new(test_config(dir));
    app.initialize().unwrap();
    app
}

#[tokio::test]
async fn first_time_setup_flow() {
    let dir = TempDir::new().unwrap();
    let mut app = new_app(&dir);

    assert!(app.is_first_time_setup());
    app.create_password(PASSWORD).unwrap();
    assert!(app.is_unlocked());
    assert!(!app.is_first_time_setup());

    app.lock().await.unwrap();
    assert!(!app.is_unlocked());

    // a fresh controller over the same directories
    let mut app = new_app(&dir);
    assert!(!app.is_first_time_setup());

    let wrong = app.verify_password("wrong");
    assert!(matches!(wrong, Err(HavenError::InvalidPassword)));
    assert!(!app.is_unlocked());

    app.verify_password(PASSWORD).unwrap();
    assert!(app.is_unlocked());
}

#[tokio::test]
async fn password_length_bounds() {
    let dir = TempDir::new().unwrap();
    let mut app = new_app(&dir);

    assert!(matches!(
        app.create_password("short"),
        Err(HavenError::PasswordTooShort)
    ));
    assert!(matches!(
        app.create_password(&"x".repeat(1001)),
        Err(HavenError::PasswordTooLong)
    ));

    // the vault was never created
    assert!(app.is_first_time_setup());

    app.create_password(&"x".repeat(1000)).unwrap();
    assert!(app.is_unlocked());
}

#[tokio::test]
async fn verify_password_without_vault_reports_missing() {
    let dir = TempDir::new().unwrap();
    let mut app = new_app(&dir);

    assert!(matches!(
        app.verify_password(PASSWORD),
        Err(HavenError::VaultMissing)
    ));
}

#[tokio::test]
async fn unlock_creates_received_files_folder() {
    let dir = TempDir::new().unwrap();
    let mut app = new_app(&dir);
    app.create_password(PASSWORD).unwrap();

    let engine = app.engine().unwrap();
    let folder_id = engine.ensure_received_folder().unwrap();
    engine
        .store_file(folder_id, "seed.txt", "text/plain", b"seed".to_vec())
        .unwrap();

    let folders = app.stored_folders().unwrap();
    assert!(folders.iter().any(|f| f.name == "Received Files"));
}

#[tokio::test]
async fn lock_clears_sessions_and_services() {
    let dir = TempDir::new().unwrap();
    let mut app = new_app(&dir);
    app.create_password(PASSWORD).unwrap();

    let registration = app.registration().unwrap();
    registration.set_pin("483920".into());
    let session = registration.create_session("483920", "nonce").unwrap();
    assert!(registration.is_valid(&session));

    app.lock().await.unwrap();

    // session state is gone and every service handle is released
    assert!(!registration.is_valid(&session));
    assert!(!app.is_unlocked());
    assert!(matches!(app.engine(), Err(HavenError::NotInitialized(_))));
    assert!(matches!(
        app.registration(),
        Err(HavenError::NotInitialized(_))
    ));
    assert!(matches!(
        app.coordinator(),
        Err(HavenError::NotInitialized(_))
    ));
    assert!(matches!(
        app.start_server(vec![]).await,
        Err(HavenError::NotInitialized(_))
    ));
}

#[tokio::test]
async fn relock_and_unlock_roundtrip_preserves_data() {
    let dir = TempDir::new().unwrap();
    let mut app = new_app(&dir);
    app.create_password(PASSWORD).unwrap();

    let engine = app.engine().unwrap();
    let folder = engine.ensure_received_folder().unwrap();
    let stored = engine
        .store_file(folder, "keep.txt", "text/plain", b"survives relock".to_vec())
        .unwrap();
    drop(engine);

    app.lock().await.unwrap();
    app.verify_password(PASSWORD).unwrap();

    let engine = app.engine().unwrap();
    assert_eq!(engine.read_file(stored.id).unwrap(), b"survives relock");
}
