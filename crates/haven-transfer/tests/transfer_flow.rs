//! End-to-end receive protocol scenarios: registration, prepare/accept,
//! uploads, replay protection, teardown.

use std::sync::Arc;
use std::time::Duration;

use haven_core::config::TransferConfig;
use haven_core::{Event, EventBus, FileInfo, HavenError};
use haven_crypto::{MasterKey, KEY_SIZE, SALT_SIZE};
use haven_transfer::{
    PrepareUploadRequest, PrepareUploadResponse, RegistrationService, TransferCoordinator,
};
use haven_vault::{db, header, VaultEngine};
use tempfile::TempDir;

const PIN: &str = "483920";

struct Harness {
    dir: TempDir,
    engine: Arc<VaultEngine>,
    registration: Arc<RegistrationService>,
    coordinator: Arc<TransferCoordinator>,
    events: EventBus,
    fallback_folder: i64,
}

fn harness() -> Harness {
    harness_with_config(TransferConfig {
        decision_timeout_secs: 5,
        refresh_timeout_mins: 45,
        session_cleanup_timeout_mins: 600,
    })
}

fn harness_with_config(config: TransferConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let vault_path = dir.path().join("haven.vault");
    header::write_header(&vault_path, &[2u8; SALT_SIZE], &[0xAB; 72]).unwrap();

    let master = MasterKey::from_bytes([21u8; KEY_SIZE]);
    let conn = db::open_database(&dir.path().join("haven.db"), &master).unwrap();
    let engine = Arc::new(VaultEngine::open(&vault_path, conn, master).unwrap());
    let fallback_folder = engine.ensure_received_folder().unwrap();

    let registration = Arc::new(RegistrationService::new(Duration::from_secs(36000)));
    registration.set_pin(PIN.into());

    let events = EventBus::new(64);
    let valid = Arc::clone(&registration);
    let forget = Arc::clone(&registration);
    let coordinator = Arc::new(TransferCoordinator::new(
        Arc::clone(&engine),
        events.clone(),
        Arc::new(move |sid: &str| valid.is_valid(sid)),
        Arc::new(move |sid: &str| forget.forget_session(sid)),
        &config,
    ));

    Harness {
        dir,
        engine,
        registration,
        coordinator,
        events,
        fallback_folder,
    }
}

/// Break the catalogue from a second keyed connection so the next store
/// fails, exercising the failed-upload path.
fn sabotage_catalogue(harness: &Harness) {
    let conn = rusqlite::Connection::open(harness.dir.path().join("haven.db")).unwrap();
    let key_hex = hex::encode([21u8; KEY_SIZE]);
    conn.execute_batch(&format!("PRAGMA key = \"x'{key_hex}'\";"))
        .unwrap();
    conn.execute_batch("ALTER TABLE free_spaces RENAME TO free_spaces_gone;")
        .unwrap();
}

fn file(id: &str, size: i64) -> FileInfo {
    FileInfo {
        id: id.into(),
        file_name: format!("{id}.bin"),
        size,
        file_type: "application/octet-stream".into(),
        sha256: None,
    }
}

fn request(session_id: &str, files: Vec<FileInfo>) -> PrepareUploadRequest {
    PrepareUploadRequest {
        session_id: session_id.into(),
        title: "Holiday".into(),
        files,
    }
}

/// Run prepare in the background and resolve it via the decision callback.
async fn prepare_and_accept(
    harness: &Harness,
    session_id: &str,
    files: Vec<FileInfo>,
) -> PrepareUploadResponse {
    let coordinator = Arc::clone(&harness.coordinator);
    let prepare_request = request(session_id, files);
    let prepare =
        tokio::spawn(async move { coordinator.prepare_upload(prepare_request).await });

    wait_for_pending(&harness.coordinator).await;
    harness.coordinator.accept_transfer(session_id).await.unwrap();

    prepare.await.unwrap().unwrap()
}

async fn wait_for_pending(coordinator: &TransferCoordinator) {
    for _ in 0..100 {
        if coordinator.pending_count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pending transfer never registered");
}

fn transmission_id(response: &PrepareUploadResponse, file_id: &str) -> String {
    response
        .files
        .iter()
        .find(|f| f.id == file_id)
        .unwrap()
        .transmission_id
        .clone()
}

#[tokio::test]
async fn happy_path_stores_files_and_tears_down() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();
    let mut rx = harness.events.subscribe();

    let folders_before = harness.engine.folders_with_files().unwrap().len();

    let response =
        prepare_and_accept(&harness, &session, vec![file("a", 10), file("b", 20)]).await;
    assert_eq!(response.files.len(), 2);

    let t_a = transmission_id(&response, "a");
    let t_b = transmission_id(&response, "b");

    harness
        .coordinator
        .handle_upload(&session, &t_a, "a", vec![1u8; 10], harness.fallback_folder)
        .await
        .unwrap();
    harness
        .coordinator
        .handle_upload(&session, &t_b, "b", vec![2u8; 20], harness.fallback_folder)
        .await
        .unwrap();

    // session fully resolved: coordinator and registration both forget it
    assert_eq!(harness.coordinator.active_session_count(), 0);
    assert!(!harness.registration.is_valid(&session));

    // one new folder holding both files
    let folders = harness.engine.folders_with_files().unwrap();
    assert_eq!(folders.len(), folders_before + 1);
    let holiday = folders.iter().find(|f| f.name == "Holiday").unwrap();
    assert_eq!(holiday.file_count, 2);

    let (_, files) = harness.engine.files_in_folder(holiday.id).unwrap();
    for entry in &files {
        let plaintext = harness.engine.read_file(entry.id).unwrap();
        assert_eq!(plaintext.len() as i64, entry.size);
    }

    // per-file ordering: file-receiving strictly precedes file-received
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    for id in ["a", "b"] {
        let receiving = seen.iter().position(|e| {
            matches!(e, Event::FileReceiving { file_id, .. } if file_id == id)
        });
        let received = seen.iter().position(|e| {
            matches!(e, Event::FileReceived { file_id, .. } if file_id == id)
        });
        assert!(receiving.unwrap() < received.unwrap());
    }
}

#[tokio::test]
async fn replayed_transmission_id_is_rejected() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let response =
        prepare_and_accept(&harness, &session, vec![file("a", 4), file("b", 4)]).await;
    let t_a = transmission_id(&response, "a");

    harness
        .coordinator
        .handle_upload(&session, &t_a, "a", vec![9u8; 4], harness.fallback_folder)
        .await
        .unwrap();

    let replay = harness
        .coordinator
        .handle_upload(&session, &t_a, "a", vec![9u8; 4], harness.fallback_folder)
        .await;
    assert!(matches!(replay, Err(HavenError::InvalidTransmission)));
}

#[tokio::test]
async fn completed_file_with_wrong_transmission_id_reports_complete() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let response =
        prepare_and_accept(&harness, &session, vec![file("a", 4), file("b", 4)]).await;
    let t_a = transmission_id(&response, "a");

    harness
        .coordinator
        .handle_upload(&session, &t_a, "a", vec![9u8; 4], harness.fallback_folder)
        .await
        .unwrap();

    // a stale id against the completed file: the completed status answers,
    // not the id mismatch
    let result = harness
        .coordinator
        .handle_upload(
            &session,
            "stale-or-bogus-id",
            "a",
            vec![9u8; 4],
            harness.fallback_folder,
        )
        .await;
    assert!(matches!(result, Err(HavenError::TransferComplete)));

    // file b is still pending, so the session stays open
    assert_eq!(harness.coordinator.active_session_count(), 1);
}

#[tokio::test]
async fn wrong_transmission_id_is_rejected() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let _response = prepare_and_accept(&harness, &session, vec![file("a", 4)]).await;

    let result = harness
        .coordinator
        .handle_upload(
            &session,
            "not-the-issued-id",
            "a",
            vec![0u8; 4],
            harness.fallback_folder,
        )
        .await;
    assert!(matches!(result, Err(HavenError::InvalidTransmission)));
}

#[tokio::test]
async fn upload_for_unknown_file_is_not_found() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let result = harness
        .coordinator
        .handle_upload(&session, "t", "ghost", vec![], harness.fallback_folder)
        .await;
    assert!(matches!(result, Err(HavenError::TransferNotFound)));
}

#[tokio::test]
async fn upload_with_unregistered_session_is_rejected() {
    let harness = harness();

    let result = harness
        .coordinator
        .handle_upload("no-such-session", "t", "a", vec![], harness.fallback_folder)
        .await;
    assert!(matches!(result, Err(HavenError::InvalidSession)));
}

#[tokio::test]
async fn duplicate_prepare_is_rejected() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let coordinator = Arc::clone(&harness.coordinator);
    let first_request = request(&session, vec![file("a", 4)]);
    let _first =
        tokio::spawn(async move { coordinator.prepare_upload(first_request).await });
    wait_for_pending(&harness.coordinator).await;

    let second = harness
        .coordinator
        .prepare_upload(request(&session, vec![file("b", 4)]))
        .await;
    assert!(matches!(second, Err(HavenError::DuplicateSession(_))));
}

#[tokio::test]
async fn prepare_without_live_session_is_rejected() {
    let harness = harness();

    let result = harness
        .coordinator
        .prepare_upload(request("never-registered", vec![file("a", 4)]))
        .await;
    assert!(matches!(result, Err(HavenError::InvalidSession)));
}

#[tokio::test]
async fn rejecting_unblocks_the_sender_with_rejected() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();
    let mut rx = harness.events.subscribe();

    let coordinator = Arc::clone(&harness.coordinator);
    let prepare_request = request(&session, vec![file("a", 4)]);
    let prepare =
        tokio::spawn(async move { coordinator.prepare_upload(prepare_request).await });
    wait_for_pending(&harness.coordinator).await;

    harness.coordinator.reject_transfer(&session).unwrap();

    let result = prepare.await.unwrap();
    assert!(matches!(result, Err(HavenError::Rejected)));
    assert_eq!(harness.coordinator.pending_count(), 0);

    // a cancellation event reaches observers
    let mut cancelled = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, Event::TransferCancelled { .. }) {
            cancelled = true;
        }
    }
    assert!(cancelled);
}

#[tokio::test(start_paused = true)]
async fn prepare_times_out_without_a_decision() {
    let harness = harness_with_config(TransferConfig {
        decision_timeout_secs: 300,
        refresh_timeout_mins: 45,
        session_cleanup_timeout_mins: 600,
    });
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let result = harness
        .coordinator
        .prepare_upload(request(&session, vec![file("a", 4)]))
        .await;
    assert!(matches!(result, Err(HavenError::Timeout)));
    assert_eq!(harness.coordinator.pending_count(), 0);
}

#[tokio::test]
async fn lock_clears_all_transfer_state() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let response = prepare_and_accept(&harness, &session, vec![file("a", 4)]).await;
    let t_a = transmission_id(&response, "a");

    harness.coordinator.lock();
    harness.registration.lock();

    let result = harness
        .coordinator
        .handle_upload(&session, &t_a, "a", vec![0u8; 4], harness.fallback_folder)
        .await;
    assert!(matches!(result, Err(HavenError::InvalidSession)));
    assert_eq!(harness.coordinator.active_session_count(), 0);
}

#[tokio::test]
async fn close_connection_tears_down_the_session() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let response = prepare_and_accept(&harness, &session, vec![file("a", 4)]).await;
    let t_a = transmission_id(&response, "a");

    harness.coordinator.close_connection(&session).unwrap();

    // the registration session is gone, so the upload is unauthorized
    let result = harness
        .coordinator
        .handle_upload(&session, &t_a, "a", vec![0u8; 4], harness.fallback_folder)
        .await;
    assert!(matches!(result, Err(HavenError::InvalidSession)));
}

#[tokio::test]
async fn failed_and_completed_files_both_resolve_the_session() {
    let harness = harness();
    let session = harness.registration.create_session(PIN, "N").unwrap();

    let response =
        prepare_and_accept(&harness, &session, vec![file("a", 4), file("b", 4)]).await;
    let t_a = transmission_id(&response, "a");
    let t_b = transmission_id(&response, "b");

    harness
        .coordinator
        .handle_upload(&session, &t_a, "a", vec![1u8; 4], harness.fallback_folder)
        .await
        .unwrap();

    sabotage_catalogue(&harness);

    let result = harness
        .coordinator
        .handle_upload(&session, &t_b, "b", vec![2u8; 4], harness.fallback_folder)
        .await;
    assert!(result.is_err());

    // both files are terminal, so the session is torn down either way
    assert_eq!(harness.coordinator.active_session_count(), 0);
    assert!(!harness.registration.is_valid(&session));
}
