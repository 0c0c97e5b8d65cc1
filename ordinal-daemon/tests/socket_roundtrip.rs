//! Drives a real daemon over its Unix socket from blocking clients.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ordinal_core::{config, CollectionName, FileStore, NewRecord, RecordId};
use ordinal_daemon::paths::socket_path;
use ordinal_daemon::{
    request_list, request_migrate, request_save_order, request_status, request_stop, run,
    send_request, DaemonError, OrdinalRequest,
};
use tempfile::TempDir;

const CONFIG: &str = "\
tokens:
  - token: edit-token
    caller: editor
    capabilities: [edit_records]
  - token: admin-token
    caller: admin
    capabilities: [edit_records, administer]
maintenance:
  interval_secs: 3600
";

fn seed(home: &Path) {
    let config_path = config::config_path_at(home);
    std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
    std::fs::write(&config_path, CONFIG).unwrap();

    let store = FileStore::init_at(home, &CollectionName::from("gallery")).unwrap();
    for title in ["dawn", "noon", "dusk"] {
        store
            .insert(NewRecord {
                title: title.into(),
                ..NewRecord::default()
            })
            .unwrap();
    }
}

async fn wait_for_socket(home: &Path) {
    for _ in 0..100 {
        if socket_path(home).exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon socket never appeared");
}

async fn blocking<T, F>(home: &PathBuf, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&Path) -> T + Send + 'static,
{
    let home = home.clone();
    tokio::task::spawn_blocking(move || f(&home))
        .await
        .expect("client thread")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_save_migrate_and_stop_over_socket() {
    let tmp = TempDir::new().expect("home");
    let home = tmp.path().to_path_buf();
    seed(&home);

    let daemon = tokio::spawn(run(home.clone()));
    wait_for_socket(&home).await;

    let status = blocking(&home, request_status).await.expect("status");
    assert_eq!(status["running"], serde_json::json!(true));

    let denied = blocking(&home, |h| request_list(h, None, "gallery"))
        .await
        .unwrap_err();
    assert!(matches!(denied, DaemonError::Remote { code: 403, .. }), "{denied}");

    let saved = blocking(&home, |h| {
        request_save_order(
            h,
            Some("edit-token"),
            "gallery",
            &[RecordId(3), RecordId(1), RecordId(2)],
        )
    })
    .await
    .expect("save");
    assert_eq!((saved.updated_count, saved.requested), (3, 3));

    let items = blocking(&home, |h| request_list(h, Some("edit-token"), "gallery"))
        .await
        .expect("list");
    let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["dusk", "dawn", "noon"]);

    let missing = blocking(&home, |h| {
        request_save_order(h, Some("edit-token"), "gallery", &[RecordId(1), RecordId(999999)])
    })
    .await
    .unwrap_err();
    assert!(matches!(missing, DaemonError::Remote { code: 404, .. }), "{missing}");

    let migrated = blocking(&home, |h| request_migrate(h, Some("admin-token"), "gallery"))
        .await
        .expect("migrate");
    assert_eq!(migrated["outcome"], serde_json::json!("ran"));

    let garbage = blocking(&home, |h| {
        send_request(
            h,
            &OrdinalRequest {
                token: Some("edit-token".into()),
                collection: Some("gallery".into()),
                ordered_ids: Some(serde_json::json!("3,1,2")),
                ..OrdinalRequest::new("save_order")
            },
        )
    })
    .await
    .expect("response");
    assert!(!garbage.ok);
    assert_eq!(garbage.code, 400);

    blocking(&home, |h| request_stop(h, Some("admin-token")))
        .await
        .expect("stop");
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits after stop")
        .expect("join");
    assert!(result.is_ok(), "{result:?}");
    assert!(!socket_path(&home).exists());
}
