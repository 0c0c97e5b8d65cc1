use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use ordinal_core::{config, CollectionName, FileStore, NewRecord};
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

fn ordinal(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ordinal"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("ORDINAL_TOKEN");
    cmd
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: &Path) -> Self {
        let child = ordinal(home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        let daemon = Self {
            child,
            home: home.to_path_buf(),
        };

        let socket = home.join(".ordinal").join("ordinal.sock");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !socket.exists() {
            assert!(Instant::now() < deadline, "daemon socket never appeared");
            sleep(Duration::from_millis(25));
        }
        daemon
    }

    fn wait_for_exit(&mut self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return true;
            }
            sleep(Duration::from_millis(50));
        }
        false
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        let _ = ordinal(&self.home)
            .args(["--token", "admin-token", "daemon", "stop"])
            .status();
        if !self.wait_for_exit(Duration::from_secs(2)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn run_ok(cmd: &mut Command) -> Output {
    let output = cmd.output().expect("run ordinal");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn listed_titles(home: &Path) -> Vec<String> {
    let output = run_ok(ordinal(home).args(["--token", "edit-token", "list", "gallery", "--json"]));
    let items: serde_json::Value = serde_json::from_slice(&output.stdout).expect("list json");
    items
        .as_array()
        .expect("array")
        .iter()
        .map(|item| item["title"].as_str().expect("title").to_string())
        .collect()
}

#[test]
fn reorder_list_migrate_and_stop_through_the_daemon() {
    let home = TempDir::new().expect("home");
    let config_path = config::config_path_at(home.path());
    std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
    std::fs::write(&config_path, CONFIG).unwrap();
    let store = FileStore::init_at(home.path(), &CollectionName::from("gallery")).unwrap();
    for title in ["dawn", "noon", "dusk"] {
        store
            .insert(NewRecord {
                title: title.into(),
                ..NewRecord::default()
            })
            .unwrap();
    }

    let mut daemon = DaemonProcess::start(home.path());

    run_ok(
        ordinal(home.path())
            .env("ORDINAL_TOKEN", "edit-token")
            .args(["reorder", "gallery", "3", "1", "2"]),
    );
    assert_eq!(listed_titles(home.path()), vec!["dusk", "dawn", "noon"]);

    let rejected = ordinal(home.path())
        .args(["--token", "edit-token", "reorder", "gallery", "1", "999999"])
        .output()
        .expect("run reorder");
    assert!(!rejected.status.success());
    assert!(String::from_utf8_lossy(&rejected.stderr).contains("999999"));
    assert_eq!(listed_titles(home.path()), vec!["dusk", "dawn", "noon"]);

    let denied = ordinal(home.path())
        .args(["--token", "edit-token", "migrate", "gallery"])
        .output()
        .expect("run migrate");
    assert!(!denied.status.success());
    assert!(String::from_utf8_lossy(&denied.stderr).contains("403"));

    let migrated = run_ok(ordinal(home.path()).args(["--token", "admin-token", "migrate", "gallery"]));
    assert!(String::from_utf8_lossy(&migrated.stdout).contains("Migrated 'gallery'"));
    let again = run_ok(ordinal(home.path()).args(["--token", "admin-token", "migrate", "gallery"]));
    assert!(String::from_utf8_lossy(&again.stdout).contains("already completed"));

    let status = run_ok(ordinal(home.path()).args(["daemon", "status"]));
    let status: serde_json::Value = serde_json::from_slice(&status.stdout).expect("status json");
    assert_eq!(status["running"], true);

    run_ok(ordinal(home.path()).args(["--token", "admin-token", "daemon", "stop"]));
    assert!(daemon.wait_for_exit(Duration::from_secs(5)), "daemon did not exit");
}
