use std::env;
use std::path::Path;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

/// Helper to point the default state directory at a temp dir, mirroring
/// `core::state::default_root`'s `$HOME/.minidocker` convention.
fn setup_home(tmp: &TempDir) {
    env::set_var("HOME", tmp.path().to_str().unwrap());
}

/// Mirrors `core::model::ContainerState` (no lib target exists to import it
/// from, so these tests exercise the documented on-disk JSON shape directly,
/// the way a consumer parsing `state.json` from the state directory would).
#[derive(serde::Serialize, serde::Deserialize, Debug)]
struct ContainerStateShape {
    id: String,
    status: String,
    pid: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    cgroup_path: String,
    network: NetworkStateShape,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Default)]
struct NetworkStateShape {
    mode: String,
    ip: Option<String>,
    gateway: Option<String>,
    mac: Option<String>,
    veth_host: Option<String>,
    veth_container: Option<String>,
    ports: Vec<serde_json::Value>,
}

#[test]
fn default_state_root_uses_home_dot_minidocker() {
    let tmp = tempfile::tempdir().unwrap();
    setup_home(&tmp);

    let home = env::var("HOME").unwrap();
    let expected = Path::new(&home).join(".minidocker");
    assert!(expected.to_str().unwrap().contains(".minidocker"));
}

#[test]
fn state_json_round_trip() {
    let id = "a".repeat(64);
    let state = ContainerStateShape {
        id: id.clone(),
        status: "stopped".into(),
        pid: 0,
        started_at: Some(Utc::now()),
        finished_at: Some(Utc::now()),
        exit_code: Some(0),
        cgroup_path: format!("minidocker/{id}"),
        network: NetworkStateShape {
            mode: "none".into(),
            ..Default::default()
        },
    };

    let json = serde_json::to_string_pretty(&state).unwrap();
    let back: ContainerStateShape = serde_json::from_str(&json).unwrap();

    assert_eq!(back.id, id);
    assert_eq!(back.status, "stopped");
    assert_eq!(back.exit_code, Some(0));
    assert_eq!(back.cgroup_path, format!("minidocker/{id}"));
}

#[test]
fn state_json_handles_every_status() {
    for status in &["created", "running", "stopped"] {
        let json = format!(
            r#"{{
                "id": "{}",
                "status": "{}",
                "pid": 0,
                "started_at": null,
                "finished_at": null,
                "exit_code": null,
                "cgroup_path": "",
                "network": {{"mode": "none", "ip": null, "gateway": null,
                             "mac": null, "veth_host": null,
                             "veth_container": null, "ports": []}}
            }}"#,
            "b".repeat(64),
            status
        );
        let state: ContainerStateShape = serde_json::from_str(&json).unwrap();
        assert_eq!(state.status, *status);
    }
}

/// `exit_code` is only meaningful once `status == stopped`; a freshly
/// created record must not default it to a misleading `0`.
#[test]
fn created_state_has_no_exit_code() {
    let json = format!(
        r#"{{
            "id": "{}",
            "status": "created",
            "pid": 0,
            "started_at": null,
            "finished_at": null,
            "exit_code": null,
            "cgroup_path": "",
            "network": {{"mode": "none", "ip": null, "gateway": null,
                         "mac": null, "veth_host": null,
                         "veth_container": null, "ports": []}}
        }}"#,
        "c".repeat(64)
    );
    let state: ContainerStateShape = serde_json::from_str(&json).unwrap();
    assert_eq!(state.exit_code, None);
}
