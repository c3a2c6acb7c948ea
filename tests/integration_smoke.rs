/// End-to-end smoke tests for minidocker, covering the literal scenarios in
/// the runtime's own design spec (§8): foreground exit-code propagation,
/// detached `run` + `inspect` + cgroup teardown, user switching, signal-to-
/// exit-code translation, and `exec`/`kill` against a running container.
///
/// These require:
/// 1. Running on Linux.
/// 2. Running as root (or with equivalent CAP_SYS_ADMIN for namespaces and
///    cgroup v2).
/// 3. An extracted rootfs (e.g. an Alpine minirootfs) at `tests/rootfs/`, or
///    the path set via `MINIDOCKER_TEST_ROOTFS`.
///
/// Locally:
/// ```bash
/// mkdir -p tests/rootfs
/// curl -L https://dl-cdn.alpinelinux.org/alpine/v3.20/releases/x86_64/alpine-minirootfs-3.20.3-x86_64.tar.gz \
///     | tar -xz -C tests/rootfs
/// sudo -E cargo test --test integration_smoke
/// ```
/// Every test is a no-op (with a diagnostic on stderr) when the prerequisites
/// aren't met, matching the gate the teacher's own integration suite used.
use std::path::Path;
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

fn rootfs_path() -> String {
    std::env::var("MINIDOCKER_TEST_ROOTFS").unwrap_or_else(|_| "tests/rootfs".to_string())
}

fn is_root() -> bool {
    #[cfg(target_os = "linux")]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

fn can_run() -> bool {
    if cfg!(not(target_os = "linux")) {
        eprintln!("SKIP: not on Linux");
        return false;
    }
    if !is_root() {
        eprintln!("SKIP: not running as root (euid != 0)");
        return false;
    }
    let rfs = rootfs_path();
    if !Path::new(&rfs).join("bin").exists() {
        eprintln!("SKIP: rootfs not found at {rfs}/bin");
        return false;
    }
    true
}

fn minidocker(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_minidocker"));
    cmd.arg("--root").arg(root);
    cmd
}

fn run(root: &Path, args: &[&str]) -> Output {
    minidocker(root)
        .args(args)
        .output()
        .expect("failed to run minidocker")
}

fn assert_container_id(line: &str) {
    assert!(
        line.len() == 64 && line.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()),
        "expected a 64-char lowercase-hex container id, got: '{line}'"
    );
}

/// Scenario 1: `run --rootfs <rfs> /bin/echo hi` → stdout `hi`, exit 0,
/// `state.json` status=stopped, exitCode=0.
#[test]
fn scenario_foreground_echo_and_stopped_state() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = minidocker(tmp_root.path())
        .args(["run", "--rootfs", &rootfs, "--", "/bin/echo", "hi"])
        .output()
        .expect("failed to run minidocker");

    assert!(
        output.status.success(),
        "run should succeed, exit code: {:?}, stderr: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );

    let ps = run(tmp_root.path(), &["ps"]);
    let ps_stdout = String::from_utf8_lossy(&ps.stdout);
    let id_line = ps_stdout.lines().nth(1).expect("ps should list one container");
    let id = id_line.split_whitespace().next().unwrap();

    let inspect = run(tmp_root.path(), &["inspect", id]);
    let inspect_json = String::from_utf8_lossy(&inspect.stdout);
    assert!(inspect_json.contains("\"status\": \"stopped\""));
    assert!(inspect_json.contains("\"exit_code\": 0"));

    let logs = run(tmp_root.path(), &["logs", id]);
    let log_stdout = String::from_utf8_lossy(&logs.stdout);
    assert!(log_stdout.contains("hi"), "logs should contain 'hi', got: '{log_stdout}'");
}

/// Scenario: non-zero exit codes propagate from the container to the shell.
#[test]
fn scenario_exit_code_propagation() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = minidocker(tmp_root.path())
        .args(["run", "--rootfs", &rootfs, "--", "/bin/sh", "-c", "exit 42"])
        .output()
        .expect("failed to run minidocker");

    assert_eq!(output.status.code(), Some(42));
}

/// Scenario 5: a container that sends itself SIGTERM exits with code
/// `128 + 15 = 143`.
#[test]
fn scenario_self_sigterm_yields_143() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = minidocker(tmp_root.path())
        .args([
            "run",
            "--rootfs",
            &rootfs,
            "--",
            "/bin/sh",
            "-c",
            "kill -TERM $$; sleep 1",
        ])
        .output()
        .expect("failed to run minidocker");

    assert_eq!(output.status.code(), Some(143));
}

/// Scenario 4: `-u 12345 /bin/id -u` → stdout `12345`.
#[test]
fn scenario_numeric_user_switch() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = minidocker(tmp_root.path())
        .args(["run", "--rootfs", &rootfs, "-u", "12345", "--", "/bin/id", "-u"])
        .output()
        .expect("failed to run minidocker");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "12345");
}

/// Scenario 2: `run -d -m 64m --rootfs <rfs> /bin/sleep 1` prints the
/// container id; within a couple of seconds the cgroup leaf is torn down and
/// `inspect` reports `stopped`.
#[test]
fn scenario_detached_memory_limited_run_tears_down_cgroup() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = minidocker(tmp_root.path())
        .args([
            "run", "-d", "-m", "67108864", "--rootfs", &rootfs, "--", "/bin/sleep", "1",
        ])
        .output()
        .expect("failed to run minidocker -d");

    assert!(
        output.status.success(),
        "detached run should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert_container_id(&id);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut cgroup_path = String::new();
    let mut stopped = false;
    while std::time::Instant::now() < deadline {
        let inspect = run(tmp_root.path(), &["inspect", &id]);
        let json = String::from_utf8_lossy(&inspect.stdout);
        if json.contains("\"status\": \"stopped\"") {
            stopped = true;
            for line in json.lines() {
                if let Some(v) = line.trim().strip_prefix("\"cgroup_path\": \"") {
                    cgroup_path = v.trim_end_matches(',').trim_end_matches('"').to_string();
                }
            }
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    assert!(stopped, "container should reach status=stopped within 5s");
    assert_eq!(cgroup_path, format!("minidocker/{id}"));
    assert!(
        !Path::new("/sys/fs/cgroup").join(&cgroup_path).exists(),
        "cgroup leaf should be removed after container exit"
    );
}

/// Scenario 6: `exec` into a running detached container, then `kill` it and
/// observe the supervisor's recorded exit code (137 = 128+SIGKILL).
#[test]
fn scenario_exec_and_kill() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let run_output = minidocker(tmp_root.path())
        .args(["run", "-d", "--rootfs", &rootfs, "--", "/bin/sleep", "100"])
        .output()
        .expect("failed to run minidocker -d");
    assert!(run_output.status.success());
    let id = String::from_utf8_lossy(&run_output.stdout).trim().to_string();

    // Give the supervisor a moment to attach and report running.
    thread::sleep(Duration::from_millis(300));

    let exec_output = run(tmp_root.path(), &["exec", &id, "--", "/bin/echo", "ok"]);
    assert!(
        exec_output.status.success(),
        "exec should succeed, stderr: {}",
        String::from_utf8_lossy(&exec_output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&exec_output.stdout).trim(), "ok");

    let kill_output = run(tmp_root.path(), &["kill", &id]);
    assert!(kill_output.status.success());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut exit_code_line = String::new();
    while std::time::Instant::now() < deadline {
        let inspect = run(tmp_root.path(), &["inspect", &id]);
        let json = String::from_utf8_lossy(&inspect.stdout);
        if json.contains("\"status\": \"stopped\"") {
            exit_code_line = json
                .lines()
                .find(|l| l.contains("exit_code"))
                .unwrap_or("")
                .to_string();
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }
    assert!(
        exit_code_line.contains("137"),
        "expected exit_code 137, got: {exit_code_line}"
    );
}

/// `ps` lists a stopped container and `rm` removes it from the listing.
#[test]
fn scenario_ps_then_rm() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = run(tmp_root.path(), &["run", "--rootfs", &rootfs, "--", "/bin/true"]);
    assert!(output.status.success());

    let ps = run(tmp_root.path(), &["ps"]);
    let ps_stdout = String::from_utf8_lossy(&ps.stdout).into_owned();
    assert!(ps_stdout.contains("stopped"), "ps should show stopped container, got:\n{ps_stdout}");

    let id = ps_stdout
        .lines()
        .nth(1)
        .and_then(|l| l.split_whitespace().next())
        .unwrap()
        .to_string();

    let rm = run(tmp_root.path(), &["rm", &id]);
    assert!(rm.status.success());

    let ps_after = run(tmp_root.path(), &["ps"]);
    let ps_after_stdout = String::from_utf8_lossy(&ps_after.stdout).into_owned();
    assert_eq!(
        ps_after_stdout.lines().count(),
        1,
        "ps should only show the header after rm, got:\n{ps_after_stdout}"
    );
}

/// A `--pids-limit` container whose workload forks many children eventually
/// trips `pids.max`; `pids.events`'s `max` counter becomes nonzero while the
/// container is still running.
#[test]
fn scenario_pids_limit_trips_events_counter() {
    if !can_run() {
        return;
    }
    let rootfs = rootfs_path();
    let tmp_root = tempfile::tempdir().unwrap();

    let output = minidocker(tmp_root.path())
        .args([
            "run",
            "-d",
            "--pids-limit",
            "5",
            "--rootfs",
            &rootfs,
            "--",
            "/bin/sh",
            "-c",
            "i=0; while [ $i -lt 20 ]; do sleep 5 & i=$((i+1)); done; sleep 5",
        ])
        .output()
        .expect("failed to run minidocker -d");
    assert!(output.status.success());
    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();

    thread::sleep(Duration::from_millis(500));

    let events_path = Path::new("/sys/fs/cgroup/minidocker").join(&id).join("pids.events");
    let mut tripped = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if let Ok(contents) = std::fs::read_to_string(&events_path) {
            if contents.lines().any(|l| l.starts_with("max ") && l != "max 0") {
                tripped = true;
                break;
            }
        }
        thread::sleep(Duration::from_millis(200));
    }

    let _ = run(tmp_root.path(), &["kill", &id]);
    assert!(tripped, "pids.events max counter should become nonzero under the limit");
}
