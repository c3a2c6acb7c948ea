use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::error::{Error, Result};
use super::model::{ContainerConfig, ContainerState, ContainerStatus};

/// Name of the immutable config file, written once per container.
const CONFIG_FILE: &str = "config.json";
/// Name of the mutable state file, rewritten atomically on every transition.
const STATE_FILE: &str = "state.json";
/// Name of the stdout log file.
pub const STDOUT_LOG: &str = "stdout.log";
/// Name of the stderr log file.
pub const STDERR_LOG: &str = "stderr.log";

/// Filesystem-backed store for per-container config/state/logs, and for
/// named-volume data. Owns the on-disk layout under a root directory:
///
/// ```text
/// <root>/containers/<id>/config.json
/// <root>/containers/<id>/state.json
/// <root>/containers/<id>/logs/{stdout,stderr}.log
/// <root>/volumes/<name>/_data/
/// ```
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Build a store rooted at `root_override`, or the default root when
    /// `None`: `/var/lib/minidocker` as root, `$HOME/.minidocker` otherwise.
    pub fn new(root_override: Option<PathBuf>) -> Result<Self> {
        let root = match root_override {
            Some(r) => r,
            None => default_root()?,
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(self.containers_dir())?;
        fs::create_dir_all(self.volumes_dir())?;
        Ok(())
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join("volumes")
    }

    pub fn volume_data_dir(&self, name: &str) -> PathBuf {
        self.volumes_dir().join(name).join("_data")
    }

    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.containers_dir().join(id)
    }

    pub fn logs_dir(&self, id: &str) -> PathBuf {
        self.container_dir(id).join("logs")
    }

    pub fn log_path(&self, id: &str, name: &str) -> PathBuf {
        self.logs_dir(id).join(name)
    }

    fn config_path(&self, id: &str) -> PathBuf {
        self.container_dir(id).join(CONFIG_FILE)
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.container_dir(id).join(STATE_FILE)
    }

    /// Create the on-disk record for a new container: write-once config,
    /// initial `status = created` state. Fails if the container directory
    /// already exists.
    pub fn create(&self, cfg: &ContainerConfig) -> Result<ContainerState> {
        let dir = self.container_dir(&cfg.id);
        if dir.exists() {
            return Err(Error::AlreadyExists(format!(
                "container {} already exists",
                cfg.id
            )));
        }
        fs::create_dir_all(self.logs_dir(&cfg.id))?;

        let config_path = self.config_path(&cfg.id);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&config_path, json)?;

        let state = ContainerState::new_created(&cfg.id);
        self.write_state_atomic(&cfg.id, &state)?;
        Ok(state)
    }

    pub fn load_config(&self, id: &str) -> Result<ContainerConfig> {
        let path = self.config_path(id);
        let data = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("no config for container {id}"))
            } else {
                Error::from(e)
            }
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn load_state(&self, id: &str) -> Result<ContainerState> {
        let path = self.state_path(id);
        let data = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("no state for container {id}"))
            } else {
                Error::from(e)
            }
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Rewrite `state.json` atomically: write to `state.json.tmp` in the same
    /// directory, then rename onto `state.json`. Concurrent readers observe
    /// either the pre- or post-write content, never a partial file.
    fn write_state_atomic(&self, id: &str, state: &ContainerState) -> Result<()> {
        let dir = self.container_dir(id);
        fs::create_dir_all(&dir)?;
        let final_path = self.state_path(id);
        let tmp_path = dir.join(format!("{STATE_FILE}.tmp"));
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Transition to `running`: record `pid` and `startedAt`.
    pub fn set_running(&self, id: &str, pid: u32) -> Result<ContainerState> {
        let mut state = self.load_state(id)?;
        state.status = ContainerStatus::Running;
        state.pid = pid;
        state.started_at = Some(Utc::now());
        self.write_state_atomic(id, &state)?;
        Ok(state)
    }

    /// Transition to `stopped`: record `exitCode` and `finishedAt`.
    pub fn set_stopped(&self, id: &str, exit_code: i32) -> Result<ContainerState> {
        let mut state = self.load_state(id)?;
        state.status = ContainerStatus::Stopped;
        state.exit_code = Some(exit_code);
        state.finished_at = Some(Utc::now());
        state.pid = 0;
        self.write_state_atomic(id, &state)?;
        Ok(state)
    }

    /// Persist a cgroup path into state without changing status (used by the
    /// supervisor once the cgroup leaf exists, before the init PID attaches).
    pub fn set_cgroup_path(&self, id: &str, cgroup_path: &str) -> Result<ContainerState> {
        let mut state = self.load_state(id)?;
        state.cgroup_path = cgroup_path.to_string();
        self.write_state_atomic(id, &state)?;
        Ok(state)
    }

    /// Persist network state without changing status.
    pub fn set_network_state(
        &self,
        id: &str,
        network: crate::core::model::NetworkState,
    ) -> Result<ContainerState> {
        let mut state = self.load_state(id)?;
        state.network = network;
        self.write_state_atomic(id, &state)?;
        Ok(state)
    }

    /// List all container IDs that have a config file on disk.
    pub fn list_container_ids(&self) -> Result<Vec<String>> {
        let dir = self.containers_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().join(CONFIG_FILE).exists() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Resolve a potentially abbreviated container ID (≥4 chars) to a full
    /// ID. Exactly one match succeeds; zero or multiple matches fail.
    pub fn resolve_id(&self, prefix: &str) -> Result<String> {
        if prefix.len() < 4 && prefix.len() != crate::core::id::ID_LEN {
            return Err(Error::invalid_config(
                "container id prefix must be at least 4 characters",
            ));
        }
        let all = self.list_container_ids()?;
        let matches: Vec<&String> = all.iter().filter(|id| id.starts_with(prefix)).collect();

        match matches.len() {
            0 => Err(Error::not_found(format!(
                "no container found with ID prefix '{prefix}'"
            ))),
            1 => Ok(matches[0].clone()),
            n => {
                let preview: Vec<&str> = matches.iter().take(5).map(|s| s.as_str()).collect();
                Err(Error::AmbiguousId {
                    prefix: prefix.to_string(),
                    matches: n,
                    preview: preview.join(", "),
                })
            }
        }
    }

    /// Remove the container directory tree. Succeeds even if the state file
    /// is corrupt or missing — this is the `ForceDelete` operation.
    pub fn force_delete(&self, id: &str) -> Result<()> {
        let dir = self.container_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Refresh `status` based on whether the recorded PID is still alive.
    /// Returns `true` (and persists) if a `running` record turned out to be
    /// stale.
    pub fn refresh_status(&self, state: &mut ContainerState) -> Result<bool> {
        if state.status == ContainerStatus::Running && !pid_alive(state.pid) {
            state.status = ContainerStatus::Stopped;
            self.write_state_atomic(&state.id, state)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Default state root: `/var/lib/minidocker` when running as root, otherwise
/// `$HOME/.minidocker`.
fn default_root() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if nix::unistd::geteuid().is_root() {
            return Ok(PathBuf::from("/var/lib/minidocker"));
        }
    }

    let home = std::env::var("HOME")
        .map_err(|_| Error::invalid_config("HOME environment variable not set"))?;
    Ok(PathBuf::from(home).join(".minidocker"))
}

/// Check whether a PID is alive on the host by probing `/proc/<pid>`.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    Path::new(&format!("/proc/{pid}")).exists()
}
