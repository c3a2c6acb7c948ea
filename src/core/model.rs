use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a container in the runtime's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// State record written, init process not yet attached.
    Created,
    /// The supervisor has attached the init PID and persisted this state.
    Running,
    /// The supervisor observed init exit.
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A single mount to perform inside the container before the user command
/// starts, tagged by source kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mount {
    Bind {
        source: String,
        target: String,
        read_only: bool,
    },
    Volume {
        name: String,
        /// Populated once the volume collaborator has resolved a host path;
        /// `None` means "ask the collaborator, which auto-creates on miss".
        resolved_host_path: Option<String>,
        target: String,
        read_only: bool,
    },
}

impl Mount {
    pub fn target(&self) -> &str {
        match self {
            Mount::Bind { target, .. } => target,
            Mount::Volume { target, .. } => target,
        }
    }

    pub fn read_only(&self) -> bool {
        match self {
            Mount::Bind { read_only, .. } => *read_only,
            Mount::Volume { read_only, .. } => *read_only,
        }
    }
}

/// The user-facing `--memory-swap` value: either an explicit byte total, or
/// `Unlimited` for the literal `-1` sentinel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum MemorySwap {
    Bytes(u64),
    Unlimited,
}

/// Resource limits applied to the container's cgroup. `None`/zero means
/// unlimited for that resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CgroupLimits {
    /// `memory.max`, in bytes.
    pub memory: Option<u64>,
    /// Docker-style total memory+swap ceiling (`--memory-swap`).
    pub memory_swap: Option<MemorySwap>,
    /// `cpu.max` quota, in microseconds per period.
    pub cpu_quota: Option<u64>,
    /// `cpu.max` period, in microseconds. Defaults to 100000 when a quota is
    /// set and this is left unset.
    pub cpu_period: Option<u64>,
    /// `pids.max`.
    pub pids_limit: Option<u64>,
}

impl CgroupLimits {
    pub fn is_unset(&self) -> bool {
        self.memory.unwrap_or(0) == 0
            && self.memory_swap.is_none()
            && self.cpu_quota.unwrap_or(0) == 0
            && self.pids_limit.unwrap_or(0) == 0
    }
}

/// Networking mode requested for the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    None,
    Bridge,
}

impl Default for NetworkMode {
    fn default() -> Self {
        Self::None
    }
}

/// A requested host:container port mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
}

/// Network configuration requested at `run` time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mode: NetworkMode,
    pub ports: Vec<PortMapping>,
}

/// Networking state recorded once the network collaborator has run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub mode: NetworkMode,
    pub ip: Option<String>,
    pub gateway: Option<String>,
    pub mac: Option<String>,
    pub veth_host: Option<String>,
    pub veth_container: Option<String>,
    pub ports: Vec<PortMapping>,
}

/// Immutable container configuration, written once at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub hostname: String,
    pub tty: bool,
    pub interactive: bool,
    /// Absolute host path to the rootfs, or empty for the compat no-rootfs
    /// path (mounts, if any, go directly under `/`).
    pub rootfs: String,
    pub detached: bool,
    /// Ordered `KEY=VALUE` entries; later entries win on collision.
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    /// `name|uid[:group|gid]`, parsed at init time, post-pivot.
    pub user: Option<String>,
    pub mounts: Vec<Mount>,
    pub cgroup_limits: CgroupLimits,
    pub network: NetworkConfig,
    /// When set, created with this id rather than a freshly generated one
    /// (the launcher always generates one; tests may override).
    pub created_at: DateTime<Utc>,
}

impl ContainerConfig {
    /// The full argv: command followed by args.
    pub fn argv(&self) -> Vec<String> {
        let mut v = Vec::with_capacity(1 + self.args.len());
        v.push(self.command.clone());
        v.extend(self.args.iter().cloned());
        v
    }
}

/// Mutable per-container state, rewritten atomically on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub id: String,
    pub status: ContainerStatus,
    /// 0 when not running.
    pub pid: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Only meaningful when `status == Stopped`.
    pub exit_code: Option<i32>,
    /// Relative cgroup path, e.g. `minidocker/<id>`. Empty if no limits.
    pub cgroup_path: String,
    pub network: NetworkState,
}

impl ContainerState {
    pub fn new_created(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: ContainerStatus::Created,
            pid: 0,
            started_at: None,
            finished_at: None,
            exit_code: None,
            cgroup_path: String::new(),
            network: NetworkState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ContainerConfig {
        ContainerConfig {
            id: "a".repeat(64),
            command: "/bin/sh".into(),
            args: vec!["-c".into(), "echo hi".into()],
            hostname: "box".into(),
            tty: false,
            interactive: false,
            rootfs: "/tmp/rootfs".into(),
            detached: false,
            env: vec!["FOO=bar".into()],
            working_dir: None,
            user: None,
            mounts: vec![Mount::Bind {
                source: "/host".into(),
                target: "/container".into(),
                read_only: true,
            }],
            cgroup_limits: CgroupLimits::default(),
            network: NetworkConfig::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_display() {
        assert_eq!(ContainerStatus::Created.to_string(), "created");
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Stopped.to_string(), "stopped");
    }

    #[test]
    fn config_round_trip() {
        let cfg = sample_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ContainerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, cfg.id);
        assert_eq!(back.argv(), vec!["/bin/sh", "-c", "echo hi"]);
        assert_eq!(back.mounts.len(), 1);
        assert_eq!(back.mounts[0].target(), "/container");
        assert!(back.mounts[0].read_only());
    }

    #[test]
    fn cgroup_limits_is_unset() {
        assert!(CgroupLimits::default().is_unset());
        let mut limits = CgroupLimits::default();
        limits.pids_limit = Some(5);
        assert!(!limits.is_unset());
    }

    #[test]
    fn state_serialization_round_trip() {
        let mut state = ContainerState::new_created(&"b".repeat(64));
        state.status = ContainerStatus::Stopped;
        state.exit_code = Some(0);

        let json = serde_json::to_string(&state).unwrap();
        let back: ContainerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, ContainerStatus::Stopped);
        assert_eq!(back.exit_code, Some(0));
    }
}
