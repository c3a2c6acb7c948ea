use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};
use crate::core::model::{CgroupLimits, MemorySwap};

/// The cgroup v2 unified mount point.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";
/// Sub-hierarchy every container's cgroup lives under.
const PREFIX: &str = "minidocker";
/// Default `cpu.max` period (microseconds) when a quota is set but no period
/// was given.
const DEFAULT_CPU_PERIOD_US: u64 = 100_000;

/// cgroup v2 manager: creates a per-container leaf, enables controllers up
/// the subtree, applies limits, attaches PIDs, reads stats, destroys on exit.
pub struct CgroupController {
    root: PathBuf,
}

impl Default for CgroupController {
    fn default() -> Self {
        Self::new()
    }
}

impl CgroupController {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from(CGROUP_ROOT),
        }
    }

    #[cfg(test)]
    fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// The relative cgroup path for a container, e.g. `minidocker/<id>`.
    pub fn rel_path(container_id: &str) -> String {
        format!("{PREFIX}/{container_id}")
    }

    fn leaf(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Create the cgroup leaf at `rel_path` and apply `limits`.
    pub fn create(&self, rel_path: &str, limits: &CgroupLimits) -> Result<PathBuf> {
        let leaf = self.leaf(rel_path);
        if leaf.exists() {
            // Stale leaf from a previous run of this container id.
            self.destroy(rel_path)?;
        }

        self.check_required_controllers(limits)?;
        self.enable_subtree_controllers(rel_path, limits)?;

        fs::create_dir_all(&leaf)?;

        if let Err(e) = self.apply_limits(&leaf, limits) {
            let _ = fs::remove_dir(&leaf);
            return Err(e);
        }

        Ok(leaf)
    }

    /// Verify the unified hierarchy's root `cgroup.controllers` offers every
    /// controller `limits` requires.
    fn check_required_controllers(&self, limits: &CgroupLimits) -> Result<()> {
        let available = self.read_controllers(&self.root)?;

        for ctrl in required_controllers(limits) {
            if !available.iter().any(|c| c == ctrl) {
                return Err(Error::precondition_failed(format!(
                    "cgroup v2 controller '{ctrl}' is not available at {}",
                    self.root.display()
                )));
            }
        }
        Ok(())
    }

    fn read_controllers(&self, dir: &Path) -> Result<Vec<String>> {
        let path = dir.join("cgroup.controllers");
        let data = fs::read_to_string(&path).map_err(|e| {
            Error::PreconditionFailed(format!(
                "failed to read {} (is cgroup v2 mounted?): {e}",
                path.display()
            ))
        })?;
        Ok(data.split_whitespace().map(str::to_string).collect())
    }

    /// Walk from the unified root down to the parent of `rel_path`, writing
    /// `+<ctrl>` to `cgroup.subtree_control` at every ancestor that doesn't
    /// already have it enabled, for every controller `limits` requires.
    fn enable_subtree_controllers(&self, rel_path: &str, limits: &CgroupLimits) -> Result<()> {
        let required = required_controllers(limits);
        if required.is_empty() {
            return Ok(());
        }

        let components: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
        let mut ancestor = self.root.clone();

        // Ancestors are the root plus every path component except the leaf
        // itself (the last component).
        for component in &components[..components.len().saturating_sub(1)] {
            fs::create_dir_all(&ancestor)?;
            self.enable_controllers_at(&ancestor, &required)?;
            ancestor = ancestor.join(component);
        }
        fs::create_dir_all(&ancestor)?;
        self.enable_controllers_at(&ancestor, &required)?;

        Ok(())
    }

    fn enable_controllers_at(&self, dir: &Path, required: &[&str]) -> Result<()> {
        let already_enabled =
            fs::read_to_string(dir.join("cgroup.subtree_control")).unwrap_or_default();
        let to_enable: Vec<&str> = required
            .iter()
            .filter(|c| !already_enabled.split_whitespace().any(|e| &e == *c))
            .copied()
            .collect();
        if to_enable.is_empty() {
            return Ok(());
        }

        let enable_str: String = to_enable
            .iter()
            .map(|c| format!("+{c}"))
            .collect::<Vec<_>>()
            .join(" ");
        fs::write(dir.join("cgroup.subtree_control"), &enable_str).map_err(|e| {
            Error::PreconditionFailed(format!(
                "failed to enable controllers ({enable_str}) at {}: {e}",
                dir.display()
            ))
        })
    }

    /// Apply memory, memory+swap, cpu, and pids limits to an existing leaf.
    fn apply_limits(&self, leaf: &Path, limits: &CgroupLimits) -> Result<()> {
        if let Some(mem) = limits.memory {
            if mem > 0 {
                write_file(leaf, "memory.max", &mem.to_string())?;
            }
        }

        if let Some(swap) = &limits.memory_swap {
            self.apply_swap(leaf, limits.memory.unwrap_or(0), *swap)?;
        }

        if let Some(quota) = limits.cpu_quota {
            if quota > 0 {
                let period = limits
                    .cpu_period
                    .filter(|p| *p > 0)
                    .unwrap_or(DEFAULT_CPU_PERIOD_US);
                write_file(leaf, "cpu.max", &format!("{quota} {period}"))?;
            }
        }

        if let Some(pids) = limits.pids_limit {
            if pids > 0 {
                write_file(leaf, "pids.max", &pids.to_string())?;
            }
        }

        Ok(())
    }

    /// `--memory-swap` semantics: the v2 file receives `total - memory`, or
    /// `max` for the `-1` sentinel. The caller explicitly requested a swap
    /// limit, so failure to apply it is fatal — unlike an unset limit, which
    /// simply leaves `memory.swap.max` untouched.
    fn apply_swap(&self, leaf: &Path, memory: u64, swap: MemorySwap) -> Result<()> {
        let value = match swap {
            MemorySwap::Unlimited => "max".to_string(),
            MemorySwap::Bytes(total) => {
                if total < memory {
                    return Err(Error::invalid_config("--memory-swap must be >= --memory"));
                }
                (total - memory).to_string()
            }
        };
        write_file(leaf, "memory.swap.max", &value)
    }

    /// Write `pid` to `cgroup.procs`. The single attach point; must happen
    /// before the supervisor reports readiness.
    pub fn apply_pid(&self, rel_path: &str, pid: u32) -> Result<()> {
        let leaf = self.leaf(rel_path);
        write_file(&leaf, "cgroup.procs", &pid.to_string())
    }

    /// Re-apply limits to an existing leaf.
    pub fn update(&self, rel_path: &str, limits: &CgroupLimits) -> Result<()> {
        let leaf = self.leaf(rel_path);
        if !leaf.exists() {
            return Err(Error::not_found(format!(
                "cgroup {} does not exist",
                leaf.display()
            )));
        }
        self.apply_limits(&leaf, limits)
    }

    /// Destroy the leaf. Idempotent: succeeds if already absent. Refuses if
    /// `cgroup.procs` is non-empty. Best-effort removes the (now possibly
    /// empty) `minidocker` parent afterward.
    pub fn destroy(&self, rel_path: &str) -> Result<()> {
        let leaf = self.leaf(rel_path);
        if !leaf.exists() {
            return Ok(());
        }

        let procs = fs::read_to_string(leaf.join("cgroup.procs")).unwrap_or_default();
        if !procs.trim().is_empty() {
            return Err(Error::precondition_failed(format!(
                "cgroup {} still has processes attached",
                leaf.display()
            )));
        }

        fs::remove_dir(&leaf)?;

        if let Some(parent) = leaf.parent() {
            let _ = fs::remove_dir(parent);
        }
        Ok(())
    }

    /// Read usage stats. Missing files contribute zero fields rather than
    /// failing — a container with no limits set still has `get_stats` called
    /// against a leaf where some files may not exist.
    pub fn get_stats(&self, rel_path: &str) -> Result<CgroupStats> {
        let leaf = self.leaf(rel_path);
        let mut stats = CgroupStats {
            memory_current: read_u64(&leaf.join("memory.current")),
            memory_max: read_u64(&leaf.join("memory.max")),
            memory_peak: read_u64(&leaf.join("memory.peak")),
            pids_current: read_u64(&leaf.join("pids.current")),
            pids_max: read_u64(&leaf.join("pids.max")),
            ..Default::default()
        };

        if let Ok(cpu_stat) = fs::read_to_string(leaf.join("cpu.stat")) {
            for line in cpu_stat.lines() {
                if let Some(usec) = line.strip_prefix("usage_usec ") {
                    stats.cpu_usage_nanos = usec.trim().parse::<u64>().unwrap_or(0) * 1000;
                }
            }
        }

        if let Ok(events) = fs::read_to_string(leaf.join("memory.events")) {
            for line in events.lines() {
                if let Some(v) = line.strip_prefix("oom_kill ") {
                    stats.oom_kill = v.trim().parse().unwrap_or(0);
                }
            }
        }

        if let Ok(events) = fs::read_to_string(leaf.join("pids.events")) {
            for line in events.lines() {
                if let Some(v) = line.strip_prefix("max ") {
                    stats.pids_events_max = v.trim().parse().unwrap_or(0);
                }
            }
        }

        Ok(stats)
    }
}

fn required_controllers(limits: &CgroupLimits) -> Vec<&'static str> {
    let mut required = Vec::new();
    if limits.memory.is_some() || limits.memory_swap.is_some() {
        required.push("memory");
    }
    if limits.cpu_quota.unwrap_or(0) > 0 {
        required.push("cpu");
    }
    if limits.pids_limit.unwrap_or(0) > 0 {
        required.push("pids");
    }
    required
}

fn read_u64(path: &Path) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn write_file(leaf: &Path, filename: &str, value: &str) -> Result<()> {
    let file = leaf.join(filename);
    fs::write(&file, value)
        .map_err(|e| Error::IoFailure(format!("failed to write '{value}' to {}: {e}", file.display())))
}

/// Resource usage snapshot for a single container's cgroup.
#[derive(Debug, Clone, Default)]
pub struct CgroupStats {
    pub memory_current: u64,
    pub memory_max: u64,
    pub memory_peak: u64,
    pub cpu_usage_nanos: u64,
    pub pids_current: u64,
    pub pids_max: u64,
    pub oom_kill: u64,
    pub pids_events_max: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_path_is_prefixed() {
        assert_eq!(CgroupController::rel_path("abc"), "minidocker/abc");
    }

    #[test]
    fn no_limits_means_is_unset() {
        assert!(CgroupLimits::default().is_unset());
    }

    #[test]
    fn swap_below_memory_is_invalid() {
        let ctrl = CgroupController::with_root(tempfile::tempdir().unwrap().path().to_path_buf());
        let leaf = tempfile::tempdir().unwrap();
        let err = ctrl
            .apply_swap(leaf.path(), 100, MemorySwap::Bytes(50))
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::InvalidConfig);
    }

    #[test]
    fn destroy_is_idempotent_when_absent() {
        let ctrl = CgroupController::with_root(tempfile::tempdir().unwrap().path().to_path_buf());
        ctrl.destroy("minidocker/does-not-exist").unwrap();
        ctrl.destroy("minidocker/does-not-exist").unwrap();
    }

    #[test]
    fn get_stats_on_missing_leaf_is_all_zero() {
        let ctrl = CgroupController::with_root(tempfile::tempdir().unwrap().path().to_path_buf());
        let stats = ctrl.get_stats("minidocker/missing").unwrap();
        assert_eq!(stats.memory_current, 0);
        assert_eq!(stats.cpu_usage_nanos, 0);
    }

    #[test]
    fn create_rejects_missing_controller() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("cgroup.controllers"), "cpu pids\n").unwrap();
        let ctrl = CgroupController::with_root(tmp.path().to_path_buf());
        let limits = CgroupLimits {
            memory: Some(1024),
            ..Default::default()
        };
        let err = ctrl.create("minidocker/abc", &limits).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::PreconditionFailed);
    }
}
