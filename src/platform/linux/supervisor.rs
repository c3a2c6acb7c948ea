use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use crate::collaborators::network::{NetworkManager, StubNetworkManager};
use crate::core::error::{Error, Result};
use crate::core::state::StateStore;
use crate::util::exitcode::from_wait_status;

use super::cgroups::CgroupController;
use super::init::{self, StdioTarget};

/// Entry point for `MINIDOCKER_SHIM=1`: read the inline config/state path,
/// attach cgroup and network, signal readiness over the notify pipe, and
/// wait for the container to exit. Never returns — the process always ends
/// via `std::process::exit`.
pub fn run_supervisor() -> ! {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("minidocker: supervisor failed: {e}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let container_dir = PathBuf::from(
        std::env::var("MINIDOCKER_STATE_PATH")
            .map_err(|_| Error::invalid_config("MINIDOCKER_STATE_PATH not set for supervisor"))?,
    );
    let id = container_dir
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_config("invalid MINIDOCKER_STATE_PATH"))?;

    let notify_fd: RawFd = std::env::var("MINIDOCKER_SHIM_NOTIFY_FD")
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::invalid_config("MINIDOCKER_SHIM_NOTIFY_FD not set for supervisor"))?;
    // Close-on-exec so this fd never survives into the user command's exec,
    // which happens several forks below us in the same process tree.
    fcntl(notify_fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(|e| Error::Internal(format!("fcntl on notify fd failed: {e}")))?;

    let root = init::derive_state_root(&container_dir);
    let store = StateStore::new(root)?;
    let cfg = store.load_config(&id)?;

    match attach_and_run(&store, &cfg, notify_fd) {
        Ok(code) => Ok(code),
        Err(e) => {
            notify(notify_fd, &format!("ERR: {e}\n"));
            Err(e)
        }
    }
}

fn attach_and_run(
    store: &StateStore,
    cfg: &crate::core::model::ContainerConfig,
    notify_fd: RawFd,
) -> Result<i32> {
    let stdout_path = store.log_path(&cfg.id, "stdout.log");
    let stderr_path = store.log_path(&cfg.id, "stderr.log");
    let stdout_file = File::create(&stdout_path)?;
    let stderr_file = File::create(&stderr_path)?;

    let proc = init::spawn_container(
        cfg,
        &store.container_dir(&cfg.id),
        StdioTarget::Redirect(stdout_file.as_raw_fd()),
        StdioTarget::Redirect(stderr_file.as_raw_fd()),
    )?;
    drop(stdout_file);
    drop(stderr_file);

    let cgroup = CgroupController::new();
    let rel_path = CgroupController::rel_path(&cfg.id);
    let has_limits = !cfg.cgroup_limits.is_unset();

    if has_limits {
        if let Err(e) = cgroup.create(&rel_path, &cfg.cgroup_limits) {
            kill_and_reap(proc.middle_pid);
            return Err(e);
        }
        if let Err(e) = cgroup.apply_pid(&rel_path, proc.init_pid.as_raw() as u32) {
            let _ = cgroup.destroy(&rel_path);
            kill_and_reap(proc.middle_pid);
            return Err(e);
        }
        store.set_cgroup_path(&cfg.id, &rel_path)?;
    }

    let network = StubNetworkManager;
    // Record the bare mode before Setup runs so `inspect` reflects it even if
    // setup is still in flight or fails partway through.
    store.set_network_state(
        &cfg.id,
        crate::core::model::NetworkState {
            mode: cfg.network.mode.clone(),
            ..Default::default()
        },
    )?;
    let network_state = match network.ensure_bridge(&cfg.network).and_then(|_| {
        network.setup(&cfg.id, &cfg.network, proc.init_pid.as_raw() as u32)
    }) {
        Ok(state) => state,
        Err(e) => {
            if has_limits {
                let _ = cgroup.destroy(&rel_path);
            }
            kill_and_reap(proc.middle_pid);
            return Err(e);
        }
    };
    store.set_network_state(&cfg.id, network_state.clone())?;

    store.set_running(&cfg.id, proc.init_pid.as_raw() as u32)?;
    notify(notify_fd, "OK\n");

    let status = waitpid(proc.middle_pid, None)
        .map_err(|e| Error::Internal(format!("waitpid on supervised container failed: {e}")))?;
    let exit_code = from_wait_status(status);
    store.set_stopped(&cfg.id, exit_code)?;

    // Teardown order: network before cgroup. Best-effort — a failure here
    // must not overwrite the exit code already recorded above.
    if let Err(e) = network.teardown(&cfg.id, &network_state) {
        log::warn!("network teardown failed for {}: {e}", cfg.id);
    }
    if has_limits {
        if let Err(e) = cgroup.destroy(&rel_path) {
            log::warn!("cgroup teardown failed for {}: {e}", cfg.id);
        }
    }

    Ok(exit_code)
}

fn kill_and_reap(middle_pid: Pid) {
    let _ = nix::sys::signal::kill(middle_pid, nix::sys::signal::Signal::SIGKILL);
    let _ = waitpid(middle_pid, None);
}

fn notify(fd: RawFd, message: &str) {
    unsafe {
        libc::write(fd, message.as_ptr() as *const _, message.len());
        libc::close(fd);
    }
}
