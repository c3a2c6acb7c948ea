use std::ffi::CString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use signal_hook::consts::signal::{SIGCHLD, SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;

use crate::collaborators::volume::FsVolumeStore;
use crate::core::error::{Error, Result};
use crate::core::model::ContainerConfig;
use crate::core::state::StateStore;
use crate::util::exitcode::from_wait_status;

use super::{mounts, namespaces};

/// Where the re-exec'd init process's stdout/stderr should end up before it
/// execs the user command.
#[derive(Clone, Copy)]
pub enum StdioTarget {
    /// Leave fds 1/2 exactly as inherited from the caller (foreground tty
    /// mode: the real terminal).
    Inherit,
    /// Hand the process a dup of this fd as its stdout/stderr.
    Redirect(RawFd),
}

/// The two process handles a caller needs after spawning a container:
/// `middle_pid` is the direct child to `waitpid` on for the final exit code;
/// `init_pid` is the container's actual PID 1, needed by the Supervisor for
/// cgroup attach and network setup.
pub struct ContainerProcess {
    pub middle_pid: Pid,
    pub init_pid: Pid,
}

/// Re-exec this binary as `MINIDOCKER_INIT=1`: a fresh, single-threaded
/// process reached by `execve` rather than a `fork()` off of whatever thread
/// pool the caller happens to be running (the Launcher's non-tty path has
/// already spawned tee threads by this point, and `setns`/`unshare` are
/// per-thread operations best performed right after program entry).
///
/// That process unshares namespaces, then forks once more — `unshare` only
/// affects the *unsharing* process's future children, so a second fork is
/// required to actually land inside the new PID namespace as its PID 1 — and
/// relays the grandchild's pid back over an internal pipe before waiting on
/// it and exiting with its translated status.
pub fn spawn_container(
    cfg: &ContainerConfig,
    container_dir: &Path,
    stdout: StdioTarget,
    stderr: StdioTarget,
) -> Result<ContainerProcess> {
    let current_exe = std::env::current_exe().map_err(Error::from)?;
    let (pid_read, pid_write) = nix::unistd::pipe()?;
    let pid_read_raw = pid_read.into_raw_fd();
    let pid_write_raw = pid_write.into_raw_fd();

    let mut cmd = Command::new(current_exe);
    cmd.env("MINIDOCKER_INIT", "1");
    cmd.env(
        "MINIDOCKER_STATE_PATH",
        container_dir.to_string_lossy().to_string(),
    );
    cmd.env("MINIDOCKER_INIT_PID_FD", "3");
    redirect_stdio(&mut cmd, stdout, stderr)?;

    // SAFETY: only async-signal-safe calls (dup2, close) between fork and
    // exec, matching the contract of `pre_exec`.
    unsafe {
        cmd.pre_exec(move || {
            if libc::dup2(pid_write_raw, 3) < 0 {
                return Err(io::Error::last_os_error());
            }
            if pid_write_raw != 3 {
                libc::close(pid_write_raw);
            }
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .map_err(|e| Error::Internal(format!("failed to re-exec as container init: {e}")))?;
    let middle_pid = Pid::from_raw(child.id() as i32);

    // Close our own copy of the write end; the child closed its copy (after
    // dup'ing it onto fd 3) inside `pre_exec` above.
    unsafe { libc::close(pid_write_raw) };

    let mut reader = unsafe { File::from_raw_fd(pid_read_raw) };
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::Internal(format!("failed to read init pid from container init process: {e}")))?;
    let init_pid = Pid::from_raw(i32::from_le_bytes(buf));

    Ok(ContainerProcess {
        middle_pid,
        init_pid,
    })
}

fn redirect_stdio(cmd: &mut Command, stdout: StdioTarget, stderr: StdioTarget) -> Result<()> {
    match stdout {
        StdioTarget::Inherit => {
            cmd.stdout(Stdio::inherit());
        }
        StdioTarget::Redirect(fd) => {
            let dup = nix::unistd::dup(fd)?;
            cmd.stdout(unsafe { Stdio::from_raw_fd(dup) });
        }
    }
    match stderr {
        StdioTarget::Inherit => {
            cmd.stderr(Stdio::inherit());
        }
        StdioTarget::Redirect(fd) => {
            let dup = nix::unistd::dup(fd)?;
            cmd.stderr(unsafe { Stdio::from_raw_fd(dup) });
        }
    }
    Ok(())
}

/// Entry point for `MINIDOCKER_INIT=1`: reload the container's config from
/// `MINIDOCKER_STATE_PATH` (falling back to the legacy inline
/// `MINIDOCKER_CONFIG` JSON when the state-path load is absent or fails) and
/// run the middle/PID-1 fork chain. Never returns.
pub fn run_init_entry() -> ! {
    match run_init_entry_inner() {
        Ok(()) => unreachable!("run_middle never returns"),
        Err(e) => {
            eprintln!("minidocker: {e}");
            std::process::exit(1);
        }
    }
}

fn run_init_entry_inner() -> Result<()> {
    let pid_fd: RawFd = std::env::var("MINIDOCKER_INIT_PID_FD")
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::invalid_config("MINIDOCKER_INIT_PID_FD not set for container init"))?;

    let cfg = load_config_from_state_path().or_else(|_| load_legacy_inline_config())?;

    run_middle(&cfg, pid_fd)
}

/// Primary config load path: `MINIDOCKER_STATE_PATH` names the container
/// directory, and `config.json` underneath it is read via `StateStore`.
fn load_config_from_state_path() -> Result<ContainerConfig> {
    let container_dir = PathBuf::from(
        std::env::var("MINIDOCKER_STATE_PATH")
            .map_err(|_| Error::invalid_config("MINIDOCKER_STATE_PATH not set for container init"))?,
    );
    let id = container_dir
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_config("invalid MINIDOCKER_STATE_PATH"))?;

    let root = derive_state_root(&container_dir);
    let store = StateStore::new(root)?;
    store.load_config(&id)
}

/// Legacy compatibility path named in spec §6/§9: an inline JSON-encoded
/// `ContainerConfig` carried directly in `MINIDOCKER_CONFIG`, read only when
/// the state-path load is unavailable.
fn load_legacy_inline_config() -> Result<ContainerConfig> {
    let json = std::env::var("MINIDOCKER_CONFIG").map_err(|_| {
        Error::invalid_config(
            "neither MINIDOCKER_STATE_PATH nor MINIDOCKER_CONFIG set for container init",
        )
    })?;
    serde_json::from_str(&json).map_err(Error::from)
}

/// Unshares namespaces, forks PID 1, relays its pid over `pid_fd`, waits for
/// it, and exits with its translated status. Never returns.
fn run_middle(cfg: &ContainerConfig, pid_fd: RawFd) -> ! {
    let flags = namespaces::container_clone_flags(cfg.network.mode != crate::core::model::NetworkMode::None);
    if let Err(e) = namespaces::unshare_namespaces(flags) {
        eprintln!("minidocker: {e}");
        std::process::exit(1);
    }

    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child: init_pid }) => {
            let raw = init_pid.as_raw().to_le_bytes();
            unsafe { libc::write(pid_fd, raw.as_ptr() as *const _, raw.len()) };
            unsafe { libc::close(pid_fd) };
            match waitpid(init_pid, None) {
                Ok(status) => std::process::exit(from_wait_status(status)),
                Err(e) => {
                    eprintln!("minidocker: waitpid on container init failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Ok(ForkResult::Child) => {
            unsafe { libc::close(pid_fd) };
            run_as_pid1(cfg)
        }
        Err(e) => {
            eprintln!("minidocker: fork failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Runs inside the grandchild forked by `run_middle`: sets up the rootfs,
/// drops privileges, forks the user command, and reaps/forwards signals for
/// the rest of PID 1's life.
fn run_as_pid1(cfg: &ContainerConfig) -> ! {
    if let Err(e) = setup_container_environment(cfg) {
        eprintln!("minidocker: {e}");
        std::process::exit(1);
    }

    let argv = cfg.argv();
    if argv.is_empty() || argv[0].is_empty() {
        eprintln!("minidocker: no command specified");
        std::process::exit(1);
    }

    if let Some(user_spec) = &cfg.user {
        if let Err(e) = apply_user_switch(user_spec) {
            eprintln!("minidocker: {e}");
            std::process::exit(1);
        }
    }

    if let Some(dir) = &cfg.working_dir {
        if let Err(e) = nix::unistd::chdir(dir.as_str()) {
            eprintln!("minidocker: chdir to working directory '{dir}' failed: {e}");
            std::process::exit(1);
        }
    }

    let inherited: Vec<(String, String)> = std::env::vars().collect();
    let child_env = crate::util::envfilter::build_child_env(inherited, &cfg.env);

    // Step 7: signals must be armed before the child is forked, or a
    // fast-exiting child's SIGCHLD can be lost entirely.
    let signals = match Signals::new([
        SIGCHLD, SIGTERM, SIGINT, SIGHUP, SIGQUIT, SIGUSR1, SIGUSR2,
    ]) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("minidocker: failed to install signal handlers: {e}");
            std::process::exit(1);
        }
    };

    let child = match spawn_user_command(&argv, &child_env) {
        Ok(pid) => pid,
        Err(e) => {
            eprintln!("minidocker: failed to start container command: {e}");
            std::process::exit(1);
        }
    };

    reap_and_forward_loop(signals, child)
}

/// RootfsSetup, hostname, mount propagation, and (for the compat no-rootfs
/// path) direct mounts under `/`.
fn setup_container_environment(cfg: &ContainerConfig) -> Result<()> {
    let root = std::env::var("MINIDOCKER_STATE_PATH")
        .ok()
        .map(PathBuf::from)
        .and_then(|dir| derive_state_root(&dir));
    let store = StateStore::new(root)?;
    let volumes = FsVolumeStore::new(store);

    mounts::setup_rootfs(&cfg.rootfs, &cfg.mounts, &volumes)?;
    namespaces::set_hostname(&cfg.hostname)?;
    namespaces::make_mount_propagation_private()?;

    if cfg.rootfs.is_empty() && !cfg.mounts.is_empty() {
        mounts::mount_user_mounts_at(Path::new("/"), &cfg.mounts, &volumes)?;
    }

    Ok(())
}

/// Given `<root>/containers/<id>`, return `<root>`.
pub(crate) fn derive_state_root(container_dir: &Path) -> Option<PathBuf> {
    container_dir.parent()?.parent().map(Path::to_path_buf)
}

/// Parse `user[:group]`, resolving numeric or `/etc/passwd`/`/etc/group`
/// names read from the container's own (already pivoted) rootfs, and drop
/// privileges in the mandatory `setgroups` → `setgid` → `setuid` order.
fn apply_user_switch(spec: &str) -> Result<()> {
    let (user_part, group_part) = match spec.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (spec, None),
    };

    let uid = resolve_uid(user_part)?;
    let gid = match group_part {
        Some(g) => resolve_gid(g)?,
        None => uid,
    };

    nix::unistd::setgroups(&[nix::unistd::Gid::from_raw(gid)])
        .map_err(|e| Error::PermissionDenied(format!("setgroups failed: {e}")))?;
    nix::unistd::setgid(nix::unistd::Gid::from_raw(gid))
        .map_err(|e| Error::PermissionDenied(format!("setgid failed: {e}")))?;
    nix::unistd::setuid(nix::unistd::Uid::from_raw(uid))
        .map_err(|e| Error::PermissionDenied(format!("setuid failed: {e}")))?;

    Ok(())
}

fn resolve_uid(s: &str) -> Result<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    for line in fs::read_to_string("/etc/passwd").unwrap_or_default().lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() >= 3 && fields[0] == s {
            return fields[2]
                .parse()
                .map_err(|_| Error::invalid_config(format!("malformed uid for user '{s}' in /etc/passwd")));
        }
    }
    Err(Error::invalid_config(format!("unknown user '{s}'")))
}

fn resolve_gid(s: &str) -> Result<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    for line in fs::read_to_string("/etc/group").unwrap_or_default().lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() >= 3 && fields[0] == s {
            return fields[2]
                .parse()
                .map_err(|_| Error::invalid_config(format!("malformed gid for group '{s}' in /etc/group")));
        }
    }
    Err(Error::invalid_config(format!("unknown group '{s}'")))
}

/// Fork and exec the user command. The parent (still PID 1) gets back the
/// child's pid; the child execs or exits 127/126 on failure.
fn spawn_user_command(argv: &[String], env: &[(String, String)]) -> Result<Pid> {
    match unsafe { unistd::fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            for (k, _) in std::env::vars() {
                std::env::remove_var(k);
            }
            for (k, v) in env {
                std::env::set_var(k, v);
            }

            let program = match CString::new(argv[0].as_str()) {
                Ok(p) => p,
                Err(_) => std::process::exit(126),
            };
            let c_args: Vec<CString> = argv
                .iter()
                .filter_map(|a| CString::new(a.as_str()).ok())
                .collect();

            match nix::unistd::execvp(&program, &c_args) {
                Ok(_) => unreachable!(),
                Err(nix::Error::ENOENT) => std::process::exit(127),
                Err(_) => std::process::exit(126),
            }
        }
    }
}

/// Steps 9-11: an immediate non-blocking reap attempt, then the
/// signal-receive loop that reaps all children on SIGCHLD (recording the
/// main child's exit) and forwards terminating/user signals to the main
/// child until it has exited.
fn reap_and_forward_loop(mut signals: Signals, main_child: Pid) -> ! {
    let mut main_exit_code = reap_all(main_child, None);

    if main_exit_code.is_none() {
        'outer: for signal in &mut signals {
            match signal {
                SIGCHLD => {
                    main_exit_code = reap_all(main_child, main_exit_code);
                }
                SIGTERM | SIGINT | SIGHUP | SIGQUIT | SIGUSR1 | SIGUSR2 => {
                    if main_exit_code.is_none() {
                        if let Ok(sig) = Signal::try_from(signal) {
                            let _ = kill(main_child, sig);
                        }
                    }
                }
                _ => {}
            }
            if main_exit_code.is_some() {
                break 'outer;
            }
        }
    }

    std::process::exit(main_exit_code.unwrap_or(1));
}

fn reap_all(main_child: Pid, mut main_exit_code: Option<i32>) -> Option<i32> {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                if pid == main_child {
                    main_exit_code = Some(code);
                }
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                if pid == main_child {
                    main_exit_code = Some(128 + sig as i32);
                }
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => continue,
            Err(nix::errno::Errno::ECHILD) => break,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
    main_exit_code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_state_root_strips_containers_and_id() {
        let dir = Path::new("/var/lib/minidocker/containers/abc123");
        assert_eq!(
            derive_state_root(dir),
            Some(PathBuf::from("/var/lib/minidocker"))
        );
    }

    #[test]
    fn derive_state_root_none_for_shallow_path() {
        assert_eq!(derive_state_root(Path::new("abc")), None);
    }
}
