use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;

use nix::sys::wait::waitpid;

use crate::core::error::{Error, Result};
use crate::core::model::{ContainerConfig, ContainerStatus};
use crate::core::state::StateStore;
use crate::util::exitcode::from_wait_status;

use super::init::{self, StdioTarget};

/// Outcome of `Launcher::run`: either the foreground path's final exit code,
/// or the detached path's freshly-created container id.
pub enum RunOutcome {
    Foreground { exit_code: i32 },
    Detached { container_id: String },
}

/// Orchestrates `run`: writes the state record, then either runs the
/// container in the foreground or hands it off to a detached Supervisor.
pub struct Launcher {
    store: StateStore,
}

impl Launcher {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn run(&self, cfg: ContainerConfig) -> Result<RunOutcome> {
        self.store.create(&cfg)?;

        let outcome = if cfg.detached {
            self.run_detached(&cfg)
        } else {
            self.run_foreground(&cfg)
        };

        if outcome.is_err() {
            self.cleanup_if_still_created(&cfg.id);
        }

        outcome
    }

    fn cleanup_if_still_created(&self, id: &str) {
        let still_created = self
            .store
            .load_state(id)
            .map(|s| s.status == ContainerStatus::Created)
            .unwrap_or(true);
        if still_created {
            let _ = self.store.force_delete(id);
        }
    }

    fn run_foreground(&self, cfg: &ContainerConfig) -> Result<RunOutcome> {
        let stdout_path = self.store.log_path(&cfg.id, "stdout.log");
        let stderr_path = self.store.log_path(&cfg.id, "stderr.log");

        let (stdout_target, stderr_target, tee_fds, tee_handles) = if cfg.tty {
            (StdioTarget::Inherit, StdioTarget::Inherit, Vec::new(), Vec::new())
        } else {
            let (out_read, out_write) = nix::unistd::pipe()?;
            let (err_read, err_write) = nix::unistd::pipe()?;
            let out_write_raw = out_write.into_raw_fd();
            let err_write_raw = err_write.into_raw_fd();
            let out_read_raw = out_read.into_raw_fd();
            let err_read_raw = err_read.into_raw_fd();

            let out_log = File::create(&stdout_path)?;
            let err_log = File::create(&stderr_path)?;
            let out_handle = crate::util::tee::spawn_tee(out_read_raw, io::stdout(), out_log);
            let err_handle = crate::util::tee::spawn_tee(err_read_raw, io::stderr(), err_log);

            (
                StdioTarget::Redirect(out_write_raw),
                StdioTarget::Redirect(err_write_raw),
                vec![out_write_raw, err_write_raw],
                vec![out_handle, err_handle],
            )
        };

        let proc = init::spawn_container(
            cfg,
            &self.store.container_dir(&cfg.id),
            stdout_target,
            stderr_target,
        )?;

        // Close our copies of the pipe write ends: once every fd referencing
        // them (ours and the container's) is closed, the tee threads see EOF.
        for fd in &tee_fds {
            unsafe { libc::close(*fd) };
        }

        self.store.set_running(&cfg.id, proc.init_pid.as_raw() as u32)?;

        let status = waitpid(proc.middle_pid, None)
            .map_err(|e| Error::Internal(format!("waitpid on launched container failed: {e}")))?;
        let exit_code = from_wait_status(status);

        self.store.set_stopped(&cfg.id, exit_code)?;

        for handle in tee_handles {
            let _ = handle.join();
        }

        Ok(RunOutcome::Foreground { exit_code })
    }

    fn run_detached(&self, cfg: &ContainerConfig) -> Result<RunOutcome> {
        let container_dir = self.store.container_dir(&cfg.id);
        let current_exe = std::env::current_exe().map_err(Error::from)?;

        let (notify_read, notify_write) = nix::unistd::pipe()?;
        let notify_read_raw = notify_read.into_raw_fd();
        let notify_write_raw = notify_write.into_raw_fd();

        let mut cmd = Command::new(current_exe);
        cmd.env("MINIDOCKER_SHIM", "1");
        cmd.env("MINIDOCKER_STATE_PATH", container_dir.to_string_lossy().to_string());
        cmd.env("MINIDOCKER_SHIM_NOTIFY_FD", "3");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        // SAFETY: only async-signal-safe calls (setsid, dup2, close) between
        // fork and exec, matching the contract of `pre_exec`. Closing our
        // copy of the write end after the dup is required: otherwise the
        // child execs holding two open references to the pipe's write side
        // (fd 3 and the original), and the notify pipe never reaches EOF
        // until the long-lived supervisor itself exits.
        unsafe {
            cmd.pre_exec(move || {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::dup2(notify_write_raw, 3) < 0 {
                    return Err(io::Error::last_os_error());
                }
                if notify_write_raw != 3 {
                    libc::close(notify_write_raw);
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn supervisor: {e}")))?;
        unsafe { libc::close(notify_write_raw) };

        match read_notify_with_timeout(notify_read_raw, Duration::from_secs(5)) {
            Ok(line) if line.trim_end() == "OK" => Ok(RunOutcome::Detached {
                container_id: cfg.id.clone(),
            }),
            Ok(line) if line.starts_with("ERR: ") => {
                let _ = child.wait();
                Err(Error::Internal(line.trim_end().to_string()))
            }
            Ok(_) => {
                let _ = child.wait();
                Err(Error::Internal(
                    "supervisor readiness handshake produced no response".to_string(),
                ))
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

/// Block on a background thread reading a single line from the notify pipe,
/// with an overall timeout. A pipe has no portable read-timeout of its own,
/// so the blocking read happens off-thread and we bound how long we wait for
/// it to report back. Reading a line (rather than to EOF) means this doesn't
/// depend on every copy of the write end being closed — only the one the
/// handshake protocol actually writes to.
fn read_notify_with_timeout(read_fd: RawFd, timeout: Duration) -> Result<String> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let mut reader = BufReader::new(unsafe { File::from_raw_fd(read_fd) });
        let mut line = String::new();
        let _ = reader.read_line(&mut line);
        let _ = tx.send(line);
    });

    rx.recv_timeout(timeout)
        .map_err(|_| Error::TimeoutExceeded("supervisor readiness handshake timed out after 5s".to_string()))
}
