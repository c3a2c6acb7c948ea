use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};

use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::termios::{self, SetArg};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::state::{pid_alive, StateStore};
use crate::util::envfilter::build_child_env;
use crate::util::exitcode::from_wait_status;

use super::namespaces;

/// A command to run inside an already-running container's namespaces,
/// serialized across the `MINIDOCKER_EXEC=1` re-exec boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    pub container_pid: u32,
    pub argv: Vec<String>,
    pub tty: bool,
    pub interactive: bool,
}

/// CLI-side entry: resolve `id_prefix` to a running container's pid, then
/// re-exec this binary as `MINIDOCKER_EXEC=1` so the namespace join happens
/// on a disposable, freshly-exec'd process instead of the long-lived CLI
/// process — `setns` is a per-thread operation, and a process that has
/// already done arbitrary prior work is the wrong place to perform it.
pub fn spawn_exec_join(
    store: &StateStore,
    id_prefix: &str,
    argv: Vec<String>,
    tty: bool,
    interactive: bool,
) -> Result<i32> {
    let id = store.resolve_id(id_prefix)?;
    let state = store.load_state(&id)?;

    if state.status != crate::core::model::ContainerStatus::Running || !pid_alive(state.pid) {
        return Err(Error::precondition_failed(format!(
            "container {id} is not running"
        )));
    }
    if argv.is_empty() || argv[0].is_empty() {
        return Err(Error::invalid_config("no command specified for exec"));
    }

    let exec_cfg = ExecConfig {
        container_pid: state.pid,
        argv,
        tty,
        interactive,
    };
    let json = serde_json::to_string(&exec_cfg)?;

    let current_exe = std::env::current_exe().map_err(Error::from)?;
    let mut cmd = Command::new(current_exe);
    cmd.env("MINIDOCKER_EXEC", "1");
    cmd.env("MINIDOCKER_EXEC_CONFIG", json);
    cmd.stdin(Stdio::inherit());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Internal(format!("failed to re-exec for exec-join: {e}")))?;
    let status = child
        .wait()
        .map_err(|e| Error::Internal(format!("waitpid on exec-join process failed: {e}")))?;

    Ok(match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    })
}

/// Entry point for `MINIDOCKER_EXEC=1`: join the target container's
/// namespaces on this fresh, single-threaded process — satisfying `setns`'s
/// per-thread contract by construction rather than an explicit pinning API —
/// and fork/exec the requested command inside them. Never returns.
pub fn run_exec_entry() -> ! {
    match run_exec_entry_inner() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("minidocker: exec failed: {e}");
            std::process::exit(1);
        }
    }
}

fn run_exec_entry_inner() -> Result<i32> {
    let json = std::env::var("MINIDOCKER_EXEC_CONFIG")
        .map_err(|_| Error::invalid_config("MINIDOCKER_EXEC_CONFIG not set for exec"))?;
    let cfg: ExecConfig = serde_json::from_str(&json)?;

    let fds = namespaces::open_namespace_fds(cfg.container_pid)?;
    namespaces::join_namespaces(&fds)?;

    if cfg.tty {
        // The controlling terminal's Ctrl-C must reach the spawned child,
        // not us — we still share a session with the real terminal until
        // the child calls setsid.
        unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }
            .map_err(|e| Error::Internal(format!("failed to ignore SIGINT: {e}")))?;
    }

    nix::unistd::chdir("/")?;

    let inherited: Vec<(String, String)> = std::env::vars().collect();
    let child_env = build_child_env(inherited, &[]);

    if cfg.tty {
        run_with_pty(&cfg.argv, &child_env, cfg.interactive)
    } else {
        run_plain(&cfg.argv, &child_env)
    }
}

fn run_plain(argv: &[String], env: &[(String, String)]) -> Result<i32> {
    match unsafe { unistd::fork() }? {
        ForkResult::Parent { child } => {
            let status = waitpid(child, None)
                .map_err(|e| Error::Internal(format!("waitpid on exec command failed: {e}")))?;
            Ok(from_wait_status(status))
        }
        ForkResult::Child => exec_into(argv, env),
    }
}

fn run_with_pty(argv: &[String], env: &[(String, String)], interactive: bool) -> Result<i32> {
    let pty = nix::pty::openpty(None, None)?;
    let master_raw = pty.master.into_raw_fd();
    let slave_raw = pty.slave.into_raw_fd();
    set_winsize(master_raw, &get_winsize(io::stdin().as_raw_fd()));

    match unsafe { unistd::fork() }? {
        ForkResult::Parent { child } => {
            unsafe { libc::close(slave_raw) };
            run_pty_parent(child, master_raw, interactive)
        }
        ForkResult::Child => {
            unsafe { libc::close(master_raw) };
            if unsafe { libc::setsid() } < 0 {
                std::process::exit(1);
            }
            if unsafe { libc::ioctl(slave_raw, libc::TIOCSCTTY as _, 0) } < 0 {
                std::process::exit(1);
            }
            let _ = nix::unistd::dup2(slave_raw, 0);
            let _ = nix::unistd::dup2(slave_raw, 1);
            let _ = nix::unistd::dup2(slave_raw, 2);
            if slave_raw > 2 {
                unsafe { libc::close(slave_raw) };
            }
            exec_into(argv, env)
        }
    }
}

fn run_pty_parent(child: Pid, master_raw: RawFd, interactive: bool) -> Result<i32> {
    let original_termios = if interactive {
        termios::tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(0) }).ok()
    } else {
        None
    };

    if interactive {
        if let Ok(mut raw) = termios::tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(0) }) {
            termios::cfmakeraw(&mut raw);
            let _ = termios::tcsetattr(
                unsafe { std::os::fd::BorrowedFd::borrow_raw(0) },
                SetArg::TCSANOW,
                &raw,
            );
        }
    }

    let winch_handle = spawn_winch_forwarder(master_raw);

    let out_handle = {
        let master_dup = unsafe { libc::dup(master_raw) };
        std::thread::spawn(move || {
            let mut reader = unsafe { File::from_raw_fd(master_dup) };
            let mut stdout = io::stdout();
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = stdout.write_all(&buf[..n]);
                        let _ = stdout.flush();
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
    };

    if interactive {
        // Never joined: a blocked read on stdin must not hold up shutdown.
        let master_dup = unsafe { libc::dup(master_raw) };
        std::thread::spawn(move || {
            let mut writer = unsafe { File::from_raw_fd(master_dup) };
            let mut stdin = io::stdin();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if writer.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
    }

    let status = waitpid(child, None)
        .map_err(|e| Error::Internal(format!("waitpid on exec command failed: {e}")))?;
    let code = from_wait_status(status);

    if let Some(orig) = original_termios {
        let _ = termios::tcsetattr(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(0) },
            SetArg::TCSANOW,
            &orig,
        );
    }

    unsafe { libc::close(master_raw) };
    let _ = out_handle.join();
    let _ = winch_handle; // detached: dropped once the process exits

    Ok(code)
}

fn spawn_winch_forwarder(master_raw: RawFd) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let signals = match signal_hook::iterator::Signals::new([signal_hook::consts::signal::SIGWINCH]) {
            Ok(s) => s,
            Err(_) => return,
        };
        for _ in signals.forever() {
            let ws = get_winsize(0);
            set_winsize(master_raw, &ws);
        }
    })
}

fn get_winsize(fd: RawFd) -> libc::winsize {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) };
    ws
}

fn set_winsize(fd: RawFd, ws: &libc::winsize) {
    unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, ws) };
}

fn exec_into(argv: &[String], env: &[(String, String)]) -> ! {
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
    let c_args: Vec<CString> = argv.iter().filter_map(|a| CString::new(a.as_str()).ok()).collect();

    match nix::unistd::execvp(&program, &c_args) {
        Ok(_) => unreachable!(),
        Err(nix::Error::ENOENT) => std::process::exit(127),
        Err(_) => std::process::exit(126),
    }
}
