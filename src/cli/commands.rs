use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::cli::{Cli, Command};
use crate::core::error::{Error, Result};
use crate::core::id::generate_id;
use crate::core::model::{
    CgroupLimits, ContainerConfig, ContainerStatus, MemorySwap, Mount, NetworkConfig, NetworkMode,
    PortMapping,
};
use crate::core::state::{pid_alive, StateStore};

const STOP_GRACE: Duration = Duration::from_secs(10);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Dispatch a parsed CLI command, returning the process exit code.
pub fn dispatch(cli: Cli) -> Result<i32> {
    let store = StateStore::new(cli.root.map(PathBuf::from))?;
    store.ensure_root()?;

    match cli.command {
        Command::Run {
            detached,
            rootfs,
            memory,
            memory_swap,
            cpus,
            pids_limit,
            hostname,
            env,
            workdir,
            user,
            mount,
            network,
            publish,
            interactive,
            tty,
            cmd,
        } => cmd_run(
            &store,
            RunArgs {
                detached,
                rootfs,
                memory,
                memory_swap,
                cpus,
                pids_limit,
                hostname,
                env,
                workdir,
                user,
                mount,
                network,
                publish,
                interactive,
                tty,
                cmd,
            },
        ),
        Command::Exec {
            id,
            interactive,
            tty,
            cmd,
        } => cmd_exec(&store, &id, cmd, tty, interactive),
        Command::Kill { id } => cmd_kill(&store, &id),
        Command::Stop { id } => cmd_stop(&store, &id),
        Command::Ps => cmd_ps(&store),
        Command::Inspect { id } => cmd_inspect(&store, &id),
        Command::Logs { id } => cmd_logs(&store, &id),
        Command::Rm { id, force } => cmd_rm(&store, &id, force),
    }
}

// ─── run ────────────────────────────────────────────────────────────────────

struct RunArgs {
    detached: bool,
    rootfs: String,
    memory: Option<u64>,
    memory_swap: Option<String>,
    cpus: Option<f64>,
    pids_limit: Option<u64>,
    hostname: Option<String>,
    env: Vec<String>,
    workdir: Option<String>,
    user: Option<String>,
    mount: Vec<String>,
    network: Option<String>,
    publish: Vec<String>,
    interactive: bool,
    tty: bool,
    cmd: Vec<String>,
}

fn cmd_run(store: &StateStore, args: RunArgs) -> Result<i32> {
    let cgroup_limits = build_cgroup_limits(&args)?;
    let network_cfg = build_network_config(args.network.as_deref(), &args.publish)?;
    let mounts = args
        .mount
        .iter()
        .map(|m| parse_mount(m))
        .collect::<Result<Vec<_>>>()?;

    let command = args.cmd[0].clone();
    let rest = args.cmd[1..].to_vec();

    let id = generate_id();
    // Spec default: the container's hostname is the first 12 hex chars of
    // its own id unless the caller overrides it with `--hostname`.
    let hostname = args
        .hostname
        .unwrap_or_else(|| crate::core::id::short_id(&id).to_string());

    let cfg = ContainerConfig {
        id,
        command,
        args: rest,
        hostname,
        tty: args.tty,
        interactive: args.interactive,
        rootfs: args.rootfs,
        detached: args.detached,
        env: args.env,
        working_dir: args.workdir,
        user: args.user,
        mounts,
        cgroup_limits,
        network: network_cfg,
        created_at: Utc::now(),
    };

    #[cfg(not(target_os = "linux"))]
    {
        let _ = cfg;
        return Err(Error::PlatformUnsupported(
            "minidocker requires Linux namespaces and cgroup v2".to_string(),
        ));
    }

    #[cfg(target_os = "linux")]
    {
        use crate::platform::linux::{Launcher, RunOutcome};

        let launcher = Launcher::new(store.clone());
        match launcher.run(cfg)? {
            RunOutcome::Foreground { exit_code } => Ok(exit_code),
            RunOutcome::Detached { container_id } => {
                println!("{container_id}");
                Ok(0)
            }
        }
    }
}

fn build_cgroup_limits(args: &RunArgs) -> Result<CgroupLimits> {
    let memory_swap = match &args.memory_swap {
        None => None,
        Some(s) if s == "-1" => Some(MemorySwap::Unlimited),
        Some(s) => Some(MemorySwap::Bytes(s.parse().map_err(|_| {
            Error::invalid_config(format!("invalid --memory-swap value '{s}'"))
        })?)),
    };

    let cpu_period = args.cpus.map(|_| 100_000u64);
    let cpu_quota = args.cpus.map(|c| (c * 100_000.0).round() as u64);

    Ok(CgroupLimits {
        memory: args.memory,
        memory_swap,
        cpu_quota,
        cpu_period,
        pids_limit: args.pids_limit,
    })
}

fn build_network_config(mode: Option<&str>, publish: &[String]) -> Result<NetworkConfig> {
    let mode = match mode {
        None | Some("none") => NetworkMode::None,
        Some("bridge") => NetworkMode::Bridge,
        Some(other) => {
            return Err(Error::invalid_config(format!(
                "unknown --network mode '{other}' (expected 'none' or 'bridge')"
            )))
        }
    };

    let ports = publish
        .iter()
        .map(|p| parse_port_mapping(p))
        .collect::<Result<Vec<_>>>()?;

    Ok(NetworkConfig { mode, ports })
}

fn parse_port_mapping(spec: &str) -> Result<PortMapping> {
    let (ports, protocol) = match spec.split_once('/') {
        Some((p, proto)) => (p, proto.to_string()),
        None => (spec, "tcp".to_string()),
    };
    let (host, container) = ports
        .split_once(':')
        .ok_or_else(|| Error::invalid_config(format!("invalid -p/--publish spec '{spec}' (expected HOST:CONTAINER)")))?;

    Ok(PortMapping {
        host_port: host
            .parse()
            .map_err(|_| Error::invalid_config(format!("invalid host port in '{spec}'")))?,
        container_port: container
            .parse()
            .map_err(|_| Error::invalid_config(format!("invalid container port in '{spec}'")))?,
        protocol,
    })
}

fn parse_mount(spec: &str) -> Result<Mount> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(Error::invalid_config(format!(
            "invalid -v/--mount spec '{spec}' (expected SRC:DST[:ro])"
        )));
    }
    let source = parts[0];
    let target = parts[1].to_string();
    let read_only = parts.get(2) == Some(&"ro");

    if source.starts_with('/') {
        Ok(Mount::Bind {
            source: source.to_string(),
            target,
            read_only,
        })
    } else {
        Ok(Mount::Volume {
            name: source.to_string(),
            resolved_host_path: None,
            target,
            read_only,
        })
    }
}

// ─── exec ───────────────────────────────────────────────────────────────────

fn cmd_exec(store: &StateStore, id: &str, cmd: Vec<String>, tty: bool, interactive: bool) -> Result<i32> {
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (store, id, cmd, tty, interactive);
        return Err(Error::PlatformUnsupported(
            "exec requires Linux namespaces".to_string(),
        ));
    }

    #[cfg(target_os = "linux")]
    {
        use crate::platform::linux::spawn_exec_join;
        spawn_exec_join(store, id, cmd, tty, interactive)
    }
}

// ─── kill / stop ────────────────────────────────────────────────────────────

fn cmd_kill(store: &StateStore, id_prefix: &str) -> Result<i32> {
    let id = store.resolve_id(id_prefix)?;
    let state = store.load_state(&id)?;

    if state.status != ContainerStatus::Running || !pid_alive(state.pid) {
        return Err(Error::precondition_failed(format!("container {id} is not running")));
    }

    send_signal(state.pid, nix::sys::signal::Signal::SIGKILL)?;
    Ok(0)
}

fn cmd_stop(store: &StateStore, id_prefix: &str) -> Result<i32> {
    let id = store.resolve_id(id_prefix)?;
    let state = store.load_state(&id)?;

    if state.status != ContainerStatus::Running || !pid_alive(state.pid) {
        return Err(Error::precondition_failed(format!("container {id} is not running")));
    }

    send_signal(state.pid, nix::sys::signal::Signal::SIGTERM)?;

    let deadline = Instant::now() + STOP_GRACE;
    while Instant::now() < deadline {
        if !pid_alive(state.pid) {
            return Ok(0);
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }

    if pid_alive(state.pid) {
        send_signal(state.pid, nix::sys::signal::Signal::SIGKILL)?;
    }
    Ok(0)
}

#[cfg(target_os = "linux")]
fn send_signal(pid: u32, sig: nix::sys::signal::Signal) -> Result<()> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), sig)
        .map_err(|e| Error::Internal(format!("failed to signal pid {pid}: {e}")))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_signal(_pid: u32, _sig: nix::sys::signal::Signal) -> Result<()> {
    Err(Error::PlatformUnsupported("signaling requires Linux".to_string()))
}

// ─── ps ─────────────────────────────────────────────────────────────────────

fn cmd_ps(store: &StateStore) -> Result<i32> {
    let ids = store.list_container_ids()?;

    println!(
        "{:<14} {:<8} {:<10} {:<24} {}",
        "CONTAINER ID", "PID", "STATUS", "CREATED", "COMMAND"
    );

    for id in ids {
        let Ok(cfg) = store.load_config(&id) else {
            continue;
        };
        let Ok(mut state) = store.load_state(&id) else {
            continue;
        };
        let _ = store.refresh_status(&mut state);

        let pid_str = if state.pid > 0 { state.pid.to_string() } else { "-".to_string() };
        let created = cfg.created_at.format("%Y-%m-%d %H:%M:%S UTC");
        let cmd_str = cfg.argv().join(" ");
        let cmd_display = if cmd_str.len() > 40 {
            format!("{}...", &cmd_str[..37])
        } else {
            cmd_str
        };

        println!(
            "{:<14} {:<8} {:<10} {:<24} {}",
            crate::core::id::short_id(&id),
            pid_str,
            state.status,
            created,
            cmd_display,
        );
    }

    Ok(0)
}

// ─── inspect ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct InspectOutput {
    config: ContainerConfig,
    state: crate::core::model::ContainerState,
}

fn cmd_inspect(store: &StateStore, id_prefix: &str) -> Result<i32> {
    let id = store.resolve_id(id_prefix)?;
    let config = store.load_config(&id)?;
    let mut state = store.load_state(&id)?;
    let _ = store.refresh_status(&mut state);

    let output = InspectOutput { config, state };
    let json = serde_json::to_string_pretty(&output)?;
    println!("{json}");
    Ok(0)
}

// ─── logs ───────────────────────────────────────────────────────────────────

fn cmd_logs(store: &StateStore, id_prefix: &str) -> Result<i32> {
    let id = store.resolve_id(id_prefix)?;

    let stdout_path = store.log_path(&id, "stdout.log");
    let stderr_path = store.log_path(&id, "stderr.log");

    if let Ok(contents) = std::fs::read_to_string(&stdout_path) {
        if !contents.is_empty() {
            print!("{contents}");
        }
    }
    if let Ok(contents) = std::fs::read_to_string(&stderr_path) {
        if !contents.is_empty() {
            eprint!("{contents}");
        }
    }

    Ok(0)
}

// ─── rm ─────────────────────────────────────────────────────────────────────

fn cmd_rm(store: &StateStore, id_prefix: &str, force: bool) -> Result<i32> {
    let id = store.resolve_id(id_prefix)?;
    let mut state = store.load_state(&id)?;
    store.refresh_status(&mut state)?;

    if state.status == ContainerStatus::Running {
        if !force {
            return Err(Error::precondition_failed(format!(
                "container {id} is still running; use -f to remove it anyway"
            )));
        }
        let _ = send_signal(state.pid, nix::sys::signal::Signal::SIGKILL);
    }

    store.force_delete(&id)?;
    println!("{id}");
    Ok(0)
}
