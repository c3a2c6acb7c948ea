pub mod commands;

use clap::{Parser, Subcommand};

/// minidocker — a minimal Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = "minidocker", version, about)]
pub struct Cli {
    /// State root directory (default: /var/lib/minidocker as root, otherwise
    /// $HOME/.minidocker).
    #[arg(long, global = true)]
    pub root: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and run a new container.
    Run {
        /// Run detached, printing the container id and returning immediately.
        #[arg(short = 'd', long)]
        detached: bool,

        /// Path to the root filesystem. Leave unset to mount requested
        /// volumes/binds directly under the host's `/` (compat path).
        #[arg(long, default_value = "")]
        rootfs: String,

        /// Memory limit in bytes (passed to cgroup `memory.max`).
        #[arg(short = 'm', long)]
        memory: Option<u64>,

        /// Total memory+swap ceiling in bytes, or `-1` for unlimited swap.
        #[arg(long = "memory-swap")]
        memory_swap: Option<String>,

        /// Fractional CPUs, e.g. `1.5` for 150% of one core. Converted to a
        /// `cpu.max` quota against a 100ms period.
        #[arg(long)]
        cpus: Option<f64>,

        /// Maximum number of PIDs in the container's cgroup.
        #[arg(long = "pids-limit")]
        pids_limit: Option<u64>,

        /// Hostname to set inside the container. Defaults to the first 12
        /// characters of the generated container id.
        #[arg(long)]
        hostname: Option<String>,

        /// `KEY=VALUE` environment entries. Repeatable.
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,

        /// Working directory inside the container.
        #[arg(long = "workdir")]
        workdir: Option<String>,

        /// `user[:group]` to run the command as, post-pivot. Numeric or
        /// resolved via `/etc/passwd` and `/etc/group`.
        #[arg(short = 'u', long)]
        user: Option<String>,

        /// Bind or named-volume mount: `SRC:DST[:ro]` (SRC starting with `/`
        /// is a bind mount; otherwise it names a volume).
        #[arg(short = 'v', long = "mount")]
        mount: Vec<String>,

        /// Network mode: `none` (default) or `bridge`.
        #[arg(long)]
        network: Option<String>,

        /// Published port: `HOST:CONTAINER[/PROTO]` (proto defaults to tcp).
        #[arg(short = 'p', long = "publish")]
        publish: Vec<String>,

        /// Keep stdin open.
        #[arg(short = 'i', long)]
        interactive: bool,

        /// Allocate a pseudo-tty.
        #[arg(short = 't', long)]
        tty: bool,

        /// The command (and arguments) to execute inside the container.
        /// Everything after `--` is treated as the command.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Execute a command inside a running container.
    Exec {
        /// Container ID (or unique prefix).
        id: String,

        /// Keep stdin open.
        #[arg(short = 'i', long)]
        interactive: bool,

        /// Allocate a pseudo-tty.
        #[arg(short = 't', long)]
        tty: bool,

        /// The command (and arguments) to execute.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Send SIGKILL to a running container's init process.
    Kill {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Send SIGTERM to a running container, escalating to SIGKILL if it
    /// hasn't exited within the grace period.
    Stop {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// List containers.
    Ps,

    /// Print the full config/state record of a container as JSON.
    Inspect {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Print the stdout/stderr logs of a container.
    Logs {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Remove a stopped container.
    Rm {
        /// Container ID (or unique prefix).
        id: String,

        /// Force-remove even if the container is still running.
        #[arg(short = 'f', long)]
        force: bool,
    },
}

/// Parse CLI arguments. Called from `main`.
pub fn parse() -> Cli {
    Cli::parse()
}
