pub mod cgroups;
pub mod execjoin;
pub mod init;
pub mod launcher;
pub mod mounts;
pub mod namespaces;
pub mod supervisor;

pub use execjoin::{spawn_exec_join, ExecConfig};
pub use launcher::{Launcher, RunOutcome};
