mod cli;
mod collaborators;
mod core;
mod logging;
mod platform;
mod util;

use std::process;

fn main() {
    logging::init();

    #[cfg(target_os = "linux")]
    {
        if std::env::var("MINIDOCKER_SHIM").as_deref() == Ok("1") {
            platform::linux::supervisor::run_supervisor();
        }
        if std::env::var("MINIDOCKER_INIT").as_deref() == Ok("1") {
            platform::linux::init::run_init_entry();
        }
        if std::env::var("MINIDOCKER_EXEC").as_deref() == Ok("1") {
            platform::linux::execjoin::run_exec_entry();
        }
    }

    let args = cli::parse();

    match cli::commands::dispatch(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("minidocker: {e}");
            process::exit(exit_code_for(&e));
        }
    }
}

fn exit_code_for(e: &core::error::Error) -> i32 {
    match e.kind() {
        core::error::ErrorKind::InvalidConfig | core::error::ErrorKind::AmbiguousId => 2,
        _ => 1,
    }
}
