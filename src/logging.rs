/// Install the process-wide logger. Reads `MINIDOCKER_LOG` first (so a
/// re-exec can set verbosity explicitly across the fork boundary), falling
/// back to the standard `RUST_LOG`, defaulting to `info`.
pub fn init() {
    let filter = std::env::var("MINIDOCKER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}
