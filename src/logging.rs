use env_logger::Env;

/// Installs `env_logger` honouring `RUST_LOG` (defaults to `info`). Safe to
/// call more than once; later calls are no-ops.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
