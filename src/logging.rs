//! Process-wide tracing setup.

use tracing_subscriber::filter::LevelFilter;

/// Initialize the global tracing subscriber.
///
/// Precedence: explicit `--log-level` flag, then `DROID_LANE_LOG`, then
/// `info`. Events go to stderr so build progress on stdout stays clean.
pub fn init(level_flag: Option<&str>) {
    let level = level_flag
        .map(str::to_string)
        .or_else(|| std::env::var("DROID_LANE_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    let filter = match level.parse::<LevelFilter>() {
        Ok(filter) => filter,
        Err(_) => {
            eprintln!("unknown log level {level:?}, using info");
            LevelFilter::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
