//! Log setup for the host binary.

use std::io::Write;
use std::str::FromStr;
use std::sync::Once;

use chrono::Local;
use log::LevelFilter;

static INIT: Once = Once::new();

/// Parses a level name, defaulting to `Info` on anything unknown.
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

fn rust_log_set() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

/// Installs an `env_logger` with local timestamps. `RUST_LOG` overrides
/// `level`. Only the first call has an effect; use [`set_level`] afterwards.
pub fn init(level: LevelFilter) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        if rust_log_set() {
            builder.parse_default_env();
        } else {
            // Records are filtered by the global max level, see `set_level`.
            builder.filter_level(LevelFilter::Trace);
        }
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });

        if let Err(e) = builder.try_init() {
            eprintln!("Failed to install logger: {}", e);
            return;
        }
        set_level(level);
        log::info!("Logging initialized at {}", log::max_level());
    });
}

/// Changes the level after [`init`], e.g. once the config file is read.
/// Ignored when `RUST_LOG` is set.
pub fn set_level(level: LevelFilter) {
    if rust_log_set() {
        return;
    }
    log::set_max_level(level);
}
