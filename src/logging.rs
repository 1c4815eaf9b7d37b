use std::sync::Once;

use log::LevelFilter;

static INIT: Once = Once::new();

/// Installs the global logger once. `RUST_LOG` wins over the debug setting
/// when present.
pub fn init_logging(debug: bool) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(LevelFilter::Debug);
        }
        builder.format_timestamp_millis();
        builder.init();
        apply_debug_flag(debug);
    });
}

/// Diagnostics are only emitted while the `debug` setting is on.
pub fn apply_debug_flag(debug: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if log::max_level() != level {
        log::set_max_level(level);
    }
}
