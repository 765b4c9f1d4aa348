use std::sync::Once;

/// Logger configuration.
///
/// `filter` follows the `env_logger` filter syntax, e.g. "info" or
/// "cube_mirror=debug". Without one, `RUST_LOG` is consulted, then "info".
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

static INIT: Once = Once::new();

/// Initializes the global logger once. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }

        builder.format_timestamp_millis();
        builder.init();

        log::debug!("logging initialized");
    });
}
