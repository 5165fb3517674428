use serdeconv;
use sloggers;

pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

/// Builds the root terminal logger from the default configuration. Callers
/// derive child loggers from the returned instance via `log.new(o!())`.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Malformed default logger configuration");

    config.build_logger().expect("Failed building the terminal logger")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_builds_logger() {
        let logger = init();

        info!(logger, "logger constructed"; "context" => "test");
    }
}
