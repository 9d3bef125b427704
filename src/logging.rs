//! Structured logging setup for the binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever owns the process.

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogSettings};
use crate::error::ConfigError;

/// Parses a level name such as `INFO` or `debug`. `WARNING` is accepted as
/// an alias for `WARN`.
pub fn parse_level(level: &str) -> Result<Level, ConfigError> {
    let level = level.trim();
    if level.eq_ignore_ascii_case("WARNING") {
        return Ok(Level::WARN);
    }
    level.parse::<Level>().map_err(|err| ConfigError::Invalid {
        field: "logging.level",
        reason: format!("invalid log level {level:?}: {err}"),
    })
}

/// Installs the global subscriber. `RUST_LOG` wins over `settings.level`.
pub fn init(settings: &LogSettings) -> Result<(), ConfigError> {
    let level = parse_level(&settings.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match (&settings.file, settings.format) {
        (Some(path), format) => {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
            let writer = Mutex::new(file);
            match format {
                LogFormat::Json => builder.json().with_writer(writer).with_ansi(false).try_init(),
                LogFormat::Text => builder.with_writer(writer).with_ansi(false).try_init(),
            }
        }
        (None, LogFormat::Json) => builder.json().with_writer(std::io::stderr).try_init(),
        (None, LogFormat::Text) => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|err| ConfigError::Invalid {
        field: "logging",
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_is_case_insensitive() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARNING").unwrap(), Level::WARN);
        assert_eq!(parse_level(" Error ").unwrap(), Level::ERROR);
        assert_eq!(parse_level("warning").unwrap(), Level::WARN);
        assert_eq!(parse_level("Trace").unwrap(), Level::TRACE);
    }

    #[test]
    fn test_parse_level_rejects_unknown() {
        let err = parse_level("loud").unwrap_err();
        assert!(err.to_string().contains("loud"), "got {err}");
        assert!(parse_level("").is_err());
    }
}
