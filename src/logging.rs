//! Log sink setup.
//!
//! Installs an `env_logger` backend configured from [`LoggingConfig`]:
//! console output on stderr, an optional append-mode log file, or both.
//! `RUST_LOG` still overrides the configured level.

use env_logger::{Builder, Target, WriteStyle};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::config::LoggingConfig;

/// Errors raised while installing the log sink
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Unable to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Copies every log line to stderr and to a file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn open_log_file(path: &str) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: PathBuf::from(path),
            source,
        })
}

/// Install the global logger described by `config`.
///
/// Returns `Ok(false)` when a logger was already installed; the existing one
/// is kept and only the maximum level is adjusted.
pub fn init(config: &LoggingConfig) -> Result<bool, LoggingError> {
    let file = config.file.as_deref().map(open_log_file).transpose()?;

    let target = match (config.console, file) {
        (true, Some(file)) => Target::Pipe(Box::new(TeeWriter { file })),
        (false, Some(file)) => Target::Pipe(Box::new(file)),
        (true, None) => Target::Stderr,
        (false, None) => Target::Pipe(Box::new(io::sink())),
    };
    let plain = !matches!(target, Target::Stderr);

    let mut builder = Builder::new();
    builder
        .filter_level(config.level.to_level_filter())
        .parse_default_env()
        .target(target)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        });
    if plain {
        builder.write_style(WriteStyle::Never);
    }

    match builder.try_init() {
        Ok(()) => Ok(true),
        Err(_) => {
            log::set_max_level(config.level.to_level_filter());
            log::debug!("Logger already installed; keeping the existing sink");
            Ok(false)
        }
    }
}
