use flexi_logger::{json_format, Duplicate, FileSpec, Logger, LoggerHandle};

use crate::config::LoggingConfig;
use crate::error::Result;

/// Builds the logger described by `config` for rank `rank` without starting it.
/// With a log directory, each rank writes to its own file.
fn build_logger(config: &LoggingConfig, rank: usize) -> Logger {
    let mut logger = Logger::with(config.level);
    if config.json {
        logger = logger.format(json_format);
    }

    let Some(directory) = &config.directory else {
        return logger.log_to_stdout();
    };

    let suffix = if config.json { "log.json" } else { "log" };
    let duplicate = if config.duplicate_to_stdout {
        Duplicate::Info
    } else {
        Duplicate::None
    };
    logger
        .log_to_file(
            FileSpec::default()
                .directory(directory)
                .discriminant(format!("rank{rank}"))
                .suppress_timestamp()
                .suffix(suffix),
        )
        .duplicate_to_stdout(duplicate)
}

/// Sets up logging for rank `rank`. Keep the returned handle alive for as long
/// as records should be written.
pub fn setup_logging(config: &LoggingConfig, rank: usize) -> Result<LoggerHandle> {
    Ok(build_logger(config, rank).start()?)
}
