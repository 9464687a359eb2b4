//! Logger setup.

use log::LevelFilter;

use crate::error::CliError;

pub fn level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Route `log` records to stderr with an RFC 3339 timestamp.
pub fn init_logger(verbose: bool) -> Result<(), CliError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                message
            ))
        })
        .level(level(verbose))
        .chain(std::io::stderr())
        .apply()
        .map_err(|e| CliError::Config(format!("Failed to initialize logger: {e}")))
}
