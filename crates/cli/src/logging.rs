//! Logger installation for the CLI.

use log::LevelFilter;

use crate::error::CliError;

/// Installs a stderr logger so stdout carries only command output.
pub fn init_logger(verbose: bool) -> Result<(), CliError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .map_err(|e| CliError::Config(format!("Failed to initialize logger: {e}")))
}
