//! Configuration commands.
//!
//! Configuration is loaded from TOML files and merged with environment variables
//! prefixed with `THIRD_PARTY_FRAME__`. For example,
//! `THIRD_PARTY_FRAME__FRAME__THIRD_PARTY_HOST` will override
//! `frame.third_party_host` in the TOML file.

use std::fs;
use std::path::Path;

use third_party_frame_common::frame::FrameMode;
use third_party_frame_common::settings::Settings;
use third_party_frame_common::vendors::build_registry;

use crate::error::CliError;

/// Loads settings from `file`, or the embedded defaults when no file is
/// given. Environment overrides apply in both cases.
pub(crate) fn load_settings(file: Option<&Path>) -> Result<Settings, CliError> {
    let settings = match file {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            log::debug!("Loading config from: {}", path.display());
            Settings::from_toml(&content)
        }
        None => Settings::new(),
    };
    settings.map_err(|e| CliError::Config(format!("Failed to parse and merge config: {e:?}")))
}

/// Vendor ids a frame would register under `settings`.
pub(crate) fn registered_vendors(
    settings: &Settings,
    mode: &FrameMode,
) -> Result<Vec<String>, CliError> {
    let registry = build_registry(settings, mode)
        .map_err(|e| CliError::Config(format!("Failed to build vendor registry: {e:?}")))?;
    Ok(registry
        .vendor_ids()
        .into_iter()
        .map(str::to_string)
        .collect())
}

/// Validate configuration file.
///
/// Validates TOML syntax, required fields, patterns, and vendor blocks.
pub fn validate(file: &Path, verbose: bool) -> Result<(), CliError> {
    let settings = load_settings(Some(file))?;
    let vendors = registered_vendors(&settings, &FrameMode::default())?;

    println!("Configuration is valid");
    println!("  File: {}", file.display());
    println!("  Third-party host: {}", settings.frame.third_party_host);
    println!("  Runtime version: {}", settings.frame.runtime_version);
    println!("  Strict validation: {}", settings.validation.strict);

    if verbose {
        println!("\nVendors:");
        for vendor in vendors {
            println!("  - {vendor}");
        }
    }

    Ok(())
}

/// List the vendor ids a frame would register.
pub fn list_vendors(file: Option<&Path>, local_dev: bool) -> Result<(), CliError> {
    let settings = load_settings(file)?;
    let mode = FrameMode {
        local_dev,
        ..FrameMode::default()
    };
    for vendor in registered_vendors(&settings, &mode)? {
        println!("{vendor}");
    }
    Ok(())
}
