use std::collections::BTreeMap;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::FrameError;
use crate::validation::ValidationMode;

/// Prefix for environment overrides, e.g. `THIRD_PARTY_FRAME__FRAME__THIRD_PARTY_HOST`.
pub const ENVIRONMENT_PREFIX: &str = "THIRD_PARTY_FRAME";

const DEFAULT_SETTINGS: &str = include_str!("../../../third-party-frame.toml");

/// Where frames are served from and which embeds they accept.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct FrameSettings {
    /// Host of the default third-party frame; every type is allowed there.
    #[validate(length(min = 1))]
    pub third_party_host: String,

    /// Hosts matching this pattern are also default frames.
    #[validate(custom(function = "validate_pattern"))]
    pub third_party_frame_pattern: String,

    /// Origins matching this pattern are proxy cache origins whose source
    /// host is recovered from the referrer.
    #[validate(custom(function = "validate_pattern"))]
    pub proxy_origin_pattern: String,

    /// Types a custom frame may run without opting in.
    #[serde(default)]
    pub default_allowed_types_in_custom_frame: Vec<String>,

    /// Types that may be embedded with the `AMP-EMBED` tag.
    #[serde(default)]
    pub amp_embed_allowed: Vec<String>,

    #[validate(url)]
    pub error_reporting_url: String,

    #[validate(length(min = 1))]
    pub runtime_version: String,
}

impl FrameSettings {
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if the pattern does not compile.
    pub fn third_party_frame_regex(&self) -> Result<Regex, Report<FrameError>> {
        compile(&self.third_party_frame_pattern)
    }

    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if the pattern does not compile.
    pub fn proxy_origin_regex(&self) -> Result<Regex, Report<FrameError>> {
        compile(&self.proxy_origin_pattern)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ValidationSettings {
    /// Reject data keys a vendor did not declare.
    #[serde(default)]
    pub strict: bool,
}

impl ValidationSettings {
    #[must_use]
    pub fn mode(&self) -> ValidationMode {
        if self.strict {
            ValidationMode::Strict
        } else {
            ValidationMode::Permissive
        }
    }
}

/// Which vendors are registered and their per-vendor configuration blocks.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VendorSettings {
    /// Vendor ids to register. Empty registers every bundled vendor.
    #[serde(default)]
    pub enabled: Vec<String>,

    #[serde(flatten)]
    configs: BTreeMap<String, serde_json::Value>,
}

impl VendorSettings {
    #[must_use]
    pub fn is_enabled(&self, vendor: &str) -> bool {
        self.enabled.is_empty() || self.enabled.iter().any(|id| id == vendor)
    }

    /// True when the settings carry a configuration block for `vendor`.
    #[must_use]
    pub fn has_config(&self, vendor: &str) -> bool {
        self.configs.contains_key(vendor)
    }

    /// Inserts or replaces a vendor configuration block.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if the value cannot be serialized.
    pub fn insert_config<T: Serialize>(
        &mut self,
        vendor: String,
        value: &T,
    ) -> Result<(), Report<FrameError>> {
        let json = serde_json::to_value(value).change_context(FrameError::Configuration {
            message: format!("Failed to serialize config for vendor {vendor}"),
        })?;
        self.configs.insert(vendor, json);
        Ok(())
    }
}

/// Implemented by per-vendor configuration blocks.
pub trait VendorConfig {
    fn is_enabled(&self) -> bool;
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub frame: FrameSettings,
    #[serde(default)]
    #[validate(nested)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub vendors: VendorSettings,
}

impl Settings {
    /// Loads the embedded default settings, applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if the settings fail to parse or
    /// validate.
    pub fn new() -> Result<Self, Report<FrameError>> {
        Self::from_toml(DEFAULT_SETTINGS)
    }

    /// Parses settings from TOML, layered under environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if the TOML is invalid, required
    /// sections are missing, or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<FrameError>> {
        let environment = Environment::default()
            .prefix(ENVIRONMENT_PREFIX)
            .separator("__");

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let settings: Self = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .and_then(|config| config.try_deserialize())
            .change_context(FrameError::Configuration {
                message: "Failed to parse settings".to_string(),
            })?;

        settings
            .validate()
            .change_context(FrameError::Configuration {
                message: "Settings validation failed".to_string(),
            })?;

        Ok(settings)
    }

    /// Loads a vendor's configuration block.
    ///
    /// Returns `Ok(None)` when the block is absent or disabled.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] if the block does not
    /// deserialize or validate.
    pub fn vendor_config<T>(&self, vendor: &str) -> Result<Option<T>, Report<FrameError>>
    where
        T: DeserializeOwned + Validate + VendorConfig,
    {
        let Some(raw) = self.vendors.configs.get(vendor) else {
            return Ok(None);
        };

        let config: T = serde_json::from_value(raw.clone()).change_context(
            FrameError::Configuration {
                message: format!("Invalid config for vendor {vendor}"),
            },
        )?;
        config
            .validate()
            .change_context(FrameError::Configuration {
                message: format!("Config validation failed for vendor {vendor}"),
            })?;

        Ok(config.is_enabled().then_some(config))
    }
}

fn compile(pattern: &str) -> Result<Regex, Report<FrameError>> {
    Regex::new(pattern).change_context(FrameError::Configuration {
        message: format!("Invalid pattern {pattern}"),
    })
}

fn validate_pattern(pattern: &str) -> Result<(), ValidationError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_pattern"))
}
