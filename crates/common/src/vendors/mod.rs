//! Bundled vendor renderers and the table used to register them.
//!
//! Each vendor module exports a `register` builder returning its
//! [`VendorRegistration`], or `None` when settings disable it.

use error_stack::Report;

use crate::error::FrameError;
use crate::frame::FrameMode;
use crate::registry::{VendorRegistration, VendorRegistry};
use crate::settings::Settings;

pub mod criteo;
pub mod ping;
pub mod taboola;

type VendorBuilder = fn(&Settings) -> Option<VendorRegistration>;

pub(crate) fn builders() -> &'static [VendorBuilder] {
    &[ping::register, criteo::register, taboola::register]
}

/// Builds the registry for one frame.
///
/// Vendors outside `settings.vendors.enabled` are skipped, and the `_ping_`
/// test vendor is only registered in test or local development mode.
///
/// # Errors
///
/// Returns [`FrameError::DuplicateRegistration`] if two builders claim the
/// same id.
pub fn build_registry(
    settings: &Settings,
    mode: &FrameMode,
) -> Result<VendorRegistry, Report<FrameError>> {
    let mut registry = VendorRegistry::new();
    for builder in builders() {
        let Some(registration) = builder(settings) else {
            continue;
        };
        if !settings.vendors.is_enabled(registration.vendor_id) {
            log::debug!("vendor {} disabled by settings", registration.vendor_id);
            continue;
        }
        if registration.vendor_id == ping::PING_VENDOR_ID && !(mode.test || mode.local_dev) {
            continue;
        }
        registry.register_vendor(registration)?;
    }
    Ok(registry)
}
