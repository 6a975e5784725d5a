use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use error_stack::Report;

use crate::context::ExecutionContext;
use crate::data::ConfigData;
use crate::error::FrameError;

/// A vendor's render entry point.
///
/// Implemented for every `Fn(&mut ExecutionContext, &ConfigData) -> Result<..>`,
/// so vendor modules export a plain function.
pub trait Renderer {
    /// Render one ad into `ctx` using the host supplied `data`.
    ///
    /// # Errors
    ///
    /// Returns the validation or allowlist error that aborted rendering.
    fn render(&self, ctx: &mut ExecutionContext, data: &ConfigData)
        -> Result<(), Report<FrameError>>;
}

impl<F> Renderer for F
where
    F: Fn(&mut ExecutionContext, &ConfigData) -> Result<(), Report<FrameError>>,
{
    fn render(
        &self,
        ctx: &mut ExecutionContext,
        data: &ConfigData,
    ) -> Result<(), Report<FrameError>> {
        self(ctx, data)
    }
}

/// Describes one vendor ready to be registered.
#[derive(Clone)]
pub struct VendorRegistration {
    pub vendor_id: &'static str,
    pub renderer: Arc<dyn Renderer>,
}

impl VendorRegistration {
    #[must_use]
    pub fn new(vendor_id: &'static str, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            vendor_id,
            renderer,
        }
    }
}

impl fmt::Debug for VendorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorRegistration")
            .field("vendor_id", &self.vendor_id)
            .finish_non_exhaustive()
    }
}

/// Per-context map from vendor id to renderer.
///
/// Entries are never replaced once registered.
#[derive(Clone, Default)]
pub struct VendorRegistry {
    entries: HashMap<String, Arc<dyn Renderer>>,
}

impl fmt::Debug for VendorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorRegistry")
            .field("vendors", &self.vendor_ids())
            .finish()
    }
}

impl VendorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `renderer` under `vendor_id`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidVendorId`] for an empty or malformed id
    /// and [`FrameError::DuplicateRegistration`] if the id is taken.
    pub fn register(
        &mut self,
        vendor_id: &str,
        renderer: Arc<dyn Renderer>,
    ) -> Result<(), Report<FrameError>> {
        if !is_valid_vendor_id(vendor_id) {
            return Err(Report::new(FrameError::InvalidVendorId {
                vendor: vendor_id.to_string(),
            }));
        }
        if self.entries.contains_key(vendor_id) {
            return Err(Report::new(FrameError::DuplicateRegistration {
                vendor: vendor_id.to_string(),
            }));
        }

        log::debug!("registered vendor {vendor_id}");
        self.entries.insert(vendor_id.to_string(), renderer);
        Ok(())
    }

    /// Registers a prepared [`VendorRegistration`].
    ///
    /// # Errors
    ///
    /// Same as [`VendorRegistry::register`].
    pub fn register_vendor(
        &mut self,
        registration: VendorRegistration,
    ) -> Result<(), Report<FrameError>> {
        self.register(registration.vendor_id, registration.renderer)
    }

    #[must_use]
    pub fn lookup(&self, vendor_id: &str) -> Option<Arc<dyn Renderer>> {
        self.entries.get(vendor_id).cloned()
    }

    #[must_use]
    pub fn contains(&self, vendor_id: &str) -> bool {
        self.entries.contains_key(vendor_id)
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn vendor_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_valid_vendor_id(vendor_id: &str) -> bool {
    !vendor_id.is_empty()
        && vendor_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}
