//! Frame bootstrap: the fixed sequence every bundle runs.
//!
//! A bundle initializes the frame, registers its vendor(s), and then
//! exposes [`Bootstrap::draw3p`] as the entry point the host calls. Before
//! dispatching, the entry point checks that the frame is embedded where it
//! is allowed to run.

use error_stack::{Report, ResultExt};
use url::Url;

use crate::context::{DispatchState, ExecutionContext};
use crate::dispatcher::{ConfigCallback, Dispatcher};
use crate::error::FrameError;
use crate::frame::{
    ensure_framed, validate_allowed_embedding_origins, validate_allowed_types,
    validate_parent_origin,
};
use crate::registry::{VendorRegistration, VendorRegistry};
use crate::settings::Settings;
use crate::vendors::build_registry;

/// Serialization of an origin that cannot be determined.
const OPAQUE_ORIGIN: &str = "null";

/// Options the embedding page passes to the entry point.
#[derive(Default)]
pub struct DrawOptions {
    /// Vendor types a custom frame accepts in addition to the defaults.
    pub allowed_types: Option<Vec<String>>,
    /// Host names (and their subdomains) allowed to embed this frame.
    pub allowed_embedding_origins: Option<Vec<String>>,
    /// Adjusts the embed data before rendering.
    pub config_callback: Option<ConfigCallback>,
}

impl std::fmt::Debug for DrawOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawOptions")
            .field("allowed_types", &self.allowed_types)
            .field("allowed_embedding_origins", &self.allowed_embedding_origins)
            .field("config_callback", &self.config_callback.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum VendorSource {
    /// Every bundled vendor enabled by settings.
    Bundled,
    /// A bundle carrying exactly one vendor.
    Single(VendorRegistration),
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    settings: Settings,
    vendors: VendorSource,
}

impl Bootstrap {
    /// Bootstrap registering all bundled vendors.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            vendors: VendorSource::Bundled,
        }
    }

    /// Bootstrap for a single-vendor bundle.
    #[must_use]
    pub fn single_vendor(settings: Settings, registration: VendorRegistration) -> Self {
        Self {
            settings,
            vendors: VendorSource::Single(registration),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Builds a fresh registry for `ctx` and initializes the context.
    ///
    /// # Errors
    ///
    /// Returns a registration error from a broken bundle.
    pub fn prepare(&self, ctx: &mut ExecutionContext) -> Result<Dispatcher, Report<FrameError>> {
        let registry = match &self.vendors {
            VendorSource::Bundled => build_registry(&self.settings, &ctx.metadata().mode)?,
            VendorSource::Single(registration) => {
                let mut registry = VendorRegistry::new();
                registry.register_vendor(registration.clone())?;
                registry
            }
        };
        let dispatcher = Dispatcher::new(registry, self.settings.clone());
        dispatcher.init(ctx);
        Ok(dispatcher)
    }

    /// Entry point called by the host once the frame has loaded.
    ///
    /// Runs the embedding checks, dispatches the embed described by the
    /// frame metadata, and signals `bootstrap_loaded`. User errors are
    /// reported to the host; outside test mode an error report URL is
    /// logged as well.
    ///
    /// # Errors
    ///
    /// Returns the first embedding, registration, or rendering error.
    pub fn draw3p(
        &self,
        ctx: &mut ExecutionContext,
        options: DrawOptions,
    ) -> Result<(), Report<FrameError>> {
        let result = self.run(ctx, options);

        if let Err(err) = &result {
            let error = err.current_context();
            if !self.settings.frame.error_reporting_url.is_empty() && !ctx.metadata().mode.test {
                match error_report_url(
                    &self.settings,
                    error,
                    ctx.metadata().mode.canary,
                    ctx.metadata().referrer.as_deref(),
                ) {
                    Ok(url) => log::error!("3p frame error: {error}, report {url}"),
                    Err(report_err) => {
                        log::error!("3p frame error: {error}, report failed: {report_err:?}");
                    }
                }
            }
        }
        result
    }

    fn run(
        &self,
        ctx: &mut ExecutionContext,
        options: DrawOptions,
    ) -> Result<(), Report<FrameError>> {
        self.check_embedding(ctx, &options).inspect_err(|err| {
            let error = err.current_context();
            if error.is_user_error() {
                ctx.report_error(error);
            }
            ctx.set_state(DispatchState::Errored);
        })?;

        let dispatcher = self
            .prepare(ctx)
            .inspect_err(|_| ctx.set_state(DispatchState::Errored))?;
        let data = ctx.metadata().data.clone();
        dispatcher.draw_embed(ctx, data, options.config_callback)?;

        ctx.document_mut().close();
        ctx.host_mut().bootstrap_loaded();
        Ok(())
    }

    fn check_embedding(
        &self,
        ctx: &ExecutionContext,
        options: &DrawOptions,
    ) -> Result<(), Report<FrameError>> {
        let metadata = ctx.metadata();
        ensure_framed(metadata)?;

        // A missing or unparsable location still has to match known ancestors.
        let parent_origin = metadata
            .location
            .as_deref()
            .and_then(origin_of)
            .unwrap_or_else(|| OPAQUE_ORIGIN.to_string());
        validate_parent_origin(metadata, &parent_origin)?;

        let vendor = metadata.data.vendor_type().unwrap_or_default();
        validate_allowed_types(
            metadata,
            &self.settings.frame,
            vendor,
            options.allowed_types.as_deref(),
        )?;

        if let Some(allowed) = &options.allowed_embedding_origins {
            validate_allowed_embedding_origins(metadata, &self.settings.frame, allowed)?;
        }
        Ok(())
    }
}

/// Builds the URL of a lightweight error report for `error`.
///
/// # Errors
///
/// Returns [`FrameError::Configuration`] if the reporting endpoint is not a
/// valid URL.
pub fn error_report_url(
    settings: &Settings,
    error: &FrameError,
    is_canary: bool,
    referrer: Option<&str>,
) -> Result<Url, Report<FrameError>> {
    let message = error.to_string();
    Url::parse_with_params(
        &settings.frame.error_reporting_url,
        &[
            ("3p", "1"),
            ("v", settings.frame.runtime_version.as_str()),
            ("m", message.as_str()),
            ("ca", if is_canary { "1" } else { "0" }),
            ("r", referrer.unwrap_or_default()),
        ],
    )
    .change_context(FrameError::Configuration {
        message: "Invalid error reporting URL".to_string(),
    })
}

fn origin_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .map(|url| url.origin().ascii_serialization())
}
