//! Looks up the renderer for a vendor and runs it once.
//!
//! A context moves `Loading -> Idle` on [`Dispatcher::init`] and
//! `Idle -> Dispatched` on [`Dispatcher::draw3p`]. The renderer then
//! reaches `RenderStarted` or `NoContentAvailable` through the context; any
//! failure ends in `Errored`. A context renders at most one ad.

use error_stack::Report;
use serde_json::json;

use crate::context::{DispatchState, ExecutionContext};
use crate::data::{ConfigData, TYPE_KEY};
use crate::error::FrameError;
use crate::frame::is_tag_name_allowed;
use crate::registry::VendorRegistry;
use crate::settings::Settings;

/// Global holding the frame mode, read by vendor scripts.
pub const AMP_MODE_GLOBAL: &str = "AMP_MODE";
/// Global holding the experiment toggles.
pub const EXPERIMENT_TOGGLES_GLOBAL: &str = "AMP_EXPERIMENT_TOGGLES";

/// Lets the embedding page adjust the data in place before rendering.
pub type ConfigCallback = Box<dyn FnOnce(&mut ConfigData) -> Result<(), Report<FrameError>>>;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: VendorRegistry,
    settings: Settings,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: VendorRegistry, settings: Settings) -> Self {
        Self { registry, settings }
    }

    #[must_use]
    pub fn registry(&self) -> &VendorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut VendorRegistry {
        &mut self.registry
    }

    /// Prepares a freshly created context: publishes the mode and experiment
    /// globals and moves the context to `Idle`. Repeated calls are ignored.
    pub fn init(&self, ctx: &mut ExecutionContext) {
        if ctx.state() != DispatchState::Loading {
            log::debug!("frame already initialized, state {:?}", ctx.state());
            return;
        }

        let mode = json!(ctx.metadata().mode);
        let toggles = json!(ctx.metadata().experiment_toggles);
        ctx.publish_global(AMP_MODE_GLOBAL, mode);
        ctx.publish_global(EXPERIMENT_TOGGLES_GLOBAL, toggles);
        ctx.set_validation_mode(self.settings.validation.mode());
        ctx.set_state(DispatchState::Idle);
    }

    /// Renders `vendor_id` into `ctx` with `data`.
    ///
    /// Unknown vendors and user errors raised by the renderer are reported
    /// to the host before being returned.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnknownVendor`] without running any renderer,
    /// [`FrameError::AlreadyDispatched`] if the context left `Idle`, or the
    /// renderer's own error.
    pub fn draw3p(
        &self,
        ctx: &mut ExecutionContext,
        vendor_id: &str,
        data: &ConfigData,
    ) -> Result<(), Report<FrameError>> {
        match ctx.state() {
            DispatchState::Idle => {}
            DispatchState::Loading => {
                return Err(Report::new(FrameError::Configuration {
                    message: format!("frame not initialized before drawing {vendor_id}"),
                }));
            }
            _ => {
                return Err(Report::new(FrameError::AlreadyDispatched {
                    vendor: vendor_id.to_string(),
                }));
            }
        }

        let Some(renderer) = self.registry.lookup(vendor_id) else {
            let error = FrameError::UnknownVendor {
                vendor: vendor_id.to_string(),
            };
            ctx.report_error(&error);
            ctx.set_state(DispatchState::Errored);
            return Err(Report::new(error));
        };

        log::info!("drawing {vendor_id}");
        ctx.set_state(DispatchState::Dispatched);

        renderer.render(ctx, data).inspect_err(|err| {
            let error = err.current_context();
            log::warn!("renderer {vendor_id} failed: {error}");
            if error.is_user_error() {
                ctx.report_error(error);
            }
            ctx.set_state(DispatchState::Errored);
        })
    }

    /// Renders the embed described by `data`, whose `type` key names the
    /// vendor. The optional callback may edit `data` before rendering.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MissingParameter`] without a type,
    /// [`FrameError::TagNotAllowed`] when the embedding tag forbids the type,
    /// the callback's error, or any [`Dispatcher::draw3p`] error.
    pub fn draw_embed(
        &self,
        ctx: &mut ExecutionContext,
        mut data: ConfigData,
        config_callback: Option<ConfigCallback>,
    ) -> Result<(), Report<FrameError>> {
        let Some(vendor_id) = data.vendor_type().map(str::to_string) else {
            return Err(self.fail(
                ctx,
                FrameError::MissingParameter {
                    vendor: "embed".to_string(),
                    key: TYPE_KEY.to_string(),
                },
            ));
        };

        let tag_name = ctx.metadata().tag_name.clone();
        if !is_tag_name_allowed(&self.settings.frame, &vendor_id, tag_name.as_deref()) {
            return Err(self.fail(
                ctx,
                FrameError::TagNotAllowed {
                    vendor: vendor_id,
                    tag: tag_name.unwrap_or_default(),
                },
            ));
        }

        if let Some(callback) = config_callback {
            callback(&mut data).inspect_err(|_| ctx.set_state(DispatchState::Errored))?;
        }

        self.draw3p(ctx, &vendor_id, &data)
    }

    fn fail(&self, ctx: &mut ExecutionContext, error: FrameError) -> Report<FrameError> {
        ctx.report_error(&error);
        ctx.set_state(DispatchState::Errored);
        Report::new(error)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use crate::context::{HostMessage, Size};
    use crate::test_support::tests::{create_test_context, create_test_settings};
    use crate::validation::validate_data;
    use serde_json::Value;

    type Calls = Rc<RefCell<Vec<ConfigData>>>;

    fn acme_dispatcher() -> (Dispatcher, Calls) {
        let calls: Calls = Rc::default();
        let sink = Rc::clone(&calls);
        let mut registry = VendorRegistry::new();
        registry
            .register(
                "acme",
                Arc::new(
                    move |ctx: &mut ExecutionContext,
                          data: &ConfigData|
                          -> Result<(), Report<FrameError>> {
                        sink.borrow_mut().push(data.clone());
                        validate_data(data, &["zone"], &[])?;
                        ctx.render_start(Some(Size::new(300, 250)));
                        Ok(())
                    },
                ),
            )
            .expect("acme should register");
        (Dispatcher::new(registry, create_test_settings()), calls)
    }

    #[test]
    fn invokes_registered_renderer_once() {
        let (dispatcher, calls) = acme_dispatcher();
        let (mut ctx, host) = create_test_context();
        dispatcher.init(&mut ctx);

        let data = ConfigData::new().with("zone", "1");
        dispatcher
            .draw3p(&mut ctx, "acme", &data)
            .expect("acme should render");

        assert_eq!(*calls.borrow(), vec![data]);
        assert_eq!(ctx.state(), DispatchState::RenderStarted);
        assert_eq!(
            host.messages(),
            vec![HostMessage::RenderStart {
                size: Some(Size::new(300, 250))
            }]
        );
    }

    #[test]
    fn unknown_vendor_is_reported_and_renders_nothing() {
        let (dispatcher, calls) = acme_dispatcher();
        let (mut ctx, host) = create_test_context();
        dispatcher.init(&mut ctx);

        let err = dispatcher
            .draw3p(&mut ctx, "unregistered-id", &ConfigData::new())
            .expect_err("unknown vendor should fail");

        assert!(matches!(
            err.current_context(),
            FrameError::UnknownVendor { vendor } if vendor == "unregistered-id"
        ));
        assert!(calls.borrow().is_empty(), "no renderer may run");
        assert_eq!(ctx.state(), DispatchState::Errored);
        assert!(matches!(
            host.messages().as_slice(),
            [HostMessage::Report3pError { .. }]
        ));
    }

    #[test]
    fn renderer_validation_error_ends_errored() {
        let (dispatcher, _) = acme_dispatcher();
        let (mut ctx, host) = create_test_context();
        dispatcher.init(&mut ctx);

        let err = dispatcher
            .draw3p(&mut ctx, "acme", &ConfigData::new())
            .expect_err("zone is required");
        assert!(matches!(
            err.current_context(),
            FrameError::MissingParameter { key, .. } if key == "zone"
        ));
        assert_eq!(ctx.state(), DispatchState::Errored);
        assert_eq!(host.messages().len(), 1);
    }

    #[test]
    fn context_is_single_use() {
        let (dispatcher, calls) = acme_dispatcher();
        let (mut ctx, _) = create_test_context();
        dispatcher.init(&mut ctx);

        let data = ConfigData::new().with("zone", "1");
        dispatcher.draw3p(&mut ctx, "acme", &data).expect("first draw");
        let err = dispatcher
            .draw3p(&mut ctx, "acme", &data)
            .expect_err("second draw should fail");
        assert!(matches!(
            err.current_context(),
            FrameError::AlreadyDispatched { .. }
        ));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn draw_requires_init() {
        let (dispatcher, _) = acme_dispatcher();
        let (mut ctx, _) = create_test_context();
        assert!(dispatcher
            .draw3p(&mut ctx, "acme", &ConfigData::new().with("zone", "1"))
            .is_err());
    }

    #[test]
    fn init_publishes_mode() {
        let (dispatcher, _) = acme_dispatcher();
        let (mut ctx, _) = create_test_context();
        ctx.metadata_mut().mode.test = true;
        dispatcher.init(&mut ctx);

        assert_eq!(ctx.state(), DispatchState::Idle);
        assert_eq!(
            ctx.global(AMP_MODE_GLOBAL).and_then(|mode| mode.get("test")),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn draw_embed_runs_config_callback_first() {
        let (dispatcher, calls) = acme_dispatcher();
        let (mut ctx, _) = create_test_context();
        dispatcher.init(&mut ctx);

        let data = ConfigData::new().with("type", "acme");
        dispatcher
            .draw_embed(
                &mut ctx,
                data,
                Some(Box::new(|data: &mut ConfigData| -> Result<(), Report<FrameError>> {
                    data.insert("zone", "42");
                    Ok(())
                })),
            )
            .expect("callback supplies the zone");

        assert_eq!(calls.borrow()[0].get_str("zone"), Some("42"));
    }

    #[test]
    fn draw_embed_enforces_embed_tag() {
        let (dispatcher, calls) = acme_dispatcher();
        let (mut ctx, _) = create_test_context();
        ctx.metadata_mut().tag_name = Some("AMP-EMBED".to_string());
        dispatcher.init(&mut ctx);

        let err = dispatcher
            .draw_embed(&mut ctx, ConfigData::new().with("type", "acme").with("zone", "1"), None)
            .expect_err("acme is not an amp-embed type");
        assert!(matches!(
            err.current_context(),
            FrameError::TagNotAllowed { .. }
        ));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn draw_embed_requires_type() {
        let (dispatcher, _) = acme_dispatcher();
        let (mut ctx, _) = create_test_context();
        dispatcher.init(&mut ctx);
        assert!(dispatcher.draw_embed(&mut ctx, ConfigData::new(), None).is_err());
    }
}
