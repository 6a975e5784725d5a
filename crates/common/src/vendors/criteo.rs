use std::sync::Arc;

use error_stack::Report;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::context::{Element, ExecutionContext};
use crate::data::ConfigData;
use crate::error::FrameError;
use crate::loader::{load_script_with_callbacks, validate_src_prefix};
use crate::registry::{Renderer, VendorRegistration};
use crate::settings::{Settings, VendorConfig};
use crate::validation::{validate_vendor_data, RequiredKey};

pub const CRITEO_VENDOR_ID: &str = "criteo";

/// Queue read by the publisher tag once it loads.
const CRITEO_GLOBAL: &str = "CriteoAdUnits";
const CONTAINER_ID: &str = "c";
const OPTIONAL_KEYS: &[&str] = &["tagtype", "zone", "networkid", "scriptUrl"];

/// Hosts the publisher tag may be served from when overridden by data.
const ALLOWED_TAG_PREFIXES: &[&str] = &["https://static.criteo.net/", "https://static.criteo.com/"];

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CriteoConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_publisher_tag_url")]
    #[validate(url)]
    pub publisher_tag_url: String,
}

impl Default for CriteoConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            publisher_tag_url: default_publisher_tag_url(),
        }
    }
}

impl VendorConfig for CriteoConfig {
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagType {
    Passback,
    Standalone,
}

impl TagType {
    fn parse(data: &ConfigData) -> Result<Self, Report<FrameError>> {
        match data.get_str("tagtype").unwrap_or("passback") {
            "passback" => Ok(Self::Passback),
            "standalone" => Ok(Self::Standalone),
            other => Err(Report::new(FrameError::UnexpectedParameter {
                vendor: CRITEO_VENDOR_ID.to_string(),
                key: format!("tagtype={other}"),
            })),
        }
    }
}

pub struct CriteoRenderer {
    config: CriteoConfig,
}

impl CriteoRenderer {
    fn new(config: CriteoConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

fn build(settings: &Settings) -> Option<Arc<CriteoRenderer>> {
    match settings.vendor_config::<CriteoConfig>(CRITEO_VENDOR_ID) {
        Ok(Some(config)) => Some(CriteoRenderer::new(config)),
        Ok(None) if settings.vendors.has_config(CRITEO_VENDOR_ID) => None,
        Ok(None) => Some(CriteoRenderer::new(CriteoConfig::default())),
        Err(err) => {
            log::error!("Failed to load Criteo vendor config: {err:?}");
            None
        }
    }
}

#[must_use]
pub fn register(settings: &Settings) -> Option<VendorRegistration> {
    let renderer = build(settings)?;
    Some(VendorRegistration::new(CRITEO_VENDOR_ID, renderer))
}

impl Renderer for CriteoRenderer {
    fn render(
        &self,
        ctx: &mut ExecutionContext,
        data: &ConfigData,
    ) -> Result<(), Report<FrameError>> {
        validate_vendor_data(ctx, data, &[RequiredKey::Key("zone")], OPTIONAL_KEYS)?;
        let tag_type = TagType::parse(data)?;

        let script_url = match data.get_str("scriptUrl") {
            Some(url) => {
                validate_src_prefix(ALLOWED_TAG_PREFIXES, url)?;
                url.to_string()
            }
            None => self.config.publisher_tag_url.clone(),
        };

        ctx.document_mut()
            .append(Element::new("div").with_attribute("id", CONTAINER_ID));
        ctx.push_global(
            CRITEO_GLOBAL,
            json!({
                "zoneid": data.get("zone").map(ToString::to_string),
                "networkid": data.get("networkid").map(ToString::to_string),
                "containerid": CONTAINER_ID,
                "integrationmode": "amp",
                "standalone": tag_type == TagType::Standalone,
            }),
        );

        load_script_with_callbacks(
            ctx,
            &script_url,
            Some(Box::new(|ctx: &mut ExecutionContext| ctx.render_start(None))),
            Some(Box::new(ExecutionContext::no_content_available)),
        )?;
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_publisher_tag_url() -> String {
    "https://static.criteo.net/js/ld/publishertag.js".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DispatchState, HostMessage, ScriptEvent};
    use crate::dispatcher::Dispatcher;
    use crate::registry::VendorRegistry;
    use crate::test_support::tests::{create_test_context, create_test_settings};

    fn dispatcher(settings: Settings) -> Dispatcher {
        let mut registry = VendorRegistry::new();
        registry
            .register_vendor(register(&settings).expect("criteo should register"))
            .expect("should register");
        Dispatcher::new(registry, settings)
    }

    #[test]
    fn loads_publisher_tag_and_starts_render_on_load() {
        let (mut ctx, host) = create_test_context();
        let dispatcher = dispatcher(create_test_settings());
        dispatcher.init(&mut ctx);
        dispatcher
            .draw3p(&mut ctx, CRITEO_VENDOR_ID, &ConfigData::new().with("zone", 1234u32))
            .expect("criteo should render");

        let (node, script) = ctx.document().scripts().next().expect("tag injected");
        assert_eq!(
            script.attribute("src"),
            Some("https://static.criteo.net/js/ld/publishertag.js")
        );
        let queue = ctx.global(CRITEO_GLOBAL).expect("ad unit queued");
        assert_eq!(queue[0]["zoneid"], json!("1234"));

        assert!(ctx.deliver_script_event(node, ScriptEvent::Load));
        assert_eq!(ctx.state(), DispatchState::RenderStarted);
        assert_eq!(host.messages(), vec![HostMessage::RenderStart { size: None }]);
    }

    #[test]
    fn script_override_must_stay_on_criteo_hosts() {
        let (mut ctx, _) = create_test_context();
        let dispatcher = dispatcher(create_test_settings());
        dispatcher.init(&mut ctx);
        let data = ConfigData::new()
            .with("zone", "1")
            .with("scriptUrl", "https://evil.test/publishertag.js");
        let err = dispatcher
            .draw3p(&mut ctx, CRITEO_VENDOR_ID, &data)
            .expect_err("override host is not allowlisted");
        assert!(matches!(err.current_context(), FrameError::InvalidSrc { .. }));
        assert!(ctx.document().nodes().is_empty());
    }

    #[test]
    fn rejects_unknown_tag_type() {
        let (mut ctx, _) = create_test_context();
        let dispatcher = dispatcher(create_test_settings());
        dispatcher.init(&mut ctx);
        let data = ConfigData::new().with("zone", "1").with("tagtype", "rta");
        assert!(dispatcher.draw3p(&mut ctx, CRITEO_VENDOR_ID, &data).is_err());
    }

    #[test]
    fn config_block_overrides_tag_url() {
        let mut settings = create_test_settings();
        settings
            .vendors
            .insert_config(
                CRITEO_VENDOR_ID.to_string(),
                &json!({"publisher_tag_url": "https://static.criteo.com/js/pt.js"}),
            )
            .expect("should insert vendor config");

        let (mut ctx, _) = create_test_context();
        let dispatcher = dispatcher(settings);
        dispatcher.init(&mut ctx);
        dispatcher
            .draw3p(&mut ctx, CRITEO_VENDOR_ID, &ConfigData::new().with("zone", "1"))
            .expect("criteo should render");
        let (_, script) = ctx.document().scripts().next().expect("tag injected");
        assert_eq!(script.attribute("src"), Some("https://static.criteo.com/js/pt.js"));
    }

    #[test]
    fn disabled_config_block_skips_registration() {
        let mut settings = create_test_settings();
        settings
            .vendors
            .insert_config(CRITEO_VENDOR_ID.to_string(), &json!({"enabled": false}))
            .expect("should insert vendor config");
        assert!(register(&settings).is_none());
    }
}
