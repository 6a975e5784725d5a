use std::sync::Arc;

use error_stack::Report;
use serde_json::{json, Map, Value};

use crate::context::{Element, ExecutionContext};
use crate::data::ConfigData;
use crate::error::FrameError;
use crate::loader::load_script_with_callbacks;
use crate::registry::VendorRegistration;
use crate::settings::Settings;
use crate::validation::{validate_vendor_data, RequiredKey};

pub const TABOOLA_VENDOR_ID: &str = "taboola";

/// Queue the loader script drains on startup.
const TABOOLA_GLOBAL: &str = "_taboola";
const CONTAINER_ID: &str = "c";

/// Exactly one of these names the kind of page the widget sits on.
const PAGE_TYPES: &[&str] = &[
    "article", "video", "photo", "search", "category", "homepage", "other",
];
const OPTIONAL_KEYS: &[&str] = &["mode", "placement", "target_type", "url", "referrer"];

#[must_use]
pub fn register(_settings: &Settings) -> Option<VendorRegistration> {
    Some(VendorRegistration::new(TABOOLA_VENDOR_ID, Arc::new(taboola)))
}

/// # Errors
///
/// Fails without `publisher` or without exactly one page type.
pub fn taboola(ctx: &mut ExecutionContext, data: &ConfigData) -> Result<(), Report<FrameError>> {
    validate_vendor_data(
        ctx,
        data,
        &[RequiredKey::Key("publisher"), RequiredKey::OneOf(PAGE_TYPES)],
        OPTIONAL_KEYS,
    )?;

    let publisher = data
        .get("publisher")
        .map(ToString::to_string)
        .unwrap_or_default();

    let mut page = Map::new();
    if let Some(page_type) = PAGE_TYPES.iter().find(|key| data.has(key)) {
        if let Some(value) = data.get(page_type) {
            page.insert((*page_type).to_string(), value.to_json());
        }
    }
    let url = data
        .get_str("url")
        .map(str::to_string)
        .or_else(|| ctx.metadata().canonical_url.clone());
    page.insert("url".to_string(), json!(url));
    ctx.push_global(TABOOLA_GLOBAL, Value::Object(page));

    ctx.push_global(
        TABOOLA_GLOBAL,
        json!({
            "mode": data.get_str("mode"),
            "placement": data.get_str("placement"),
            "target_type": data.get_str("target_type"),
            "container": CONTAINER_ID,
            "framework": "amp",
        }),
    );
    ctx.document_mut()
        .append(Element::new("div").with_attribute("id", CONTAINER_ID));

    let loader = format!(
        "https://cdn.taboola.com/libtrc/{}/loader.js",
        urlencoding::encode(&publisher)
    );
    // The loader reports render start itself once the widget fills.
    load_script_with_callbacks(
        ctx,
        &loader,
        None,
        Some(Box::new(ExecutionContext::no_content_available)),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DispatchState, HostMessage, ScriptEvent};
    use crate::dispatcher::Dispatcher;
    use crate::registry::VendorRegistry;
    use crate::test_support::tests::{create_test_context, create_test_settings};

    fn dispatcher() -> Dispatcher {
        let settings = create_test_settings();
        let mut registry = VendorRegistry::new();
        registry
            .register_vendor(register(&settings).expect("taboola always registers"))
            .expect("should register");
        Dispatcher::new(registry, settings)
    }

    #[test]
    fn queues_config_and_loads_publisher_loader() {
        let (mut ctx, _) = create_test_context();
        ctx.metadata_mut().canonical_url = Some("https://publisher.test/story".to_string());
        let dispatcher = dispatcher();
        dispatcher.init(&mut ctx);

        let data = ConfigData::new()
            .with("publisher", "pub name")
            .with("article", "auto")
            .with("mode", "thumbs-1r");
        dispatcher
            .draw3p(&mut ctx, TABOOLA_VENDOR_ID, &data)
            .expect("taboola should render");

        let queue = ctx
            .global(TABOOLA_GLOBAL)
            .and_then(Value::as_array)
            .expect("queue should be published");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0]["article"], json!("auto"));
        assert_eq!(queue[0]["url"], json!("https://publisher.test/story"));
        assert_eq!(queue[1]["mode"], json!("thumbs-1r"));

        let (_, script) = ctx.document().scripts().next().expect("loader injected");
        assert_eq!(
            script.attribute("src"),
            Some("https://cdn.taboola.com/libtrc/pub%20name/loader.js")
        );
        assert_eq!(ctx.state(), DispatchState::Dispatched);
    }

    #[test]
    fn loader_failure_reports_no_content() {
        let (mut ctx, host) = create_test_context();
        let dispatcher = dispatcher();
        dispatcher.init(&mut ctx);
        dispatcher
            .draw3p(
                &mut ctx,
                TABOOLA_VENDOR_ID,
                &ConfigData::new().with("publisher", "p").with("video", "auto"),
            )
            .expect("taboola should render");

        assert_eq!(ctx.settle_all_scripts(ScriptEvent::Error), 1);
        assert_eq!(ctx.state(), DispatchState::NoContentAvailable);
        assert_eq!(host.messages(), vec![HostMessage::NoContentAvailable]);
    }

    #[test]
    fn requires_exactly_one_page_type() {
        let (mut ctx, _) = create_test_context();
        let dispatcher = dispatcher();
        dispatcher.init(&mut ctx);
        let data = ConfigData::new()
            .with("publisher", "p")
            .with("article", "auto")
            .with("video", "auto");
        let err = dispatcher
            .draw3p(&mut ctx, TABOOLA_VENDOR_ID, &data)
            .expect_err("two page types conflict");
        assert!(matches!(
            err.current_context(),
            FrameError::ConflictingParameters { .. }
        ));
        assert!(ctx.global(TABOOLA_GLOBAL).is_none());
    }
}
