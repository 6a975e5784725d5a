//! `_ping_`: the test vendor used by integration tests and local pages.
//!
//! Renders an image when `valid` is truthy and reports no content
//! otherwise, so both terminal states can be exercised without a real ad
//! network.

use std::sync::Arc;

use error_stack::Report;
use serde_json::json;

use crate::context::{Element, ExecutionContext, Size};
use crate::data::{ConfigData, DataValue};
use crate::error::FrameError;
use crate::loader::validate_src_prefix;
use crate::registry::VendorRegistration;
use crate::settings::Settings;
use crate::validation::{validate_vendor_data, RequiredKey};

pub const PING_VENDOR_ID: &str = "_ping_";

const OPTIONAL_KEYS: &[&str] = &["valid", "adHeight", "adWidth", "enableIo", "id"];
const ALLOWED_URL_PREFIXES: &[&str] = &["https://", "http://ads.localhost"];

#[must_use]
pub fn register(_settings: &Settings) -> Option<VendorRegistration> {
    Some(VendorRegistration::new(PING_VENDOR_ID, Arc::new(ping)))
}

/// # Errors
///
/// Fails when `url` is missing or not an http(s) URL.
pub fn ping(ctx: &mut ExecutionContext, data: &ConfigData) -> Result<(), Report<FrameError>> {
    validate_vendor_data(ctx, data, &[RequiredKey::Key("url")], OPTIONAL_KEYS)?;
    let url = data.get_str("url").unwrap_or_default();
    validate_src_prefix(ALLOWED_URL_PREFIXES, url)?;

    if data.get("enableIo").is_some_and(DataValue::is_truthy) {
        ctx.observe_intersection(Box::new(|entry| {
            log::debug!("_ping_ intersection ratio {}", entry.intersection_ratio);
        }));
    }

    if !data.get("valid").is_some_and(DataValue::is_truthy) {
        ctx.no_content_available();
        return Ok(());
    }

    let width = data.get("adWidth").and_then(DataValue::as_u32);
    let height = data.get("adHeight").and_then(DataValue::as_u32);

    let mut image = Element::new("img").with_attribute("src", url);
    if let Some(id) = data.get("id") {
        image = image.with_attribute("id", id.to_string());
    }
    if let (Some(width), Some(height)) = (width, height) {
        image = image
            .with_attribute("width", width.to_string())
            .with_attribute("height", height.to_string());
    }
    ctx.document_mut().append(image);

    ctx.publish_global("ping", json!({ "url": url, "width": width, "height": height }));

    let size = width.zip(height).map(|(width, height)| Size::new(width, height));
    ctx.render_start(size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DispatchState, HostMessage};
    use crate::dispatcher::Dispatcher;
    use crate::registry::VendorRegistry;
    use crate::test_support::tests::{create_test_context, create_test_settings};

    type Dispatched = (
        ExecutionContext,
        Vec<HostMessage>,
        Result<(), Report<FrameError>>,
    );

    fn dispatch(data: &ConfigData) -> Dispatched {
        let settings = create_test_settings();
        let mut registry = VendorRegistry::new();
        registry
            .register_vendor(register(&settings).expect("ping always registers"))
            .expect("should register");
        let dispatcher = Dispatcher::new(registry, settings);

        let (mut ctx, host) = create_test_context();
        dispatcher.init(&mut ctx);
        let result = dispatcher.draw3p(&mut ctx, PING_VENDOR_ID, data);
        (ctx, host.messages(), result)
    }

    #[test]
    fn valid_ping_renders_image() {
        let data = ConfigData::new()
            .with("url", "https://ads.test/pixel.png")
            .with("valid", "true")
            .with("adWidth", "300")
            .with("adHeight", 250u32);

        let (ctx, messages, result) = dispatch(&data);
        assert!(result.is_ok());
        assert_eq!(ctx.state(), DispatchState::RenderStarted);
        assert_eq!(
            messages,
            vec![HostMessage::RenderStart {
                size: Some(Size::new(300, 250))
            }]
        );
        let image = &ctx.document().nodes()[0];
        assert_eq!(image.tag, "img");
        assert_eq!(image.attribute("width"), Some("300"));
        assert!(ctx.global("ping").is_some());
    }

    #[test]
    fn invalid_ping_has_no_content() {
        let data = ConfigData::new().with("url", "https://ads.test/pixel.png");
        let (ctx, messages, result) = dispatch(&data);
        assert!(result.is_ok());
        assert_eq!(ctx.state(), DispatchState::NoContentAvailable);
        assert_eq!(messages, vec![HostMessage::NoContentAvailable]);
    }

    #[test]
    fn rejects_non_http_url() {
        let data = ConfigData::new()
            .with("url", "javascript:alert(1)")
            .with("valid", true);
        let (ctx, _, result) = dispatch(&data);
        assert!(matches!(
            result.expect_err("url should be rejected").current_context(),
            FrameError::InvalidSrc { .. }
        ));
        assert!(ctx.document().nodes().is_empty());
    }
}
