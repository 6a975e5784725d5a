//! Serialization of a frame document to HTML.

use error_stack::{Report, ResultExt};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::Value;

use crate::context::{Element, ExecutionContext};
use crate::error::FrameError;

/// Elements rendered without a closing tag.
const VOID_ELEMENTS: &[&str] = &["img", "br", "hr", "input", "meta", "link"];

pub const FRAME_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{title}}</title>
{{#if globals}}<script>
{{#each globals}}window[{{{this.key}}}] = {{{this.value}}};
{{/each}}</script>
{{/if}}</head>
<body>
{{#each nodes}}<{{this.tag}}{{#each this.attributes}} {{this.name}}{{#if this.value}}="{{this.value}}"{{/if}}{{/each}}>{{#unless this.void}}{{this.text}}</{{this.tag}}>{{/unless}}
{{/each}}</body>
</html>
"#;

#[derive(Serialize)]
struct GlobalView {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct NodeView<'a> {
    tag: &'a str,
    attributes: &'a [crate::context::Attribute],
    text: &'a str,
    void: bool,
}

impl<'a> From<&'a Element> for NodeView<'a> {
    fn from(element: &'a Element) -> Self {
        Self {
            tag: &element.tag,
            attributes: &element.attributes,
            text: element.text.as_deref().unwrap_or_default(),
            void: VOID_ELEMENTS.contains(&element.tag.as_str()),
        }
    }
}

#[derive(Serialize)]
struct FrameView<'a> {
    title: &'a str,
    globals: Vec<GlobalView>,
    nodes: Vec<NodeView<'a>>,
}

/// Renders the context's document, preceded by an inline script that
/// installs the published globals.
///
/// # Errors
///
/// Returns [`FrameError::Configuration`] if a global cannot be serialized or
/// the template fails to render.
pub fn render_frame_document(
    ctx: &ExecutionContext,
    title: &str,
) -> Result<String, Report<FrameError>> {
    let globals = ctx
        .globals()
        .iter()
        .map(|(key, value)| {
            Ok(GlobalView {
                key: script_safe_json(&Value::String(key.clone()))?,
                value: script_safe_json(value)?,
            })
        })
        .collect::<Result<Vec<_>, Report<FrameError>>>()?;

    let view = FrameView {
        title,
        globals,
        nodes: ctx.document().nodes().iter().map(NodeView::from).collect(),
    };

    Handlebars::new()
        .render_template(FRAME_TEMPLATE, &view)
        .change_context(FrameError::Configuration {
            message: "Failed to render frame document".to_string(),
        })
}

/// JSON that is safe to inline in a `<script>` element.
fn script_safe_json(value: &Value) -> Result<String, Report<FrameError>> {
    let json = serde_json::to_string(value).change_context(FrameError::Configuration {
        message: "Failed to serialize global".to_string(),
    })?;
    Ok(json.replace("</", "<\\/").replace("<!--", "<\\!--"))
}
