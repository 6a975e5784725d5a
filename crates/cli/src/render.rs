//! Offline frame rendering.
//!
//! Runs the frame bootstrap against an in-process host, settles the
//! injected scripts, and prints the resulting document together with the
//! messages the frame sent to its host.

use std::path::Path;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};
use third_party_frame_common::bootstrap::{Bootstrap, DrawOptions};
use third_party_frame_common::context::{
    DispatchState, ExecutionContext, HostMessage, RecordingHost, ScriptEvent,
};
use third_party_frame_common::data::TYPE_KEY;
use third_party_frame_common::frame::FrameMetadata;
use third_party_frame_common::settings::Settings;
use third_party_frame_common::templates::render_frame_document;

use crate::config::load_settings;
use crate::error::CliError;

/// How injected scripts finish after the bootstrap returns.
#[derive(Clone, Copy, ValueEnum, Debug, Default, PartialEq, Eq)]
pub enum ScriptOutcome {
    #[default]
    Succeed,
    Fail,
    /// Leave scripts loading.
    Pending,
}

#[derive(Debug)]
pub struct RenderRequest<'a> {
    pub vendor: &'a str,
    /// JSON object of embed attributes. A `_context` member, if present,
    /// is read as frame metadata.
    pub data: &'a str,
    pub tag: Option<&'a str>,
    pub load_scripts: ScriptOutcome,
    pub local_dev: bool,
}

#[derive(Debug, Serialize)]
pub struct RenderOutput {
    pub state: DispatchState,
    pub messages: Vec<HostMessage>,
    #[serde(skip)]
    pub html: String,
}

fn frame_metadata(
    settings: &Settings,
    request: &RenderRequest<'_>,
) -> Result<FrameMetadata, CliError> {
    let mut attributes: Map<String, Value> = serde_json::from_str(request.data)?;
    attributes.insert(TYPE_KEY.to_string(), Value::String(request.vendor.to_string()));

    let mut metadata = FrameMetadata::from_attributes(attributes)
        .map_err(|e| CliError::Frame(e.current_context().to_string()))?;
    if metadata.frame_location.is_empty() {
        metadata.frame_location = format!("https://{}/frame.html", settings.frame.third_party_host);
    }
    if let Some(tag) = request.tag {
        metadata.tag_name = Some(tag.to_string());
    }
    metadata.mode.local_dev |= request.local_dev;
    Ok(metadata)
}

/// Bootstraps a frame for `request` and settles its scripts.
pub fn render_frame(
    settings: &Settings,
    request: &RenderRequest<'_>,
) -> Result<RenderOutput, CliError> {
    let metadata = frame_metadata(settings, request)?;
    let host = RecordingHost::new();
    let mut ctx = ExecutionContext::new(metadata, Box::new(host.clone()));

    Bootstrap::new(settings.clone())
        .draw3p(&mut ctx, DrawOptions::default())
        .map_err(|e| {
            log::debug!("bootstrap failed: {e:?}");
            CliError::Frame(e.current_context().to_string())
        })?;

    let settled = match request.load_scripts {
        ScriptOutcome::Succeed => ctx.settle_all_scripts(ScriptEvent::Load),
        ScriptOutcome::Fail => ctx.settle_all_scripts(ScriptEvent::Error),
        ScriptOutcome::Pending => 0,
    };
    log::debug!("settled {settled} script(s), state {:?}", ctx.state());

    let html = render_frame_document(&ctx, request.vendor)
        .map_err(|e| CliError::Frame(e.current_context().to_string()))?;

    Ok(RenderOutput {
        state: ctx.state(),
        messages: host.messages(),
        html,
    })
}

/// Render command: prints the frame document, then the host message log.
pub fn render(file: Option<&Path>, request: &RenderRequest<'_>) -> Result<(), CliError> {
    let settings = load_settings(file)?;
    let output = render_frame(&settings, request)?;

    println!("{}", output.html);
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
