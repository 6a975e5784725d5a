//! The execution context of a single embedded ad.
//!
//! One [`ExecutionContext`] exists per ad slot. It owns the frame document,
//! the global object vendor scripts read from, the host capability used to
//! talk back to the embedding page, and the scripts whose load or error
//! event has not been delivered yet.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use error_stack::Report;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::error::FrameError;
use crate::frame::FrameMetadata;
use crate::validation::ValidationMode;

/// Index of a node in the frame document.
pub type NodeId = usize;

/// Callback run with the context when a script event is delivered.
pub type ScriptCallback = Box<dyn FnOnce(&mut ExecutionContext)>;

/// Rounds of callback-triggered loads [`ExecutionContext::settle_all_scripts`]
/// follows before giving up.
pub const MAX_SETTLE_ROUNDS: usize = 8;

/// Callback receiving intersection changes observed by the host.
pub type IntersectionCallback = Box<dyn FnMut(&IntersectionEntry)>;

/// Lifecycle of one render attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Created, `init` not run yet.
    Loading,
    Idle,
    Dispatched,
    RenderStarted,
    NoContentAvailable,
    Errored,
}

impl DispatchState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::RenderStarted | Self::NoContentAvailable | Self::Errored
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionEntry {
    pub intersection_ratio: f64,
    pub time_ms: u64,
}

/// Messages the frame sends to the embedding page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum HostMessage {
    RenderStart { size: Option<Size> },
    NoContentAvailable,
    ResizeRequest { width: u32, height: u32 },
    BootstrapLoaded,
    #[serde(rename = "report-3p-error")]
    Report3pError { error: String },
}

/// Capability exposed by the host page to code running in the frame.
///
/// The core only consumes this trait; the host implements it.
pub trait HostContext {
    fn render_start(&mut self, size: Option<Size>);
    fn no_content_available(&mut self);
    fn request_resize(&mut self, width: u32, height: u32);
    fn observe_intersection(&mut self, callback: IntersectionCallback);
    fn bootstrap_loaded(&mut self);
    fn report_3p_error(&mut self, error: &FrameError);
}

/// In-process host that records every message it receives.
///
/// Clones share the same log, so a caller can keep a handle after moving
/// one into an [`ExecutionContext`].
#[derive(Clone, Default)]
pub struct RecordingHost {
    messages: Rc<RefCell<Vec<HostMessage>>>,
    observers: Rc<RefCell<Vec<IntersectionCallback>>>,
}

impl RecordingHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<HostMessage> {
        self.messages.borrow().clone()
    }

    /// Delivers an intersection change to every registered observer.
    pub fn notify_intersection(&self, entry: &IntersectionEntry) {
        for observer in self.observers.borrow_mut().iter_mut() {
            observer(entry);
        }
    }

    fn push(&self, message: HostMessage) {
        self.messages.borrow_mut().push(message);
    }
}

impl fmt::Debug for RecordingHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHost")
            .field("messages", &self.messages.borrow())
            .field("observers", &self.observers.borrow().len())
            .finish()
    }
}

impl HostContext for RecordingHost {
    fn render_start(&mut self, size: Option<Size>) {
        self.push(HostMessage::RenderStart { size });
    }

    fn no_content_available(&mut self) {
        self.push(HostMessage::NoContentAvailable);
    }

    fn request_resize(&mut self, width: u32, height: u32) {
        self.push(HostMessage::ResizeRequest { width, height });
    }

    fn observe_intersection(&mut self, callback: IntersectionCallback) {
        self.observers.borrow_mut().push(callback);
    }

    fn bootstrap_loaded(&mut self) {
        self.push(HostMessage::BootstrapLoaded);
    }

    fn report_3p_error(&mut self, error: &FrameError) {
        self.push(HostMessage::Report3pError {
            error: error.to_string(),
        });
    }
}

/// How a script node entered the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    /// Appended after parsing, loads asynchronously.
    Appended,
    /// Written into the document stream during parsing.
    Written,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// An element in the frame document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<Attribute>,
    pub text: Option<String>,
    pub script_mode: Option<ScriptMode>,
}

impl Element {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            text: None,
            script_mode: None,
        }
    }

    #[must_use]
    pub fn script(src: &str, mode: ScriptMode) -> Self {
        let mut element = Self::new("script").with_attribute("src", src);
        if mode == ScriptMode::Appended {
            element = element.with_attribute("async", "");
        }
        element.script_mode = Some(mode);
        element
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }
}

/// Delivered by the environment once a script finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEvent {
    Load,
    Error,
}

pub(crate) enum Completion {
    Future(oneshot::Sender<Result<(), Report<FrameError>>>),
    Callbacks {
        on_success: Option<ScriptCallback>,
        on_error: Option<ScriptCallback>,
    },
}

struct PendingScript {
    url: String,
    completion: Completion,
}

/// The frame document: nodes in insertion order.
pub struct Document {
    nodes: Vec<Element>,
    parsing: bool,
    pending: HashMap<NodeId, PendingScript>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            parsing: true,
            pending: HashMap::new(),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes)
            .field("parsing", &self.parsing)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Document {
    #[must_use]
    pub fn nodes(&self) -> &[Element] {
        &self.nodes
    }

    pub fn append(&mut self, element: Element) -> NodeId {
        self.nodes.push(element);
        self.nodes.len() - 1
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(id)
    }

    /// Script nodes in document order.
    pub fn scripts(&self) -> impl Iterator<Item = (NodeId, &Element)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, element)| element.script_mode.is_some())
    }

    /// True until the initial parse of the frame document finishes.
    #[must_use]
    pub fn is_parsing(&self) -> bool {
        self.parsing
    }

    pub fn close(&mut self) {
        self.parsing = false;
    }

    /// Node ids whose load/error event is still outstanding, ascending.
    #[must_use]
    pub fn pending_scripts(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn track(&mut self, node: NodeId, url: &str, completion: Completion) {
        self.pending.insert(
            node,
            PendingScript {
                url: url.to_string(),
                completion,
            },
        );
    }
}

/// Sandboxed global environment for one ad slot.
pub struct ExecutionContext {
    metadata: FrameMetadata,
    document: Document,
    globals: Map<String, Value>,
    host: Box<dyn HostContext>,
    state: DispatchState,
    validation_mode: ValidationMode,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("metadata", &self.metadata)
            .field("document", &self.document)
            .field("globals", &self.globals)
            .field("state", &self.state)
            .field("validation_mode", &self.validation_mode)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    #[must_use]
    pub fn new(metadata: FrameMetadata, host: Box<dyn HostContext>) -> Self {
        Self {
            metadata,
            document: Document::default(),
            globals: Map::new(),
            host,
            state: DispatchState::Loading,
            validation_mode: ValidationMode::default(),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut FrameMetadata {
        &mut self.metadata
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DispatchState) {
        log::debug!("frame state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// How renderers treat data keys they did not declare.
    #[must_use]
    pub fn validation_mode(&self) -> ValidationMode {
        self.validation_mode
    }

    pub fn set_validation_mode(&mut self, mode: ValidationMode) {
        self.validation_mode = mode;
    }

    #[must_use]
    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    #[must_use]
    pub fn global(&self, key: &str) -> Option<&Value> {
        self.globals.get(key)
    }

    /// Publishes a value under a well-known global name read by a vendor's
    /// external script. This is the only way renderers write globals.
    pub fn publish_global(&mut self, key: &str, value: Value) -> Option<Value> {
        log::debug!("publishing global {key}");
        self.globals.insert(key.to_string(), value)
    }

    /// Appends to a global queue array, creating it when absent
    /// (`window.x = window.x || []; x.push(v)`).
    pub fn push_global(&mut self, key: &str, value: Value) {
        let slot = self
            .globals
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = slot {
            items.push(value);
        } else {
            log::warn!("global {key} is not an array, replacing it");
            *slot = Value::Array(vec![value]);
        }
    }

    pub fn host_mut(&mut self) -> &mut dyn HostContext {
        self.host.as_mut()
    }

    /// Tells the host the ad started rendering.
    pub fn render_start(&mut self, size: Option<Size>) {
        if self.state != DispatchState::Dispatched {
            log::warn!("ignoring render_start in state {:?}", self.state);
            return;
        }
        self.set_state(DispatchState::RenderStarted);
        self.host.render_start(size);
    }

    /// Tells the host there is no ad to show so the slot can collapse.
    pub fn no_content_available(&mut self) {
        if self.state != DispatchState::Dispatched {
            log::warn!("ignoring no_content_available in state {:?}", self.state);
            return;
        }
        self.set_state(DispatchState::NoContentAvailable);
        self.host.no_content_available();
    }

    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.host.request_resize(width, height);
    }

    pub fn observe_intersection(&mut self, callback: IntersectionCallback) {
        self.host.observe_intersection(callback);
    }

    pub(crate) fn report_error(&mut self, error: &FrameError) {
        log::warn!("reporting 3p error to host: {error}");
        self.host.report_3p_error(error);
    }

    /// Delivers a script load or error event.
    ///
    /// Returns false when the node has no outstanding event, which makes a
    /// second delivery for the same node a no-op.
    pub fn deliver_script_event(&mut self, node: NodeId, event: ScriptEvent) -> bool {
        let Some(pending) = self.document.pending.remove(&node) else {
            log::debug!("no pending script for node {node}");
            return false;
        };

        log::debug!("script {} finished with {:?}", pending.url, event);
        match pending.completion {
            Completion::Future(sender) => {
                let outcome = match event {
                    ScriptEvent::Load => Ok(()),
                    ScriptEvent::Error => Err(Report::new(FrameError::ScriptLoad {
                        url: pending.url,
                    })),
                };
                // The receiver may already be gone; that drops the outcome.
                let _ = sender.send(outcome);
            }
            Completion::Callbacks {
                on_success,
                on_error,
            } => {
                let callback = match event {
                    ScriptEvent::Load => on_success,
                    ScriptEvent::Error => on_error,
                };
                match callback {
                    Some(callback) => callback(self),
                    None if event == ScriptEvent::Error => {
                        log::debug!("dropping load error for {}, no handler", pending.url);
                    }
                    None => {}
                }
            }
        }
        true
    }

    /// Delivers the same event to every outstanding script, in node order.
    ///
    /// Scripts loaded by the delivered callbacks are settled in later rounds,
    /// up to [`MAX_SETTLE_ROUNDS`]; anything still outstanding after that is
    /// left pending.
    pub fn settle_all_scripts(&mut self, event: ScriptEvent) -> usize {
        let mut settled = 0;
        for _ in 0..MAX_SETTLE_ROUNDS {
            let pending = self.document.pending_scripts();
            if pending.is_empty() {
                return settled;
            }
            for node in pending {
                if self.deliver_script_event(node, event) {
                    settled += 1;
                }
            }
        }
        let remaining = self.document.pending.len();
        if remaining > 0 {
            log::warn!("{remaining} script(s) still pending after {MAX_SETTLE_ROUNDS} rounds");
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_script_with_callbacks;

    fn context() -> (ExecutionContext, RecordingHost) {
        let host = RecordingHost::new();
        let ctx = ExecutionContext::new(FrameMetadata::default(), Box::new(host.clone()));
        (ctx, host)
    }

    #[test]
    fn render_start_only_from_dispatched() {
        let (mut ctx, host) = context();
        ctx.render_start(None);
        assert!(host.messages().is_empty(), "idle frame cannot render");

        ctx.set_state(DispatchState::Dispatched);
        ctx.render_start(Some(Size::new(300, 250)));
        ctx.no_content_available();
        assert_eq!(ctx.state(), DispatchState::RenderStarted);
        assert_eq!(
            host.messages(),
            vec![HostMessage::RenderStart {
                size: Some(Size::new(300, 250))
            }]
        );
    }

    #[test]
    fn push_global_creates_queue() {
        let (mut ctx, _) = context();
        ctx.push_global("_queue", Value::from(1));
        ctx.push_global("_queue", Value::from(2));
        assert_eq!(ctx.global("_queue"), Some(&Value::from(vec![1, 2])));
    }

    #[test]
    fn intersection_observers_receive_entries() {
        let (mut ctx, host) = context();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctx.observe_intersection(Box::new(move |entry| {
            sink.borrow_mut().push(entry.intersection_ratio);
        }));

        host.notify_intersection(&IntersectionEntry {
            intersection_ratio: 0.5,
            time_ms: 10,
        });
        assert_eq!(*seen.borrow(), vec![0.5]);
    }

    fn load_fallback(ctx: &mut ExecutionContext) {
        load_script_with_callbacks(
            ctx,
            "https://fallback.example.test/a.js",
            None,
            Some(Box::new(load_fallback)),
        )
        .expect("fallback should inject");
    }

    #[test]
    fn settle_drains_scripts_loaded_by_callbacks() {
        let (mut ctx, _) = context();
        load_script_with_callbacks(
            &mut ctx,
            "https://example.test/a.js",
            None,
            Some(Box::new(|ctx: &mut ExecutionContext| {
                load_script_with_callbacks(ctx, "https://example.test/b.js", None, None)
                    .expect("fallback should inject");
            })),
        )
        .expect("should inject");

        assert_eq!(ctx.settle_all_scripts(ScriptEvent::Error), 2);
        assert!(ctx.document().pending_scripts().is_empty());
        assert_eq!(ctx.document().scripts().count(), 2);
    }

    #[test]
    fn settle_stops_on_endless_fallbacks() {
        let (mut ctx, _) = context();
        load_fallback(&mut ctx);

        assert_eq!(
            ctx.settle_all_scripts(ScriptEvent::Error),
            MAX_SETTLE_ROUNDS
        );
        assert_eq!(ctx.document().pending_scripts().len(), 1);
    }

    #[test]
    fn delivering_unknown_node_is_noop() {
        let (mut ctx, _) = context();
        assert!(!ctx.deliver_script_event(7, ScriptEvent::Load));
    }
}
