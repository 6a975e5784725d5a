//! Injection of vendor scripts into the frame document.
//!
//! Every call inserts exactly one script node. Completion is delivered
//! later through [`ExecutionContext::deliver_script_event`]; the pending
//! entry is consumed on first delivery, so a load resolves once.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use error_stack::Report;
use tokio::sync::oneshot;
use url::Url;

use crate::context::{Completion, Element, ExecutionContext, NodeId, ScriptCallback, ScriptMode};
use crate::error::FrameError;

/// Hosts that may serve plain http scripts in local development.
const LOCAL_DEV_HOSTS: &[&str] = &["localhost", "ads.localhost", "127.0.0.1"];

/// Single-resolution handle for an asynchronously loaded script.
///
/// Resolves to `Ok(())` on the load event and to
/// [`FrameError::ScriptLoad`] on the error event. If the context is dropped
/// before either event, the load also resolves as failed.
#[derive(Debug)]
pub struct ScriptLoad {
    node: NodeId,
    url: String,
    receiver: oneshot::Receiver<Result<(), Report<FrameError>>>,
}

impl ScriptLoad {
    /// Document node holding the injected script.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Future for ScriptLoad {
    type Output = Result<(), Report<FrameError>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let url = self.url.clone();
        Pin::new(&mut self.receiver).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(Report::new(FrameError::ScriptLoad { url })
                    .attach("frame was torn down before the script finished"))
            })
        })
    }
}

/// Appends an async script and returns a future for its completion.
///
/// # Errors
///
/// Returns [`FrameError::InvalidSrc`] when `url` is not an absolute https
/// URL.
pub fn load_script(
    ctx: &mut ExecutionContext,
    url: &str,
) -> Result<ScriptLoad, Report<FrameError>> {
    ensure_script_url(ctx, url)?;
    let (sender, receiver) = oneshot::channel();
    let node = inject(ctx, url, ScriptMode::Appended, Completion::Future(sender));
    Ok(ScriptLoad {
        node,
        url: url.to_string(),
        receiver,
    })
}

/// Callback form of [`load_script`] for renderers that react to the load
/// inline. At most one callback runs, exactly once. Without `on_error` a
/// failed load is dropped.
///
/// # Errors
///
/// Returns [`FrameError::InvalidSrc`] when `url` is not an absolute https
/// URL.
pub fn load_script_with_callbacks(
    ctx: &mut ExecutionContext,
    url: &str,
    on_success: Option<ScriptCallback>,
    on_error: Option<ScriptCallback>,
) -> Result<NodeId, Report<FrameError>> {
    ensure_script_url(ctx, url)?;
    Ok(inject(
        ctx,
        url,
        ScriptMode::Appended,
        Completion::Callbacks {
            on_success,
            on_error,
        },
    ))
}

/// Writes a script into the document stream at the current position.
///
/// Only valid while the document is still parsing. There is no error
/// callback.
///
/// # Errors
///
/// Returns [`FrameError::DocumentClosed`] after parsing finished and
/// [`FrameError::InvalidSrc`] for a non-https URL.
pub fn write_script(
    ctx: &mut ExecutionContext,
    url: &str,
    on_success: Option<ScriptCallback>,
) -> Result<NodeId, Report<FrameError>> {
    if !ctx.document().is_parsing() {
        return Err(Report::new(FrameError::DocumentClosed {
            url: url.to_string(),
        }));
    }
    ensure_script_url(ctx, url)?;
    Ok(inject(
        ctx,
        url,
        ScriptMode::Written,
        Completion::Callbacks {
            on_success,
            on_error: None,
        },
    ))
}

/// Requires `src` to start with one of `prefixes`.
///
/// # Errors
///
/// Returns [`FrameError::InvalidSrc`].
pub fn validate_src_prefix(prefixes: &[&str], src: &str) -> Result<(), Report<FrameError>> {
    if prefixes.iter().any(|prefix| src.starts_with(prefix)) {
        Ok(())
    } else {
        Err(Report::new(FrameError::InvalidSrc {
            src: src.to_string(),
            expected: format!("prefix {}", prefixes.join(" or ")),
        }))
    }
}

/// Requires `src` to contain `substring`.
///
/// # Errors
///
/// Returns [`FrameError::InvalidSrc`].
pub fn validate_src_contains(substring: &str, src: &str) -> Result<(), Report<FrameError>> {
    if src.contains(substring) {
        Ok(())
    } else {
        Err(Report::new(FrameError::InvalidSrc {
            src: src.to_string(),
            expected: format!("to contain {substring}"),
        }))
    }
}

fn inject(
    ctx: &mut ExecutionContext,
    url: &str,
    mode: ScriptMode,
    completion: Completion,
) -> NodeId {
    let document = ctx.document_mut();
    let node = document.append(Element::script(url, mode));
    document.track(node, url, completion);
    log::debug!("injected script {url} as node {node} ({mode:?})");
    node
}

fn ensure_script_url(ctx: &ExecutionContext, url: &str) -> Result<(), Report<FrameError>> {
    let invalid = || {
        Report::new(FrameError::InvalidSrc {
            src: url.to_string(),
            expected: "an absolute https URL".to_string(),
        })
    };

    let parsed = Url::parse(url).map_err(|_| invalid())?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http"
            if ctx.metadata().mode.local_dev
                && parsed
                    .host_str()
                    .is_some_and(|host| LOCAL_DEV_HOSTS.contains(&host)) =>
        {
            Ok(())
        }
        _ => Err(invalid()),
    }
}
