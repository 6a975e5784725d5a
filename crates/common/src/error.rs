//! Error types for the third-party frame.
//!
//! Every fallible operation returns `Result<T, Report<FrameError>>`. Call
//! sites attach context with [`error_stack::ResultExt::change_context`] and
//! [`error_stack::Report::attach`] rather than formatting strings by hand.

use derive_more::{Display, Error};

/// Errors raised while bootstrapping, validating, or rendering an embed.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A required configuration key was absent or empty.
    #[display("Missing attribute for {vendor}: {key}")]
    MissingParameter { vendor: String, key: String },

    /// Strict validation found a key that is neither required nor optional.
    #[display("Unexpected attribute for {vendor}: {key}")]
    UnexpectedParameter { vendor: String, key: String },

    /// More than one key of an exactly-one-of group was supplied.
    #[display("{vendor} accepts only one of [{keys}]")]
    ConflictingParameters { vendor: String, keys: String },

    /// `draw3p` was invoked for a vendor that was never registered.
    #[display("Unknown vendor type: {vendor}")]
    UnknownVendor { vendor: String },

    /// A vendor id was registered twice in one context.
    #[display("Vendor {vendor} is already registered")]
    DuplicateRegistration { vendor: String },

    /// A vendor id does not match the allowed id alphabet.
    #[display("Invalid vendor id: {vendor:?}")]
    InvalidVendorId { vendor: String },

    /// A vendor script failed to load or execute.
    #[display("Failed to load script: {url}")]
    ScriptLoad { url: String },

    /// A data-provided URL violates the vendor's allowlist.
    #[display("Invalid src {src}, expected {expected}")]
    InvalidSrc { src: String, expected: String },

    /// `write_script` was called after the document finished parsing.
    #[display("Cannot write {url} into a closed document")]
    DocumentClosed { url: String },

    /// The context already left the idle state.
    #[display("Frame already dispatched {vendor}")]
    AlreadyDispatched { vendor: String },

    /// The embed type may not be used with the embedding tag.
    #[display("Embed type {vendor} not allowed with tag {tag}")]
    TagNotAllowed { vendor: String, tag: String },

    /// The vendor type was not allowlisted for a custom frame.
    #[display("Non-allowlisted 3p type for custom iframe: {vendor}")]
    TypeNotAllowed { vendor: String },

    /// The bootstrap was loaded as a top level document.
    #[display("Must be framed: {location}")]
    NotFramed { location: String },

    /// The ancestor origin does not match the claimed parent origin.
    #[display("Parent origin mismatch: {ancestor}, {parent}")]
    ParentOriginMismatch { ancestor: String, parent: String },

    /// The embedding page is not on an allowed host.
    #[display("Invalid embedding hostname: {host} not in {allowed}")]
    InvalidEmbeddingHost { host: String, allowed: String },

    /// Settings or frame metadata could not be loaded.
    #[display("Configuration error: {message}")]
    Configuration { message: String },
}

impl FrameError {
    /// Returns true for errors caused by the embedding page's markup or
    /// data, which are forwarded to the host via `report_3p_error`.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. }
                | Self::UnexpectedParameter { .. }
                | Self::ConflictingParameters { .. }
                | Self::UnknownVendor { .. }
                | Self::InvalidSrc { .. }
                | Self::TagNotAllowed { .. }
                | Self::TypeNotAllowed { .. }
                | Self::ParentOriginMismatch { .. }
        )
    }
}
