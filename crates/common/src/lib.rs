//! Common functionality for the third-party frame runtime.
//!
//! A third-party frame is an isolated document that renders one vendor's
//! embed on behalf of a host page. This crate provides the frame's
//! execution context, the vendor registry and dispatcher, script loading,
//! data validation, and the bundled vendor renderers.
//!
//! # Modules
//!
//! - [`bootstrap`]: Embedding checks and the frame entry point
//! - [`context`]: Execution context, frame document, and host channel
//! - [`data`]: Embed configuration data
//! - [`dispatcher`]: Vendor dispatch and the frame lifecycle
//! - [`error`]: Error types and error handling utilities
//! - [`frame`]: Frame metadata and embedding validation
//! - [`loader`]: External script loading
//! - [`registry`]: Vendor renderer registry
//! - [`settings`]: Configuration management and validation
//! - [`templates`]: Handlebars rendering of the frame document
//! - [`test_support`]: Testing utilities and mocks
//! - [`validation`]: Required and optional data key checks
//! - [`vendors`]: Bundled vendor renderers

pub mod bootstrap;
pub mod context;
pub mod data;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod loader;
pub mod registry;
pub mod settings;
pub mod templates;
pub mod test_support;
pub mod validation;
pub mod vendors;
