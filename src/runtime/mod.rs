//! Runtime extensions
//!
//! External services customize generated objects and gate lifecycle
//! transitions through hooks. The controller only knows the request and
//! response contracts in [`hooks`], the registrations in [`registry`] and
//! the [`ExtensionTransport`] seam. [`HttpExtensionTransport`] delivers
//! requests over HTTPS.

pub mod client;
pub mod hooks;
pub mod http;
pub mod registry;

pub use client::{envelope, BlockingOutcome, ExtensionTransport, RuntimeClient};
pub use hooks::{Hook, ResponseStatus, HOOKS_API_VERSION};
pub use http::HttpExtensionTransport;
pub use registry::{ExtensionRegistration, ExtensionRegistry, FailurePolicy};
