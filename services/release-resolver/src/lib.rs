//!
//! src/lib.rs
//!
//! Resolves a streaming url or UPC/EAN code into a release: provider
//! metadata, cross platform links filtered by policy, and a slug.
//!
//!

pub mod config;
pub mod errors;
pub mod logging;

pub mod types;
pub mod identifier;
pub mod fetch;
pub mod token;
pub mod provider;
pub mod aggregator;
pub mod policy;
pub mod slug;
pub mod resolver;

pub mod persistent;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::ResolveError;
pub use resolver::ReleaseResolver;
pub use service::ReleaseService;
