//! Stratus S3 Provider
//!
//! Buckets, their sub-resources and user access keys on S3-compatible
//! object storage.
//!
//! ## Module Structure
//!
//! - `api` - Remote API traits and their error type
//! - `client` - AWS SDK backed client and the lazily bound connector
//! - `credentials` - Access key management endpoint client
//! - `provider` - S3Provider implementation
//! - `resources` - One resource kind per module
//! - `wire` - Remote representations of bucket configuration

pub mod api;
pub mod client;
pub mod credentials;
pub mod provider;
pub mod resources;
pub mod wire;

#[cfg(test)]
mod fake;

pub use provider::S3Provider;
