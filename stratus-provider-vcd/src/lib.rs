//! Stratus VCD Provider
//!
//! Networks, vApps, VMs, independent disks and vApp sharing on a virtual
//! infrastructure control plane.
//!
//! ## Module Structure
//!
//! - `api` - Control plane API trait and its error type
//! - `client` - REST client, task polling and the shared connector
//! - `provider` - VcdProvider implementation
//! - `resources` - One resource kind per module
//! - `wire` - JSON representations of control plane objects

pub mod api;
pub mod client;
pub mod provider;
pub mod resources;
pub mod wire;

#[cfg(test)]
mod fake;

pub use provider::VcdProvider;
