//! Stratus Core
//!
//! Reconciliation engine shared by the Stratus providers: a typed model of
//! configuration and state, bounded retries and state waits, named locks on
//! shared parents, and the generic create/read/update/delete/import driver.

pub mod attr;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod differ;
pub mod identity;
pub mod model;
pub mod mutex;
pub mod policy;
pub mod provider;
pub mod reconcile;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod timeouts;
pub mod waiter;
