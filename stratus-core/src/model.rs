//! Model - Typed configuration/state models and their translation
//!
//! One model type serves the plan, the state and the data-source view of a
//! resource kind; data sources are the same model read with
//! `Resource::read_only` set.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::resource::Attributes;
use crate::schema::TypeError;

/// A typed resource model convertible to and from the attribute tree
pub trait Model: Clone + fmt::Debug + Send + Sync + 'static {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError>;

    fn to_attributes(&self) -> Attributes;

    /// Remote identity, once assigned
    fn identity(&self) -> Option<String>;
}

/// Bidirectional mapping between a model and its remote representation
pub trait Translate: Sized {
    type Wire;

    /// Build the remote request. Unset attributes are left out of the
    /// request rather than sent as zero values.
    fn to_remote(&self) -> Self::Wire;

    /// Build the model from a remote response. Attributes the remote does not
    /// report fall back to `prior`.
    fn from_remote(wire: &Self::Wire, prior: &Self) -> Self;
}

/// Compare two collections ignoring order and duplicates
pub fn unordered_eq<T: Eq + Hash>(a: &[T], b: &[T]) -> bool {
    let a: HashSet<&T> = a.iter().collect();
    let b: HashSet<&T> = b.iter().collect();
    a == b
}

/// Keep the prior ordering of a set-like collection when the remote returns
/// the same members in a different order.
pub fn stable_order<T: Eq + Hash + Clone>(remote: Vec<T>, prior: &[T]) -> Vec<T> {
    if unordered_eq(&remote, prior) {
        prior.to_vec()
    } else {
        remote
    }
}
