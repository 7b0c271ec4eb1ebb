//! Graph configuration.

use serde::{Deserialize, Serialize};

/// What `invalidate()` does after advancing a cell's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Reset to `NotRequested`; the next observer triggers the fetch.
    #[default]
    Lazy,
    /// Re-request immediately.
    Eager,
}

/// Settings shared by every cell of a [`Graph`](crate::Graph).
///
/// Deserializable so host applications can embed it in their own config files:
///
/// ```
/// # use remote_flow::{GraphConfig, InvalidationPolicy};
/// let config: GraphConfig = serde_json::from_str(r#"{ "invalidation": "eager" }"#).unwrap();
/// assert_eq!(config.invalidation, InvalidationPolicy::Eager);
/// assert!(!config.cancel_stale);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Default invalidation policy; cells may override it.
    pub invalidation: InvalidationPolicy,
    /// Abort a producer task as soon as its generation is superseded.
    ///
    /// Stale results are discarded either way; this only stops the wasted work.
    pub cancel_stale: bool,
}
