//! Editor tuning knobs.
//!
//! # Responsibility
//! - Hold geometric thresholds and collaborator timeouts used by editing.
//!
//! # Invariants
//! - Defaults match the interactive tracing client: 60 um split anchor,
//!   250 um^2 merge threshold.

use serde::Deserialize;
use std::time::Duration;

/// Tunables shared by the topology editor and merge resolver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Target distance of a split point from the child end, in micrometers.
    pub split_anchor_distance: f64,
    /// Radius assigned when no neighbor carries one.
    pub default_radius: f64,
    /// Maximum squared distance at which a drag counts as a merge.
    pub merge_threshold_squared: f64,
    /// Deadline passed to each auto-trace request.
    pub trace_timeout_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            split_anchor_distance: 60.0,
            default_radius: 1.0,
            merge_threshold_squared: 250.0,
            trace_timeout_ms: 5_000,
        }
    }
}

impl EditorConfig {
    pub fn trace_timeout(&self) -> Duration {
        Duration::from_millis(self.trace_timeout_ms)
    }
}
