//! Annotation (traced point) domain model.
//!
//! # Responsibility
//! - Define the single traced 3D point stored inside a neuron.
//! - Provide small geometric helpers shared by editor and spatial index.
//!
//! # Invariants
//! - `id` is stable and never reused for another annotation in a workspace.
//! - `parent_id == None` means the annotation heads a neurite.
//! - `child_ids` holds no duplicates.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable annotation identifier, unique within one workspace.
pub type AnnotationId = u64;

/// Stable neuron identifier, unique within one workspace.
pub type NeuronId = u64;

/// Position in sample space (micrometers).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared Euclidean distance to `other`.
    pub fn distance_squared(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(&self, other: &Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Point at parameter `t` on the segment `self -> other` (`t = 0` is `self`).
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            x: self.x + t * (other.x - self.x),
            y: self.y + t * (other.y - self.y),
            z: self.z + t * (other.z - self.z),
        }
    }
}

/// One traced point of a neurite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    /// Owning neuron. Rewritten when a neurite is transferred.
    pub neuron_id: NeuronId,
    pub position: Vec3,
    /// Radius in micrometers; `None` when never measured.
    pub radius: Option<f64>,
    pub parent_id: Option<AnnotationId>,
    /// Ordered child list; order is preserved across reparenting where possible.
    pub child_ids: Vec<AnnotationId>,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
}

impl Annotation {
    /// Creates an unlinked annotation stamped with the current time.
    pub fn new(
        id: AnnotationId,
        neuron_id: NeuronId,
        position: Vec3,
        radius: Option<f64>,
        parent_id: Option<AnnotationId>,
    ) -> Self {
        let now = now_epoch_ms();
        Self {
            id,
            neuron_id,
            position,
            radius,
            parent_id,
            child_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// More than one child.
    pub fn is_branch(&self) -> bool {
        self.child_ids.len() > 1
    }

    /// No children.
    pub fn is_end(&self) -> bool {
        self.child_ids.is_empty()
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_epoch_ms();
    }
}

/// Current wall clock as epoch milliseconds; clamps to 0 before the epoch.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
