//! Nearest-annotation spatial index.
//!
//! # Responsibility
//! - Answer k-nearest queries over annotation positions with a caller
//!   supplied inclusion predicate.
//! - Stay pluggable: the editor only talks to the [`SpatialIndex`] trait.
//!
//! # Invariants
//! - Entries reflect positions as of the last completed edit.
//! - Deleted annotations are removed before the editing lock is released.
//! - Results are sorted by ascending distance, ties broken by annotation id.

use crate::model::annotation::{AnnotationId, NeuronId, Vec3};
use crate::model::neuron::Neuron;
use crate::model::workspace::Workspace;
use std::collections::HashMap;

/// One indexed annotation position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub annotation_id: AnnotationId,
    pub neuron_id: NeuronId,
    pub position: Vec3,
}

/// Query hit with its squared distance to the query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestHit {
    pub entry: IndexEntry,
    pub distance_squared: f64,
}

/// Spatial backend abstraction used by the workspace handle.
pub trait SpatialIndex: Send {
    /// Inserts or replaces the entry for `entry.annotation_id`.
    fn upsert(&mut self, entry: IndexEntry);

    /// Removes one annotation; unknown ids are ignored.
    fn remove(&mut self, annotation_id: AnnotationId);

    /// Removes every entry owned by `neuron_id`.
    fn remove_neuron(&mut self, neuron_id: NeuronId);

    /// Clears all entries.
    fn clear(&mut self);

    /// Up to `k` entries passing `predicate`, nearest first.
    fn nearest(
        &self,
        point: Vec3,
        k: usize,
        predicate: &dyn Fn(&IndexEntry) -> bool,
    ) -> Vec<NearestHit>;

    /// Number of indexed entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces all entries of `neuron` with its current annotations.
    fn reindex_neuron(&mut self, neuron: &Neuron) {
        self.remove_neuron(neuron.id);
        for ann in neuron.annotations() {
            self.upsert(IndexEntry {
                annotation_id: ann.id,
                neuron_id: neuron.id,
                position: ann.position,
            });
        }
    }

    /// Rebuilds the whole index from `workspace`.
    fn rebuild(&mut self, workspace: &Workspace) {
        self.clear();
        for neuron in workspace.neurons() {
            self.reindex_neuron(neuron);
        }
    }
}

/// Flat map backend with linear scans.
///
/// Small and simple; adequate for interactive workspaces of a few hundred
/// thousand points, where a query costs one pass over the entries.
#[derive(Debug, Default)]
pub struct FlatSpatialIndex {
    entries: HashMap<AnnotationId, IndexEntry>,
}

impl FlatSpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index over every annotation of `workspace`.
    pub fn from_workspace(workspace: &Workspace) -> Self {
        let mut index = Self::new();
        index.rebuild(workspace);
        index
    }
}

impl SpatialIndex for FlatSpatialIndex {
    fn upsert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.annotation_id, entry);
    }

    fn remove(&mut self, annotation_id: AnnotationId) {
        self.entries.remove(&annotation_id);
    }

    fn remove_neuron(&mut self, neuron_id: NeuronId) {
        self.entries.retain(|_, entry| entry.neuron_id != neuron_id);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn nearest(
        &self,
        point: Vec3,
        k: usize,
        predicate: &dyn Fn(&IndexEntry) -> bool,
    ) -> Vec<NearestHit> {
        if k == 0 {
            return Vec::new();
        }
        let mut hits: Vec<NearestHit> = self
            .entries
            .values()
            .filter(|entry| predicate(*entry))
            .map(|entry| NearestHit {
                entry: *entry,
                distance_squared: entry.position.distance_squared(&point),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance_squared
                .total_cmp(&b.distance_squared)
                .then(a.entry.annotation_id.cmp(&b.entry.annotation_id))
        });
        hits.truncate(k);
        hits
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
