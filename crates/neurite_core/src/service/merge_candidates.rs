//! Drag-to-merge candidate resolution.
//!
//! # Responsibility
//! - Find the annotation a dragged point would snap onto.
//! - Decide whether dropping there is a merge or a plain move.
//!
//! # Invariants
//! - Candidates never include the dragged annotation itself or annotations
//!   of hidden neurons.
//! - Lookup and merge checks read one consistent model state under the
//!   workspace lock.

use crate::model::annotation::{AnnotationId, Vec3};
use crate::service::config::EditorConfig;
use crate::service::handle::{WorkspaceHandle, WorkspaceState};
use crate::service::topology_editor::EditError;

/// Outcome of releasing a dragged annotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragResolution {
    /// Attach the dragged annotation's neurite under `target`.
    Merge {
        source: AnnotationId,
        target: AnnotationId,
    },
    /// Just move the dragged annotation.
    Move {
        annotation_id: AnnotationId,
        position: Vec3,
    },
}

/// Resolves merge targets for drag gestures.
#[derive(Debug, Clone)]
pub struct MergeCandidateResolver {
    merge_threshold_squared: f64,
}

impl Default for MergeCandidateResolver {
    fn default() -> Self {
        Self::new(&EditorConfig::default())
    }
}

impl MergeCandidateResolver {
    pub fn new(config: &EditorConfig) -> Self {
        Self {
            merge_threshold_squared: config.merge_threshold_squared,
        }
    }

    /// Nearest annotation to `position`, skipping `exclude` and hidden neurons.
    pub fn find_merge_candidate(
        &self,
        handle: &WorkspaceHandle,
        position: Vec3,
        exclude: AnnotationId,
    ) -> Result<Option<AnnotationId>, EditError> {
        let state = handle.lock()?;
        Ok(nearest_candidate(&state, position, exclude))
    }

    /// Whether dropping `drag_node` at `drag_position` onto `candidate` merges.
    ///
    /// Rejects the node itself, candidates farther than the merge threshold
    /// and candidates in the dragged node's own neurite.
    pub fn can_merge(
        &self,
        handle: &WorkspaceHandle,
        drag_node: AnnotationId,
        drag_position: Vec3,
        candidate: AnnotationId,
    ) -> Result<bool, EditError> {
        let state = handle.lock()?;
        self.check_merge(&state, drag_node, drag_position, candidate)
    }

    /// Combines candidate lookup and merge checks for one drop.
    pub fn resolve_drag(
        &self,
        handle: &WorkspaceHandle,
        drag_node: AnnotationId,
        drag_position: Vec3,
    ) -> Result<DragResolution, EditError> {
        let state = handle.lock()?;
        if let Some(target) = nearest_candidate(&state, drag_position, drag_node) {
            if self.check_merge(&state, drag_node, drag_position, target)? {
                return Ok(DragResolution::Merge {
                    source: drag_node,
                    target,
                });
            }
        }
        Ok(DragResolution::Move {
            annotation_id: drag_node,
            position: drag_position,
        })
    }

    fn check_merge(
        &self,
        state: &WorkspaceState,
        drag_node: AnnotationId,
        drag_position: Vec3,
        candidate: AnnotationId,
    ) -> Result<bool, EditError> {
        if drag_node == candidate {
            return Ok(false);
        }
        let workspace = &state.workspace;
        let drag_neuron = workspace
            .neuron_of(drag_node)
            .ok_or(EditError::AnnotationNotFound(drag_node))?;
        let candidate_neuron = workspace
            .neuron_of(candidate)
            .ok_or(EditError::AnnotationNotFound(candidate))?;
        let candidate_position = workspace
            .annotation(candidate)
            .ok_or(EditError::AnnotationNotFound(candidate))?
            .position;
        if candidate_position.distance_squared(&drag_position) > self.merge_threshold_squared {
            return Ok(false);
        }
        if drag_neuron == candidate_neuron {
            let same = workspace
                .neuron(drag_neuron)
                .is_some_and(|neuron| neuron.same_neurite(drag_node, candidate));
            return Ok(!same);
        }
        Ok(true)
    }
}

fn nearest_candidate(
    state: &WorkspaceState,
    position: Vec3,
    exclude: AnnotationId,
) -> Option<AnnotationId> {
    let workspace = &state.workspace;
    state
        .index
        .nearest(position, 1, &|entry| {
            entry.annotation_id != exclude
                && workspace
                    .neuron(entry.neuron_id)
                    .is_some_and(|neuron| neuron.visible)
        })
        .first()
        .map(|hit| hit.entry.annotation_id)
}
