//! Explicit workspace context shared by editor and resolvers.
//!
//! # Responsibility
//! - Own the single lock that serializes every edit of one workspace.
//! - Keep the spatial index next to the model it mirrors.
//! - Carry the change notifier observers subscribe to.
//!
//! # Invariants
//! - Model and index are only mutated while the lock is held.
//! - The notifier lives outside the lock so listeners never run inside it.

use crate::events::ChangeNotifier;
use crate::model::annotation::{AnnotationId, NeuronId, Vec3};
use crate::model::neuron::Neuron;
use crate::model::workspace::{Workspace, WorkspaceId};
use crate::service::topology_editor::EditError;
use crate::spatial::{FlatSpatialIndex, IndexEntry, NearestHit, SpatialIndex};
use std::sync::{Arc, Mutex, MutexGuard};

/// Model plus index, guarded together.
pub struct WorkspaceState {
    pub(crate) workspace: Workspace,
    pub(crate) index: Box<dyn SpatialIndex>,
}

impl WorkspaceState {
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn index(&self) -> &dyn SpatialIndex {
        self.index.as_ref()
    }
}

/// Cloneable handle to one open workspace.
#[derive(Clone)]
pub struct WorkspaceHandle {
    id: WorkspaceId,
    state: Arc<Mutex<WorkspaceState>>,
    notifier: Arc<ChangeNotifier>,
}

impl std::fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl WorkspaceHandle {
    /// Wraps `workspace` with a flat index built from its annotations.
    pub fn new(workspace: Workspace) -> Self {
        Self::with_index(workspace, Box::new(FlatSpatialIndex::new()))
    }

    /// Wraps `workspace` with a caller-chosen index backend (rebuilt here).
    pub fn with_index(workspace: Workspace, mut index: Box<dyn SpatialIndex>) -> Self {
        index.rebuild(&workspace);
        Self {
            id: workspace.id,
            state: Arc::new(Mutex::new(WorkspaceState { workspace, index })),
            notifier: Arc::new(ChangeNotifier::new()),
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.id
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Runs `read` against the model under the lock.
    pub fn read<T>(&self, read: impl FnOnce(&WorkspaceState) -> T) -> Result<T, EditError> {
        let guard = self.lock()?;
        Ok(read(&guard))
    }

    /// Clone of the current model.
    pub fn snapshot(&self) -> Result<Workspace, EditError> {
        self.read(|state| state.workspace.clone())
    }

    /// Clone of one neuron.
    pub fn neuron(&self, neuron_id: NeuronId) -> Result<Option<Neuron>, EditError> {
        self.read(|state| state.workspace.neuron(neuron_id).cloned())
    }

    /// Note text of one annotation, `""` when none.
    pub fn note_of(&self, annotation_id: AnnotationId) -> Result<String, EditError> {
        self.read(|state| {
            let workspace = &state.workspace;
            workspace
                .neuron_of(annotation_id)
                .and_then(|neuron_id| workspace.neuron(neuron_id))
                .map(|neuron| neuron.note(annotation_id).to_string())
                .ok_or(EditError::AnnotationNotFound(annotation_id))
        })?
    }

    /// Nearest indexed annotations passing `predicate`.
    pub fn nearest(
        &self,
        point: Vec3,
        k: usize,
        predicate: &dyn Fn(&IndexEntry) -> bool,
    ) -> Result<Vec<NearestHit>, EditError> {
        self.read(|state| state.index.nearest(point, k, predicate))
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, WorkspaceState>, EditError> {
        self.state.lock().map_err(|_| EditError::LockPoisoned)
    }
}
