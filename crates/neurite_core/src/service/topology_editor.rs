//! Topology editing use-case service.
//!
//! # Responsibility
//! - Apply every structural edit of neurites (add, move, delete, split,
//!   reroot, merge, transfer) plus note, radius and neuron attribute edits.
//! - Persist each edit through [`NeuronRepository`] and roll it back in
//!   memory when persistence fails.
//! - Keep the spatial index current and queue change events.
//!
//! # Invariants
//! - Preconditions are checked before any state is touched.
//! - Every edit runs under the workspace lock, persistence call included.
//! - On persistence failure the affected neurons are restored from their
//!   pre-edit snapshots. Position moves are the exception: the new position
//!   stays and an `AnnotationNotMoved` event is queued instead.
//! - Auto-trace requests leave only after the lock is released.

use crate::events::ModelEvent;
use crate::model::annotation::{Annotation, AnnotationId, NeuronId, Vec3};
use crate::model::neuron::{AnchoredPath, Neuron, NeuronColor, PathEndpoints};
use crate::model::workspace::{ModelSource, Workspace, WorkspaceId};
use crate::repo::neuron_repo::{NeuronRepoError, NeuronRepository};
use crate::service::config::EditorConfig;
use crate::service::handle::{WorkspaceHandle, WorkspaceState};
use crate::service::note_validator::NoteValidator;
use crate::service::trace::{dispatch_traces, AutoTraceService, PointRefiner, TraceRequest};
use crate::spatial::IndexEntry;
use log::{debug, error, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// Per-axis distance within which a traced path endpoint still matches its
/// annotation.
const PATH_ENDPOINT_TOLERANCE: f64 = 5.0;

/// Edit rejected before any state changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// Branch points cannot be deleted as links.
    BranchNotDeletable(AnnotationId),
    /// A root with children cannot be deleted as a link.
    RootWithChildren(AnnotationId),
    /// Roots split only toward a single child.
    AmbiguousRootSplit {
        annotation_id: AnnotationId,
        child_count: usize,
    },
    /// The annotation already heads its neurite.
    AlreadyRoot(AnnotationId),
    /// Merging would close a loop inside one neurite.
    SameNeurite {
        source: AnnotationId,
        target: AnnotationId,
        common_ancestor: Option<AnnotationId>,
    },
    /// The neurite already belongs to the destination neuron.
    AlreadyInNeuron {
        annotation_id: AnnotationId,
        neuron_id: NeuronId,
    },
    /// Anchored paths only span parent-linked annotations.
    NotAdjacent {
        first: AnnotationId,
        second: AnnotationId,
    },
    /// Traced path no longer starts and ends at its annotations.
    StalePathEndpoints {
        first: AnnotationId,
        second: AnnotationId,
    },
    /// Radius must be finite and positive.
    InvalidRadius(f64),
    /// Name is blank after trim.
    EmptyName,
}

impl Display for Precondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BranchNotDeletable(id) => write!(f, "cannot delete branch point {id} as a link"),
            Self::RootWithChildren(id) => {
                write!(f, "cannot delete root {id} with children as a link")
            }
            Self::AmbiguousRootSplit {
                annotation_id,
                child_count,
            } => write!(
                f,
                "cannot split root {annotation_id} with {child_count} children"
            ),
            Self::AlreadyRoot(id) => write!(f, "annotation {id} is already a root"),
            Self::SameNeurite {
                source,
                target,
                common_ancestor,
            } => match common_ancestor {
                Some(ancestor) => write!(
                    f,
                    "merging {source} into {target} would create a loop through {ancestor}"
                ),
                None => write!(f, "merging {source} into {target} would create a loop"),
            },
            Self::AlreadyInNeuron {
                annotation_id,
                neuron_id,
            } => write!(f, "annotation {annotation_id} already belongs to neuron {neuron_id}"),
            Self::NotAdjacent { first, second } => {
                write!(f, "annotations {first} and {second} are not linked")
            }
            Self::StalePathEndpoints { first, second } => write!(
                f,
                "traced path does not end at annotations {first} and {second}"
            ),
            Self::InvalidRadius(radius) => write!(f, "radius must be positive, got {radius}"),
            Self::EmptyName => write!(f, "name must not be blank"),
        }
    }
}

/// Errors from topology editor operations.
#[derive(Debug)]
pub enum EditError {
    /// Stale annotation reference.
    AnnotationNotFound(AnnotationId),
    /// Stale neuron reference.
    NeuronNotFound(NeuronId),
    /// Workspace is not stored.
    WorkspaceNotFound(WorkspaceId),
    /// Edit rejected; nothing changed.
    Precondition(Precondition),
    /// Edit could not be persisted and was rolled back (moves excepted).
    Persistence(NeuronRepoError),
    /// A previous holder of the workspace lock panicked.
    LockPoisoned,
}

impl Display for EditError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnnotationNotFound(id) => write!(f, "annotation not found: {id}"),
            Self::NeuronNotFound(id) => write!(f, "neuron not found: {id}"),
            Self::WorkspaceNotFound(id) => write!(f, "workspace not found: {id}"),
            Self::Precondition(reason) => write!(f, "{reason}"),
            Self::Persistence(err) => write!(f, "{err}"),
            Self::LockPoisoned => write!(f, "workspace lock poisoned"),
        }
    }
}

impl Error for EditError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NeuronRepoError> for EditError {
    fn from(value: NeuronRepoError) -> Self {
        Self::Persistence(value)
    }
}

impl From<Precondition> for EditError {
    fn from(value: Precondition) -> Self {
        Self::Precondition(value)
    }
}

/// Neurite topology editor.
pub struct TopologyEditor<R: NeuronRepository> {
    repo: R,
    config: EditorConfig,
    tracer: Option<Arc<dyn AutoTraceService>>,
    refiner: Option<Arc<dyn PointRefiner>>,
    trace_workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: NeuronRepository> TopologyEditor<R> {
    /// Creates editor with default tuning and no collaborators.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            config: EditorConfig::default(),
            tracer: None,
            refiner: None,
            trace_workers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: EditorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches the tracer used while a workspace has `auto_tracing` on.
    pub fn with_tracer(mut self, tracer: Arc<dyn AutoTraceService>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Attaches the refiner used while a workspace has `auto_refine_point` on.
    pub fn with_refiner(mut self, refiner: Arc<dyn PointRefiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Blocks until every trace request dispatched so far has finished or
    /// timed out.
    pub fn wait_for_traces(&self) {
        let workers = match self.trace_workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for worker in workers {
            if worker.join().is_err() {
                warn!("event=auto_trace module=editor status=error error=worker_panicked");
            }
        }
    }

    // ---- workspace ------------------------------------------------------

    /// Creates and stores an empty workspace.
    pub fn create_workspace(
        &self,
        name: &str,
        source: ModelSource,
    ) -> Result<WorkspaceHandle, EditError> {
        logged("create_workspace", || {
            let workspace = Workspace::new(normalize_name(name)?, source);
            self.repo.save_workspace(&workspace)?;
            Ok(WorkspaceHandle::new(workspace))
        })
    }

    /// Loads a stored workspace with all neurons and builds its index.
    pub fn load_workspace(&self, workspace_id: WorkspaceId) -> Result<WorkspaceHandle, EditError> {
        logged("load_workspace", || {
            let workspace = self
                .repo
                .load_workspace(workspace_id)?
                .ok_or(EditError::WorkspaceNotFound(workspace_id))?;
            Ok(WorkspaceHandle::new(workspace))
        })
    }

    pub fn set_auto_tracing(&self, handle: &WorkspaceHandle, enabled: bool) -> Result<(), EditError> {
        self.set_workspace_flag(handle, "set_auto_tracing", enabled, |workspace| {
            &mut workspace.auto_tracing
        })
    }

    pub fn set_auto_refine_point(
        &self,
        handle: &WorkspaceHandle,
        enabled: bool,
    ) -> Result<(), EditError> {
        self.set_workspace_flag(handle, "set_auto_refine_point", enabled, |workspace| {
            &mut workspace.auto_refine_point
        })
    }

    fn set_workspace_flag(
        &self,
        handle: &WorkspaceHandle,
        op: &'static str,
        enabled: bool,
        flag: fn(&mut Workspace) -> &mut bool,
    ) -> Result<(), EditError> {
        logged(op, || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let previous = std::mem::replace(flag(&mut state.workspace), enabled);
            if previous == enabled {
                return Ok(());
            }
            if let Err(err) = self.repo.save_workspace(&state.workspace) {
                *flag(&mut state.workspace) = previous;
                return Err(err.into());
            }
            handle.notifier().publish(ModelEvent::WorkspaceChanged);
            Ok(())
        })
    }

    // ---- neurons --------------------------------------------------------

    /// Creates an empty neuron and returns its id.
    pub fn create_neuron(&self, handle: &WorkspaceHandle, name: &str) -> Result<NeuronId, EditError> {
        logged("create_neuron", || {
            let name = normalize_name(name)?;
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron = Neuron::new(state.workspace.allocate_neuron_id(), name);
            self.repo.save_neuron(state.workspace.id, &neuron)?;
            let neuron_id = neuron.id;
            state.workspace.insert_neuron(neuron);
            handle
                .notifier()
                .publish(ModelEvent::NeuronCreated { neuron_id });
            Ok(neuron_id)
        })
    }

    pub fn rename_neuron(
        &self,
        handle: &WorkspaceHandle,
        neuron_id: NeuronId,
        name: &str,
    ) -> Result<(), EditError> {
        let name = normalize_name(name)?;
        self.update_neuron_attributes(handle, "rename_neuron", neuron_id, |neuron| {
            neuron.name = name;
        })
    }

    pub fn set_neuron_visibility(
        &self,
        handle: &WorkspaceHandle,
        neuron_id: NeuronId,
        visible: bool,
    ) -> Result<(), EditError> {
        self.update_neuron_attributes(handle, "set_neuron_visibility", neuron_id, |neuron| {
            neuron.visible = visible;
        })
    }

    pub fn set_neuron_color(
        &self,
        handle: &WorkspaceHandle,
        neuron_id: NeuronId,
        color: NeuronColor,
    ) -> Result<(), EditError> {
        self.update_neuron_attributes(handle, "set_neuron_color", neuron_id, |neuron| {
            neuron.color = color;
        })
    }

    fn update_neuron_attributes(
        &self,
        handle: &WorkspaceHandle,
        op: &'static str,
        neuron_id: NeuronId,
        apply: impl FnOnce(&mut Neuron),
    ) -> Result<(), EditError> {
        logged(op, || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let snapshot = neuron.clone();
            apply(neuron);
            self.commit_neurons(state, vec![snapshot], &[])?;
            handle
                .notifier()
                .publish(ModelEvent::NeuronChanged { neuron_id });
            Ok(())
        })
    }

    /// Deletes a neuron with every annotation it holds.
    pub fn delete_neuron(&self, handle: &WorkspaceHandle, neuron_id: NeuronId) -> Result<(), EditError> {
        logged("delete_neuron", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let snapshot = state
                .workspace
                .remove_neuron(neuron_id)
                .ok_or(EditError::NeuronNotFound(neuron_id))?;
            self.commit_neurons(state, vec![snapshot], &[neuron_id])?;
            handle
                .notifier()
                .publish(ModelEvent::NeuronDeleted { neuron_id });
            Ok(())
        })
    }

    // ---- annotations ----------------------------------------------------

    /// Starts a new neurite in `neuron_id` and returns the root id.
    pub fn add_root(
        &self,
        handle: &WorkspaceHandle,
        neuron_id: NeuronId,
        position: Vec3,
    ) -> Result<AnnotationId, EditError> {
        logged("add_root", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            if state.workspace.neuron(neuron_id).is_none() {
                return Err(EditError::NeuronNotFound(neuron_id));
            }
            let position = self.refine(&state.workspace, position);
            let annotation_id = state.workspace.allocate_annotation_id();
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let snapshot = neuron.clone();
            neuron.insert_node(Annotation::new(
                annotation_id,
                neuron_id,
                position,
                Some(self.config.default_radius),
                None,
            ));
            neuron.push_root(annotation_id);
            self.commit_neurons(state, vec![snapshot], &[])?;
            handle.notifier().publish(ModelEvent::AnnotationAdded {
                neuron_id,
                annotation_id,
            });
            Ok(annotation_id)
        })
    }

    /// Appends a new annotation under `parent_id` and returns its id.
    pub fn add_child(
        &self,
        handle: &WorkspaceHandle,
        parent_id: AnnotationId,
        position: Vec3,
    ) -> Result<AnnotationId, EditError> {
        let (annotation_id, traces) = logged("add_child", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, parent_id)?;
            let position = self.refine(&state.workspace, position);
            let annotation_id = state.workspace.allocate_annotation_id();
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let radius = neuron
                .annotation(parent_id)
                .and_then(|parent| parent.radius)
                .unwrap_or(self.config.default_radius);
            let snapshot = neuron.clone();
            neuron.insert_node(Annotation::new(
                annotation_id,
                neuron_id,
                position,
                Some(radius),
                Some(parent_id),
            ));
            neuron.link_child(parent_id, annotation_id, None);
            let notes_changed = NoteValidator::revalidate(neuron, parent_id);
            self.commit_neurons(state, vec![snapshot], &[])?;

            let notifier = handle.notifier();
            notifier.publish(ModelEvent::AnnotationAdded {
                neuron_id,
                annotation_id,
            });
            if notes_changed {
                notifier.publish(ModelEvent::NotesUpdated {
                    neuron_id,
                    annotation_id: parent_id,
                });
            }
            let traces = self.trace_requests(state, neuron_id, &[(parent_id, annotation_id)]);
            Ok((annotation_id, traces))
        })?;
        self.spawn_traces(traces);
        Ok(annotation_id)
    }

    /// Moves one annotation and drops the traced paths on its edges.
    ///
    /// When persistence fails the new position is kept, an
    /// [`ModelEvent::AnnotationNotMoved`] event is queued and the error is
    /// returned.
    pub fn move_annotation(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
        position: Vec3,
    ) -> Result<(), EditError> {
        let traces = logged("move_annotation", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, annotation_id)?;
            let position = self.refine(&state.workspace, position);
            let workspace_id = state.workspace.id;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let edges = incident_edges(neuron, annotation_id);
            let removed = neuron.remove_anchored_paths(&edges);
            let ann = neuron
                .annotation_mut(annotation_id)
                .ok_or(EditError::AnnotationNotFound(annotation_id))?;
            let previous = ann.position;
            ann.position = position;
            ann.touch();
            let saved = self.repo.save_neuron(workspace_id, neuron);
            state.index.upsert(IndexEntry {
                annotation_id,
                neuron_id,
                position,
            });

            let notifier = handle.notifier();
            if !removed.is_empty() {
                notifier.publish(ModelEvent::AnchoredPathsRemoved {
                    neuron_id,
                    endpoints: removed,
                });
            }
            if let Err(err) = saved {
                notifier.publish(ModelEvent::AnnotationNotMoved {
                    neuron_id,
                    annotation_id,
                    previous,
                    attempted: position,
                });
                return Err(err.into());
            }
            notifier.publish(ModelEvent::AnnotationMoved {
                neuron_id,
                annotation_id,
            });
            Ok(self.trace_requests(state, neuron_id, &edges))
        })?;
        self.spawn_traces(traces);
        Ok(())
    }

    pub fn update_radius(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
        radius: f64,
    ) -> Result<(), EditError> {
        logged("update_radius", || {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(Precondition::InvalidRadius(radius).into());
            }
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, annotation_id)?;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let snapshot = neuron.clone();
            if let Some(ann) = neuron.annotation_mut(annotation_id) {
                ann.radius = Some(radius);
                ann.touch();
            }
            self.commit_neurons(state, vec![snapshot], &[])?;
            handle.notifier().publish(ModelEvent::RadiusChanged {
                neuron_id,
                annotation_id,
            });
            Ok(())
        })
    }

    /// Removes one link annotation, reconnecting its child to its parent.
    ///
    /// Links are annotations with at most one child that are not roots with
    /// children.
    pub fn delete_link(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
    ) -> Result<(), EditError> {
        let traces = logged("delete_link", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, annotation_id)?;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let ann = neuron
                .annotation(annotation_id)
                .ok_or(EditError::AnnotationNotFound(annotation_id))?;
            if ann.is_branch() {
                return Err(Precondition::BranchNotDeletable(annotation_id).into());
            }
            if ann.is_root() && !ann.is_end() {
                return Err(Precondition::RootWithChildren(annotation_id).into());
            }
            let parent = ann.parent_id;
            let child = ann.child_ids.first().copied();

            let snapshot = neuron.clone();
            let edges = incident_edges(neuron, annotation_id);
            let removed = neuron.remove_anchored_paths(&edges);
            if let Some(parent) = parent {
                let slot = neuron.unlink_from_parent(annotation_id).map(|(_, index)| index);
                if let Some(child) = child {
                    neuron.unlink_from_parent(child);
                    neuron.link_child(parent, child, slot);
                }
            }
            neuron.remove_node(annotation_id);
            let notes_changed = parent.is_some_and(|parent| NoteValidator::revalidate(neuron, parent));
            self.commit_neurons(state, vec![snapshot], &[])?;

            let notifier = handle.notifier();
            if !removed.is_empty() {
                notifier.publish(ModelEvent::AnchoredPathsRemoved {
                    neuron_id,
                    endpoints: removed,
                });
            }
            notifier.publish(ModelEvent::AnnotationsDeleted {
                neuron_id,
                annotation_ids: vec![annotation_id],
            });
            if let Some(child) = child {
                notifier.publish(ModelEvent::AnnotationReparented {
                    neuron_id,
                    annotation_id: child,
                });
            }
            if let (true, Some(parent)) = (notes_changed, parent) {
                notifier.publish(ModelEvent::NotesUpdated {
                    neuron_id,
                    annotation_id: parent,
                });
            }
            Ok(match (child, parent) {
                (Some(child), Some(parent)) => self.trace_requests(state, neuron_id, &[(parent, child)]),
                _ => Vec::new(),
            })
        })?;
        self.spawn_traces(traces);
        Ok(())
    }

    /// Deletes `root_id` and all of its descendants; returns the deleted ids.
    pub fn delete_subtree(
        &self,
        handle: &WorkspaceHandle,
        root_id: AnnotationId,
    ) -> Result<Vec<AnnotationId>, EditError> {
        logged("delete_subtree", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, root_id)?;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let doomed = neuron.subtree_of(root_id);
            let parent = neuron.parent_of(root_id);

            let snapshot = neuron.clone();
            let edges: Vec<(AnnotationId, AnnotationId)> = doomed
                .iter()
                .filter_map(|id| neuron.parent_of(*id).map(|parent| (*id, parent)))
                .collect();
            let removed = neuron.remove_anchored_paths(&edges);
            if parent.is_some() {
                neuron.unlink_from_parent(root_id);
            }
            for id in &doomed {
                neuron.remove_node(*id);
            }
            let notes_changed = parent.is_some_and(|parent| NoteValidator::revalidate(neuron, parent));
            self.commit_neurons(state, vec![snapshot], &[])?;

            let notifier = handle.notifier();
            let _bulk = notifier.transaction();
            if !removed.is_empty() {
                notifier.publish(ModelEvent::AnchoredPathsRemoved {
                    neuron_id,
                    endpoints: removed,
                });
            }
            notifier.publish(ModelEvent::AnnotationsDeleted {
                neuron_id,
                annotation_ids: doomed.clone(),
            });
            if let (true, Some(parent)) = (notes_changed, parent) {
                notifier.publish(ModelEvent::NotesUpdated {
                    neuron_id,
                    annotation_id: parent,
                });
            }
            Ok(doomed)
        })
    }

    /// Inserts a new annotation on the edge between `annotation_id` and its
    /// rootward neighbor; returns the new id.
    ///
    /// The rootward neighbor is the parent, or the only child when
    /// `annotation_id` is a root. The new point sits `split_anchor_distance`
    /// from the child end, but never past the segment midpoint.
    pub fn split_annotation(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
    ) -> Result<AnnotationId, EditError> {
        let (new_id, traces) = logged("split_annotation", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, annotation_id)?;
            let (child_end, parent_end, position, radius) = {
                let neuron = state
                    .workspace
                    .neuron(neuron_id)
                    .ok_or(EditError::NeuronNotFound(neuron_id))?;
                let ann = neuron
                    .annotation(annotation_id)
                    .ok_or(EditError::AnnotationNotFound(annotation_id))?;
                let (child_end, parent_end, reverse) = match ann.parent_id {
                    Some(parent) => (annotation_id, parent, false),
                    None => match ann.child_ids.as_slice() {
                        [only_child] => (*only_child, annotation_id, true),
                        children => {
                            return Err(Precondition::AmbiguousRootSplit {
                                annotation_id,
                                child_count: children.len(),
                            }
                            .into())
                        }
                    },
                };
                let first = neuron
                    .annotation(child_end)
                    .ok_or(EditError::AnnotationNotFound(child_end))?;
                let second = neuron
                    .annotation(parent_end)
                    .ok_or(EditError::AnnotationNotFound(parent_end))?;
                let t = split_fraction(
                    first.position.distance(&second.position),
                    self.config.split_anchor_distance,
                    reverse,
                );
                let radius = match (first.radius, second.radius) {
                    (Some(a), Some(b)) => a + t * (b - a),
                    (Some(r), None) | (None, Some(r)) => r,
                    (None, None) => self.config.default_radius,
                };
                (
                    child_end,
                    parent_end,
                    first.position.lerp(&second.position, t),
                    radius,
                )
            };

            let new_id = state.workspace.allocate_annotation_id();
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let snapshot = neuron.clone();
            let removed = neuron.remove_anchored_paths(&[(child_end, parent_end)]);
            let slot = neuron.unlink_from_parent(child_end).map(|(_, index)| index);
            neuron.insert_node(Annotation::new(
                new_id,
                neuron_id,
                position,
                Some(radius),
                Some(parent_end),
            ));
            neuron.link_child(parent_end, new_id, slot);
            neuron.link_child(new_id, child_end, None);
            self.commit_neurons(state, vec![snapshot], &[])?;

            let notifier = handle.notifier();
            if !removed.is_empty() {
                notifier.publish(ModelEvent::AnchoredPathsRemoved {
                    neuron_id,
                    endpoints: removed,
                });
            }
            notifier.publish(ModelEvent::AnnotationAdded {
                neuron_id,
                annotation_id: new_id,
            });
            notifier.publish(ModelEvent::AnnotationReparented {
                neuron_id,
                annotation_id: child_end,
            });
            let traces = self.trace_requests(
                state,
                neuron_id,
                &[(parent_end, new_id), (new_id, child_end)],
            );
            Ok((new_id, traces))
        })?;
        self.spawn_traces(traces);
        Ok(new_id)
    }

    /// Makes `new_root` the root of its neurite.
    ///
    /// Rerooting at the current root is a no-op.
    pub fn reroot_neurite(
        &self,
        handle: &WorkspaceHandle,
        new_root: AnnotationId,
    ) -> Result<(), EditError> {
        logged("reroot_neurite", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, new_root)?;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            if neuron.is_root(new_root) {
                return Ok(());
            }
            let snapshot = neuron.clone();
            neuron.reroot(new_root);
            let notes_changed = NoteValidator::revalidate(neuron, new_root);
            self.commit_neurons(state, vec![snapshot], &[])?;

            let notifier = handle.notifier();
            notifier.publish(ModelEvent::NeuronChanged { neuron_id });
            if notes_changed {
                notifier.publish(ModelEvent::NotesUpdated {
                    neuron_id,
                    annotation_id: new_root,
                });
            }
            Ok(())
        })
    }

    /// Detaches `new_root` from its parent, making it head a new neurite in
    /// the same neuron.
    pub fn split_neurite(
        &self,
        handle: &WorkspaceHandle,
        new_root: AnnotationId,
    ) -> Result<(), EditError> {
        logged("split_neurite", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, new_root)?;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let Some(parent) = neuron.parent_of(new_root) else {
                return Err(Precondition::AlreadyRoot(new_root).into());
            };
            let snapshot = neuron.clone();
            let removed = neuron.remove_anchored_paths(&[(new_root, parent)]);
            neuron.unlink_from_parent(new_root);
            neuron.push_root(new_root);
            self.commit_neurons(state, vec![snapshot], &[])?;

            let notifier = handle.notifier();
            if !removed.is_empty() {
                notifier.publish(ModelEvent::AnchoredPathsRemoved {
                    neuron_id,
                    endpoints: removed,
                });
            }
            notifier.publish(ModelEvent::AnnotationReparented {
                neuron_id,
                annotation_id: new_root,
            });
            Ok(())
        })
    }

    /// Attaches the neurite containing `source` under `target`.
    ///
    /// The source neurite is rerooted at `source` first and moved into the
    /// target's neuron when they differ. A source neuron left empty is
    /// deleted in the same persistence transaction.
    pub fn merge_neurite(
        &self,
        handle: &WorkspaceHandle,
        source: AnnotationId,
        target: AnnotationId,
    ) -> Result<(), EditError> {
        let traces = logged("merge_neurite", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let source_neuron_id = locate(&state.workspace, source)?;
            let target_neuron_id = locate(&state.workspace, target)?;
            if source_neuron_id == target_neuron_id {
                let neuron = state
                    .workspace
                    .neuron(target_neuron_id)
                    .ok_or(EditError::NeuronNotFound(target_neuron_id))?;
                if neuron.same_neurite(source, target) {
                    return Err(Precondition::SameNeurite {
                        source,
                        target,
                        common_ancestor: neuron.common_ancestor(source, target),
                    }
                    .into());
                }
            }

            let mut snapshots = Vec::with_capacity(2);
            for neuron_id in distinct(source_neuron_id, target_neuron_id) {
                let neuron = state
                    .workspace
                    .neuron(neuron_id)
                    .ok_or(EditError::NeuronNotFound(neuron_id))?;
                snapshots.push(neuron.clone());
            }

            neuron_mut(&mut state.workspace, source_neuron_id)?.reroot(source);
            if source_neuron_id != target_neuron_id {
                let Some(neurite) =
                    neuron_mut(&mut state.workspace, source_neuron_id)?.take_neurite(source)
                else {
                    restore(&mut state.workspace, snapshots);
                    return Err(EditError::AnnotationNotFound(source));
                };
                neuron_mut(&mut state.workspace, target_neuron_id)?.adopt_neurite(neurite);
            }
            let target_neuron = neuron_mut(&mut state.workspace, target_neuron_id)?;
            target_neuron.link_child(target, source, None);
            let mut noted = Vec::new();
            for id in [target, source] {
                if NoteValidator::revalidate(target_neuron, id) {
                    noted.push(id);
                }
            }

            let source_emptied = source_neuron_id != target_neuron_id
                && state
                    .workspace
                    .neuron(source_neuron_id)
                    .is_some_and(Neuron::is_empty);
            let mut deletes = Vec::new();
            if source_emptied {
                state.workspace.remove_neuron(source_neuron_id);
                deletes.push(source_neuron_id);
            }
            self.commit_neurons(state, snapshots, &deletes)?;

            let notifier = handle.notifier();
            let _bulk = notifier.transaction();
            notifier.publish(ModelEvent::AnnotationReparented {
                neuron_id: target_neuron_id,
                annotation_id: source,
            });
            for id in noted {
                notifier.publish(ModelEvent::NotesUpdated {
                    neuron_id: target_neuron_id,
                    annotation_id: id,
                });
            }
            if source_neuron_id != target_neuron_id {
                notifier.publish(if source_emptied {
                    ModelEvent::NeuronDeleted {
                        neuron_id: source_neuron_id,
                    }
                } else {
                    ModelEvent::NeuronChanged {
                        neuron_id: source_neuron_id,
                    }
                });
            }
            Ok(self.trace_requests(state, target_neuron_id, &[(target, source)]))
        })?;
        self.spawn_traces(traces);
        Ok(())
    }

    /// Transfers the whole neurite containing `annotation_id` to
    /// `dest_neuron_id` as a new neurite there.
    ///
    /// The source neuron is kept even when the transfer empties it.
    pub fn move_neurite(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
        dest_neuron_id: NeuronId,
    ) -> Result<(), EditError> {
        logged("move_neurite", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let source_neuron_id = locate(&state.workspace, annotation_id)?;
            let dest = state
                .workspace
                .neuron(dest_neuron_id)
                .ok_or(EditError::NeuronNotFound(dest_neuron_id))?;
            if source_neuron_id == dest_neuron_id {
                return Err(Precondition::AlreadyInNeuron {
                    annotation_id,
                    neuron_id: dest_neuron_id,
                }
                .into());
            }
            let dest_snapshot = dest.clone();
            let source = neuron_mut(&mut state.workspace, source_neuron_id)?;
            let root_id = source
                .root_of(annotation_id)
                .ok_or(EditError::AnnotationNotFound(annotation_id))?;
            let source_snapshot = source.clone();
            let neurite = source
                .take_neurite(root_id)
                .ok_or(EditError::AnnotationNotFound(root_id))?;
            neuron_mut(&mut state.workspace, dest_neuron_id)?.adopt_neurite(neurite);
            self.commit_neurons(state, vec![source_snapshot, dest_snapshot], &[])?;

            let notifier = handle.notifier();
            let _bulk = notifier.transaction();
            notifier.publish(ModelEvent::NeuronChanged {
                neuron_id: source_neuron_id,
            });
            notifier.publish(ModelEvent::NeuronChanged {
                neuron_id: dest_neuron_id,
            });
            Ok(())
        })
    }

    // ---- notes and paths ------------------------------------------------

    /// Replaces the note of `annotation_id`; blank text removes it.
    pub fn set_note(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
        text: &str,
    ) -> Result<(), EditError> {
        logged("set_note", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, annotation_id)?;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let text = text.trim();
            if neuron.note(annotation_id) == text {
                return Ok(());
            }
            let snapshot = neuron.clone();
            neuron.set_note_text(annotation_id, text);
            self.commit_neurons(state, vec![snapshot], &[])?;
            handle.notifier().publish(ModelEvent::NotesUpdated {
                neuron_id,
                annotation_id,
            });
            Ok(())
        })
    }

    pub fn remove_note(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
    ) -> Result<(), EditError> {
        self.set_note(handle, annotation_id, "")
    }

    /// Strips predefined tokens that no longer hold for `annotation_id`.
    ///
    /// Returns whether the note changed.
    pub fn revalidate_notes(
        &self,
        handle: &WorkspaceHandle,
        annotation_id: AnnotationId,
    ) -> Result<bool, EditError> {
        logged("revalidate_notes", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, annotation_id)?;
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            let snapshot = neuron.clone();
            if !NoteValidator::revalidate(neuron, annotation_id) {
                return Ok(false);
            }
            self.commit_neurons(state, vec![snapshot], &[])?;
            handle.notifier().publish(ModelEvent::NotesUpdated {
                neuron_id,
                annotation_id,
            });
            Ok(true)
        })
    }

    /// Stores a traced polyline along the edge `first`-`second`.
    ///
    /// The endpoints must still be parent-linked and the polyline must still
    /// start and end at their positions (in either order). An existing path
    /// on the edge is replaced.
    pub fn add_anchored_path(
        &self,
        handle: &WorkspaceHandle,
        first: AnnotationId,
        second: AnnotationId,
        points: Vec<Vec3>,
    ) -> Result<(), EditError> {
        logged("add_anchored_path", || {
            let mut guard = handle.lock()?;
            let state = &mut *guard;
            let neuron_id = locate(&state.workspace, first)?;
            if locate(&state.workspace, second)? != neuron_id {
                return Err(Precondition::NotAdjacent { first, second }.into());
            }
            let neuron = neuron_mut(&mut state.workspace, neuron_id)?;
            if !neuron.are_adjacent(first, second) {
                return Err(Precondition::NotAdjacent { first, second }.into());
            }
            let (Some(a), Some(b)) = (neuron.annotation(first), neuron.annotation(second)) else {
                return Err(EditError::AnnotationNotFound(first));
            };
            if !path_matches_endpoints(&points, &a.position, &b.position) {
                return Err(Precondition::StalePathEndpoints { first, second }.into());
            }
            let endpoints = PathEndpoints::new(first, second);
            let snapshot = neuron.clone();
            neuron.insert_anchored_path(AnchoredPath { endpoints, points });
            self.commit_neurons(state, vec![snapshot], &[])?;
            handle.notifier().publish(ModelEvent::AnchoredPathAdded {
                neuron_id,
                endpoints,
            });
            Ok(())
        })
    }

    // ---- internals ------------------------------------------------------

    /// Persists the current state of every snapshotted neuron (minus
    /// `deletes`) and deletes `deletes`, in one repository commit.
    ///
    /// On success the index follows the model; on failure every snapshot is
    /// put back.
    fn commit_neurons(
        &self,
        state: &mut WorkspaceState,
        snapshots: Vec<Neuron>,
        deletes: &[NeuronId],
    ) -> Result<(), EditError> {
        let result = {
            let saves: Vec<&Neuron> = snapshots
                .iter()
                .filter(|snapshot| !deletes.contains(&snapshot.id))
                .filter_map(|snapshot| state.workspace.neuron(snapshot.id))
                .collect();
            self.repo.commit(state.workspace.id, &saves, deletes)
        };
        match result {
            Ok(()) => {
                for snapshot in &snapshots {
                    match state.workspace.neuron(snapshot.id) {
                        Some(neuron) => state.index.reindex_neuron(neuron),
                        None => state.index.remove_neuron(snapshot.id),
                    }
                }
                Ok(())
            }
            Err(err) => {
                restore(&mut state.workspace, snapshots);
                Err(err.into())
            }
        }
    }

    fn refine(&self, workspace: &Workspace, position: Vec3) -> Vec3 {
        match &self.refiner {
            Some(refiner) if workspace.auto_refine_point => refiner.refine(position),
            _ => position,
        }
    }

    fn trace_requests(
        &self,
        state: &WorkspaceState,
        neuron_id: NeuronId,
        edges: &[(AnnotationId, AnnotationId)],
    ) -> Vec<TraceRequest> {
        if self.tracer.is_none() || !state.workspace.auto_tracing {
            return Vec::new();
        }
        let Some(neuron) = state.workspace.neuron(neuron_id) else {
            return Vec::new();
        };
        edges
            .iter()
            .filter_map(|(from, to)| {
                let a = neuron.annotation(*from)?;
                let b = neuron.annotation(*to)?;
                Some(TraceRequest {
                    workspace_id: state.workspace.id,
                    neuron_id,
                    from: *from,
                    to: *to,
                    from_position: a.position,
                    to_position: b.position,
                })
            })
            .collect()
    }

    fn spawn_traces(&self, requests: Vec<TraceRequest>) {
        let Some(tracer) = &self.tracer else {
            return;
        };
        if requests.is_empty() {
            return;
        }
        let workers = dispatch_traces(tracer, requests, self.config.trace_timeout());
        match self.trace_workers.lock() {
            Ok(mut pending) => {
                pending.retain(|worker| !worker.is_finished());
                pending.extend(workers);
            }
            Err(_) => warn!("event=auto_trace module=editor status=error error=worker_list_poisoned"),
        }
    }
}

fn logged<T>(op: &'static str, run: impl FnOnce() -> Result<T, EditError>) -> Result<T, EditError> {
    let started_at = Instant::now();
    let result = run();
    let duration_ms = started_at.elapsed().as_millis();
    match &result {
        Ok(_) => debug!("event={op} module=editor status=ok duration_ms={duration_ms}"),
        Err(err @ (EditError::Persistence(_) | EditError::LockPoisoned)) => {
            error!("event={op} module=editor status=error duration_ms={duration_ms} error={err}")
        }
        Err(err) => {
            warn!("event={op} module=editor status=rejected duration_ms={duration_ms} error={err}")
        }
    }
    result
}

fn locate(workspace: &Workspace, annotation_id: AnnotationId) -> Result<NeuronId, EditError> {
    workspace
        .neuron_of(annotation_id)
        .ok_or(EditError::AnnotationNotFound(annotation_id))
}

fn neuron_mut(workspace: &mut Workspace, neuron_id: NeuronId) -> Result<&mut Neuron, EditError> {
    workspace
        .neuron_mut(neuron_id)
        .ok_or(EditError::NeuronNotFound(neuron_id))
}

fn restore(workspace: &mut Workspace, snapshots: Vec<Neuron>) {
    for snapshot in snapshots {
        workspace.insert_neuron(snapshot);
    }
}

fn distinct(a: NeuronId, b: NeuronId) -> Vec<NeuronId> {
    if a == b {
        vec![a]
    } else {
        vec![a, b]
    }
}

/// Parent edge first, then child edges in order.
fn incident_edges(neuron: &Neuron, annotation_id: AnnotationId) -> Vec<(AnnotationId, AnnotationId)> {
    neuron
        .parent_of(annotation_id)
        .into_iter()
        .chain(neuron.children_of(annotation_id).iter().copied())
        .map(|other| (annotation_id, other))
        .collect()
}

/// Fraction along child end -> rootward end where a split point goes.
fn split_fraction(length: f64, anchor_distance: f64, reverse: bool) -> f64 {
    // zero length gives +inf, which clamps to the midpoint
    let t = (anchor_distance / length).min(0.5);
    if reverse {
        1.0 - t
    } else {
        t
    }
}

fn path_matches_endpoints(points: &[Vec3], a: &Vec3, b: &Vec3) -> bool {
    let (Some(start), Some(end)) = (points.first(), points.last()) else {
        return false;
    };
    (near(start, a) && near(end, b)) || (near(start, b) && near(end, a))
}

fn near(point: &Vec3, anchor: &Vec3) -> bool {
    (point.x - anchor.x).abs() < PATH_ENDPOINT_TOLERANCE
        && (point.y - anchor.y).abs() < PATH_ENDPOINT_TOLERANCE
        && (point.z - anchor.z).abs() < PATH_ENDPOINT_TOLERANCE
}

fn normalize_name(name: &str) -> Result<String, Precondition> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Precondition::EmptyName);
    }
    Ok(trimmed.to_string())
}
