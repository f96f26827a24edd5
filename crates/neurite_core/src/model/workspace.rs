//! Workspace container model.
//!
//! # Responsibility
//! - Hold every neuron of one tracing session and allocate workspace-unique ids.
//! - Carry the session flags that gate optional editor side effects.
//!
//! # Invariants
//! - Neuron ids are unique within the workspace.
//! - Annotation ids are unique across all neurons of the workspace and never
//!   reused: counters only move forward.

use crate::model::annotation::{Annotation, AnnotationId, NeuronId};
use crate::model::neuron::Neuron;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stable workspace identifier.
pub type WorkspaceId = Uuid;

/// Origin of the tracing model.
///
/// One model type serves every origin; the tag only changes bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelSource {
    /// Regular persisted workspace.
    #[default]
    Workspace,
    /// Free tracing session.
    Session,
    /// Session driven by an external ordered task list.
    DirectedSession,
}

impl ModelSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Session => "session",
            Self::DirectedSession => "directed_session",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "workspace" => Some(Self::Workspace),
            "session" => Some(Self::Session),
            "directed_session" => Some(Self::DirectedSession),
            _ => None,
        }
    }
}

/// Top-level container of neurons for one tracing session.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub source: ModelSource,
    /// Request path traces after node creation/movement.
    pub auto_tracing: bool,
    /// Refine new/moved point positions before storing them.
    pub auto_refine_point: bool,
    pub(crate) neurons: BTreeMap<NeuronId, Neuron>,
    next_annotation_id: AnnotationId,
    next_neuron_id: NeuronId,
}

impl Workspace {
    /// Creates an empty workspace with a generated id.
    pub fn new(name: impl Into<String>, source: ModelSource) -> Self {
        Self::with_id(Uuid::new_v4(), name, source)
    }

    /// Creates an empty workspace with a caller-provided id.
    pub fn with_id(id: WorkspaceId, name: impl Into<String>, source: ModelSource) -> Self {
        Self {
            id,
            name: name.into(),
            source,
            auto_tracing: false,
            auto_refine_point: false,
            neurons: BTreeMap::new(),
            next_annotation_id: 1,
            next_neuron_id: 1,
        }
    }

    pub fn neuron(&self, id: NeuronId) -> Option<&Neuron> {
        self.neurons.get(&id)
    }

    pub fn neurons(&self) -> impl Iterator<Item = &Neuron> {
        self.neurons.values()
    }

    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    /// Neuron currently owning `annotation_id`.
    pub fn neuron_of(&self, annotation_id: AnnotationId) -> Option<NeuronId> {
        self.neurons
            .values()
            .find(|neuron| neuron.contains(annotation_id))
            .map(|neuron| neuron.id)
    }

    pub fn annotation(&self, annotation_id: AnnotationId) -> Option<&Annotation> {
        self.neurons
            .values()
            .find_map(|neuron| neuron.annotation(annotation_id))
    }

    pub fn annotation_count(&self) -> usize {
        self.neurons.values().map(Neuron::annotation_count).sum()
    }

    pub(crate) fn neuron_mut(&mut self, id: NeuronId) -> Option<&mut Neuron> {
        self.neurons.get_mut(&id)
    }

    /// Inserts or replaces a neuron and advances id counters past its contents.
    pub(crate) fn insert_neuron(&mut self, neuron: Neuron) {
        self.next_neuron_id = self.next_neuron_id.max(neuron.id.saturating_add(1));
        if let Some(max_id) = neuron.annotations().map(|ann| ann.id).max() {
            self.next_annotation_id = self.next_annotation_id.max(max_id.saturating_add(1));
        }
        self.neurons.insert(neuron.id, neuron);
    }

    pub(crate) fn remove_neuron(&mut self, id: NeuronId) -> Option<Neuron> {
        self.neurons.remove(&id)
    }

    pub(crate) fn allocate_annotation_id(&mut self) -> AnnotationId {
        let id = self.next_annotation_id;
        self.next_annotation_id = self.next_annotation_id.saturating_add(1);
        id
    }

    pub(crate) fn allocate_neuron_id(&mut self) -> NeuronId {
        let id = self.next_neuron_id;
        self.next_neuron_id = self.next_neuron_id.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::{ModelSource, Workspace};
    use crate::model::annotation::{Annotation, Vec3};
    use crate::model::neuron::Neuron;

    #[test]
    fn model_source_roundtrips_through_text() {
        for source in [
            ModelSource::Workspace,
            ModelSource::Session,
            ModelSource::DirectedSession,
        ] {
            assert_eq!(ModelSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(ModelSource::parse("bogus"), None);
    }

    #[test]
    fn inserting_loaded_neuron_moves_counters_forward() {
        let mut workspace = Workspace::new("ws", ModelSource::Workspace);
        let mut neuron = Neuron::new(5, "loaded");
        neuron.insert_node(Annotation::new(41, 5, Vec3::default(), None, None));
        neuron.push_root(41);
        workspace.insert_neuron(neuron);

        assert_eq!(workspace.allocate_neuron_id(), 6);
        assert_eq!(workspace.allocate_annotation_id(), 42);
        assert_eq!(workspace.neuron_of(41), Some(5));
    }
}
