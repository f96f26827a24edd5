//! Core domain logic for neurite annotation.
//! This crate is the single source of truth for neurite topology invariants.

pub mod db;
pub mod events;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod spatial;

pub use events::{ChangeNotifier, ListenerId, ModelEvent, ModelListener};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::annotation::{Annotation, AnnotationId, NeuronId, Vec3};
pub use model::neuron::{AnchoredPath, IntegrityError, Neuron, NeuronColor, PathEndpoints};
pub use model::workspace::{ModelSource, Workspace, WorkspaceId};
pub use repo::neuron_repo::{
    NeuronRepoError, NeuronRepoResult, NeuronRepository, SqliteNeuronRepository,
};
pub use service::config::EditorConfig;
pub use service::handle::{WorkspaceHandle, WorkspaceState};
pub use service::merge_candidates::{DragResolution, MergeCandidateResolver};
pub use service::note_validator::{NoteValidator, PredefinedNote};
pub use service::topology_editor::{EditError, Precondition, TopologyEditor};
pub use service::trace::{AutoTraceService, PointRefiner, TraceError, TraceRequest};
pub use spatial::{FlatSpatialIndex, IndexEntry, NearestHit, SpatialIndex};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
