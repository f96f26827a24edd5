//! Structural-change events and their notification queue.
//!
//! # Responsibility
//! - Queue model events produced by completed edits.
//! - Collapse multi-edge edits into one bulk refresh via transaction brackets.
//! - Deliver queued events to listeners from an explicit dispatch call.
//!
//! # Invariants
//! - Events are only delivered by [`ChangeNotifier::dispatch`], never while
//!   an edit holds the workspace lock.
//! - Events queued while a dispatch is running (for example by an edit issued
//!   from a listener) are delivered on a later dispatch turn.
//! - A nested dispatch from inside a listener is a no-op.

use crate::model::annotation::{AnnotationId, NeuronId, Vec3};
use crate::model::neuron::PathEndpoints;
use log::debug;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// One structural change visible to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    NeuronCreated {
        neuron_id: NeuronId,
    },
    NeuronDeleted {
        neuron_id: NeuronId,
    },
    /// Name, color, visibility or root layout changed.
    NeuronChanged {
        neuron_id: NeuronId,
    },
    AnnotationAdded {
        neuron_id: NeuronId,
        annotation_id: AnnotationId,
    },
    AnnotationMoved {
        neuron_id: NeuronId,
        annotation_id: AnnotationId,
    },
    /// A move was applied in memory but could not be persisted.
    ///
    /// The model keeps `attempted`; views may snap back to `previous`.
    AnnotationNotMoved {
        neuron_id: NeuronId,
        annotation_id: AnnotationId,
        previous: Vec3,
        attempted: Vec3,
    },
    AnnotationReparented {
        neuron_id: NeuronId,
        annotation_id: AnnotationId,
    },
    AnnotationsDeleted {
        neuron_id: NeuronId,
        annotation_ids: Vec<AnnotationId>,
    },
    RadiusChanged {
        neuron_id: NeuronId,
        annotation_id: AnnotationId,
    },
    NotesUpdated {
        neuron_id: NeuronId,
        annotation_id: AnnotationId,
    },
    AnchoredPathAdded {
        neuron_id: NeuronId,
        endpoints: PathEndpoints,
    },
    AnchoredPathsRemoved {
        neuron_id: NeuronId,
        endpoints: Vec<PathEndpoints>,
    },
    /// Workspace flags changed.
    WorkspaceChanged,
    /// Replaces every elementary event of one bracketed transaction.
    BulkRefresh {
        neuron_ids: Vec<NeuronId>,
    },
}

impl ModelEvent {
    /// Neuron this event concerns, if it concerns exactly one.
    pub fn neuron_id(&self) -> Option<NeuronId> {
        match self {
            Self::NeuronCreated { neuron_id }
            | Self::NeuronDeleted { neuron_id }
            | Self::NeuronChanged { neuron_id }
            | Self::AnnotationAdded { neuron_id, .. }
            | Self::AnnotationMoved { neuron_id, .. }
            | Self::AnnotationNotMoved { neuron_id, .. }
            | Self::AnnotationReparented { neuron_id, .. }
            | Self::AnnotationsDeleted { neuron_id, .. }
            | Self::RadiusChanged { neuron_id, .. }
            | Self::NotesUpdated { neuron_id, .. }
            | Self::AnchoredPathAdded { neuron_id, .. }
            | Self::AnchoredPathsRemoved { neuron_id, .. } => Some(*neuron_id),
            Self::WorkspaceChanged | Self::BulkRefresh { .. } => None,
        }
    }

    fn touched_neurons(&self) -> Vec<NeuronId> {
        match self {
            Self::BulkRefresh { neuron_ids } => neuron_ids.clone(),
            other => other.neuron_id().into_iter().collect(),
        }
    }
}

/// Observer of model events.
///
/// Handlers must not block on the workspace lock; edits issued from a handler
/// are fine because delivery happens outside the editing critical section.
pub trait ModelListener: Send {
    fn on_event(&mut self, event: &ModelEvent);
}

impl<F: FnMut(&ModelEvent) + Send> ModelListener for F {
    fn on_event(&mut self, event: &ModelEvent) {
        self(event);
    }
}

/// Handle returned by [`ChangeNotifier::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ModelEvent>,
    transaction_depth: usize,
    buffered: Vec<ModelEvent>,
}

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    entries: Vec<(ListenerId, Box<dyn ModelListener>)>,
}

/// Buffers and dispatches model events.
#[derive(Default)]
pub struct ChangeNotifier {
    state: Mutex<QueueState>,
    listeners: Mutex<ListenerSet>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Box<dyn ModelListener>) -> ListenerId {
        let mut set = lock(&self.listeners);
        let id = ListenerId(set.next_id);
        set.next_id += 1;
        set.entries.push((id, listener));
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut set = lock(&self.listeners);
        let before = set.entries.len();
        set.entries.retain(|(entry_id, _)| *entry_id != id);
        set.entries.len() != before
    }

    /// Queues one event, or buffers it while a transaction is open.
    pub fn publish(&self, event: ModelEvent) {
        let mut state = lock(&self.state);
        if state.transaction_depth > 0 {
            state.buffered.push(event);
        } else {
            state.queue.push_back(event);
        }
    }

    /// Opens a (possibly nested) transaction bracket.
    pub fn begin_transaction(&self) {
        lock(&self.state).transaction_depth += 1;
    }

    /// Closes a bracket; the outermost close queues one bulk refresh.
    pub fn end_transaction(&self) {
        let mut state = lock(&self.state);
        if state.transaction_depth == 0 {
            return;
        }
        state.transaction_depth -= 1;
        if state.transaction_depth > 0 || state.buffered.is_empty() {
            return;
        }
        let buffered = std::mem::take(&mut state.buffered);
        let neuron_ids: BTreeSet<NeuronId> = buffered
            .iter()
            .flat_map(ModelEvent::touched_neurons)
            .collect();
        debug!(
            "event=notifier_bulk module=events status=ok collapsed={} neurons={}",
            buffered.len(),
            neuron_ids.len()
        );
        state.queue.push_back(ModelEvent::BulkRefresh {
            neuron_ids: neuron_ids.into_iter().collect(),
        });
    }

    /// Opens a bracket closed when the guard drops.
    pub fn transaction(&self) -> TransactionGuard<'_> {
        self.begin_transaction();
        TransactionGuard { notifier: self }
    }

    /// Number of queued, undelivered events.
    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Removes and returns queued events without delivering them.
    pub fn drain(&self) -> Vec<ModelEvent> {
        lock(&self.state).queue.drain(..).collect()
    }

    /// Delivers every currently queued event to every listener.
    ///
    /// Returns the number of events delivered. Events queued during delivery
    /// stay queued for the next call.
    pub fn dispatch(&self) -> usize {
        let mut set = match self.listeners.try_lock() {
            Ok(set) => set,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return 0,
        };
        let batch = self.drain();
        for event in &batch {
            for (_, listener) in set.entries.iter_mut() {
                listener.on_event(event);
            }
        }
        batch.len()
    }
}

/// Closes a notifier transaction on drop.
pub struct TransactionGuard<'a> {
    notifier: &'a ChangeNotifier,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        self.notifier.end_transaction();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking listener must not wedge the queue for everyone else.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
