//! Auto-trace and point-refinement collaborators.
//!
//! # Responsibility
//! - Define the external path tracer and point refiner seams.
//! - Run trace requests off the editing critical section with a deadline.
//!
//! # Invariants
//! - Trace failures and timeouts are logged at `warn` and never reach the
//!   caller of the edit that requested them.
//! - Requests are only dispatched after the workspace lock is released.

use crate::model::annotation::{AnnotationId, NeuronId, Vec3};
use crate::model::workspace::WorkspaceId;
use log::{debug, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Errors reported by an [`AutoTraceService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// The request did not complete before its deadline.
    TimedOut(Duration),
    /// The tracing backend is not reachable.
    Unavailable(String),
    /// The backend rejected or failed the request.
    Failed(String),
}

impl Display for TraceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut(timeout) => {
                write!(f, "trace timed out after {} ms", timeout.as_millis())
            }
            Self::Unavailable(message) => write!(f, "trace service unavailable: {message}"),
            Self::Failed(message) => write!(f, "trace failed: {message}"),
        }
    }
}

impl Error for TraceError {}

/// One edge to trace, captured when the edit completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRequest {
    pub workspace_id: WorkspaceId,
    pub neuron_id: NeuronId,
    pub from: AnnotationId,
    pub to: AnnotationId,
    pub from_position: Vec3,
    pub to_position: Vec3,
}

/// External path tracer between two annotations.
///
/// Implementations typically compute a polyline and hand it back through
/// `TopologyEditor::add_anchored_path`.
pub trait AutoTraceService: Send + Sync {
    fn request_trace(&self, request: &TraceRequest, timeout: Duration) -> Result<(), TraceError>;
}

/// Snaps a user-placed point onto nearby signal.
pub trait PointRefiner: Send + Sync {
    fn refine(&self, position: Vec3) -> Vec3;
}

/// Spawns one detached worker per request.
///
/// The returned handles finish once their request completed, failed or hit
/// `timeout`; joining them is optional.
pub(crate) fn dispatch_traces(
    service: &Arc<dyn AutoTraceService>,
    requests: Vec<TraceRequest>,
    timeout: Duration,
) -> Vec<JoinHandle<()>> {
    requests
        .into_iter()
        .map(|request| {
            let service = Arc::clone(service);
            thread::spawn(move || run_with_deadline(service, request, timeout))
        })
        .collect()
}

fn run_with_deadline(service: Arc<dyn AutoTraceService>, request: TraceRequest, timeout: Duration) {
    let started_at = Instant::now();
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let result = service.request_trace(&request, timeout);
        // Receiver may already be gone after a timeout.
        let _ = sender.send(result);
    });

    let outcome = match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(TraceError::TimedOut(timeout)),
    };
    match outcome {
        Ok(()) => debug!(
            "event=auto_trace module=trace status=ok neuron_id={} from={} to={} duration_ms={}",
            request.neuron_id,
            request.from,
            request.to,
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event=auto_trace module=trace status=error neuron_id={} from={} to={} duration_ms={} error={}",
            request.neuron_id,
            request.from,
            request.to,
            started_at.elapsed().as_millis(),
            err
        ),
    }
}
