//! Deferred delivery of transfer buffers to the CPU.
//!
//! Actions are registered against the submission that fills their buffers.
//! Each poll requests CPU mappings for buffers whose submission has finished
//! and runs the action once every buffer is mapped, or with an error once
//! any mapping fails. Every action runs exactly once.

use std::collections::VecDeque;

use tessel_core::{Result, TesselError};
use tracing::{debug, warn};

use crate::backend::{Backend, BufferId, MapState, SubmissionId};
use crate::resource::BufferProxy;

/// Receives the mapped contents of the registered buffers, in order.
pub type MappedAction = Box<dyn FnOnce(Result<&[&[u8]]>) + Send + 'static>;

struct PendingMap {
    submission: SubmissionId,
    buffers: Vec<BufferProxy>,
    action: MappedAction,
    maps_requested: bool,
    map_error: Option<TesselError>,
}

enum Readiness {
    Waiting,
    Mapped,
    Failed(TesselError),
}

/// Tracks buffers waiting to become CPU readable.
#[derive(Default)]
pub struct MappedBufferManager {
    pending: VecDeque<PendingMap>,
}

impl MappedBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` once `buffers`, written by `submission`, can be read.
    pub fn register(&mut self, submission: SubmissionId, buffers: Vec<BufferProxy>, action: MappedAction) {
        debug!(submission = submission.0, buffers = buffers.len(), "registered mapped readback");
        self.pending.push_back(PendingMap {
            submission,
            buffers,
            action,
            maps_requested: false,
            map_error: None,
        });
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Request maps for finished submissions and run every action whose
    /// buffers are ready. Returns the number of actions run.
    ///
    /// `completed` is the highest finished submission. With `wait` set,
    /// block on the backend until requested maps resolve.
    pub fn process(&mut self, backend: &dyn Backend, completed: SubmissionId, wait: bool) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let mut any_pending_map = false;
        for entry in self.pending.iter_mut().filter(|e| e.submission <= completed) {
            if !entry.maps_requested {
                entry.maps_requested = true;
                for buffer in &entry.buffers {
                    if let Err(err) = backend.map_async(buffer.id()) {
                        if entry.map_error.is_none() {
                            entry.map_error = Some(err);
                        }
                    }
                }
            }
            any_pending_map |= entry
                .buffers
                .iter()
                .any(|b| backend.map_state(b.id()) == MapState::Pending);
        }
        if any_pending_map {
            if let Err(err) = backend.poll(wait) {
                warn!(error = %err, "poll while waiting for buffer maps failed");
            }
        }

        let mut fired = 0;
        let mut waiting = VecDeque::with_capacity(self.pending.len());
        for entry in self.pending.drain(..) {
            if entry.submission > completed {
                waiting.push_back(entry);
                continue;
            }
            match readiness(backend, &entry) {
                Readiness::Waiting => waiting.push_back(entry),
                Readiness::Mapped => {
                    deliver(backend, entry);
                    fired += 1;
                }
                Readiness::Failed(err) => {
                    warn!(error = %err, "readback buffer could not be mapped");
                    unmap_all(backend, &entry.buffers);
                    (entry.action)(Err(err));
                    fired += 1;
                }
            }
        }
        self.pending = waiting;
        fired
    }

    /// Run every pending action with `err`.
    pub fn fail_all(&mut self, err: &TesselError) {
        for entry in self.pending.drain(..) {
            (entry.action)(Err(err.clone()));
        }
    }
}

fn readiness(backend: &dyn Backend, entry: &PendingMap) -> Readiness {
    if let Some(err) = &entry.map_error {
        return Readiness::Failed(err.clone());
    }
    let mut all_mapped = true;
    for buffer in &entry.buffers {
        match backend.map_state(buffer.id()) {
            MapState::Mapped => {}
            MapState::Failed => {
                return Readiness::Failed(TesselError::Readback(format!(
                    "mapping buffer {} failed",
                    buffer.id().0
                )))
            }
            MapState::Pending | MapState::Unmapped => all_mapped = false,
        }
    }
    if all_mapped {
        Readiness::Mapped
    } else {
        Readiness::Waiting
    }
}

fn deliver(backend: &dyn Backend, entry: PendingMap) {
    let ids: Vec<BufferId> = entry.buffers.iter().map(BufferProxy::id).collect();
    let mut action = Some(entry.action);
    let result = backend.read_mapped(&ids, &mut |planes: &[&[u8]]| {
        if let Some(action) = action.take() {
            action(Ok(planes));
        }
    });
    unmap_all(backend, &entry.buffers);
    if let Err(err) = result {
        if let Some(action) = action.take() {
            action(Err(err));
        }
    }
}

fn unmap_all(backend: &dyn Backend, buffers: &[BufferProxy]) {
    for buffer in buffers {
        backend.unmap(buffer.id());
    }
}
