//! Immutable work packages and their insertion parameters.

use std::fmt;

use crate::context_id::{ContextId, DeviceId, RecorderId};
use crate::task::Task;

/// Outcome reported to a finished callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Success,
    Failed,
}

/// Callback run once the work it was registered with has finished or failed.
pub type FinishedProc = Box<dyn FnOnce(CallbackResult) + Send + 'static>;

/// Frozen task list produced by one [`Recorder`](crate::Recorder).
///
/// A recording is consumed by [`Context::insert_recording`](crate::Context::insert_recording),
/// so it is submitted at most once.
pub struct Recording {
    pub(crate) device_id: DeviceId,
    pub(crate) context_id: ContextId,
    pub(crate) recorder_id: RecorderId,
    pub(crate) tasks: Vec<Task>,
}

impl Recording {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn recorder_id(&self) -> RecorderId {
        self.recorder_id
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("device_id", &self.device_id)
            .field("context_id", &self.context_id)
            .field("recorder_id", &self.recorder_id)
            .field("tasks", &self.tasks.iter().map(Task::name).collect::<Vec<_>>())
            .finish()
    }
}

/// A recording plus the callback to run when its submission completes.
pub struct InsertRecordingInfo {
    pub recording: Recording,
    pub finished_proc: Option<FinishedProc>,
}

impl InsertRecordingInfo {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            finished_proc: None,
        }
    }

    /// Run `proc` exactly once with the outcome of this recording.
    pub fn with_finished_proc(mut self, proc: impl FnOnce(CallbackResult) + Send + 'static) -> Self {
        self.finished_proc = Some(Box::new(proc));
        self
    }

    /// Report failure and consume the info.
    pub(crate) fn fail(self) {
        if let Some(proc) = self.finished_proc {
            proc(CallbackResult::Failed);
        }
    }
}

impl From<Recording> for InsertRecordingInfo {
    fn from(recording: Recording) -> Self {
        Self::new(recording)
    }
}
