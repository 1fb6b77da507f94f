//! Submission queue and in-flight work tracking.

use std::collections::VecDeque;
use std::sync::Arc;

use tessel_core::Result;
use tracing::{debug, warn};

use crate::backend::SubmissionId;
use crate::recording::{CallbackResult, FinishedProc, InsertRecordingInfo};
use crate::shared_context::SharedContext;
use crate::task::Task;

/// Work gathered since the last submit.
#[derive(Default)]
struct CommandBuffer {
    tasks: Vec<Task>,
    finished_procs: Vec<FinishedProc>,
    recording_count: usize,
}

impl CommandBuffer {
    fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.finished_procs.is_empty()
    }
}

/// A submission the device has not finished yet. Holding its tasks keeps
/// every resource they reference alive.
struct InFlight {
    id: SubmissionId,
    #[allow(dead_code)]
    tasks: Vec<Task>,
    procs: Vec<FinishedProc>,
}

/// Orders work onto the device and tracks what is still running.
pub struct QueueManager {
    shared: Arc<SharedContext>,
    current: CommandBuffer,
    in_flight: VecDeque<InFlight>,
    last_submitted: SubmissionId,
    completed: SubmissionId,
}

impl QueueManager {
    pub fn new(shared: Arc<SharedContext>) -> Self {
        Self {
            shared,
            current: CommandBuffer::default(),
            in_flight: VecDeque::new(),
            last_submitted: SubmissionId::NONE,
            completed: SubmissionId::NONE,
        }
    }

    /// Append a recording's tasks to the pending command buffer.
    pub fn add_recording(&mut self, info: InsertRecordingInfo) {
        let InsertRecordingInfo {
            recording,
            finished_proc,
        } = info;
        self.current.tasks.extend(recording.tasks);
        self.current.finished_procs.extend(finished_proc);
        self.current.recording_count += 1;
    }

    /// Append a single task outside of any recording.
    pub fn add_task(&mut self, task: Task) {
        self.current.tasks.push(task);
    }

    /// Hand the pending command buffer to the backend. Does nothing when
    /// there is nothing pending.
    ///
    /// On failure the pending finished callbacks are failed and the error is
    /// returned; a device-loss error marks the device lost.
    pub fn submit_to_gpu(&mut self) -> Result<()> {
        if self.current.is_empty() {
            return Ok(());
        }
        let buffer = std::mem::take(&mut self.current);

        if let Err(err) = self.shared.check_alive() {
            fail_procs(buffer.finished_procs);
            return Err(err);
        }

        match self.shared.backend().submit(&buffer.tasks) {
            Ok(id) => {
                debug!(
                    submission = id.0,
                    tasks = buffer.tasks.len(),
                    recordings = buffer.recording_count,
                    "submitted command buffer"
                );
                self.last_submitted = self.last_submitted.max(id);
                self.in_flight.push_back(InFlight {
                    id,
                    tasks: buffer.tasks,
                    procs: buffer.finished_procs,
                });
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "submission failed");
                if err.is_device_lost() {
                    self.shared.mark_device_lost();
                }
                fail_procs(buffer.finished_procs);
                Err(err)
            }
        }
    }

    pub fn has_unfinished_work(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Id of the most recent successful submission.
    pub fn last_submitted(&self) -> SubmissionId {
        self.last_submitted
    }

    /// Highest submission known to be finished.
    pub fn completed(&self) -> SubmissionId {
        self.completed
    }

    /// Retire finished submissions and run their callbacks with success.
    ///
    /// With `sync` set, block until everything submitted has finished.
    /// Returns the completed watermark.
    pub fn check_for_finished_work(&mut self, sync: bool) -> Result<SubmissionId> {
        if self.in_flight.is_empty() {
            return Ok(self.completed);
        }
        let done = match self.shared.backend().poll(sync) {
            Ok(done) => done,
            Err(err) => {
                if err.is_device_lost() {
                    self.shared.mark_device_lost();
                    self.fail_all();
                }
                return Err(err);
            }
        };
        self.completed = self.completed.max(done);

        while self
            .in_flight
            .front()
            .is_some_and(|work| work.id <= self.completed)
        {
            if let Some(work) = self.in_flight.pop_front() {
                debug!(submission = work.id.0, "submission finished");
                for proc in work.procs {
                    proc(CallbackResult::Success);
                }
            }
        }
        Ok(self.completed)
    }

    /// Fail every pending and in-flight callback and drop the work.
    pub fn fail_all(&mut self) {
        let pending = std::mem::take(&mut self.current);
        fail_procs(pending.finished_procs);
        for work in self.in_flight.drain(..) {
            fail_procs(work.procs);
        }
    }
}

fn fail_procs(procs: Vec<FinishedProc>) {
    for proc in procs {
        proc(CallbackResult::Failed);
    }
}
