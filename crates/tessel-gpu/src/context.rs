//! The owning object of one device connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tessel_core::{Result, TesselError};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendApi};
use crate::context_id::ContextId;
use crate::mapped_buffer::MappedBufferManager;
use crate::memory_dump::MemoryDump;
use crate::options::{ContextOptions, RecorderOptions};
use crate::queue::QueueManager;
use crate::recorder::Recorder;
use crate::recording::InsertRecordingInfo;
use crate::resource_cache::ResourceCache;
use crate::shared_context::SharedContext;
use crate::single_owner::SingleOwner;
use crate::texture::BackendTexture;

/// Whether [`Context::submit`] waits for the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncToCpu {
    /// Block until the submitted work has finished, then run completions.
    Yes,
    No,
}

/// Owns a device connection and everything submitted to it.
///
/// A context is used from one thread at a time. Work is recorded by
/// [`Recorder`]s, inserted with [`Context::insert_recording`] and handed to
/// the device by [`Context::submit`]. Completion callbacks and readback
/// results are only delivered from [`Context::check_async_work_completion`],
/// a blocking submit, or when the context is dropped.
pub struct Context {
    pub(crate) shared: Arc<SharedContext>,
    pub(crate) resources: Arc<Mutex<ResourceCache>>,
    pub(crate) queue: QueueManager,
    pub(crate) mapped_buffers: MappedBufferManager,
    pub(crate) options: ContextOptions,
    pub(crate) single_owner: SingleOwner,
    pub(crate) context_id: ContextId,
}

impl Context {
    /// Open a context on `backend`.
    ///
    /// Fails if the backend's one-time setup fails, the device is already
    /// lost, or `options` are invalid.
    pub fn make(backend: Arc<dyn Backend>, options: ContextOptions) -> Result<Self> {
        let initialized = Self::new(backend, options).and_then(|mut context| {
            context.finish_initialization()?;
            Ok(context)
        });
        match initialized {
            Ok(context) => {
                info!(
                    context = %context.context_id,
                    device = %context.shared.device_id(),
                    api = ?context.shared.api(),
                    label = ?context.options.label,
                    budget = context.options.gpu_budget_bytes,
                    "context created"
                );
                Ok(context)
            }
            Err(err) => {
                warn!(error = %err, "context initialization failed");
                Err(err)
            }
        }
    }

    fn new(backend: Arc<dyn Backend>, options: ContextOptions) -> Result<Self> {
        let shared = SharedContext::new(Arc::clone(&backend))?;
        let resources = Arc::new(Mutex::new(ResourceCache::new(backend, options.gpu_budget_bytes)));
        Ok(Self {
            queue: QueueManager::new(Arc::clone(&shared)),
            shared,
            resources,
            mapped_buffers: MappedBufferManager::new(),
            options,
            single_owner: SingleOwner::new(),
            context_id: ContextId::next()?,
        })
    }

    fn finish_initialization(&mut self) -> Result<()> {
        self.options.validate()?;
        self.shared.backend().finish_initialization()?;
        if self.shared.is_device_lost() {
            return Err(TesselError::Initialization(
                "device lost during initialization".to_string(),
            ));
        }
        Ok(())
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn backend(&self) -> BackendApi {
        self.shared.api()
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn max_texture_size(&self) -> u32 {
        self.shared.caps().max_texture_size
    }

    pub fn supports_protected_content(&self) -> bool {
        self.shared.caps().supports_protected_content
    }

    /// Once true, stays true.
    pub fn is_device_lost(&self) -> bool {
        let _guard = self.single_owner.enter();
        self.shared.is_device_lost()
    }

    /// Fails only once recorder ids are exhausted.
    pub fn make_recorder(&self, options: RecorderOptions) -> Result<Recorder> {
        let _guard = self.single_owner.enter();
        Recorder::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.resources),
            self.context_id,
            options,
        )
    }

    /// Queue a recording for the next submit.
    ///
    /// A recording from another device connection, or any recording after
    /// device loss, is rejected: its finished callback runs with
    /// [`CallbackResult::Failed`](crate::CallbackResult::Failed) and nothing
    /// is queued.
    pub fn insert_recording(&mut self, info: InsertRecordingInfo) -> Result<()> {
        let _guard = self.single_owner.enter();
        let device_id = info.recording.device_id();
        if device_id != self.shared.device_id() {
            warn!(context = %self.context_id, recording_device = %device_id, "rejected foreign recording");
            info.fail();
            return Err(TesselError::ForeignDevice(format!(
                "recording from {device_id} inserted into {}",
                self.context_id
            )));
        }
        if self.shared.is_device_lost() {
            info.fail();
            return Err(TesselError::DeviceLost);
        }
        debug!(
            context = %self.context_id,
            recorder = info.recording.recorder_id().raw(),
            tasks = info.recording.task_count(),
            "inserted recording"
        );
        self.queue.add_recording(info);
        Ok(())
    }

    /// Hand all inserted work to the device.
    pub fn submit(&mut self, sync: SyncToCpu) -> Result<()> {
        let _guard = self.single_owner.enter();
        if self.shared.is_device_lost() {
            self.fail_all_work(&TesselError::DeviceLost);
            return Err(TesselError::DeviceLost);
        }
        if let Err(err) = self.queue.submit_to_gpu() {
            if self.shared.is_device_lost() {
                self.fail_all_work(&TesselError::DeviceLost);
            }
            return Err(err);
        }
        if sync == SyncToCpu::Yes {
            self.process_completions(true);
        }
        Ok(())
    }

    /// Whether submitted work has not been observed finished yet.
    pub fn has_unfinished_gpu_work(&self) -> bool {
        let _guard = self.single_owner.enter();
        self.queue.has_unfinished_work()
    }

    /// Poll the device without blocking and deliver everything that is due.
    pub fn check_async_work_completion(&mut self) {
        let _guard = self.single_owner.enter();
        self.process_completions(false);
    }

    pub(crate) fn process_completions(&mut self, sync: bool) {
        if self.shared.is_device_lost() {
            self.fail_all_work(&TesselError::DeviceLost);
            return;
        }
        let completed = match self.queue.check_for_finished_work(sync) {
            Ok(completed) => completed,
            Err(err) => {
                if self.shared.is_device_lost() {
                    self.fail_all_work(&TesselError::DeviceLost);
                    return;
                }
                warn!(error = %err, "checking for finished work failed");
                self.queue.completed()
            }
        };
        let backend = Arc::clone(self.shared.backend());
        self.mapped_buffers.process(&*backend, completed, sync);
    }

    pub(crate) fn fail_all_work(&mut self, err: &TesselError) {
        self.queue.fail_all();
        self.mapped_buffers.fail_all(err);
    }

    /// Destroy a client-owned texture and invalidate the handle.
    ///
    /// Invalid handles and handles from another backend or device are ignored.
    pub fn delete_backend_texture(&mut self, texture: &mut BackendTexture) {
        let _guard = self.single_owner.enter();
        let Some(id) = texture.texture_id() else {
            return;
        };
        if texture.api() != self.shared.api() || texture.device_id() != self.shared.device_id() {
            debug!(context = %self.context_id, "ignoring foreign backend texture");
            return;
        }
        self.shared.backend().destroy_texture(id);
        texture.invalidate();
    }

    /// Release every cached resource that nothing references.
    pub fn free_gpu_resources(&mut self) {
        let _guard = self.single_owner.enter();
        let freed = self.resources.lock().purge_unlocked_resources();
        debug!(context = %self.context_id, freed, "freed GPU resources");
    }

    /// Release unreferenced resources not used within the last `not_used_within`.
    pub fn perform_deferred_cleanup(&mut self, not_used_within: Duration) {
        let _guard = self.single_owner.enter();
        let Some(cutoff) = Instant::now().checked_sub(not_used_within) else {
            return;
        };
        self.resources.lock().purge_resources_not_used_since(cutoff);
    }

    pub fn current_budgeted_bytes(&self) -> usize {
        let _guard = self.single_owner.enter();
        self.resources.lock().budgeted_bytes()
    }

    pub fn max_budgeted_bytes(&self) -> usize {
        let _guard = self.single_owner.enter();
        self.resources.lock().max_bytes()
    }

    /// Report cached resources to `dump` without changing anything.
    pub fn dump_memory_statistics(&self, dump: &mut dyn MemoryDump) {
        let _guard = self.single_owner.enter();
        self.resources.lock().dump(dump);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let _guard = self.single_owner.enter();
        if !self.shared.is_device_lost() {
            if let Err(err) = self.queue.submit_to_gpu() {
                warn!(error = %err, "final submit failed");
            }
            if self.queue.has_unfinished_work() || self.mapped_buffers.has_pending() {
                self.process_completions(true);
            }
        }
        // Whatever could not complete still gets its one callback.
        self.fail_all_work(&TesselError::Gpu(
            "context destroyed before work completed".to_string(),
        ));
        info!(context = %self.context_id, "context destroyed");
    }
}
