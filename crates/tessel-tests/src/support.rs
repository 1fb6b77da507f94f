//! Shared fixtures for the integration tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tessel_core::ImageInfo;
use tessel_gpu::{CallbackResult, Context, ContextOptions, HeadlessBackend, HeadlessOptions};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn headless(options: HeadlessOptions) -> (Arc<HeadlessBackend>, Context) {
    init_tracing();
    let backend = Arc::new(HeadlessBackend::new(options));
    let context = Context::make(backend.clone(), ContextOptions::default()).unwrap();
    (backend, context)
}

pub fn headless_with_latency(completion_latency: u32) -> (Arc<HeadlessBackend>, Context) {
    headless(HeadlessOptions {
        completion_latency,
        ..Default::default()
    })
}

/// Records every invocation of a finished callback.
#[derive(Clone, Default)]
pub struct FinishedLog(Arc<Mutex<Vec<CallbackResult>>>);

impl FinishedLog {
    pub fn proc(&self) -> impl FnOnce(CallbackResult) + Send + 'static {
        let log = self.0.clone();
        move |result| log.lock().push(result)
    }

    pub fn results(&self) -> Vec<CallbackResult> {
        self.0.lock().clone()
    }
}

pub fn rgba_premul(width: u32, height: u32) -> ImageInfo {
    ImageInfo::rgba8_premul(width, height)
}

/// Tightly packed RGBA pixels with a distinct value in every byte.
pub fn gradient_pixels(width: u32, height: u32) -> Vec<u8> {
    (0..width * height * 4).map(|i| (i * 7 % 251) as u8).collect()
}
