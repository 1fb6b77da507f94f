//! Integration tests for resource budgeting and memory diagnostics.

use std::sync::Arc;
use std::time::Duration;

use tessel_core::Color;
use tessel_gpu::{
    Context, ContextOptions, HeadlessBackend, HeadlessOptions, MemoryDumpEntry, RecorderOptions, SyncToCpu,
};

use crate::support::{headless, headless_with_latency, init_tracing, rgba_premul};

fn with_budget(gpu_budget_bytes: usize) -> (Arc<HeadlessBackend>, Context) {
    init_tracing();
    let backend = Arc::new(HeadlessBackend::new(HeadlessOptions::default()));
    let options = ContextOptions {
        gpu_budget_bytes,
        ..Default::default()
    };
    let context = Context::make(backend.clone(), options).unwrap();
    (backend, context)
}

#[test]
fn free_keeps_resources_used_by_unfinished_work() {
    let (backend, mut context) = headless_with_latency(100);
    {
        let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
        let surface = recorder.make_surface(rgba_premul(16, 16)).unwrap();
        recorder.clear(&surface, Color::WHITE).unwrap();
        context.insert_recording(recorder.snap().into()).unwrap();
    }
    context.submit(SyncToCpu::No).unwrap();
    assert!(context.has_unfinished_gpu_work());

    context.free_gpu_resources();
    assert_eq!(context.current_budgeted_bytes(), 16 * 16 * 4);
    assert_eq!(backend.live_texture_count(), 1);

    context.submit(SyncToCpu::Yes).unwrap();
    context.free_gpu_resources();
    assert_eq!(context.current_budgeted_bytes(), 0);
    assert_eq!(backend.live_texture_count(), 0);
}

#[test]
fn free_keeps_resources_the_client_holds() {
    let (_backend, mut context) = headless(HeadlessOptions::default());
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(8, 8)).unwrap();

    context.free_gpu_resources();
    assert_eq!(context.current_budgeted_bytes(), 8 * 8 * 4);

    drop(surface);
    context.free_gpu_resources();
    assert_eq!(context.current_budgeted_bytes(), 0);
}

#[test]
fn released_textures_are_reused() {
    let (backend, context) = headless(HeadlessOptions::default());
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let first = recorder.make_surface(rgba_premul(32, 32)).unwrap();
    let first_id = first.texture_id();
    drop(first);

    let second = recorder.make_surface(rgba_premul(32, 32)).unwrap();
    assert_eq!(second.texture_id(), first_id);
    assert_eq!(backend.live_texture_count(), 1);
    assert_eq!(context.current_budgeted_bytes(), 32 * 32 * 4);
}

#[test]
fn cache_stays_within_budget_when_resources_are_free() {
    let budget = 4096;
    let (backend, context) = with_budget(budget);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    for size in [16, 20, 24, 28] {
        let surface = recorder.make_surface(rgba_premul(size, size)).unwrap();
        drop(surface);
    }
    // older free textures were purged to make room for the last one
    assert_eq!(context.current_budgeted_bytes(), 28 * 28 * 4);
    assert_eq!(backend.live_texture_count(), 1);
    assert_eq!(context.max_budgeted_bytes(), budget);
}

#[test]
fn locked_resources_may_exceed_budget() {
    let (_backend, context) = with_budget(1024);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let held: Vec<_> = (0..3)
        .map(|_| recorder.make_surface(rgba_premul(16, 16)).unwrap())
        .collect();
    assert_eq!(context.current_budgeted_bytes(), 3 * 1024);
    drop(held);
}

#[test]
fn deferred_cleanup_respects_age() {
    let (_backend, mut context) = headless(HeadlessOptions::default());
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    drop(recorder.make_surface(rgba_premul(8, 8)).unwrap());

    context.perform_deferred_cleanup(Duration::from_secs(3600));
    assert_eq!(context.current_budgeted_bytes(), 256, "recently used resources stay");

    std::thread::sleep(Duration::from_millis(5));
    context.perform_deferred_cleanup(Duration::from_millis(1));
    assert_eq!(context.current_budgeted_bytes(), 0);
}

#[test]
fn memory_dump_reports_every_cached_resource() {
    let (_backend, context) = headless(HeadlessOptions::default());
    let mut recorder = context
        .make_recorder(RecorderOptions {
            label: Some("thumbs".to_string()),
        })
        .unwrap();
    let _a = recorder.make_surface(rgba_premul(8, 8)).unwrap();
    let _b = recorder.make_surface(rgba_premul(4, 4)).unwrap();

    let mut entries: Vec<MemoryDumpEntry> = Vec::new();
    context.dump_memory_statistics(&mut entries);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.name == "tessel/gpu_resources/thumbs"));
    assert!(entries.iter().all(|e| e.backing_id.starts_with("texture:")));
    let total: usize = entries.iter().map(|e| e.bytes).sum();
    assert_eq!(total, context.current_budgeted_bytes());

    // diagnostics never change the cache
    assert_eq!(context.current_budgeted_bytes(), 8 * 8 * 4 + 4 * 4 * 4);
}

#[test]
fn readback_buffers_are_budgeted_and_freed() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(4, 4);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let image = recorder
        .make_image_from_pixels(info, &[0u8; 64], info.min_row_bytes())
        .unwrap();
    context.insert_recording(recorder.snap().into()).unwrap();

    context.async_rescale_and_read_pixels(
        &image,
        info,
        info.bounds(),
        tessel_gpu::RescaleGamma::Src,
        tessel_gpu::RescaleMode::Nearest,
        |_result: tessel_core::Result<tessel_gpu::AsyncReadResult<'_>>| {},
    );
    // image texture plus transfer buffer
    assert_eq!(context.current_budgeted_bytes(), 64 + 64);

    context.submit(SyncToCpu::Yes).unwrap();
    drop(image);
    context.free_gpu_resources();
    assert_eq!(context.current_budgeted_bytes(), 0);
}
