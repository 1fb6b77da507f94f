//! Integration tests for context lifecycle, recording and submission.

use std::collections::HashSet;
use std::sync::Arc;

use tessel_core::{Color, ColorType, TesselError};
use tessel_gpu::{
    CallbackResult, Context, ContextOptions, HeadlessBackend, HeadlessOptions, InsertRecordingInfo,
    RecorderOptions, SyncToCpu, TextureInfo,
};

use crate::support::{headless, headless_with_latency, init_tracing, rgba_premul, FinishedLog};

/// Record one clear and insert it with `log` attached.
fn insert_clear(context: &mut Context, log: &FinishedLog) {
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(8, 8)).unwrap();
    recorder.clear(&surface, Color::RED).unwrap();
    let info = InsertRecordingInfo::new(recorder.snap()).with_finished_proc(log.proc());
    context.insert_recording(info).unwrap();
}

// ── Construction ───────────────────────────────────────────────

#[test]
fn context_ids_are_unique_and_valid() {
    let (_a, first) = headless(HeadlessOptions::default());
    let (_b, second) = headless(HeadlessOptions::default());
    let dropped_id = {
        let (_c, third) = headless(HeadlessOptions::default());
        third.context_id()
    };
    let (_d, fourth) = headless(HeadlessOptions::default());

    let ids = [first.context_id(), second.context_id(), dropped_id, fourth.context_id()];
    assert!(ids.iter().all(|id| id.is_valid()));
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len(), "ids must never be reused");
}

#[test]
fn make_fails_when_backend_initialization_fails() {
    init_tracing();
    let backend = Arc::new(HeadlessBackend::new(HeadlessOptions {
        fail_initialization: true,
        ..Default::default()
    }));
    let result = Context::make(backend, ContextOptions::default());
    assert!(matches!(result, Err(TesselError::Initialization(_))));
}

#[test]
fn make_rejects_zero_budget() {
    init_tracing();
    let backend = Arc::new(HeadlessBackend::new(HeadlessOptions::default()));
    let options = ContextOptions {
        gpu_budget_bytes: 0,
        ..Default::default()
    };
    assert!(matches!(
        Context::make(backend, options),
        Err(TesselError::Config(_))
    ));
}

#[test]
fn options_load_from_json() {
    init_tracing();
    let options = ContextOptions::from_json(r#"{"gpu_budget_bytes": 65536, "label": "thumbnails"}"#).unwrap();
    let backend = Arc::new(HeadlessBackend::new(HeadlessOptions::default()));
    let context = Context::make(backend, options).unwrap();
    assert_eq!(context.max_budgeted_bytes(), 65536);
    assert_eq!(context.options().label.as_deref(), Some("thumbnails"));
}

#[test]
fn caps_are_reported_from_backend() {
    let caps = tessel_gpu::Caps {
        max_texture_size: 512,
        supports_protected_content: true,
        ..Default::default()
    };
    let (_backend, context) = headless(HeadlessOptions {
        caps,
        ..Default::default()
    });
    assert_eq!(context.max_texture_size(), 512);
    assert!(context.supports_protected_content());
    assert_eq!(context.backend(), tessel_gpu::BackendApi::Headless);
}

// ── Recording & submission ─────────────────────────────────────

#[test]
fn foreign_recording_is_rejected_without_side_effects() {
    let (_backend_a, mut context_a) = headless(HeadlessOptions::default());
    let (backend_b, mut context_b) = headless(HeadlessOptions::default());

    let mut recorder = context_a.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(4, 4)).unwrap();
    recorder.clear(&surface, Color::BLUE).unwrap();
    let log = FinishedLog::default();
    let info = InsertRecordingInfo::new(recorder.snap()).with_finished_proc(log.proc());

    let result = context_b.insert_recording(info);
    assert!(matches!(result, Err(TesselError::ForeignDevice(_))));
    assert_eq!(log.results(), vec![CallbackResult::Failed]);

    context_b.submit(SyncToCpu::No).unwrap();
    assert!(!context_b.has_unfinished_gpu_work());
    assert_eq!(backend_b.submission_count(), 0, "nothing was queued");

    // the recording's own context is unaffected
    context_a.submit(SyncToCpu::Yes).unwrap();
}

#[test]
fn blocking_submit_finishes_all_work() {
    let (_backend, mut context) = headless_with_latency(100);
    let log = FinishedLog::default();
    insert_clear(&mut context, &log);

    context.submit(SyncToCpu::Yes).unwrap();
    assert!(!context.has_unfinished_gpu_work());
    assert_eq!(log.results(), vec![CallbackResult::Success]);
}

#[test]
fn polling_eventually_finishes_work() {
    let (_backend, mut context) = headless_with_latency(3);
    let log = FinishedLog::default();
    insert_clear(&mut context, &log);

    context.submit(SyncToCpu::No).unwrap();
    assert!(context.has_unfinished_gpu_work());
    assert!(log.results().is_empty(), "callbacks only run during polls");

    let mut polls = 0;
    while context.has_unfinished_gpu_work() {
        context.check_async_work_completion();
        polls += 1;
        assert!(polls <= 10, "work never finished");
    }
    assert_eq!(polls, 3);
    assert_eq!(log.results(), vec![CallbackResult::Success]);
}

#[test]
fn polling_with_nothing_new_is_a_no_op() {
    let (backend, mut context) = headless_with_latency(1);
    let log = FinishedLog::default();
    insert_clear(&mut context, &log);
    context.submit(SyncToCpu::No).unwrap();
    context.check_async_work_completion();
    assert_eq!(log.results().len(), 1);

    for _ in 0..5 {
        context.check_async_work_completion();
    }
    assert_eq!(log.results().len(), 1);
    assert_eq!(backend.submission_count(), 1);
    assert!(!context.has_unfinished_gpu_work());
}

#[test]
fn never_polling_leaves_work_unfinished() {
    let (_backend, mut context) = headless_with_latency(1);
    let log = FinishedLog::default();
    insert_clear(&mut context, &log);
    context.submit(SyncToCpu::No).unwrap();

    for _ in 0..3 {
        assert!(context.has_unfinished_gpu_work());
    }
    assert!(log.results().is_empty());
}

#[test]
fn empty_submit_is_harmless() {
    let (backend, mut context) = headless_with_latency(1);
    context.submit(SyncToCpu::No).unwrap();
    context.submit(SyncToCpu::Yes).unwrap();
    assert!(!context.has_unfinished_gpu_work());
    assert_eq!(backend.submission_count(), 0);
}

#[test]
fn submitted_draws_reach_the_device() {
    let (backend, mut context) = headless_with_latency(1);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(2, 2)).unwrap();
    recorder.clear(&surface, Color::GREEN).unwrap();
    context.insert_recording(recorder.snap().into()).unwrap();
    context.submit(SyncToCpu::Yes).unwrap();

    let pixels = backend.texture_pixels(surface.texture_id()).unwrap();
    assert_eq!(pixels, [0, 255, 0, 255].repeat(4));
}

#[test]
fn recordings_execute_in_insertion_order() {
    let (backend, mut context) = headless_with_latency(1);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(1, 1)).unwrap();

    recorder.clear(&surface, Color::RED).unwrap();
    let first = recorder.snap();
    recorder.clear(&surface, Color::BLUE).unwrap();
    let second = recorder.snap();

    context.insert_recording(first.into()).unwrap();
    context.insert_recording(second.into()).unwrap();
    context.submit(SyncToCpu::Yes).unwrap();

    assert_eq!(backend.texture_pixels(surface.texture_id()).unwrap(), vec![0, 0, 255, 255]);
}

// ── Device loss ────────────────────────────────────────────────

#[test]
fn device_loss_is_sticky() {
    let (backend, mut context) = headless_with_latency(1);
    backend.lose_device();

    for _ in 0..3 {
        assert_eq!(context.submit(SyncToCpu::No), Err(TesselError::DeviceLost));
        assert_eq!(context.submit(SyncToCpu::Yes), Err(TesselError::DeviceLost));
        assert!(context.is_device_lost());
    }

    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    assert!(recorder.make_surface(rgba_premul(4, 4)).is_err());

    let log = FinishedLog::default();
    let info = InsertRecordingInfo::new(recorder.snap()).with_finished_proc(log.proc());
    assert_eq!(context.insert_recording(info), Err(TesselError::DeviceLost));
    assert_eq!(log.results(), vec![CallbackResult::Failed]);
}

#[test]
fn device_loss_fails_in_flight_callbacks() {
    let (backend, mut context) = headless_with_latency(5);
    let log = FinishedLog::default();
    insert_clear(&mut context, &log);
    context.submit(SyncToCpu::No).unwrap();

    backend.lose_device();
    context.check_async_work_completion();
    assert_eq!(log.results(), vec![CallbackResult::Failed]);
    assert!(!context.has_unfinished_gpu_work());

    // already reported
    context.check_async_work_completion();
    assert_eq!(log.results().len(), 1);
}

// ── Teardown ───────────────────────────────────────────────────

#[test]
fn dropping_the_context_fires_pending_callbacks() {
    let (_backend, mut context) = headless_with_latency(50);
    let submitted = FinishedLog::default();
    insert_clear(&mut context, &submitted);
    context.submit(SyncToCpu::No).unwrap();

    let unsubmitted = FinishedLog::default();
    insert_clear(&mut context, &unsubmitted);

    drop(context);
    assert_eq!(submitted.results(), vec![CallbackResult::Success]);
    assert_eq!(unsubmitted.results(), vec![CallbackResult::Success]);
}

#[test]
fn dropping_a_lost_context_fails_pending_callbacks() {
    let (backend, mut context) = headless_with_latency(50);
    let log = FinishedLog::default();
    insert_clear(&mut context, &log);
    context.submit(SyncToCpu::No).unwrap();
    backend.lose_device();

    drop(context);
    assert_eq!(log.results(), vec![CallbackResult::Failed]);
}

// ── Backend textures ───────────────────────────────────────────

#[test]
fn backend_textures_are_deleted_once() {
    let (backend, mut context) = headless(HeadlessOptions::default());
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let mut texture = recorder
        .create_backend_texture(TextureInfo::new(16, 16, ColorType::Rgba8888))
        .unwrap();
    assert!(texture.is_valid());
    assert_eq!(backend.live_texture_count(), 1);
    assert_eq!(context.current_budgeted_bytes(), 0, "backend textures are unbudgeted");

    context.delete_backend_texture(&mut texture);
    assert!(!texture.is_valid());
    assert_eq!(backend.live_texture_count(), 0);

    // deleting an invalid handle does nothing
    context.delete_backend_texture(&mut texture);
    assert!(!texture.is_valid());
}

#[test]
fn foreign_backend_textures_are_ignored() {
    let (backend_a, context_a) = headless(HeadlessOptions::default());
    let (_backend_b, mut context_b) = headless(HeadlessOptions::default());
    let mut recorder = context_a.make_recorder(RecorderOptions::default()).unwrap();
    let mut texture = recorder
        .create_backend_texture(TextureInfo::new(4, 4, ColorType::Rgba8888))
        .unwrap();

    context_b.delete_backend_texture(&mut texture);
    assert!(texture.is_valid());
    assert_eq!(backend_a.live_texture_count(), 1);
}
