//! Integration tests for the asynchronous readback pipeline.

use std::sync::Arc;

use parking_lot::Mutex;
use tessel_core::{AlphaType, Color, ColorSpace, ColorType, IRect, ISize, ImageInfo, TesselError, YuvColorSpace};
use tessel_gpu::{
    AsyncReadResult, Caps, Context, HeadlessOptions, Image, RecorderOptions, RescaleGamma, RescaleMode,
};

use crate::support::{gradient_pixels, headless, headless_with_latency, rgba_premul};

// ── Helpers ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Plane {
    data: Vec<u8>,
    row_bytes: usize,
    size: ISize,
}

impl Plane {
    /// Pixel rows without stride padding.
    fn rows(&self, bytes_per_pixel: usize) -> Vec<u8> {
        let row_len = self.size.width as usize * bytes_per_pixel;
        self.data
            .chunks(self.row_bytes)
            .take(self.size.height as usize)
            .flat_map(|row| row[..row_len].to_vec())
            .collect()
    }
}

type ReadOutcome = Result<Vec<Plane>, TesselError>;

/// Records every readback callback invocation as owned planes.
#[derive(Clone, Default)]
struct ReadLog(Arc<Mutex<Vec<ReadOutcome>>>);

impl ReadLog {
    fn callback(&self) -> impl for<'a> FnOnce(tessel_core::Result<AsyncReadResult<'a>>) + Send + 'static {
        let log = self.0.clone();
        move |result: tessel_core::Result<AsyncReadResult<'_>>| {
            let outcome = result.map(|read| {
                read.planes()
                    .iter()
                    .map(|plane| Plane {
                        data: plane.data().to_vec(),
                        row_bytes: plane.row_bytes(),
                        size: plane.size(),
                    })
                    .collect()
            });
            log.lock().push(outcome);
        }
    }

    fn outcomes(&self) -> Vec<ReadOutcome> {
        self.0.lock().clone()
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// The single successful result.
    fn planes(&self) -> Vec<Plane> {
        let outcomes = self.outcomes();
        assert_eq!(outcomes.len(), 1, "callback must run exactly once");
        outcomes[0].clone().unwrap()
    }
}

fn upload(context: &mut Context, info: ImageInfo, pixels: &[u8]) -> Image {
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let image = recorder
        .make_image_from_pixels(info, pixels, info.min_row_bytes())
        .unwrap();
    context.insert_recording(recorder.snap().into()).unwrap();
    image
}

fn solid(info: ImageInfo, pixel: [u8; 4]) -> Vec<u8> {
    pixel.repeat(info.width as usize * info.height as usize)
}

fn poll_until_delivered(context: &mut Context, log: &ReadLog) {
    for _ in 0..10 {
        if log.len() > 0 {
            return;
        }
        context.check_async_work_completion();
    }
    panic!("readback was never delivered");
}

fn assert_close(actual: &[u8], expected: &[u8]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (*a as i32 - *e as i32).abs() <= 1,
            "byte {i}: got {a}, expected {e}"
        );
    }
}

// ── RGBA readback ──────────────────────────────────────────────

#[test]
fn plain_readback_returns_source_layout() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(4, 4);
    let pixels = gradient_pixels(4, 4);
    let image = upload(&mut context, info, &pixels);

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info,
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    assert_eq!(log.len(), 0, "delivery waits for a poll");
    assert!(context.has_unfinished_gpu_work());

    poll_until_delivered(&mut context, &log);
    let planes = log.planes();
    assert_eq!(planes.len(), 1);
    assert_eq!(planes[0].size, ISize::new(4, 4));
    assert_eq!(planes[0].row_bytes, 16);
    assert_eq!(planes[0].data, pixels);
    assert!(!context.has_unfinished_gpu_work());
}

#[test]
fn subrect_readback_uses_aligned_rows() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(4, 4);
    let pixels = gradient_pixels(4, 4);
    let image = upload(&mut context, info, &pixels);

    let log = ReadLog::default();
    let rect = IRect::new(1, 1, 2, 2);
    context.async_rescale_and_read_pixels(
        &image,
        rgba_premul(2, 2),
        rect,
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);

    let plane = &log.planes()[0];
    assert_eq!(plane.row_bytes, 8);
    let expected: Vec<u8> = (1..3)
        .flat_map(|y| pixels[y * 16 + 4..y * 16 + 12].to_vec())
        .collect();
    assert_eq!(plane.rows(4), expected);
}

#[test]
fn readback_converts_color_type() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(3, 2);
    let pixels = gradient_pixels(3, 2);
    let image = upload(&mut context, info, &pixels);

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info.with_color_type(ColorType::Bgra8888),
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);

    let plane = &log.planes()[0];
    assert_eq!(plane.row_bytes, 12);
    let expected: Vec<u8> = pixels
        .chunks(4)
        .flat_map(|px| [px[2], px[1], px[0], px[3]])
        .collect();
    assert_eq!(plane.data, expected);
}

#[test]
fn downscaled_readback_of_solid_color() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(8, 8);
    let image = upload(&mut context, info, &solid(info, [60, 120, 180, 255]));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        rgba_premul(2, 2),
        info.bounds(),
        RescaleGamma::Linear,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);

    let plane = &log.planes()[0];
    assert_eq!(plane.size, ISize::new(2, 2));
    assert_close(&plane.rows(4), &[60, 120, 180, 255].repeat(4));
}

#[test]
fn readback_to_unpremul() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(2, 2);
    let image = upload(&mut context, info, &solid(info, [64, 32, 0, 128]));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info.with_alpha_type(AlphaType::Unpremul),
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);
    assert_close(&log.planes()[0].rows(4), &[128, 64, 0, 128].repeat(4));
}

#[test]
fn readback_from_surface() {
    let (_backend, mut context) = headless_with_latency(1);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(4, 2)).unwrap();
    recorder.clear(&surface, Color::BLUE).unwrap();
    context.insert_recording(recorder.snap().into()).unwrap();

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &surface,
        rgba_premul(4, 2),
        IRect::new(0, 0, 4, 2),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);
    assert_eq!(log.planes()[0].data, [0, 0, 255, 255].repeat(8));
}

#[test]
fn readback_from_surface_as_image() {
    let (_backend, mut context) = headless_with_latency(1);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(2, 2)).unwrap();
    recorder.clear(&surface, Color::RED).unwrap();
    context.insert_recording(recorder.snap().into()).unwrap();

    let image = surface.as_image();
    assert_eq!(image.texture_id(), surface.texture_id());
    assert_eq!(image.info(), surface.info());

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        rgba_premul(2, 2),
        image.info().bounds(),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);
    assert_eq!(log.planes()[0].data, [255, 0, 0, 255].repeat(4));
}

// ── Caller-supplied recorder ───────────────────────────────────

#[test]
fn caller_recorder_work_is_submitted_with_readback() {
    let (_backend, mut context) = headless_with_latency(1);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(4, 2)).unwrap();
    recorder.clear(&surface, Color::GREEN).unwrap();

    // the clear is still pending in the recorder, never inserted by hand
    let log = ReadLog::default();
    context.async_rescale_and_read_pixels_with_recorder(
        &mut recorder,
        &surface,
        rgba_premul(4, 2),
        surface.info().bounds(),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    assert_eq!(recorder.pending_task_count(), 0);

    poll_until_delivered(&mut context, &log);
    assert_eq!(log.planes()[0].data, [0, 255, 0, 255].repeat(8));
}

#[test]
fn caller_recorder_records_rescale_draws() {
    let (_backend, mut context) = headless_with_latency(1);
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(8, 8)).unwrap();
    recorder.clear(&surface, Color::BLUE).unwrap();

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels_with_recorder(
        &mut recorder,
        &surface,
        rgba_premul(2, 2),
        surface.info().bounds(),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);

    let plane = &log.planes()[0];
    assert_eq!(plane.size, ISize::new(2, 2));
    assert_close(&plane.rows(4), &[0, 0, 255, 255].repeat(4));
}

#[test]
fn failed_readback_leaves_caller_recorder_untouched() {
    let caps = Caps {
        max_buffer_size: 16,
        ..Default::default()
    };
    let (_backend, mut context) = headless(HeadlessOptions {
        caps,
        ..Default::default()
    });
    let mut recorder = context.make_recorder(RecorderOptions::default()).unwrap();
    let surface = recorder.make_surface(rgba_premul(8, 8)).unwrap();
    recorder.clear(&surface, Color::WHITE).unwrap();

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels_with_recorder(
        &mut recorder,
        &surface,
        rgba_premul(4, 4),
        surface.info().bounds(),
        RescaleGamma::Src,
        RescaleMode::Linear,
        log.callback(),
    );
    let outcomes = log.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Err(TesselError::Readback(_))));
    assert_eq!(recorder.pending_task_count(), 1, "only the caller's clear remains");
    assert!(!context.has_unfinished_gpu_work());
}

#[test]
fn foreign_recorder_is_rejected() {
    let (_backend_a, mut context_a) = headless_with_latency(1);
    let (_backend_b, context_b) = headless_with_latency(1);
    let info = rgba_premul(2, 2);
    let image = upload(&mut context_a, info, &solid(info, [1, 2, 3, 255]));
    let mut foreign = context_b.make_recorder(RecorderOptions::default()).unwrap();

    let log = ReadLog::default();
    context_a.async_rescale_and_read_pixels_with_recorder(
        &mut foreign,
        &image,
        info,
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    let outcomes = log.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Err(TesselError::ForeignDevice(_))));
    assert_eq!(foreign.pending_task_count(), 0);
}

// ── Intermediate color type ────────────────────────────────────

#[test]
fn rescale_falls_back_to_rgba_intermediate() {
    let (_backend, mut context) = headless(HeadlessOptions {
        caps: Caps {
            renderable_color_types: vec![ColorType::Rgba8888],
            ..Default::default()
        },
        completion_latency: 1,
        ..Default::default()
    });
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &solid(info, [60, 120, 180, 255]));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        rgba_premul(2, 2).with_color_type(ColorType::Bgra8888),
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);
    assert_eq!(log.planes()[0].rows(4), [180, 120, 60, 255].repeat(4));
}

#[test]
fn rescale_without_renderable_readable_type_fails_synchronously() {
    let (_backend, mut context) = headless(HeadlessOptions {
        caps: Caps {
            renderable_color_types: vec![ColorType::Alpha8],
            readable_color_types: vec![ColorType::Rgba8888, ColorType::Bgra8888],
            ..Default::default()
        },
        completion_latency: 1,
        ..Default::default()
    });
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &solid(info, [60, 120, 180, 255]));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        rgba_premul(2, 2).with_color_type(ColorType::Bgra8888),
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    let outcomes = log.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Err(TesselError::Unsupported(_))));
}

// ── YUV readback ───────────────────────────────────────────────

#[test]
fn yuv420_readback_has_three_planes() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(5, 3);
    let image = upload(&mut context, info, &solid(info, [255, 255, 255, 255]));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels_yuv420(
        &image,
        YuvColorSpace::Jpeg,
        ColorSpace::Srgb,
        info.bounds(),
        ISize::new(5, 3),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);

    let planes = log.planes();
    assert_eq!(planes.len(), 3);
    let sizes: Vec<ISize> = planes.iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![ISize::new(5, 3), ISize::new(3, 2), ISize::new(3, 2)]);
    for plane in &planes {
        assert!(plane.row_bytes >= plane.size.width as usize);
        assert!(plane.data.len() >= plane.row_bytes * plane.size.height as usize);
    }
    assert_close(&planes[0].rows(1), &[255; 15]);
    assert_close(&planes[1].rows(1), &[128; 6]);
    assert_close(&planes[2].rows(1), &[128; 6]);
}

#[test]
fn yuva420_readback_has_alpha_plane() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &solid(info, [64, 64, 64, 128]));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels_yuva420(
        &image,
        YuvColorSpace::Rec709,
        ColorSpace::Srgb,
        info.bounds(),
        ISize::new(4, 4),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);

    let planes = log.planes();
    assert_eq!(planes.len(), 4);
    assert_eq!(planes[3].size, ISize::new(4, 4));
    assert_close(&planes[3].rows(1), &[128; 16]);
}

#[test]
fn yuv420_readback_rescales_first() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(8, 8);
    let image = upload(&mut context, info, &gradient_pixels(8, 8));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels_yuv420(
        &image,
        YuvColorSpace::Rec601,
        ColorSpace::DisplayP3,
        info.bounds(),
        ISize::new(4, 2),
        RescaleGamma::Linear,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);

    let sizes: Vec<ISize> = log.planes().iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![ISize::new(4, 2), ISize::new(2, 1), ISize::new(2, 1)]);
}

// ── Failures ───────────────────────────────────────────────────

#[test]
fn missing_transfer_buffer_fails_once() {
    let caps = Caps {
        max_buffer_size: 16,
        ..Default::default()
    };
    let (_backend, mut context) = headless(HeadlessOptions {
        caps,
        ..Default::default()
    });
    let info = rgba_premul(8, 8);
    let image = upload(&mut context, info, &gradient_pixels(8, 8));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels_yuv420(
        &image,
        YuvColorSpace::Jpeg,
        ColorSpace::Srgb,
        info.bounds(),
        ISize::new(8, 8),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        log.callback(),
    );
    let outcomes = log.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Err(TesselError::Readback(_))));

    context.submit(tessel_gpu::SyncToCpu::Yes).unwrap();
    context.check_async_work_completion();
    assert_eq!(log.len(), 1, "no second callback");
}

#[test]
fn invalid_requests_fail_synchronously() {
    let (_backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &gradient_pixels(4, 4));

    let outside = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info,
        IRect::new(2, 2, 4, 4),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        outside.callback(),
    );
    assert!(matches!(outside.outcomes()[..], [Err(TesselError::InvalidArgument(_))]));

    let empty_dst = ReadLog::default();
    context.async_rescale_and_read_pixels_yuv420(
        &image,
        YuvColorSpace::Jpeg,
        ColorSpace::Srgb,
        info.bounds(),
        ISize::new(0, 4),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        empty_dst.callback(),
    );
    assert!(matches!(empty_dst.outcomes()[..], [Err(TesselError::InvalidArgument(_))]));

    let (_other_backend, mut other) = headless_with_latency(1);
    let foreign = ReadLog::default();
    other.async_rescale_and_read_pixels(
        &image,
        info,
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        foreign.callback(),
    );
    assert!(matches!(foreign.outcomes()[..], [Err(TesselError::ForeignDevice(_))]));
}

#[test]
fn readback_after_device_loss_fails() {
    let (backend, mut context) = headless_with_latency(1);
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &gradient_pixels(4, 4));
    backend.lose_device();

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info,
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    assert_eq!(log.outcomes(), vec![Err(TesselError::DeviceLost)]);
}

#[test]
fn device_loss_fails_pending_readback() {
    let (backend, mut context) = headless_with_latency(5);
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &gradient_pixels(4, 4));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info,
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    backend.lose_device();
    context.check_async_work_completion();
    assert_eq!(log.outcomes(), vec![Err(TesselError::DeviceLost)]);

    context.check_async_work_completion();
    assert_eq!(log.len(), 1);
}

#[test]
fn map_failure_reaches_callback() {
    let (_backend, mut context) = headless(HeadlessOptions {
        fail_buffer_maps: true,
        ..Default::default()
    });
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &gradient_pixels(4, 4));

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info,
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    poll_until_delivered(&mut context, &log);
    assert!(matches!(log.outcomes()[..], [Err(TesselError::Readback(_))]));
}

// ── Lifecycle ──────────────────────────────────────────────────

#[test]
fn teardown_delivers_pending_readbacks() {
    let (_backend, mut context) = headless_with_latency(50);
    let info = rgba_premul(4, 4);
    let pixels = gradient_pixels(4, 4);
    let image = upload(&mut context, info, &pixels);

    let log = ReadLog::default();
    context.async_rescale_and_read_pixels(
        &image,
        info,
        info.bounds(),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        log.callback(),
    );
    drop(image);
    drop(context);
    assert_eq!(log.planes()[0].data, pixels);
}

#[test]
fn concurrent_readbacks_each_deliver_once() {
    let (_backend, mut context) = headless_with_latency(2);
    let info = rgba_premul(4, 4);
    let image = upload(&mut context, info, &gradient_pixels(4, 4));

    let logs: Vec<ReadLog> = (0..3).map(|_| ReadLog::default()).collect();
    for log in &logs {
        context.async_rescale_and_read_pixels(
            &image,
            rgba_premul(2, 2),
            info.bounds(),
            RescaleGamma::Src,
            RescaleMode::Linear,
            log.callback(),
        );
    }
    for _ in 0..5 {
        context.check_async_work_completion();
    }
    for log in &logs {
        assert_eq!(log.planes()[0].size, ISize::new(2, 2));
    }
}
