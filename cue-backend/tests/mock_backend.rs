#![cfg(feature = "mock-audio")]

use cue_backend::mock_backend::{as_mock, MockBackend};
use cue_backend::AudioBackend;

#[test]
fn enumerate_reports_one_default_device() {
    let backend = MockBackend::new();
    let devices = backend.enumerate_output_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert!(devices[0].is_default_device);
    assert_eq!(devices[0].max_output_channels, 2);
}

#[test]
fn format_support_rejects_too_many_channels() {
    let backend = MockBackend::new();
    assert!(backend.is_format_supported(0, 2, 48_000));
    assert!(!backend.is_format_supported(0, 8, 48_000));
    assert!(!backend.is_format_supported(1, 2, 48_000));
}

#[test]
fn open_stream_pump_invokes_render_closure() {
    let backend = MockBackend::new();
    let stream = backend
        .open_stream(
            0,
            2,
            48_000,
            std::sync::Arc::new(|bufs: &mut [&mut [f32]], _rate, frames| {
                for ch in bufs.iter_mut() {
                    for s in ch.iter_mut().take(frames) {
                        *s = 1.0;
                    }
                }
            }),
        )
        .unwrap();

    assert!(backend.is_active(&stream));
    let mock = as_mock(&stream).expect("mock stream handle");
    let rendered = mock.pump(128);
    assert_eq!(rendered.len(), 2);
    assert!(rendered[0].iter().all(|&s| s == 1.0));
    assert_eq!(mock.frames_rendered(), 128);

    backend.close_stream(stream).unwrap();
}

#[test]
fn close_stream_stops_activity() {
    let backend = MockBackend::new();
    let render: cue_backend::RenderFn = std::sync::Arc::new(|_, _, _| {});
    let stream = backend.open_stream(0, 2, 48_000, render).unwrap();
    assert!(backend.is_active(&stream));
    backend.close_stream(stream).unwrap();
}
