//! End-to-end seed scenarios driven through a `Session` over the mock
//! backend: one device, 2 channels, 1000 Hz (sample_length = 0.001 s),
//! 10-frame blocks.

use std::sync::Arc;

use cue_backend::mock_backend::MockBackend;
use cue_backend::AudioBackend;
use cue_core::envelope::{Asr, Envelope};
use cue_core::{Cue, Session};

const RATE: u32 = 1000;
const FRAMES: usize = 10;

struct ConstCue {
    value: f32,
    envelope: Asr,
}

impl ConstCue {
    fn new(value: f32, duration: f64) -> Arc<dyn Cue> {
        Arc::new(Self {
            value,
            envelope: Asr::new(0.0, duration, 0.0, 1.0),
        })
    }
}

impl Cue for ConstCue {
    fn sample(&self, _t: f64) -> f32 {
        self.value
    }

    fn envelope(&self) -> &dyn Envelope {
        &self.envelope
    }
}

fn open_session() -> Session {
    let backend: Arc<dyn AudioBackend> = Arc::new(MockBackend::new());
    let session = Session::new(backend).expect("session construction");
    let device = session.default_device();
    session.open(&device, 2, RATE).expect("open");
    session
}

#[test]
fn s1_silence_default() {
    let session = open_session();
    let out = session.pump_for_test(FRAMES).unwrap();
    assert_eq!(out[0], vec![0.0; FRAMES]);
    assert_eq!(out[1], vec![0.0; FRAMES]);
}

#[test]
fn s2_play_constant_cue() {
    let session = open_session();
    session.play(0, ConstCue::new(1.0, 1.0), 0.0).unwrap();
    let out = session.pump_for_test(FRAMES).unwrap();
    for s in &out[0] {
        assert!((s - 1.0).abs() < 1e-6);
    }
    assert_eq!(out[1], vec![0.0; FRAMES]);
}

#[test]
fn s3_scheduled_start() {
    let session = open_session();
    session.play(0, ConstCue::new(1.0, 1.0), 0.005).unwrap();
    let out = session.pump_for_test(FRAMES).unwrap();
    assert_eq!(&out[0][0..5], &[0.0; 5]);
    for s in &out[0][5..] {
        assert!((s - 1.0).abs() < 1e-6);
    }
}

#[test]
fn s4_volume_ramp() {
    let session = open_session();
    session.play(0, ConstCue::new(1.0, 1.0), 0.0).unwrap();
    session.pump_for_test(FRAMES).unwrap();

    session.set_volume(0, 0.0).unwrap();
    let out = session.pump_for_test(FRAMES).unwrap();
    for (k, s) in out[0].iter().enumerate() {
        let expected = 1.0 - (k as f32 + 1.0) / FRAMES as f32;
        assert!((*s - expected).abs() < 1e-5, "k={k} s={s} expected={expected}");
    }
}

#[test]
fn s5_pause_resume() {
    let session = open_session();
    session.play(0, ConstCue::new(1.0, 1.0), 0.0).unwrap();
    session.pump_for_test(FRAMES).unwrap();

    session.pause(0).unwrap();
    let paused_out = session.pump_for_test(FRAMES).unwrap();
    assert_eq!(paused_out[0], vec![0.0; FRAMES]);

    session.resume(0).unwrap();
    let resumed_out = session.pump_for_test(FRAMES).unwrap();
    for s in &resumed_out[0] {
        assert!((s - 1.0).abs() < 1e-6);
    }
}

#[test]
fn s6_invalid_channel() {
    let session = open_session();
    let err = session.play(5, ConstCue::new(1.0, 1.0), 0.0).unwrap_err();
    assert!(matches!(err, cue_core::SessionError::InvalidChannel));
}

#[test]
fn close_then_control_op_returns_not_open() {
    let session = open_session();
    session.close().unwrap();
    let err = session.stop(0).unwrap_err();
    assert!(matches!(err, cue_core::SessionError::NotOpen));
}

#[test]
fn already_open_is_rejected() {
    let session = open_session();
    let device = session.default_device();
    let err = session.open(&device, 2, RATE).unwrap_err();
    assert!(matches!(err, cue_core::SessionError::AlreadyOpen));
}
