//! Opens the default output device and plays a single constant-amplitude
//! cue for one second. `RUST_LOG=debug cargo run --example play_cue` to see
//! session lifecycle and device enumeration logging.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cue_backend::cpal_backend::CpalBackend;
use cue_backend::AudioBackend;
use cue_core::envelope::{Asr, Envelope};
use cue_core::{Cue, Session};

struct ToneCue {
    freq: f32,
    envelope: Asr,
}

impl Cue for ToneCue {
    fn sample(&self, t: f64) -> f32 {
        let raw = (2.0 * std::f64::consts::PI * self.freq as f64 * t).sin() as f32;
        raw * self.envelope.amplitude(t)
    }

    fn envelope(&self) -> &dyn Envelope {
        &self.envelope
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let backend: Arc<dyn AudioBackend> = Arc::new(CpalBackend::new());
    let session = Session::new(backend)?;
    let device = session.default_device();
    session.open(&device, 2, 0)?;

    let cue: Arc<dyn Cue> = Arc::new(ToneCue {
        freq: 220.0,
        envelope: Asr::new(0.05, 0.9, 0.05, 0.8),
    });
    session.play(0, cue, 0.0)?;

    thread::sleep(Duration::from_secs(1));
    session.close()?;
    Ok(())
}
