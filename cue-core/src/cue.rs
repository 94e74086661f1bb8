//! The [`Cue`] capability trait: the minimal contract a playable signal must
//! satisfy. The cue algebra itself (oscillators, composition, file-backed
//! cues) is an external concern; this crate only needs enough of an
//! interface to drive [`crate::channel::Channel`] and to exercise it in tests.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::envelope::Envelope;

/// A polymorphic, shareable signal evaluator.
///
/// # Realtime contract
/// `sample` and `envelope` are called from the audio thread and must be
/// wait-free: no allocation, no locking, no blocking I/O.
pub trait Cue: Send + Sync {
    /// The signal's amplitude at time `t` seconds, in `[-1, 1]`.
    fn sample(&self, t: f64) -> f32;

    /// The envelope bounding this cue's playing interval.
    fn envelope(&self) -> &dyn Envelope;
}

/// A cue that is always silent. Used as the default binding for a
/// [`Channel`](crate::channel::Channel) before any `Play` command arrives,
/// and as the target of `Stop`.
pub struct SilentCue {
    envelope: crate::envelope::Asr,
}

impl SilentCue {
    fn new() -> Self {
        Self {
            envelope: crate::envelope::Asr::new(0.0, 0.0, 0.0, 0.0),
        }
    }
}

impl Cue for SilentCue {
    fn sample(&self, _t: f64) -> f32 {
        0.0
    }

    fn envelope(&self) -> &dyn Envelope {
        &self.envelope
    }
}

static SILENT_CUE: Lazy<Arc<dyn Cue>> = Lazy::new(|| Arc::new(SilentCue::new()));

/// A handle to the shared silent-cue singleton, bound into every channel slot
/// at `open` and rebound by `Stop`. Every call returns a clone of the same
/// `Arc`, not a fresh allocation.
pub fn silent_cue() -> Arc<dyn Cue> {
    SILENT_CUE.clone()
}
