//! Amplitude envelopes. [`Asr`] is the one concrete shape the core needs to
//! exercise [`crate::channel::Channel`] and the seed-scenario tests; richer
//! shapes are an external concern exposed only through the [`Envelope`] trait.

/// A time-domain amplitude shape with a finite playing interval.
pub trait Envelope: Send + Sync {
    /// Amplitude at time `t` seconds. Must return `0.0` outside
    /// `[0, duration())`.
    fn amplitude(&self, t: f64) -> f32;

    /// Length of the playing interval in seconds.
    fn duration(&self) -> f64;
}

/// Attack/Sustain/Release envelope: linear ramp up, a flat hold, linear ramp
/// down, zero everywhere else.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Asr {
    attack: f64,
    sustain: f64,
    release: f64,
    amplitude: f32,
}

impl Asr {
    /// `amplitude` is clamped to `[0, 1]`; negative `attack`/`sustain`/
    /// `release` are clamped to `0`.
    pub fn new(attack: f64, sustain: f64, release: f64, amplitude: f32) -> Self {
        Self {
            attack: attack.max(0.0),
            sustain: sustain.max(0.0),
            release: release.max(0.0),
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }
}

impl Envelope for Asr {
    fn amplitude(&self, t: f64) -> f32 {
        if t < 0.0 {
            return 0.0;
        }
        if t < self.attack {
            if self.attack == 0.0 {
                return self.amplitude;
            }
            return (self.amplitude as f64 * (t / self.attack)) as f32;
        }
        let sustain_end = self.attack + self.sustain;
        if t < sustain_end {
            return self.amplitude;
        }
        let release_end = sustain_end + self.release;
        if t < release_end {
            if self.release == 0.0 {
                return self.amplitude;
            }
            let remaining = (release_end - t) / self.release;
            return (self.amplitude as f64 * remaining) as f32;
        }
        // t >= duration: resolved to 0 rather than the source's unreachable
        // branch (see Open Questions).
        0.0
    }

    fn duration(&self) -> f64 {
        self.attack + self.sustain + self.release
    }
}
