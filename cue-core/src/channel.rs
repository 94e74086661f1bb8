//! Per-channel playback state and the sample generator.
//!
//! Everything in this module runs on the audio thread once a
//! [`crate::session::Session`] is open. `next_sample` and `fill_buffer` are
//! the realtime hot path: no allocation, no locking, no formatting.

use std::sync::Arc;

use crate::cue::{silent_cue, Cue};

/// One playback slot: a bound cue, a time cursor, and a volume ramp.
pub struct Channel {
    cue: Arc<dyn Cue>,
    time: f64,
    sample_length: f64,
    volume: f32,
    last_volume: f32,
    paused: bool,
    /// Reserved for future pitch-shifting; never read by `next_sample`.
    pub pitch: f32,
}

impl Channel {
    pub fn new(sample_length: f64) -> Self {
        Self {
            cue: silent_cue(),
            time: 0.0,
            sample_length,
            volume: 1.0,
            last_volume: 1.0,
            paused: true,
            pitch: 1.0,
        }
    }

    pub fn cue(&self) -> &Arc<dyn Cue> {
        &self.cue
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Bind a new cue with a scheduled-start offset, returning the outgoing
    /// cue so the caller can push it onto the retirement queue.
    pub fn play(&mut self, cue: Arc<dyn Cue>, in_seconds: f64) -> Arc<dyn Cue> {
        self.paused = false;
        self.time = -in_seconds;
        std::mem::replace(&mut self.cue, cue)
    }

    /// Rebind to the silent cue and reset the time cursor, returning the
    /// outgoing cue for retirement.
    pub fn stop(&mut self) -> Arc<dyn Cue> {
        self.paused = true;
        self.time = 0.0;
        std::mem::replace(&mut self.cue, silent_cue())
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Commits a new target volume for the next `fill_buffer` call's ramp.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    /// One sample, advancing the time cursor. Audio-thread only.
    fn next_sample(&mut self) -> f32 {
        if self.paused {
            return 0.0;
        }
        let duration = self.cue.envelope().duration();
        let s = if self.time < 0.0 || self.time > duration {
            0.0
        } else {
            self.volume * self.cue.sample(self.time)
        };
        self.time += self.sample_length;
        s
    }

    /// Fills `out` with one block of samples, linearly ramping volume from
    /// `last_volume` to the committed target over the block.
    pub fn fill_buffer(&mut self, out: &mut [f32]) {
        let frames = out.len();
        if frames == 0 {
            return;
        }
        let target = self.volume;
        let step = (target - self.last_volume) / frames as f32;
        self.volume = self.last_volume;
        for sample in out.iter_mut() {
            self.volume += step;
            *sample = self.next_sample();
        }
        self.volume = target;
        self.last_volume = target;
    }
}
