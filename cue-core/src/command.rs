//! The command protocol and the two bounded SPSC queues that carry it.
//!
//! [`CommandQueue`] carries control-thread mutations into the audio thread.
//! [`RetirementQueue`] carries the opposite direction: cues evicted from a
//! channel, so their `Drop` runs on the control thread instead of the audio
//! thread.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::cue::Cue;

/// Queue capacity for both the command queue and the retirement queue.
/// Sized well above any plausible per-buffer control traffic burst.
pub const QUEUE_CAPACITY: usize = 256;

/// A single channel mutation, targeting `channel` by index.
pub enum Command {
    Play {
        channel: usize,
        cue: Arc<dyn Cue>,
        in_seconds: f64,
    },
    Stop {
        channel: usize,
    },
    Pause {
        channel: usize,
        paused: bool,
    },
    Volume {
        channel: usize,
        volume: f32,
    },
}

/// Bounded single-producer/single-consumer queue from the control thread to
/// the audio thread.
///
/// # Realtime contract
/// `try_push` and `pop` never block, never allocate, never take a mutex.
pub struct CommandQueue {
    inner: ArrayQueue<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: ArrayQueue::new(QUEUE_CAPACITY),
        }
    }

    /// Non-blocking enqueue. Returns `false` if the queue is full.
    pub fn try_push(&self, cmd: Command) -> bool {
        self.inner.push(cmd).is_ok()
    }

    /// Consumer-side remove. Audio-thread only.
    pub fn pop(&self) -> Option<Command> {
        self.inner.pop()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded single-producer/single-consumer queue from the audio thread back
/// to the control thread, carrying cues evicted by `Play`/`Stop` so their
/// final `Drop` never runs on the audio thread.
pub struct RetirementQueue {
    inner: ArrayQueue<Arc<dyn Cue>>,
}

impl RetirementQueue {
    pub fn new() -> Self {
        Self {
            inner: ArrayQueue::new(QUEUE_CAPACITY),
        }
    }

    /// Audio-thread only. If the queue is momentarily full, the value is
    /// dropped on the spot rather than blocking — rare, and logged outside
    /// the callback rather than here.
    pub fn retire(&self, cue: Arc<dyn Cue>) {
        if let Err(dropped) = self.inner.push(cue) {
            drop(dropped);
        }
    }

    /// Drain every pending cue. Control-thread only; called opportunistically
    /// on every public `Session` op and on `close()`.
    pub fn drain(&self) {
        while self.inner.pop().is_some() {}
    }
}

impl Default for RetirementQueue {
    fn default() -> Self {
        Self::new()
    }
}
