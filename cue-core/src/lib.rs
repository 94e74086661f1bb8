//! Session/channel/command-queue playback engine for one-shot haptic and
//! audio cues.
//!
//! A [`Session`] owns an audio stream (opened through a [`cue_backend::AudioBackend`])
//! and a fixed array of [`Channel`]s. Control-thread callers mutate channel
//! state through [`Session`]'s public methods, which enqueue [`Command`]s onto
//! a lock-free [`CommandQueue`]; the audio callback drains that queue at the
//! start of every block and never blocks, allocates, or logs.

pub mod channel;
pub mod command;
pub mod cue;
pub mod envelope;
pub mod session;

pub use channel::Channel;
pub use command::{Command, CommandQueue, RetirementQueue};
pub use cue::{silent_cue, Cue, SilentCue};
pub use envelope::{Asr, Envelope};
pub use session::{Device, DeviceRegistry, Session, SessionError, STANDARD_PROBE_RATES};
