//! Narrow adapter between the cue playback core and a host audio API.
//!
//! This crate defines the [`AudioBackend`] trait — the only capability the
//! core rendering path requires of a host audio library — plus a `cpal`-backed
//! implementation and an in-process mock used by tests. Nothing here knows
//! about cues, envelopes, or channels; it only opens streams and hands back
//! planar `f32` buffers on a realtime thread it owns.

use std::fmt;
use std::sync::Arc;

pub mod cpal_backend;

#[cfg(feature = "mock-audio")]
pub mod mock_backend;

/// Errors a backend can report. Pass-through from the host API, normalized to
/// a small stable set so callers don't need to know about `cpal` types.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no output device available")]
    DeviceNotFound,
    #[error("device does not support the requested format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to open the output stream: {0}")]
    StreamCreationFailed(String),
    #[error("playback error: {0}")]
    PlaybackError(String),
    #[error("{0}")]
    Other(String),
}

/// Host-reported device, before the registry's MME/SPDIF/name normalization.
#[derive(Debug, Clone)]
pub struct RawDevice {
    pub index: i32,
    pub name: String,
    pub is_default_device: bool,
    pub api_index: i32,
    pub api_name: String,
    pub is_api_default_device: bool,
    pub max_output_channels: u16,
}

/// The render callback invoked on the backend's realtime thread. Receives one
/// planar (non-interleaved) buffer per channel, the sample rate, and the
/// frame count for this block.
///
/// # Realtime contract
/// The closure passed here must not allocate, lock, or block.
pub type RenderFn = Arc<dyn Fn(&mut [&mut [f32]], u32, usize) + Send + Sync + 'static>;

/// Opaque handle to an open stream. `cue-core` only ever moves this between
/// `open_stream` and `close_stream`; backends stash whatever they need behind it.
pub struct StreamHandle(pub(crate) StreamHandleInner);

pub(crate) enum StreamHandleInner {
    Cpal(cpal_backend::CpalStreamHandle),
    #[cfg(feature = "mock-audio")]
    Mock(mock_backend::MockStreamHandle),
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamHandle(..)")
    }
}

/// The capability set the rendering core needs from a host audio library.
///
/// Implementations are expected to enumerate devices and probe formats from
/// the control thread, and to own the realtime callback thread entirely
/// themselves — `open_stream` must guarantee the callback never runs again
/// once `close_stream` returns.
pub trait AudioBackend: Send + Sync {
    /// List every output-capable device the host reports, across every host
    /// API. Order and `index`/`api_index` values are host-defined; the
    /// registry in `cue-core` does the de-duplication and normalization.
    fn enumerate_output_devices(&self) -> Result<Vec<RawDevice>, BackendError>;

    /// Whether `device_index` can be opened with `channels` output channels,
    /// 32-bit float samples, at `rate` Hz.
    fn is_format_supported(&self, device_index: i32, channels: u16, rate: u32) -> bool;

    /// The device's default sample rate, used when `Session::open` is asked
    /// for rate `0`.
    fn default_sample_rate(&self, device_index: i32) -> Result<u32, BackendError>;

    /// Open and start a stream on `device_index` with `channels` output
    /// channels at `rate` Hz, `render` invoked once per block on a realtime
    /// thread owned by the backend.
    fn open_stream(
        &self,
        device_index: i32,
        channels: u16,
        rate: u32,
        render: RenderFn,
    ) -> Result<StreamHandle, BackendError>;

    /// Stop and tear down a previously opened stream. After this returns,
    /// `render` is guaranteed never to be invoked again.
    fn close_stream(&self, stream: StreamHandle) -> Result<(), BackendError>;

    /// Whether `stream` is currently producing callbacks.
    fn is_active(&self, stream: &StreamHandle) -> bool;

    /// An estimate of the fraction of one buffer period the realtime thread
    /// spent inside `render`, in `[0, 1]`. Backends that cannot measure this
    /// may return `0.0`.
    fn cpu_load(&self, stream: &StreamHandle) -> f32;

    /// Open the host's native control panel for a device, if the platform has
    /// one. A no-op on platforms/backends without this concept.
    fn show_native_control_panel(&self, _device_index: i32) {}
}

use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE_SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide reference count for backend global init/teardown (e.g. COM on
/// Windows, a JACK client handle). `cue-core::Session` acquires one of these
/// on construction, so the second concurrent `Session` doesn't redo
/// host-global setup and the last one tears it down.
pub struct BackendHandle(());

impl BackendHandle {
    /// Acquire a reference to the process-wide backend lifecycle, running
    /// global init the first time this is called.
    pub fn acquire() -> Self {
        if LIVE_SESSIONS.fetch_add(1, Ordering::AcqRel) == 0 {
            tracing::debug!("backend global init");
        }
        BackendHandle(())
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        if LIVE_SESSIONS.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!("backend global teardown");
        }
    }
}
