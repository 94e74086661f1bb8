//! [`Session`]: lifecycle, device registry, and the public control-thread API
//! that dispatches into the command queue consumed by the audio callback.

use std::cell::UnsafeCell;
use std::sync::Arc;

use parking_lot::Mutex;

use cue_backend::{AudioBackend, BackendError, BackendHandle, RawDevice, RenderFn, StreamHandle};

use crate::channel::Channel;
use crate::command::{Command, CommandQueue, RetirementQueue};
use crate::cue::Cue;

/// Sample rates probed against every enumerated device. Devices report the
/// subset they support; callers compare against this fixed vocabulary.
pub const STANDARD_PROBE_RATES: &[u32] = &[
    8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 88200, 96000, 192000,
];

const DIGITAL_MARKERS: &[&str] = &["SPDIF", "S/PDIF", "Optic", "optic"];
const WINDOWS_API_PREFIX: &str = "Windows ";

/// Stable error taxonomy for `Session` operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is not open")]
    NotOpen,
    #[error("session is already open")]
    AlreadyOpen,
    #[error("channel index out of range")]
    InvalidChannel,
    #[error("requested sample rate is not supported by the device")]
    InvalidSampleRate,
    #[error("command queue is full")]
    QueueOverflow,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Immutable device descriptor, produced by [`DeviceRegistry`] enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub index: i32,
    pub name: String,
    pub is_default_device: bool,
    pub api_index: i32,
    pub api_name: String,
    pub is_api_default_device: bool,
    pub max_channels: u16,
    pub sample_rates: Vec<u32>,
}

impl Device {
    /// The "no device" sentinel returned by `current_device()` when the
    /// session is not open.
    pub fn sentinel() -> Self {
        Device {
            index: -1,
            name: "N/A".to_string(),
            is_default_device: false,
            api_index: -1,
            api_name: "N/A".to_string(),
            is_api_default_device: false,
            max_channels: 0,
            sample_rates: Vec::new(),
        }
    }
}

/// Enumerates and normalizes devices once at `Session` construction.
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn build(backend: &dyn AudioBackend) -> Result<Self, SessionError> {
        let raw = backend.enumerate_output_devices()?;
        let mut devices: Vec<Device> = raw
            .iter()
            .map(|r| Device {
                index: r.index,
                name: r.name.clone(),
                is_default_device: r.is_default_device,
                api_index: r.api_index,
                api_name: strip_windows_prefix(&r.api_name),
                is_api_default_device: r.is_api_default_device,
                max_channels: r.max_output_channels,
                sample_rates: probe_rates(backend, r),
            })
            .collect();

        fixup_mme_names(&mut devices);
        devices.retain(|d| !is_digital_endpoint(&d.name));

        tracing::info!(count = devices.len(), "enumerated output devices");
        Ok(Self { devices })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn default_device(&self) -> Option<&Device> {
        self.devices.iter().find(|d| d.is_default_device)
    }
}

fn probe_rates(backend: &dyn AudioBackend, raw: &RawDevice) -> Vec<u32> {
    STANDARD_PROBE_RATES
        .iter()
        .copied()
        .filter(|&rate| backend.is_format_supported(raw.index, raw.max_output_channels, rate))
        .collect()
}

fn is_digital_endpoint(name: &str) -> bool {
    DIGITAL_MARKERS.iter().any(|marker| name.contains(marker))
}

fn strip_windows_prefix(api_name: &str) -> String {
    api_name
        .strip_prefix(WINDOWS_API_PREFIX)
        .unwrap_or(api_name)
        .to_string()
}

/// MME device names are often truncated by the host. For each MME-looking
/// name, if any other device's name starts with it, replace it with the
/// longer spelling so a single canonical name is used across APIs.
fn fixup_mme_names(devices: &mut [Device]) {
    let alternatives: Vec<(usize, String)> = devices
        .iter()
        .enumerate()
        .filter_map(|(i, d)| {
            if !d.api_name.eq_ignore_ascii_case("MME") {
                return None;
            }
            devices
                .iter()
                .filter(|other| !other.api_name.eq_ignore_ascii_case("MME"))
                .find(|other| other.name.starts_with(&d.name))
                .map(|other| (i, other.name.clone()))
        })
        .collect();
    for (i, replacement) in alternatives {
        devices[i].name = replacement;
    }
}

/// One playback slot. Built on the control thread in `open()`, then touched
/// exclusively by the render closure on the audio thread for the rest of the
/// stream's life — the control thread only ever reaches a `Channel` by
/// enqueueing a `Command` the audio thread applies, never directly. A lock
/// here would be uncontended by construction, so there's no need for one.
struct ChannelSlot(UnsafeCell<Channel>);

// Safety: see the `get` doc comment below — the single-accessor invariant is
// upheld by construction, not by any runtime check.
unsafe impl Sync for ChannelSlot {}

impl ChannelSlot {
    fn new(sample_length: f64) -> Self {
        Self(UnsafeCell::new(Channel::new(sample_length)))
    }

    /// Safety: only the render closure built by `build_render_fn` may call
    /// this, and only from inside the single callback invocation the backend
    /// guarantees is never run concurrently with itself.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut Channel {
        &mut *self.0.get()
    }
}

/// Fixed channel array shared between `Session` (which keeps the stream's
/// `Arc<Channels>` alive while open) and the render closure running on the
/// audio thread. Built once per `open()` and dropped on `close()`.
struct Channels {
    slots: Vec<ChannelSlot>,
}

struct OpenState {
    device: Device,
    channels: u16,
    rate: u32,
    stream: StreamHandle,
    command_queue: Arc<CommandQueue>,
    retirement_queue: Arc<RetirementQueue>,
}

/// Owns the audio stream and the fixed channel array while open.
///
/// `Session` is the public control-thread API. Multiple control threads
/// sharing one `Session` must serialize externally (e.g. behind
/// `Mutex<Session>`); the command queue assumes a single producer.
pub struct Session {
    backend: Arc<dyn AudioBackend>,
    _backend_handle: BackendHandle,
    registry: DeviceRegistry,
    open_state: Mutex<Option<OpenState>>,
}

impl Session {
    /// Construct a session over `backend`, enumerating and normalizing its
    /// device list. Does not open a stream.
    pub fn new(backend: Arc<dyn AudioBackend>) -> Result<Self, SessionError> {
        let backend_handle = BackendHandle::acquire();
        let registry = DeviceRegistry::build(backend.as_ref())?;
        Ok(Self {
            backend,
            _backend_handle: backend_handle,
            registry,
            open_state: Mutex::new(None),
        })
    }

    pub fn available_devices(&self) -> &[Device] {
        self.registry.devices()
    }

    pub fn default_device(&self) -> Device {
        self.registry
            .default_device()
            .cloned()
            .unwrap_or_else(Device::sentinel)
    }

    pub fn is_open(&self) -> bool {
        self.open_state.lock().is_some()
    }

    /// Open a stream on `device` with up to `channels` channels at `rate` Hz
    /// (device default if `rate == 0`).
    pub fn open(&self, device: &Device, channels: u16, rate: u32) -> Result<(), SessionError> {
        let mut state = self.open_state.lock();
        if state.is_some() {
            return Err(SessionError::AlreadyOpen);
        }

        let channels = channels.min(device.max_channels);
        let rate = if rate == 0 {
            self.backend.default_sample_rate(device.index)?
        } else {
            rate
        };
        if !device.sample_rates.is_empty()
            && !device.sample_rates.contains(&rate)
            && !self.backend.is_format_supported(device.index, channels, rate)
        {
            return Err(SessionError::InvalidSampleRate);
        }

        let sample_length = 1.0 / rate as f64;
        let slots: Vec<ChannelSlot> = (0..channels)
            .map(|_| ChannelSlot::new(sample_length))
            .collect();
        let channel_state = Arc::new(Channels { slots });

        let command_queue = Arc::new(CommandQueue::new());
        let retirement_queue = Arc::new(RetirementQueue::new());

        let render = build_render_fn(channel_state, command_queue.clone(), retirement_queue.clone());

        let stream = self
            .backend
            .open_stream(device.index, channels, rate, render)
            .map_err(SessionError::Backend)?;

        tracing::info!(device = %device.name, channels, rate, "session opened");

        *state = Some(OpenState {
            device: device.clone(),
            channels,
            rate,
            stream,
            command_queue,
            retirement_queue,
        });
        Ok(())
    }

    pub fn close(&self) -> Result<(), SessionError> {
        let mut state = self.open_state.lock();
        let open = state.take().ok_or(SessionError::NotOpen)?;
        self.backend.close_stream(open.stream)?;
        open.retirement_queue.drain();
        tracing::info!(device = %open.device.name, "session closed");
        Ok(())
    }

    pub fn play(
        &self,
        channel: usize,
        cue: Arc<dyn Cue>,
        in_seconds: f64,
    ) -> Result<(), SessionError> {
        self.dispatch(channel, move |ch| Command::Play {
            channel: ch,
            cue: cue.clone(),
            in_seconds,
        })
    }

    pub fn stop(&self, channel: usize) -> Result<(), SessionError> {
        self.dispatch(channel, |ch| Command::Stop { channel: ch })
    }

    pub fn pause(&self, channel: usize) -> Result<(), SessionError> {
        self.dispatch(channel, |ch| Command::Pause {
            channel: ch,
            paused: true,
        })
    }

    pub fn resume(&self, channel: usize) -> Result<(), SessionError> {
        self.dispatch(channel, |ch| Command::Pause {
            channel: ch,
            paused: false,
        })
    }

    pub fn set_volume(&self, channel: usize, volume: f32) -> Result<(), SessionError> {
        let volume = volume.clamp(0.0, 1.0);
        self.dispatch(channel, move |ch| Command::Volume {
            channel: ch,
            volume,
        })
    }

    pub fn play_all(&self, cue: Arc<dyn Cue>, in_seconds: f64) -> Result<(), SessionError> {
        let count = self.channel_count()?;
        for ch in 0..count {
            self.play(ch, cue.clone(), in_seconds)?;
        }
        Ok(())
    }

    pub fn stop_all(&self) -> Result<(), SessionError> {
        let count = self.channel_count()?;
        for ch in 0..count {
            self.stop(ch)?;
        }
        Ok(())
    }

    pub fn pause_all(&self) -> Result<(), SessionError> {
        let count = self.channel_count()?;
        for ch in 0..count {
            self.pause(ch)?;
        }
        Ok(())
    }

    pub fn resume_all(&self) -> Result<(), SessionError> {
        let count = self.channel_count()?;
        for ch in 0..count {
            self.resume(ch)?;
        }
        Ok(())
    }

    pub fn channel_count(&self) -> Result<usize, SessionError> {
        let state = self.open_state.lock();
        let open = state.as_ref().ok_or(SessionError::NotOpen)?;
        Ok(open.channels as usize)
    }

    pub fn sample_rate(&self) -> Result<u32, SessionError> {
        let state = self.open_state.lock();
        let open = state.as_ref().ok_or(SessionError::NotOpen)?;
        Ok(open.rate)
    }

    pub fn cpu_load(&self) -> Result<f32, SessionError> {
        let state = self.open_state.lock();
        let open = state.as_ref().ok_or(SessionError::NotOpen)?;
        Ok(self.backend.cpu_load(&open.stream))
    }

    pub fn current_device(&self) -> Device {
        let state = self.open_state.lock();
        match state.as_ref() {
            Some(open) => open.device.clone(),
            None => Device::sentinel(),
        }
    }

    /// Drive one render block synchronously through the mock backend, for
    /// tests exercising the seed scenarios against a real callback rather
    /// than calling channel internals directly. Returns `None` if the
    /// session is not open or the open stream isn't a mock stream.
    #[cfg(feature = "mock-audio")]
    pub fn pump_for_test(&self, frames: usize) -> Option<Vec<Vec<f32>>> {
        let state = self.open_state.lock();
        let open = state.as_ref()?;
        let mock = cue_backend::mock_backend::as_mock(&open.stream)?;
        Some(mock.pump(frames))
    }

    fn dispatch(
        &self,
        channel: usize,
        make: impl FnOnce(usize) -> Command,
    ) -> Result<(), SessionError> {
        let state = self.open_state.lock();
        let open = state.as_ref().ok_or(SessionError::NotOpen)?;
        if channel >= open.channels as usize {
            return Err(SessionError::InvalidChannel);
        }
        open.retirement_queue.drain();
        if !open.command_queue.try_push(make(channel)) {
            return Err(SessionError::QueueOverflow);
        }
        Ok(())
    }
}

/// Build the closure handed to the backend's `open_stream`. Drains the
/// command queue at the start of every block, then fills each channel's
/// share of the planar output buffer.
///
/// # Realtime contract
/// No allocation, no logging, no blocking, no lock: each `Channel` is reached
/// through `ChannelSlot::get`, which is sound here because this closure is
/// the only thing that ever touches a channel once the stream is running.
fn build_render_fn(
    channels: Arc<Channels>,
    queue: Arc<CommandQueue>,
    retirement: Arc<RetirementQueue>,
) -> RenderFn {
    Arc::new(move |buffers: &mut [&mut [f32]], _rate: u32, _frames: usize| {
        while let Some(cmd) = queue.pop() {
            apply_command(&channels, &retirement, cmd);
        }
        for (i, buf) in buffers.iter_mut().enumerate() {
            match channels.slots.get(i) {
                // Safety: see `ChannelSlot::get`.
                Some(slot) => unsafe { slot.get() }.fill_buffer(buf),
                None => buf.iter_mut().for_each(|s| *s = 0.0),
            }
        }
    })
}

fn apply_command(channels: &Channels, retirement: &RetirementQueue, cmd: Command) {
    match cmd {
        Command::Play {
            channel,
            cue,
            in_seconds,
        } => {
            if let Some(slot) = channels.slots.get(channel) {
                // Safety: see `ChannelSlot::get`.
                let outgoing = unsafe { slot.get() }.play(cue, in_seconds);
                retirement.retire(outgoing);
            }
        }
        Command::Stop { channel } => {
            if let Some(slot) = channels.slots.get(channel) {
                // Safety: see `ChannelSlot::get`.
                let outgoing = unsafe { slot.get() }.stop();
                retirement.retire(outgoing);
            }
        }
        Command::Pause { channel, paused } => {
            if let Some(slot) = channels.slots.get(channel) {
                // Safety: see `ChannelSlot::get`.
                unsafe { slot.get() }.set_paused(paused);
            }
        }
        Command::Volume { channel, volume } => {
            if let Some(slot) = channels.slots.get(channel) {
                // Safety: see `ChannelSlot::get`.
                unsafe { slot.get() }.set_volume(volume);
            }
        }
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use cue_backend::{AudioBackend, BackendError, RawDevice, RenderFn};

    /// A backend whose enumeration and format support are scripted per test,
    /// so `DeviceRegistry::build` can be driven without a real host.
    struct ScriptedBackend {
        devices: Vec<RawDevice>,
        supported_rates: &'static [u32],
    }

    impl AudioBackend for ScriptedBackend {
        fn enumerate_output_devices(&self) -> Result<Vec<RawDevice>, BackendError> {
            Ok(self.devices.clone())
        }

        fn is_format_supported(&self, _device_index: i32, _channels: u16, rate: u32) -> bool {
            self.supported_rates.contains(&rate)
        }

        fn default_sample_rate(&self, _device_index: i32) -> Result<u32, BackendError> {
            Ok(48_000)
        }

        fn open_stream(
            &self,
            _device_index: i32,
            _channels: u16,
            _rate: u32,
            _render: RenderFn,
        ) -> Result<StreamHandle, BackendError> {
            unimplemented!("registry tests never open a stream")
        }

        fn close_stream(&self, _stream: StreamHandle) -> Result<(), BackendError> {
            unimplemented!("registry tests never open a stream")
        }

        fn is_active(&self, _stream: &StreamHandle) -> bool {
            false
        }

        fn cpu_load(&self, _stream: &StreamHandle) -> f32 {
            0.0
        }
    }

    fn raw(index: i32, name: &str, api_index: i32, api_name: &str) -> RawDevice {
        RawDevice {
            index,
            name: name.to_string(),
            is_default_device: index == 0,
            api_index,
            api_name: api_name.to_string(),
            is_api_default_device: index == 0,
            max_output_channels: 2,
        }
    }

    #[test]
    fn probe_rates_only_reports_backend_supported_standard_rates() {
        let backend = ScriptedBackend {
            devices: vec![raw(0, "Speakers", 0, "WASAPI")],
            supported_rates: &[44_100, 48_000],
        };
        let registry = DeviceRegistry::build(&backend).unwrap();
        assert_eq!(registry.devices()[0].sample_rates, vec![44_100, 48_000]);
    }

    #[test]
    fn default_device_lookup_finds_flagged_device() {
        let backend = ScriptedBackend {
            devices: vec![raw(0, "Speakers", 0, "WASAPI")],
            supported_rates: STANDARD_PROBE_RATES,
        };
        let registry = DeviceRegistry::build(&backend).unwrap();
        assert_eq!(registry.default_device().unwrap().name, "Speakers");
    }

    #[test]
    fn strips_windows_api_name_prefix() {
        let backend = ScriptedBackend {
            devices: vec![raw(0, "Speakers", 0, "Windows WASAPI")],
            supported_rates: STANDARD_PROBE_RATES,
        };
        let registry = DeviceRegistry::build(&backend).unwrap();
        assert_eq!(registry.devices()[0].api_name, "WASAPI");
    }

    #[test]
    fn suppresses_digital_pass_through_endpoints() {
        let backend = ScriptedBackend {
            devices: vec![
                raw(0, "Speakers", 0, "WASAPI"),
                raw(1, "SPDIF Out", 0, "WASAPI"),
                raw(2, "Optical Out (Optic)", 0, "WASAPI"),
            ],
            supported_rates: STANDARD_PROBE_RATES,
        };
        let registry = DeviceRegistry::build(&backend).unwrap();
        assert_eq!(registry.devices().len(), 1);
        assert_eq!(registry.devices()[0].name, "Speakers");
    }

    #[test]
    fn mme_truncated_name_gets_fixed_up_to_longer_spelling() {
        let backend = ScriptedBackend {
            devices: vec![
                raw(0, "Realtek High Definition Audi", 0, "MME"),
                raw(1, "Realtek High Definition Audio", 1, "WASAPI"),
            ],
            supported_rates: STANDARD_PROBE_RATES,
        };
        let registry = DeviceRegistry::build(&backend).unwrap();
        let mme_device = registry
            .devices()
            .iter()
            .find(|d| d.api_name.eq_ignore_ascii_case("MME"))
            .unwrap();
        assert_eq!(mme_device.name, "Realtek High Definition Audio");
    }

    #[test]
    fn is_digital_endpoint_matches_every_marker() {
        assert!(is_digital_endpoint("SPDIF Out"));
        assert!(is_digital_endpoint("S/PDIF"));
        assert!(is_digital_endpoint("Optic Out"));
        assert!(is_digital_endpoint("Headphones (optic)"));
        assert!(!is_digital_endpoint("Speakers"));
    }

    #[test]
    fn strip_windows_prefix_only_removes_literal_prefix() {
        assert_eq!(strip_windows_prefix("Windows WASAPI"), "WASAPI");
        assert_eq!(strip_windows_prefix("WASAPI"), "WASAPI");
        assert_eq!(strip_windows_prefix("ASIO Windows Driver"), "ASIO Windows Driver");
    }

    #[test]
    fn fixup_mme_names_prefers_longer_non_mme_spelling() {
        let mut devices = vec![
            Device {
                index: 0,
                name: "Realtek High Definition Audi".to_string(),
                is_default_device: false,
                api_index: 0,
                api_name: "MME".to_string(),
                is_api_default_device: false,
                max_channels: 2,
                sample_rates: Vec::new(),
            },
            Device {
                index: 1,
                name: "Realtek High Definition Audio".to_string(),
                is_default_device: false,
                api_index: 1,
                api_name: "WASAPI".to_string(),
                is_api_default_device: false,
                max_channels: 2,
                sample_rates: Vec::new(),
            },
        ];
        fixup_mme_names(&mut devices);
        assert_eq!(devices[0].name, "Realtek High Definition Audio");
    }
}
