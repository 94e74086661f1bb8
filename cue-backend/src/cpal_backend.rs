//! `cpal`-backed [`AudioBackend`] implementation.
//!
//! `cpal::Stream` is not `Send` on every platform, so each open stream gets a
//! dedicated worker thread that builds and owns the `Device`/`Stream` and is
//! the only thing that ever touches them. The worker is otherwise idle aside
//! from polling for a `Shutdown` message; cpal drives the actual realtime
//! callback on its own platform thread once the stream is built.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{unbounded, Sender};

use crate::{AudioBackend, BackendError, RawDevice, RenderFn, StreamHandle, StreamHandleInner};

/// Every one of the standard probe rates `cue-core`'s device registry checks,
/// kept here too so `is_format_supported` and stream construction agree on
/// what "supported" means.
const FORMAT: SampleFormat = SampleFormat::F32;

/// Upper bound on frames-per-callback used to size the planar scratch
/// buffers once at stream-open time. Every host this targets (WASAPI, CoreAudio,
/// ALSA, JACK) keeps its callback block size at or below this for the life of
/// a stream, so the data callback never resizes or allocates.
const MAX_FRAMES_PER_CALLBACK: usize = 8192;

pub struct CpalBackend {
    hosts: Vec<cpal::Host>,
}

impl CpalBackend {
    pub fn new() -> Self {
        let hosts = cpal::available_hosts()
            .into_iter()
            .filter_map(|id| cpal::host_from_id(id).ok())
            .collect();
        Self { hosts }
    }

    /// Re-walk every host/device in enumeration order until the running
    /// counter reaches `index`. Mirrors `enumerate_output_devices`'s ordering
    /// exactly so indices stay consistent between the two.
    fn locate(&self, index: i32) -> Result<(usize, Device), BackendError> {
        let mut counter = 0i32;
        for (api_index, host) in self.hosts.iter().enumerate() {
            let devices = host
                .output_devices()
                .map_err(|e| BackendError::Other(e.to_string()))?;
            for device in devices {
                if max_output_channels(&device) == 0 {
                    continue;
                }
                if counter == index {
                    return Ok((api_index, device));
                }
                counter += 1;
            }
        }
        Err(BackendError::DeviceNotFound)
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn max_output_channels(device: &Device) -> u16 {
    device
        .supported_output_configs()
        .ok()
        .and_then(|configs| configs.map(|c| c.channels()).max())
        .unwrap_or(0)
}

impl AudioBackend for CpalBackend {
    fn enumerate_output_devices(&self) -> Result<Vec<RawDevice>, BackendError> {
        let mut out = Vec::new();
        let mut index = 0i32;
        for (api_index, host) in self.hosts.iter().enumerate() {
            let api_name = host.id().name().to_string();
            let default_name = host
                .default_output_device()
                .and_then(|d| d.name().ok());
            let devices = host
                .output_devices()
                .map_err(|e| BackendError::Other(e.to_string()))?;
            for device in devices {
                let max_output_channels = max_output_channels(&device);
                if max_output_channels == 0 {
                    continue;
                }
                let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
                let is_default_device = default_name.as_deref() == Some(name.as_str());
                out.push(RawDevice {
                    index,
                    name,
                    is_default_device,
                    api_index: api_index as i32,
                    api_name: api_name.clone(),
                    is_api_default_device: is_default_device,
                    max_output_channels,
                });
                index += 1;
            }
        }
        Ok(out)
    }

    fn is_format_supported(&self, device_index: i32, channels: u16, rate: u32) -> bool {
        let Ok((_, device)) = self.locate(device_index) else {
            return false;
        };
        let Ok(configs) = device.supported_output_configs() else {
            return false;
        };
        configs.into_iter().any(|c| {
            c.sample_format() == FORMAT
                && c.channels() >= channels
                && c.min_sample_rate().0 <= rate
                && rate <= c.max_sample_rate().0
        })
    }

    fn default_sample_rate(&self, device_index: i32) -> Result<u32, BackendError> {
        let (_, device) = self.locate(device_index)?;
        let config = device
            .default_output_config()
            .map_err(|e| BackendError::UnsupportedFormat(e.to_string()))?;
        Ok(config.sample_rate().0)
    }

    fn open_stream(
        &self,
        device_index: i32,
        channels: u16,
        rate: u32,
        render: RenderFn,
    ) -> Result<StreamHandle, BackendError> {
        let (_, device) = self.locate(device_index)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let active = Arc::new(AtomicBool::new(false));
        let cpu_load_bits = Arc::new(AtomicU32::new(0));
        let (ready_tx, ready_rx) = unbounded::<Result<(), String>>();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let active_w = active.clone();
        let cpu_w = cpu_load_bits.clone();

        let join = thread::spawn(move || {
            // Planar scratch buffers: one Vec<f32> per channel, preallocated
            // to the largest block size any targeted host will ever request
            // and never resized again. `data_cb` is `FnMut`, not `Fn`, and
            // cpal only ever calls it from its own single realtime thread, so
            // owning these directly needs no lock.
            let mut scratch: Vec<Vec<f32>> = (0..channels)
                .map(|_| vec![0.0f32; MAX_FRAMES_PER_CALLBACK])
                .collect();
            let channels_usize = channels as usize;

            let data_cb = move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let start = Instant::now();
                let frames = (data.len() / channels_usize).min(MAX_FRAMES_PER_CALLBACK);

                let mut slices: Vec<&mut [f32]> =
                    scratch.iter_mut().map(|g| &mut g[..frames]).collect();

                let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    render(&mut slices, rate, frames);
                }));
                if res.is_err() {
                    for s in slices.iter_mut() {
                        s.iter_mut().for_each(|v| *v = 0.0);
                    }
                }

                for (frame, out_frame) in data.chunks_mut(channels_usize).enumerate() {
                    for (ch, sample) in out_frame.iter_mut().enumerate() {
                        // A frame index past what we rendered only happens if
                        // the host ever asks for more than
                        // `MAX_FRAMES_PER_CALLBACK` frames in one block; fall
                        // back to silence for the remainder rather than
                        // leaving the host's buffer uninitialized.
                        *sample = slices[ch].get(frame).copied().unwrap_or(0.0);
                    }
                }

                let elapsed = start.elapsed();
                let period = Duration::from_secs_f64(frames as f64 / rate as f64);
                let load = if period.as_secs_f64() > 0.0 {
                    (elapsed.as_secs_f64() / period.as_secs_f64()).clamp(0.0, 1.0) as f32
                } else {
                    0.0
                };
                cpu_w.store(load.to_bits(), Ordering::Relaxed);
            };

            let err_cb = |err| tracing::warn!(%err, "cpal stream error");

            let stream = match device.build_output_stream(&config, data_cb, err_cb, None) {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            active_w.store(true, Ordering::Release);
            let _ = ready_tx.send(Ok(()));

            // Block until told to shut down; the stream itself runs on cpal's
            // own callback thread for as long as `stream` stays alive here.
            let _ = shutdown_rx.recv();
            active_w.store(false, Ordering::Release);
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BackendError::StreamCreationFailed(e)),
            Err(_) => return Err(BackendError::Other("worker thread died".into())),
        }

        Ok(StreamHandle(StreamHandleInner::Cpal(CpalStreamHandle {
            shutdown_tx,
            join: Some(join),
            active,
            cpu_load_bits,
        })))
    }

    fn close_stream(&self, stream: StreamHandle) -> Result<(), BackendError> {
        match stream.0 {
            StreamHandleInner::Cpal(mut handle) => {
                let _ = handle.shutdown_tx.send(());
                if let Some(join) = handle.join.take() {
                    let _ = join.join();
                }
                Ok(())
            }
            #[cfg(feature = "mock-audio")]
            StreamHandleInner::Mock(_) => Err(BackendError::Other(
                "mock stream handle passed to cpal backend".into(),
            )),
        }
    }

    fn is_active(&self, stream: &StreamHandle) -> bool {
        match &stream.0 {
            StreamHandleInner::Cpal(h) => h.active.load(Ordering::Acquire),
            #[cfg(feature = "mock-audio")]
            StreamHandleInner::Mock(_) => false,
        }
    }

    fn cpu_load(&self, stream: &StreamHandle) -> f32 {
        match &stream.0 {
            StreamHandleInner::Cpal(h) => f32::from_bits(h.cpu_load_bits.load(Ordering::Relaxed)),
            #[cfg(feature = "mock-audio")]
            StreamHandleInner::Mock(_) => 0.0,
        }
    }
}

pub struct CpalStreamHandle {
    shutdown_tx: Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    active: Arc<AtomicBool>,
    cpu_load_bits: Arc<AtomicU32>,
}
