//! In-process mock [`AudioBackend`], used by `cue-core`'s test suite and by
//! callers that want to drive the engine without a real output device.
//!
//! There is no realtime thread here: `pump` lets a test invoke the stored
//! render closure synchronously, on whatever thread calls it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{AudioBackend, BackendError, RawDevice, RenderFn, StreamHandle, StreamHandleInner};

const MOCK_DEVICE_INDEX: i32 = 0;
const MOCK_SAMPLE_RATE: u32 = 48_000;
const MOCK_CHANNELS: u16 = 2;

pub struct MockBackend {
    device_name: String,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            device_name: "mock-device".to_string(),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockBackend {
    fn enumerate_output_devices(&self) -> Result<Vec<RawDevice>, BackendError> {
        Ok(vec![RawDevice {
            index: MOCK_DEVICE_INDEX,
            name: self.device_name.clone(),
            is_default_device: true,
            api_index: 0,
            api_name: "Mock".to_string(),
            is_api_default_device: true,
            max_output_channels: MOCK_CHANNELS,
        }])
    }

    fn is_format_supported(&self, device_index: i32, channels: u16, _rate: u32) -> bool {
        device_index == MOCK_DEVICE_INDEX && channels <= MOCK_CHANNELS
    }

    fn default_sample_rate(&self, device_index: i32) -> Result<u32, BackendError> {
        if device_index == MOCK_DEVICE_INDEX {
            Ok(MOCK_SAMPLE_RATE)
        } else {
            Err(BackendError::DeviceNotFound)
        }
    }

    fn open_stream(
        &self,
        device_index: i32,
        channels: u16,
        rate: u32,
        render: RenderFn,
    ) -> Result<StreamHandle, BackendError> {
        if device_index != MOCK_DEVICE_INDEX {
            return Err(BackendError::DeviceNotFound);
        }
        Ok(StreamHandle(StreamHandleInner::Mock(MockStreamHandle {
            render: Mutex::new(Some(render)),
            channels,
            rate,
            active: Mutex::new(true).into(),
            frames: Arc::new(AtomicU64::new(0)),
        })))
    }

    fn close_stream(&self, stream: StreamHandle) -> Result<(), BackendError> {
        match stream.0 {
            StreamHandleInner::Mock(handle) => {
                *handle.render.lock().unwrap() = None;
                *handle.active.lock().unwrap() = false;
                Ok(())
            }
            StreamHandleInner::Cpal(_) => Err(BackendError::Other(
                "cpal stream handle passed to mock backend".into(),
            )),
        }
    }

    fn is_active(&self, stream: &StreamHandle) -> bool {
        match &stream.0 {
            StreamHandleInner::Mock(h) => *h.active.lock().unwrap(),
            StreamHandleInner::Cpal(_) => false,
        }
    }

    fn cpu_load(&self, _stream: &StreamHandle) -> f32 {
        0.0
    }
}

pub struct MockStreamHandle {
    render: Mutex<Option<RenderFn>>,
    channels: u16,
    rate: u32,
    active: Arc<Mutex<bool>>,
    frames: Arc<AtomicU64>,
}

impl MockStreamHandle {
    /// Run one block through the stored render closure, as a test driver
    /// would. Allocates planar scratch buffers fresh each call since this is
    /// never the realtime path.
    pub fn pump(&self, frame_count: usize) -> Vec<Vec<f32>> {
        let mut buffers: Vec<Vec<f32>> = (0..self.channels as usize)
            .map(|_| vec![0.0f32; frame_count])
            .collect();
        {
            let guard = self.render.lock().unwrap();
            if let Some(render) = guard.as_ref() {
                let mut slices: Vec<&mut [f32]> =
                    buffers.iter_mut().map(|b| b.as_mut_slice()).collect();
                render(&mut slices, self.rate, frame_count);
            }
        }
        self.frames.fetch_add(frame_count as u64, Ordering::Relaxed);
        buffers
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// Borrow the mock stream's pump interface out of an opaque [`StreamHandle`].
/// Returns `None` if `stream` was opened against a different backend.
pub fn as_mock(stream: &StreamHandle) -> Option<&MockStreamHandle> {
    match &stream.0 {
        StreamHandleInner::Mock(h) => Some(h),
        StreamHandleInner::Cpal(_) => None,
    }
}
