//! Microphone capture via cpal, fixed at 16 kHz mono per spec §4.1.
//!
//! Unlike the teacher's capture loop, there is no downsampling path here:
//! the engine demands a fixed capture rate, so device selection picks the
//! configured index (or the first device named "default") and opens the
//! stream at that rate directly; cpal's config negotiation rejects an
//! unsupported rate as a configuration error rather than resampling in the
//! callback.

use crate::config::AudioConfig;
use crate::error::{MateError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{AudioFrame, DeviceInfo};

/// Microphone capture device. The stream opens and starts at construction
/// and runs for the process lifetime, per spec §4.1; `recording_active`
/// gates whether callback frames reach a consumer.
pub struct CpalCapture {
    _stream: cpal::Stream,
    active: Arc<AtomicBool>,
    /// Holds the receiver between `record_stream` calls. Spec §4.1 notes a
    /// second concurrent consumer's behavior is undefined, so a single
    /// slot suffices; `None` while a guard is checked out. Wrapped in an
    /// `Arc` so a checked-out [`CaptureGuard`] can outlive a borrow of
    /// `self` and move into spawned tasks.
    rx_slot: Arc<Mutex<Option<mpsc::Receiver<AudioFrame>>>>,
}

impl CpalCapture {
    /// Open the configured input device (or the first "default"-named
    /// device) at the engine's fixed sample rate and start capturing
    /// immediately. `recording_active` starts false: callback frames are
    /// dropped until the first `record_stream()` call.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if no matching device exists, the
    /// engine rate is unsupported, or the stream cannot be started.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_input_device(&host, config.microphone_device)?;
        let name = device.name().unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {name}");

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };

        let (tx, rx) = mpsc::channel::<AudioFrame>(64);
        let active = Arc::new(AtomicBool::new(false));
        let active_cb = active.clone();
        let sample_rate = config.sample_rate;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                    if !active_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    let frame = AudioFrame::new(data.to_vec(), sample_rate);
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
                        debug!("capture channel full, dropping frame");
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| MateError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| MateError::Audio(format!("failed to start input stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            active,
            rx_slot: Arc::new(Mutex::new(Some(rx))),
        })
    }

    /// Start a capture session: clears the stop state and sets
    /// `recording_active`, per spec §4.1. Only one session may be checked
    /// out at a time.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if a session is already checked out.
    pub fn record_stream(&self) -> Result<CaptureGuard> {
        let rx = self
            .rx_slot
            .lock()
            .expect("capture receiver lock poisoned")
            .take()
            .ok_or_else(|| MateError::Audio("record_stream: a consumer is already active".into()))?;
        self.active.store(true, Ordering::Relaxed);
        Ok(CaptureGuard {
            active: self.active.clone(),
            rx_slot: self.rx_slot.clone(),
            rx: Some(rx),
        })
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if devices cannot be enumerated.
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| MateError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut out = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device.name().unwrap_or_else(|_| "<unknown>".into());
            let max_input_channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let default_sample_rate = device
                .default_input_config()
                .map(|c| c.sample_rate())
                .unwrap_or(0);
            out.push(DeviceInfo {
                index,
                name,
                max_input_channels,
                max_output_channels: 0,
                default_sample_rate,
            });
        }
        Ok(out)
    }
}

/// A checked-out capture session returned by [`CpalCapture::record_stream`].
///
/// Dropping the guard clears `recording_active`, drains residual queued
/// frames, and returns the receiver to the capture device for reuse, per
/// spec §4.1's "exiting the sequence" contract.
pub struct CaptureGuard {
    active: Arc<AtomicBool>,
    rx_slot: Arc<Mutex<Option<mpsc::Receiver<AudioFrame>>>>,
    rx: Option<mpsc::Receiver<AudioFrame>>,
}

impl CaptureGuard {
    /// Await the next captured frame, or `None` if the device is gone.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        match &mut self.rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        if let Some(mut rx) = self.rx.take() {
            while rx.try_recv().is_ok() {}
            *self.rx_slot.lock().expect("capture receiver lock poisoned") = Some(rx);
        }
    }
}

/// Device selection: explicit index from configuration, or the first
/// device whose lowercased name equals "default", per spec §3/§6.
fn select_input_device(host: &cpal::Host, index: Option<i32>) -> Result<cpal::Device> {
    match index {
        Some(i) if i >= 0 => {
            let devices: Vec<_> = host
                .input_devices()
                .map_err(|e| MateError::Audio(format!("cannot enumerate devices: {e}")))?
                .collect();
            devices
                .into_iter()
                .nth(i as usize)
                .ok_or_else(|| MateError::Config(format!("input device index {i} out of range")))
        }
        _ => {
            let mut devices = host
                .input_devices()
                .map_err(|e| MateError::Audio(format!("cannot enumerate devices: {e}")))?;
            let by_name = devices.find(|d| {
                d.name()
                    .map(|n| n.to_lowercase() == "default")
                    .unwrap_or(false)
            });
            match by_name {
                Some(d) => Ok(d),
                None => {
                    warn!("no device named 'default', falling back to host default input");
                    host.default_input_device()
                        .ok_or_else(|| MateError::Audio("no default input device".into()))
                }
            }
        }
    }
}
