//! Speaker output device wrapper via cpal.
//!
//! Unlike the teacher's `CpalPlayback::play`, which blocks on a single
//! one-shot buffer per call, this wrapper only opens the device and hands
//! the real-time callback to [`super::engine::AudioEngine`], which owns the
//! persistent playback queue and state machine from spec §4.1.

use crate::config::AudioConfig;
use crate::error::{MateError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use super::DeviceInfo;

/// Speaker output device, opened at the engine's fixed sample rate.
pub struct CpalPlayback {
    device: cpal::Device,
    stream_config: cpal::StreamConfig,
}

impl CpalPlayback {
    /// Open the configured output device (or the first "default"-named
    /// device) at the engine's fixed sample rate.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if no matching device exists.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_output_device(&host, config.playback_device)?;
        let name = device.name().unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {name}");

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };

        Ok(Self {
            device,
            stream_config,
        })
    }

    /// Start the output stream, calling `render` once per callback to fill
    /// exactly the requested number of output frames, per spec §4.1's
    /// "produces exactly the requested number of output frames" contract.
    ///
    /// The returned stream must be kept alive for audio to play; dropping
    /// it stops the device.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if the stream cannot be built or started.
    pub fn start<F>(&self, mut render: F) -> Result<cpal::Stream>
    where
        F: FnMut(&mut [i16]) + Send + 'static,
    {
        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                    render(data);
                },
                move |err| {
                    tracing::error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| MateError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| MateError::Audio(format!("failed to start output stream: {e}")))?;

        Ok(stream)
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if devices cannot be enumerated.
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| MateError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut out = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device.name().unwrap_or_else(|_| "<unknown>".into());
            let max_output_channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let default_sample_rate = device
                .default_output_config()
                .map(|c| c.sample_rate())
                .unwrap_or(0);
            out.push(DeviceInfo {
                index,
                name,
                max_input_channels: 0,
                max_output_channels,
                default_sample_rate,
            });
        }
        Ok(out)
    }
}

fn select_output_device(host: &cpal::Host, index: Option<i32>) -> Result<cpal::Device> {
    match index {
        Some(i) if i >= 0 => {
            let devices: Vec<_> = host
                .output_devices()
                .map_err(|e| MateError::Audio(format!("cannot enumerate devices: {e}")))?
                .collect();
            devices.into_iter().nth(i as usize).ok_or_else(|| {
                MateError::Config(format!("output device index {i} out of range"))
            })
        }
        _ => {
            let mut devices = host
                .output_devices()
                .map_err(|e| MateError::Audio(format!("cannot enumerate devices: {e}")))?;
            let by_name = devices.find(|d| {
                d.name()
                    .map(|n| n.to_lowercase() == "default")
                    .unwrap_or(false)
            });
            match by_name {
                Some(d) => Ok(d),
                None => {
                    warn!("no device named 'default', falling back to host default output");
                    host.default_output_device()
                        .ok_or_else(|| MateError::Audio("no default output device".into()))
                }
            }
        }
    }
}
