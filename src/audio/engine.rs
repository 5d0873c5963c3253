//! `AudioEngine`: the process-wide full-duplex device, per spec §4.1.
//!
//! New code — the teacher has no persistent mixed-queue playback
//! primitive — grounded in the idiom of `capture.rs`/`playback.rs` (device
//! selection, `MateError::Audio` mapping, shared state behind a mutex held
//! only for the callback's duration).

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info};

use crate::error::{MateError, Result};
use crate::config::AudioConfig;

use super::capture::{CaptureGuard, CpalCapture};
use super::playback::CpalPlayback;
use super::resample::{f32_to_i16, resample_linear};
use super::{DeviceInfo, PlaybackItem};

/// Samples as supplied to [`AudioEngine::play_audio`], per spec §4.1's
/// `play_audio` contract: integer samples used verbatim, float samples
/// scaled with clipping, or an encoded container (WAV per spec §4.1; MP3
/// as well, since the TTS pipeline's cached phrases and remote synthesis
/// responses are MP3, per spec §4.5's cache-filename convention) decoded
/// on enqueue.
pub enum PcmSource {
    I16(Vec<i16>),
    F32(Vec<f32>),
    Encoded(Vec<u8>),
}

struct CurrentBuffer {
    samples: Vec<i16>,
    position: usize,
}

struct PlaybackState {
    queue: VecDeque<PlaybackItem>,
    current: Option<CurrentBuffer>,
    leftover_silence: usize,
    stop: bool,
}

impl PlaybackState {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.current.is_none() && self.leftover_silence == 0
    }

    /// Enqueue an item for playback, clearing a previously-set stop latch
    /// so the render callback resumes instead of emitting silence forever,
    /// per spec §4.1's `play_audio` contract.
    fn enqueue(&mut self, item: PlaybackItem) {
        self.stop = false;
        self.queue.push_back(item);
    }
}

/// The process-wide audio engine: owns both device streams and the
/// playback queue/state machine from spec §4.1.
pub struct AudioEngine {
    capture: CpalCapture,
    _playback_stream: cpal::Stream,
    state: Arc<Mutex<PlaybackState>>,
    sample_rate: u32,
    closed: AtomicBool,
}

// `cpal::Stream` is not `Sync` on some backends; the engine only ever
// touches it to drop it in `close`, from the owning thread.
unsafe impl Send for AudioEngine {}
unsafe impl Sync for AudioEngine {}

impl AudioEngine {
    /// Open capture and playback devices and start both streams
    /// immediately, per spec §4.1.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] (or [`MateError::Config`] for an
    /// invalid device index) if either device fails to open.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let capture = CpalCapture::new(config)?;
        let playback = CpalPlayback::new(config)?;

        let state = Arc::new(Mutex::new(PlaybackState {
            queue: VecDeque::new(),
            current: None,
            leftover_silence: 0,
            stop: false,
        }));
        let state_cb = state.clone();
        let sample_rate = config.sample_rate;
        let silence_frames = sample_rate as usize;

        let stream = playback.start(move |out: &mut [i16]| {
            let mut state = match state_cb.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            render_output(&mut state, out, sample_rate, silence_frames);
        })?;

        info!("audio engine started: {sample_rate}Hz mono, both streams live");

        Ok(Self {
            capture,
            _playback_stream: stream,
            state,
            sample_rate,
            closed: AtomicBool::new(false),
        })
    }

    /// Begin a capture session, per spec §4.1's `record_stream` contract.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if a capture session is already active.
    pub fn record_stream(&self) -> Result<CaptureGuard> {
        self.capture.record_stream()
    }

    /// Enqueue a [`PcmSource`] for playback. For [`PcmSource::I16`] and
    /// [`PcmSource::F32`], `sample_rate` names the rate those samples were
    /// captured at; for [`PcmSource::Encoded`], the container's own
    /// sample rate is used and `sample_rate` is ignored. Clears a
    /// previously-set [`Self::stop_playback`] latch, so a subsequent call
    /// after an interrupted turn is audible rather than silently dropped.
    /// Non-blocking, per spec §4.1.
    pub fn play_audio(&self, sample_rate: u32, source: PcmSource) -> Result<()> {
        let (source_sample_rate, samples) = match source {
            PcmSource::I16(s) => (sample_rate, s),
            PcmSource::F32(s) => (sample_rate, f32_to_i16(&s)),
            PcmSource::Encoded(bytes) => decode_encoded_audio(&bytes)?,
        };
        let mut state = self.state.lock().expect("playback state lock poisoned");
        state.enqueue(PlaybackItem {
            source_sample_rate,
            samples,
        });
        Ok(())
    }

    /// Set the stop signal and drain the queue; does not close the device,
    /// per spec §4.1.
    pub fn stop_playback(&self) {
        let mut state = self.state.lock().expect("playback state lock poisoned");
        state.stop = true;
        state.queue.clear();
        state.current = None;
        state.leftover_silence = 0;
    }

    /// Block until the queue is empty, the current buffer is exhausted,
    /// leftover silence is zero, and a subsequent one-second observation
    /// window sees no new work, per spec §4.1/§8 property 5.
    ///
    /// Polls every ~10 ms, per spec §5's suspension-point note.
    pub async fn wait_until_playback_finished(&self) {
        loop {
            while !self.is_idle() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.is_idle() {
                return;
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.is_idle())
            .unwrap_or(true)
    }

    /// Stop both signals and release device resources. Idempotent, per
    /// spec §4.1.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        self.stop_playback();
        info!("audio engine closed");
    }

    /// List both input and output devices for diagnostics, per spec §4.1's
    /// failure model ("surfaces a fatal configuration error with the full
    /// device table").
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if devices cannot be enumerated.
    pub fn list_devices() -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>)> {
        Ok((CpalCapture::list_devices()?, CpalPlayback::list_devices()?))
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// The playback device callback's state machine, per spec §4.1 items 1-5.
fn render_output(
    state: &mut PlaybackState,
    out: &mut [i16],
    engine_rate: u32,
    silence_frames: usize,
) {
    let mut written = 0;
    while written < out.len() {
        // 1. Stop signal: emit silence for the remainder of this call.
        if state.stop {
            out[written..].fill(0);
            return;
        }

        // 2. Leftover inter-item silence budget.
        if state.leftover_silence > 0 {
            let n = state.leftover_silence.min(out.len() - written);
            out[written..written + n].fill(0);
            state.leftover_silence -= n;
            written += n;
            continue;
        }

        // 3. Current buffer.
        if let Some(current) = &mut state.current {
            let remaining = current.samples.len() - current.position;
            if remaining > 0 {
                let n = remaining.min(out.len() - written);
                out[written..written + n]
                    .copy_from_slice(&current.samples[current.position..current.position + n]);
                current.position += n;
                written += n;
                continue;
            }
            state.current = None;
            state.leftover_silence = silence_frames;
            continue;
        }

        // 4. Dequeue next item, resampling to engine rate.
        if let Some(item) = state.queue.pop_front() {
            let samples = resample_linear(&item.samples, item.source_sample_rate, engine_rate);
            state.current = Some(CurrentBuffer {
                samples,
                position: 0,
            });
            continue;
        }

        // 5. Nothing to play: pad with silence.
        out[written..].fill(0);
        return;
    }
}

/// Decode an MP3 or WAV byte blob into mono 16-bit PCM at the container's
/// own sample rate, mixing down any extra channels. Used for
/// `play_audio`'s encoded-bytes input form (spec §4.1, extended for the
/// TTS pipeline's MP3 cache per spec §4.5).
fn decode_encoded_audio(bytes: &[u8]) -> Result<(u32, Vec<i16>)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(cursor)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| MateError::Audio(format!("failed to probe audio blob: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| MateError::Audio("audio blob has no default track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| MateError::Audio("audio blob has unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| MateError::Audio(format!("failed to create decoder: {e}")))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(MateError::Audio(format!("audio read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(MateError::Audio(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let needs_new = match sample_buf.as_ref() {
            Some(b) => (b.capacity()) < (frames as usize).saturating_mul(channels),
            None => true,
        };
        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        } else if let Some(b) = sample_buf.as_mut() {
            b.clear();
        }
        let Some(buf) = sample_buf.as_mut() else { continue };
        buf.copy_interleaved_ref(decoded);

        if channels > 1 {
            mono.extend(buf.samples().chunks_exact(channels).map(|frame| {
                frame.iter().sum::<f32>() / channels as f32
            }));
        } else {
            mono.extend_from_slice(buf.samples());
        }
    }

    Ok((sample_rate, f32_to_i16(&mono)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
            for &s in samples {
                writer.write_sample(s).expect("write sample");
            }
            writer.finalize().expect("finalize wav");
        }
        cursor.into_inner()
    }

    #[test]
    fn decode_encoded_audio_round_trips_a_wav_blob() {
        let original = vec![100i16, -200, 300, -400];
        let bytes = wav_bytes(&original, 22_050);
        let (rate, samples) = decode_encoded_audio(&bytes).expect("should decode");
        assert_eq!(rate, 22_050);
        assert_eq!(samples.len(), original.len());
        for (a, b) in samples.iter().zip(original.iter()) {
            assert!((*a - *b).abs() <= 1, "decoded {a} too far from original {b}");
        }
    }

    fn state(queue: Vec<PlaybackItem>) -> PlaybackState {
        PlaybackState {
            queue: queue.into(),
            current: None,
            leftover_silence: 0,
            stop: false,
        }
    }

    #[test]
    fn stop_signal_emits_silence() {
        let mut s = state(vec![]);
        s.stop = true;
        let mut out = vec![1i16; 8];
        render_output(&mut s, &mut out, 16_000, 16_000);
        assert!(out.iter().all(|&x| x == 0));
    }

    #[test]
    fn empty_queue_emits_silence() {
        let mut s = state(vec![]);
        let mut out = vec![7i16; 4];
        render_output(&mut s, &mut out, 16_000, 16_000);
        assert!(out.iter().all(|&x| x == 0));
    }

    #[test]
    fn dequeues_and_plays_item_samples_in_order() {
        let mut s = state(vec![PlaybackItem {
            source_sample_rate: 16_000,
            samples: vec![10, 20, 30, 40],
        }]);
        let mut out = vec![0i16; 4];
        render_output(&mut s, &mut out, 16_000, 16_000);
        assert_eq!(out, vec![10, 20, 30, 40]);
        assert!(s.queue.is_empty());
    }

    #[test]
    fn item_exhaustion_starts_one_second_silence_padding() {
        let mut s = state(vec![PlaybackItem {
            source_sample_rate: 16_000,
            samples: vec![1, 2],
        }]);
        let mut out = vec![0i16; 2];
        render_output(&mut s, &mut out, 16_000, 16_000);
        assert_eq!(out, vec![1, 2]);
        assert!(s.current.is_none());
        assert_eq!(s.leftover_silence, 16_000);
    }

    #[test]
    fn leftover_silence_is_consumed_before_next_item() {
        let mut s = state(vec![PlaybackItem {
            source_sample_rate: 16_000,
            samples: vec![99],
        }]);
        s.leftover_silence = 3;
        let mut out = vec![5i16; 3];
        render_output(&mut s, &mut out, 16_000, 16_000);
        assert_eq!(out, vec![0, 0, 0]);
        assert_eq!(s.leftover_silence, 0);
        assert_eq!(s.queue.len(), 1);
    }

    #[test]
    fn enqueue_clears_a_previously_set_stop_latch() {
        let mut s = state(vec![]);
        s.stop = true;
        s.enqueue(PlaybackItem {
            source_sample_rate: 16_000,
            samples: vec![1, 2],
        });
        assert!(!s.stop);
        assert_eq!(s.queue.len(), 1);
    }

    #[test]
    fn is_idle_true_only_when_everything_empty() {
        let s = state(vec![]);
        assert!(s.is_idle());
        let mut s2 = state(vec![PlaybackItem {
            source_sample_rate: 16_000,
            samples: vec![1],
        }]);
        assert!(!s2.is_idle());
        s2.queue.clear();
        s2.leftover_silence = 1;
        assert!(!s2.is_idle());
    }
}
