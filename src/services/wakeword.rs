//! MFCC+DTW wake word spotter, per spec §4.3.
//!
//! The detection algorithm (mel filterbank, DCT-II, DTW distance) is taken
//! nearly whole from `examples/saorsa-labs-fae/src/wakeword.rs`: vendor
//! wake-word bindings (Picovoice) are named out of scope by spec §1, but a
//! concrete, dependency-light detector is exactly the kind of thin,
//! in-scope shim spec §1 asks the core to own. Adapted: `threshold` is
//! driven by `WAKEWORD_THRESHOLD/500` (spec §6) and `listen(stop_event)`
//! races the wake-word window against an external cancellation instead of
//! exposing a bare polling `process()` method (spec §4.3).

use std::path::{Path, PathBuf};

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::audio::AudioEngine;
use crate::config::WakewordConfig;
use crate::error::{MateError, Result};

const DEFAULT_NUM_MFCC: usize = 13;
const FRAME_SIZE: usize = 400;
const HOP_SIZE: usize = 160;
const NUM_MEL_FILTERS: usize = 26;
const EXPECTED_SAMPLE_RATE: u32 = 16_000;

#[derive(Clone)]
struct Reference {
    mfccs: Vec<Vec<f32>>,
}

/// Wake word detector: fatal at construction if its reference recordings
/// are missing, per spec §4.3.
pub struct WakewordAdapter {
    references: Vec<Reference>,
    mel_filterbank: Vec<Vec<f32>>,
    num_mfcc: usize,
    threshold: f32,
    word: String,
}

impl WakewordAdapter {
    /// Load reference recordings from `references_dir` and build the mel
    /// filterbank for the fixed 16 kHz capture rate.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Config`] if no references load.
    pub fn new(config: &WakewordConfig, references_dir: &Path) -> Result<Self> {
        let mel_filterbank = build_mel_filterbank(NUM_MEL_FILTERS, FRAME_SIZE, EXPECTED_SAMPLE_RATE);
        let references = load_references(references_dir, DEFAULT_NUM_MFCC, &mel_filterbank)?;

        if references.is_empty() {
            return Err(MateError::Config(format!(
                "no wake word reference recordings found under {}",
                references_dir.display()
            )));
        }

        info!(
            "wakeword adapter '{}' loaded {} references, sensitivity={:.2}",
            config.word,
            references.len(),
            config.sensitivity()
        );

        Ok(Self {
            references,
            mel_filterbank,
            num_mfcc: DEFAULT_NUM_MFCC,
            threshold: config.sensitivity(),
            word: config.word.clone(),
        })
    }

    /// Consume capture frames from `engine` until the wake word is
    /// detected or `stop` fires, per spec §4.3. Returns `true` on
    /// detection, `false` if `stop` fired first.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if a capture session cannot be opened.
    pub async fn listen(&self, engine: &AudioEngine, stop: CancellationToken) -> Result<bool> {
        let mut guard = engine.record_stream()?;
        let window_samples = EXPECTED_SAMPLE_RATE as usize;
        let mut audio_buffer: Vec<f32> = Vec::with_capacity(window_samples + FRAME_SIZE);

        loop {
            tokio::select! {
                () = stop.cancelled() => return Ok(false),
                frame = guard.next_frame() => {
                    let Some(frame) = frame else { return Ok(false) };
                    let samples: Vec<f32> = frame
                        .samples()
                        .iter()
                        .map(|&s| s as f32 / i16::MAX as f32)
                        .collect();
                    if self.process_window(&mut audio_buffer, &samples, window_samples) {
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn process_window(
        &self,
        audio_buffer: &mut Vec<f32>,
        samples: &[f32],
        window_samples: usize,
    ) -> bool {
        audio_buffer.extend_from_slice(samples);

        if audio_buffer.len() < window_samples {
            return false;
        }

        let window = &audio_buffer[audio_buffer.len() - window_samples..];
        let mfccs = extract_mfccs(window, self.num_mfcc, &self.mel_filterbank);

        let detected = if mfccs.is_empty() {
            false
        } else {
            let mut best_score: f32 = 0.0;
            for reference in &self.references {
                let dist = dtw_distance(&mfccs, &reference.mfccs);
                let score = 1.0 / (1.0 + dist);
                if score > best_score {
                    best_score = score;
                }
            }
            best_score >= self.threshold
        };

        let drain_amount = window_samples / 2;
        if audio_buffer.len() > drain_amount {
            audio_buffer.drain(..drain_amount);
        }

        detected
    }

    /// Always available: the detector is a local, vendor-neutral model
    /// with no network dependency.
    #[must_use]
    pub fn check_availability(&self) -> bool {
        true
    }

    #[must_use]
    pub fn config_str(&self) -> String {
        format!("wakeword={} threshold={:.2}", self.word, self.threshold)
    }
}

fn load_references(
    dir: &Path,
    num_mfcc: usize,
    mel_filterbank: &[Vec<f32>],
) -> Result<Vec<Reference>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut refs = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| MateError::Config(format!("cannot read references dir: {e}")))?;

    for entry in entries {
        let entry = entry.map_err(|e| MateError::Config(format!("cannot read dir entry: {e}")))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wav") {
            continue;
        }

        match load_wav_mono_16k(&path) {
            Ok(samples) => {
                let mfccs = extract_mfccs(&samples, num_mfcc, mel_filterbank);
                if !mfccs.is_empty() {
                    info!("loaded wakeword reference: {}", path.display());
                    refs.push(Reference { mfccs });
                }
            }
            Err(e) => {
                info!("skipping invalid reference {}: {e}", path.display());
            }
        }
    }

    Ok(refs)
}

fn load_wav_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| MateError::Config(format!("cannot open WAV {}: {e}", path.display())))?;

    let spec = reader.spec();
    if spec.sample_rate != EXPECTED_SAMPLE_RATE {
        return Err(MateError::Config(format!(
            "reference WAV must be {}Hz, got {}Hz: {}",
            EXPECTED_SAMPLE_RATE,
            spec.sample_rate,
            path.display()
        )));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map_err(|e| MateError::Config(format!("WAV read error: {e}")))
                        .map(|v| v as f32 / max)
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| MateError::Config(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    if spec.channels > 1 {
        let ch = spec.channels as usize;
        let mono: Vec<f32> = samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect();
        Ok(mono)
    } else {
        Ok(samples)
    }
}

fn extract_mfccs(samples: &[f32], num_mfcc: usize, mel_filterbank: &[Vec<f32>]) -> Vec<Vec<f32>> {
    if samples.len() < FRAME_SIZE {
        return Vec::new();
    }

    let num_frames = (samples.len() - FRAME_SIZE) / HOP_SIZE + 1;
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FRAME_SIZE);

    let mut frames = Vec::with_capacity(num_frames);

    for i in 0..num_frames {
        let start = i * HOP_SIZE;
        let end = start + FRAME_SIZE;
        if end > samples.len() {
            break;
        }

        let mut windowed: Vec<Complex<f32>> = samples[start..end]
            .iter()
            .enumerate()
            .map(|(n, &s)| {
                let w = 0.5
                    * (1.0
                        - (2.0 * std::f32::consts::PI * n as f32 / (FRAME_SIZE - 1) as f32).cos());
                Complex::new(s * w, 0.0)
            })
            .collect();

        fft.process(&mut windowed);

        let power_len = FRAME_SIZE / 2 + 1;
        let power: Vec<f32> = windowed[..power_len]
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im) / FRAME_SIZE as f32)
            .collect();

        let mel_energies: Vec<f32> = mel_filterbank
            .iter()
            .map(|filter| {
                let energy: f32 = filter.iter().zip(power.iter()).map(|(&f, &p)| f * p).sum();
                (energy.max(1e-10)).ln()
            })
            .collect();

        let mfcc = dct_ii(&mel_energies, num_mfcc);
        frames.push(mfcc);
    }

    frames
}

fn build_mel_filterbank(num_filters: usize, fft_size: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let power_len = fft_size / 2 + 1;
    let low_freq_mel = hz_to_mel(0.0);
    let high_freq_mel = hz_to_mel(sample_rate as f32 / 2.0);

    let num_points = num_filters + 2;
    let mel_points: Vec<f32> = (0..num_points)
        .map(|i| low_freq_mel + (high_freq_mel - low_freq_mel) * i as f32 / (num_points - 1) as f32)
        .collect();

    let hz_points: Vec<f32> = mel_points.iter().map(|&m| mel_to_hz(m)).collect();

    let bin_points: Vec<usize> = hz_points
        .iter()
        .map(|&hz| ((fft_size as f32 + 1.0) * hz / sample_rate as f32).floor() as usize)
        .collect();

    let mut filterbank = Vec::with_capacity(num_filters);
    for m in 0..num_filters {
        let mut filter = vec![0.0f32; power_len];
        let left = bin_points[m];
        let center = bin_points[m + 1];
        let right = bin_points[m + 2];

        if center > left {
            let denom = (center - left) as f32;
            for (i, val) in filter.iter_mut().enumerate().take(center).skip(left) {
                if i < power_len {
                    *val = (i - left) as f32 / denom;
                }
            }
        }
        if right > center {
            let denom = (right - center) as f32;
            for (i, val) in filter.iter_mut().enumerate().take(right + 1).skip(center) {
                if i < power_len {
                    *val = (right - i) as f32 / denom;
                }
            }
        }

        filterbank.push(filter);
    }

    filterbank
}

fn dct_ii(input: &[f32], num_coeffs: usize) -> Vec<f32> {
    let n = input.len();
    let mut result = Vec::with_capacity(num_coeffs);
    for k in 0..num_coeffs {
        let mut sum = 0.0f32;
        for (i, &val) in input.iter().enumerate() {
            sum +=
                val * (std::f32::consts::PI * k as f32 * (2 * i + 1) as f32 / (2 * n) as f32).cos();
        }
        result.push(sum);
    }
    result
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

fn dtw_distance(input: &[Vec<f32>], reference: &[Vec<f32>]) -> f32 {
    let n = input.len();
    let m = reference.len();

    if n == 0 || m == 0 {
        return f32::MAX;
    }

    let mut cost = vec![f32::MAX; (n + 1) * (m + 1)];
    let idx = |i: usize, j: usize| i * (m + 1) + j;

    cost[idx(0, 0)] = 0.0;

    for i in 1..=n {
        for j in 1..=m {
            let d = euclidean_distance(&input[i - 1], &reference[j - 1]);
            let prev = cost[idx(i - 1, j)]
                .min(cost[idx(i, j - 1)])
                .min(cost[idx(i - 1, j - 1)]);
            cost[idx(i, j)] = d + prev;
        }
    }

    cost[idx(n, m)] / (n + m) as f32
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Save audio samples as a 16 kHz mono WAV reference file, used by a
/// separate out-of-scope reference-recording tool (spec §1).
///
/// # Errors
///
/// Returns [`MateError::Config`] if the file cannot be written.
pub fn save_reference_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| MateError::Config(format!("cannot create WAV: {e}")))?;

    for &s in samples {
        let sample_i16 = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| MateError::Config(format!("WAV write error: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| MateError::Config(format!("WAV finalize error: {e}")))?;

    Ok(())
}

/// Default directory for wake word reference recordings.
#[must_use]
pub fn default_references_dir(data_root: &Path) -> PathBuf {
    data_root.join("wakeword")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hz_to_mel_and_back() {
        let hz = 1000.0;
        let mel = hz_to_mel(hz);
        let back = mel_to_hz(mel);
        assert!((hz - back).abs() < 0.1);
    }

    #[test]
    fn mel_filterbank_shape() {
        let fb = build_mel_filterbank(NUM_MEL_FILTERS, FRAME_SIZE, EXPECTED_SAMPLE_RATE);
        assert_eq!(fb.len(), NUM_MEL_FILTERS);
        for filter in &fb {
            assert_eq!(filter.len(), FRAME_SIZE / 2 + 1);
        }
    }

    #[test]
    fn dct_ii_dc_component_is_sum() {
        let input = vec![1.0, 2.0, 3.0, 4.0];
        let result = dct_ii(&input, 3);
        let expected_dc: f32 = input.iter().sum();
        assert!((result[0] - expected_dc).abs() < 0.01);
    }

    #[test]
    fn extract_mfccs_one_frame() {
        let fb = build_mel_filterbank(NUM_MEL_FILTERS, FRAME_SIZE, EXPECTED_SAMPLE_RATE);
        let samples = vec![0.0; FRAME_SIZE];
        let result = extract_mfccs(&samples, DEFAULT_NUM_MFCC, &fb);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].len(), DEFAULT_NUM_MFCC);
    }

    #[test]
    fn dtw_identical_sequences_have_zero_distance() {
        let seq = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let dist = dtw_distance(&seq, &seq);
        assert!(dist.abs() < 0.001);
    }

    #[test]
    fn dtw_different_sequences_have_large_distance() {
        let a = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        let b = vec![vec![10.0, 10.0], vec![10.0, 10.0]];
        assert!(dtw_distance(&a, &b) > 1.0);
    }

    #[test]
    fn dtw_empty_input_is_max_distance() {
        let a: Vec<Vec<f32>> = Vec::new();
        let b = vec![vec![1.0]];
        assert_eq!(dtw_distance(&a, &b), f32::MAX);
    }

    #[test]
    fn save_and_load_reference_wav_roundtrip() {
        let dir = std::env::temp_dir().join("vocalmate-wakeword-test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("test_ref.wav");

        let sample_rate = 16_000;
        let samples: Vec<f32> = (0..sample_rate)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect();

        save_reference_wav(&path, &samples, sample_rate).unwrap();
        assert!(path.exists());

        let loaded = load_wav_mono_16k(&path).unwrap();
        assert_eq!(loaded.len(), samples.len());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
