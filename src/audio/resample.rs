//! Linear sample-rate conversion.
//!
//! Generalizes the downsampling-only helper in the teacher's capture loop
//! into a symmetric linear resampler: speech energy above 8 kHz is
//! negligible, so no anti-alias filter is used in either direction.

/// Resample `samples` from `src_rate` to `dst_rate` using linear
/// interpolation. Target length is `round(src_len * dst_rate / src_rate)`,
/// per spec §4.1.
#[must_use]
pub fn resample_linear(samples: &[i16], src_rate: u32, dst_rate: u32) -> Vec<i16> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }

    output
}

/// Convert floating-point samples in `[-1.0, 1.0]` to 16-bit signed PCM,
/// clipping out-of-range values, per spec §4.1's `play_audio` contract.
#[must_use]
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_rates_match() {
        let samples = vec![1i16, 2, 3, 4];
        assert_eq!(resample_linear(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn upsample_doubles_length_approximately() {
        let samples = vec![0i16, 1000, 2000, 3000, 4000];
        let out = resample_linear(&samples, 8_000, 16_000);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn downsample_halves_length_approximately() {
        let samples = vec![0i16; 1000];
        let out = resample_linear(&samples, 16_000, 8_000);
        assert_eq!(out.len(), 500);
    }

    #[test]
    fn f32_to_i16_clips_out_of_range() {
        let out = f32_to_i16(&[-2.0, 0.0, 2.0]);
        assert_eq!(out[0], i16::MIN + 1); // -1.0 * MAX rounds to -MAX, not MIN
        assert_eq!(out[1], 0);
        assert_eq!(out[2], i16::MAX);
    }
}
