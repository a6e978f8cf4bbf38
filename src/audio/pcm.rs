//! 16-bit PCM codec primitives shared by capture and playback.

use base64::Engine as _;
use base64::engine::general_purpose;

use crate::{Error, Result};

/// Divisor used to map `i16` back to `[-1.0, 1.0)`.
pub const PCM_SCALE: f32 = 32_768.0;

/// Quantize one normalized sample. Negative values scale by 32768 and
/// positive values by 32767 so both rails map exactly; the product is
/// rounded to the nearest step.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32_768.0).round() as i16
    } else {
        (s * 32_767.0).round() as i16
    }
}

/// Float32 -> Int16 for a whole buffer.
#[must_use]
pub fn float_to_pcm16(input: &[f32]) -> Vec<i16> {
    input.iter().copied().map(quantize).collect()
}

/// Int16 -> Float32 using `sample / 32768.0`.
#[must_use]
pub fn pcm16_to_float(input: &[i16]) -> Vec<f32> {
    input.iter().map(|&s| f32::from(s) / PCM_SCALE).collect()
}

#[must_use]
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    buf
}

/// # Errors
/// Returns a protocol error if the byte count is odd.
#[allow(clippy::result_large_err)]
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Protocol(format!(
            "pcm16 payload has odd length ({} bytes)",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Samples -> base64 text for the wire.
#[must_use]
pub fn encode_base64(samples: &[i16]) -> String {
    general_purpose::STANDARD.encode(pcm16_to_le_bytes(samples))
}

/// Base64 text -> normalized floats ready for an output device.
///
/// # Errors
/// Returns an error if the payload is not valid base64 or not whole samples.
#[allow(clippy::result_large_err)]
pub fn decode_base64(data: &str) -> Result<Vec<f32>> {
    let bytes = general_purpose::STANDARD.decode(data.as_bytes())?;
    let samples = le_bytes_to_pcm16(&bytes)?;
    Ok(pcm16_to_float(&samples))
}

/// Root-mean-square of a buffer; 0 for an empty one.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt()
}

/// Linear resampling between two rates; good enough for speech.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resample(input: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || input.is_empty() || from_hz == 0 || to_hz == 0 {
        return input.to_vec();
    }
    let ratio = f64::from(from_hz) / f64::from(to_hz);
    let out_len = (input.len() as u64 * u64::from(to_hz) / u64::from(from_hz)) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(input.len() - 1)];
            let b = input[(idx + 1).min(input.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_scales_length_by_rate() {
        assert_eq!(resample(&[0.0, 1.0, 0.0, 1.0], 32_000, 16_000).len(), 2);
        let up = resample(&[0.5; 160], 16_000, 48_000);
        assert_eq!(up.len(), 480);
        assert!(up.iter().all(|s| (s - 0.5).abs() < 1e-6));
        assert_eq!(resample(&[0.1, 0.2], 24_000, 24_000), vec![0.1, 0.2]);
    }

    #[test]
    fn rails_map_exactly() {
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(-1.0), i16::MIN);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(3.5), i16::MAX);
        assert_eq!(quantize(-7.0), i16::MIN);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[allow(clippy::cast_precision_loss)]
    fn round_trip(wave: &[f32]) -> Vec<f32> {
        let encoded = encode_base64(&float_to_pcm16(wave));
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded.len(), wave.len());
        decoded
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn round_trip_within_one_step() {
        // Negatives scale by 32768 on both sides; positives below 0.5
        // stay inside one step despite the 32767 encode factor.
        let wave: Vec<f32> = (0..4096)
            .map(|i| (i as f32 * 0.05).sin().mul_add(0.7, -0.3))
            .chain([1.0, -1.0, 0.5, -0.5, 0.0])
            .collect();
        for (orig, back) in wave.iter().zip(round_trip(&wave)) {
            assert!(
                (orig - back).abs() <= 1.0 / PCM_SCALE,
                "sample {orig} came back as {back}"
            );
        }
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn full_scale_round_trip_is_bounded() {
        let wave: Vec<f32> = (0..=20_000).map(|i| i as f32 / 10_000.0 - 1.0).collect();
        for (orig, back) in wave.iter().zip(round_trip(&wave)) {
            assert!(
                (orig - back).abs() <= 1.5 / PCM_SCALE + f32::EPSILON,
                "sample {orig} came back as {back}"
            );
        }
    }

    #[test]
    fn odd_byte_payload_is_rejected() {
        assert!(matches!(le_bytes_to_pcm16(&[1, 2, 3]), Err(Error::Protocol(_))));
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }
}
