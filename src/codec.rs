//! PCM wire codec
//!
//! The session link carries audio as little-endian signed 16-bit PCM,
//! base64-encoded inside JSON envelopes. These are pure conversions between
//! that wire form and the `f32` sample buffers the rest of the pipeline
//! works in. `to_wire`/`from_wire` are exact inverses up to one quantization
//! step per sample.

use base64::Engine;
use thiserror::Error;

/// Sample rate of microphone audio sent to the inference service.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized audio received from the inference service.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Errors surfaced while handling PCM payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("PCM payload of {len} bytes is not a multiple of {frame_bytes} bytes per frame")]
    MisalignedPayload { len: usize, frame_bytes: usize },
    #[error("PCM payload declares zero channels")]
    ZeroChannels,
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A decoded PCM buffer together with the format it was decoded at.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Playback duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() / self.channels as usize;
        frames as f64 / self.sample_rate as f64
    }
}

/// Scale `[-1.0, 1.0]` samples to signed 16-bit and pack little-endian.
pub fn to_wire(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (f64::from(sample) * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&scaled.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian signed 16-bit PCM and rescale to `[-1.0, 1.0]`.
///
/// The byte length must be a multiple of `2 × channels`, otherwise the
/// payload is rejected rather than silently truncated.
pub fn from_wire(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudio, CodecError> {
    if channels == 0 {
        return Err(CodecError::ZeroChannels);
    }

    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(CodecError::MisalignedPayload {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Base64-encode a PCM payload for the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a base64 PCM payload received from the wire.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_one_quantization_step() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.01).sin() * 0.8)
            .collect();

        let wire = to_wire(&samples);
        let decoded = from_wire(&wire, INPUT_SAMPLE_RATE, 1).unwrap();

        assert_eq!(decoded.samples.len(), samples.len());
        for (original, restored) in samples.iter().zip(&decoded.samples) {
            assert!(
                (original - restored).abs() <= 1.0 / 32768.0,
                "sample drifted by more than one LSB: {original} vs {restored}"
            );
        }
    }

    #[test]
    fn to_wire_clamps_out_of_range_samples() {
        let wire = to_wire(&[1.5, -1.5, 1.0, -1.0]);
        let decoded = from_wire(&wire, INPUT_SAMPLE_RATE, 1).unwrap();

        assert!(decoded.samples[0] <= 1.0);
        assert!(decoded.samples[1] >= -1.0);
        // Exactly -1.0 maps onto i16::MIN and back.
        assert_eq!(decoded.samples[3], -1.0);
    }

    #[test]
    fn from_wire_rejects_odd_byte_length() {
        let err = from_wire(&[0u8, 1, 2], OUTPUT_SAMPLE_RATE, 1).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MisalignedPayload { len: 3, frame_bytes: 2 }
        ));
    }

    #[test]
    fn from_wire_rejects_misaligned_stereo_payload() {
        // 6 bytes = 3 samples, not a whole number of stereo frames.
        let err = from_wire(&[0u8; 6], OUTPUT_SAMPLE_RATE, 2).unwrap_err();
        assert!(matches!(err, CodecError::MisalignedPayload { .. }));
    }

    #[test]
    fn empty_payload_is_valid() {
        let decoded = from_wire(&[], OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert!(decoded.samples.is_empty());
        assert_eq!(decoded.duration_secs(), 0.0);
    }

    #[test]
    fn duration_accounts_for_rate_and_channels() {
        let decoded = DecodedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        };
        assert!((decoded.duration_secs() - 1.0).abs() < 1e-9);

        let stereo = DecodedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 2,
        };
        assert!((stereo.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn base64_round_trip() {
        let payload = to_wire(&[0.25, -0.25, 0.5]);
        let encoded = encode_base64(&payload);
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn base64_decode_failure_is_typed() {
        let err = decode_base64("not!!valid@@base64").unwrap_err();
        assert!(matches!(err, CodecError::Base64(_)));
    }
}
