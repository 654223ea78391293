//! Little-endian f32 PCM <-> bytes
//!
//! Explicit per-sample conversion; raw memory is never reinterpreted.

/// Bytes per f32 sample
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Replace the contents of `out` with the little-endian bytes of `samples`
pub fn encode_f32_le(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * SAMPLE_BYTES);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Iterate the samples in `bytes`; a trailing partial sample is ignored
pub fn decode_f32_le(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(SAMPLE_BYTES)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian() {
        let mut out = vec![0xAA; 3];
        encode_f32_le(&[1.0], &mut out);
        assert_eq!(out, vec![0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn test_decode_ignores_partial_tail() {
        let mut bytes = Vec::new();
        encode_f32_le(&[0.5, -0.25], &mut bytes);
        bytes.push(0x01);

        let samples: Vec<f32> = decode_f32_le(&bytes).collect();
        assert_eq!(samples, vec![0.5, -0.25]);
    }
}
