//! Wire format: each channel as an IEEE-754 single, little-endian, channels
//! back to back. No header or framing; the receiver must know the channel
//! count (1 for `sine`, 2 for `exp` and `mSequence`).

use crate::waveform::Sample;
use num_complex::Complex32;

pub const BYTES_PER_CHANNEL: usize = 4;

/// Reusable per-tick encode buffer.
#[derive(Debug, Default)]
pub struct SampleEncoder {
    buf: Vec<u8>,
}

impl SampleEncoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(2 * BYTES_PER_CHANNEL),
        }
    }

    pub fn encode(&mut self, sample: &Sample) -> &[u8] {
        self.buf.clear();
        encode_into(sample, &mut self.buf);
        &self.buf
    }
}

pub fn encode_into(sample: &Sample, out: &mut Vec<u8>) {
    for v in sample.channels() {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn encode(sample: &Sample) -> Vec<u8> {
    let mut out = Vec::with_capacity(sample.channel_count() * BYTES_PER_CHANNEL);
    encode_into(sample, &mut out);
    out
}

/// Decodes raw channel values. Trailing bytes short of a full value are ignored.
pub fn decode_values(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_CHANNEL)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Regroups a received stream into samples of `channels` values (1 or 2).
pub fn decode_samples(bytes: &[u8], channels: usize) -> Vec<Sample> {
    let values = decode_values(bytes);
    match channels {
        1 => values.into_iter().map(Sample::Real).collect(),
        _ => values
            .chunks_exact(2)
            .map(|c| Sample::Iq(Complex32::new(c[0], c[1])))
            .collect(),
    }
}
