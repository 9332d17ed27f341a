use crate::error::ResourceLoadError;
use std::path::Path;

/// Feedback taps (offsets into the shift register) of a maximum-length sequence.
fn mls_taps(nbits: u32) -> Option<&'static [usize]> {
    let taps: &'static [usize] = match nbits {
        2 => &[1],
        3 => &[2],
        4 => &[3],
        5 => &[3],
        6 => &[5],
        7 => &[6],
        8 => &[7, 6, 1],
        9 => &[5],
        10 => &[7],
        11 => &[9],
        12 => &[11, 10, 4],
        13 => &[12, 11, 8],
        14 => &[13, 12, 2],
        15 => &[14],
        16 => &[15, 13, 4],
        _ => return None,
    };
    Some(taps)
}

/// Maximum-length LFSR sequence of `2^nbits - 1` bits, all-ones seed.
pub fn max_len_seq(nbits: u32) -> Result<Vec<u8>, ResourceLoadError> {
    let taps = mls_taps(nbits).ok_or(ResourceLoadError::UnsupportedBits(nbits))?;
    let nb = nbits as usize;
    let len = (1usize << nb) - 1;
    let mut state = vec![1u8; nb];
    let mut idx = 0usize;
    let mut seq = Vec::with_capacity(len);
    for _ in 0..len {
        let mut fb = state[idx];
        seq.push(fb);
        for &t in taps {
            fb ^= state[(t + idx) % nb];
        }
        state[idx] = fb;
        idx = (idx + 1) % nb;
    }
    Ok(seq)
}

/// Read-only pseudo-random code, indexed modulo its length.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeTable {
    values: Vec<f32>,
}

impl CodeTable {
    pub fn new(values: Vec<f32>) -> Result<Self, ResourceLoadError> {
        if values.is_empty() {
            return Err(ResourceLoadError::Empty);
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(ResourceLoadError::NonFinite(i));
        }
        Ok(Self { values })
    }

    /// Loads a flat file of little-endian f32 values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ResourceLoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ResourceLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.len() % 4 != 0 {
            return Err(ResourceLoadError::Misaligned {
                path: path.to_path_buf(),
                len: bytes.len(),
            });
        }
        let table = Self::new(decode_f32_le(&bytes))?;
        tracing::info!(path = %path.display(), entries = table.len(), "loaded code table");
        Ok(table)
    }

    /// Chips of an `nbits` maximum-length sequence mapped to `±1/√2`,
    /// each emitted as an equal real/imaginary pair.
    pub fn from_mls(nbits: u32) -> Result<Self, ResourceLoadError> {
        let amp = std::f32::consts::FRAC_1_SQRT_2;
        let values = max_len_seq(nbits)?
            .into_iter()
            .flat_map(|b| {
                let v = if b == 0 { -amp } else { amp };
                [v, v]
            })
            .collect();
        Self::new(values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Entries `2n` and `2n+1`, both modulo the table length.
    pub fn pair_at(&self, n: u64) -> (f32, f32) {
        let len = self.values.len() as u64;
        let base = 2 * (n % len);
        let i0 = (base % len) as usize;
        let i1 = ((base + 1) % len) as usize;
        (self.values[i0], self.values[i1])
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn write(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_le_bytes())
    }
}

fn decode_f32_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
