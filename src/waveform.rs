use crate::code_table::CodeTable;
use crate::freq::phase_at;
use num_complex::Complex32;
use serde::Deserialize;
use std::fmt;

/// One tick's channel readings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    Real(f32),
    Iq(Complex32),
}

impl Sample {
    pub fn channel_count(&self) -> usize {
        match self {
            Sample::Real(_) => 1,
            Sample::Iq(_) => 2,
        }
    }

    /// Channel values in wire order (real part first for I/Q).
    pub fn channels(&self) -> impl Iterator<Item = f32> {
        let (a, b) = match *self {
            Sample::Real(x) => (x, None),
            Sample::Iq(c) => (c.re, Some(c.im)),
        };
        std::iter::once(a).chain(b)
    }

    pub fn map_channels(self, mut f: impl FnMut(f32) -> f32) -> Self {
        match self {
            Sample::Real(x) => Sample::Real(f(x)),
            Sample::Iq(c) => {
                let re = f(c.re);
                let im = f(c.im);
                Sample::Iq(Complex32::new(re, im))
            }
        }
    }
}

/// Configured waveform name. Unrecognized names fall back to `Sine`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum WaveformKind {
    #[default]
    Sine,
    Exp,
    MSequence,
}

impl WaveformKind {
    /// Strict lookup; `None` for names outside `sine | exp | mSequence`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "sine" => Some(WaveformKind::Sine),
            "exp" => Some(WaveformKind::Exp),
            "mSequence" | "msequence" | "mseq" => Some(WaveformKind::MSequence),
            _ => None,
        }
    }

    pub fn channel_count(self) -> usize {
        match self {
            WaveformKind::Sine => 1,
            WaveformKind::Exp | WaveformKind::MSequence => 2,
        }
    }
}

impl From<&str> for WaveformKind {
    fn from(s: &str) -> Self {
        WaveformKind::parse(s).unwrap_or_else(|| {
            tracing::warn!(waveform = s, "unrecognized waveform, falling back to sine");
            WaveformKind::Sine
        })
    }
}

impl From<String> for WaveformKind {
    fn from(s: String) -> Self {
        WaveformKind::from(s.as_str())
    }
}

impl fmt::Display for WaveformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WaveformKind::Sine => "sine",
            WaveformKind::Exp => "exp",
            WaveformKind::MSequence => "mSequence",
        })
    }
}

/// Waveform source, fixed for the run.
#[derive(Clone, Debug)]
pub enum Waveform {
    Sine,
    /// Unit phasor `cos + j·sin`.
    Exp,
    /// Two table entries per tick, wrapping. Ignores the frequency.
    CodeSequence(CodeTable),
}

impl Waveform {
    pub fn kind(&self) -> WaveformKind {
        match self {
            Waveform::Sine => WaveformKind::Sine,
            Waveform::Exp => WaveformKind::Exp,
            Waveform::CodeSequence(_) => WaveformKind::MSequence,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.kind().channel_count()
    }

    pub fn generate(&self, norm_freq: f64, n: u64) -> Sample {
        match self {
            Waveform::Sine => Sample::Real(phase_at(norm_freq, n).sin() as f32),
            Waveform::Exp => {
                let (s, c) = phase_at(norm_freq, n).sin_cos();
                Sample::Iq(Complex32::new(c as f32, s as f32))
            }
            Waveform::CodeSequence(table) => {
                let (re, im) = table.pair_at(n);
                Sample::Iq(Complex32::new(re, im))
            }
        }
    }
}
