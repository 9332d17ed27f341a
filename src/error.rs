use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid run configuration. Always fatal, reported before streaming starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("sample rate must be finite and > 0, got {0}")]
    SampleRate(f64),

    #[error("frequency must be finite, got {0}")]
    Frequency(f64),

    #[error("noise amplitude must be within [0, f32::MAX / 4], got {0}")]
    NoiseAmplitude(f64),

    #[error("waveform `mSequence` needs a code table file")]
    MissingCodeTable,

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Failure to load the external code table.
#[derive(Error, Debug)]
pub enum ResourceLoadError {
    #[error("read code table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("code table {path} is {len} bytes, not a multiple of 4")]
    Misaligned { path: PathBuf, len: usize },

    #[error("code table is empty")]
    Empty,

    #[error("code table contains a non-finite value at index {0}")]
    NonFinite(usize),

    #[error("no maximum-length tap set for {0} bits (supported: 2..=16)")]
    UnsupportedBits(u32),
}

/// Write failure on the outbound connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The tick is lost, the stream goes on.
    #[error("transient write failure: {0}")]
    Transient(#[source] io::Error),

    /// The peer is gone or the byte stream can no longer be trusted.
    #[error("fatal write failure: {0}")]
    Fatal(#[source] io::Error),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

/// Why a streaming run stopped abnormally.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceLoadError),

    #[error("stream already terminated; build a new loop to stream again")]
    AlreadyTerminated,

    #[error("stream terminated after {ticks} ticks: {source}")]
    Transport {
        ticks: u64,
        #[source]
        source: TransportError,
    },
}
