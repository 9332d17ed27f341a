//! Sample-clocked synthetic waveform streamer.

pub mod code_table;
pub mod error;
pub mod freq;
pub mod noise;
pub mod pacing;
pub mod params;
pub mod transport;
pub mod waveform;
pub mod wire;
