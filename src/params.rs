use crate::error::ConfigError;
use crate::freq::normalize_freq;
use crate::noise::MAX_NOISE_AMP;
use crate::pacing::PacingMode;
use crate::transport::TransportKind;
use crate::waveform::WaveformKind;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Run configuration, fixed before the first tick.
pub struct Config {
    /// Peer address, `host:port`.
    pub addr: String,
    pub transport: TransportKind,
    pub waveform: WaveformKind,
    pub freq_hz: f64,
    /// Uniform noise half-width added to every channel. 0 disables noise.
    pub noise_amp: f64,
    pub sample_rate_hz: f64,

    /// Little-endian f32 table for `mSequence`.
    pub code_table: Option<PathBuf>,
    /// 0 = block indefinitely.
    pub write_timeout_ms: u64,
    /// Noise RNG seed; OS entropy when absent.
    pub seed: Option<u64>,
    pub pacing: PacingMode,
    /// Stop after this many ticks (0 = run until cancelled).
    pub max_samples: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6969".to_string(),
            transport: TransportKind::Tcp,
            waveform: WaveformKind::Sine,
            freq_hz: 1.0,
            noise_amp: 0.0,
            sample_rate_hz: 100_000.0,
            code_table: None,
            write_timeout_ms: 0,
            seed: None,
            pacing: PacingMode::Deadline,
            max_samples: 0,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: Config = toml::from_str(&content).context("parse config toml")?;
        Ok(cfg)
    }

    /// Sets the rate from a quantized time step in microseconds.
    pub fn set_delta_t_us(&mut self, delta_t_us: f64) {
        self.sample_rate_hz = 1e6 / delta_t_us;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fs = self.sample_rate_hz;
        if !fs.is_finite() || fs <= 0.0 || (1.0 / fs) < 1e-9 {
            return Err(ConfigError::SampleRate(fs));
        }
        if !self.freq_hz.is_finite() {
            return Err(ConfigError::Frequency(self.freq_hz));
        }
        if !(0.0..=MAX_NOISE_AMP as f64).contains(&self.noise_amp) {
            return Err(ConfigError::NoiseAmplitude(self.noise_amp));
        }
        if self.waveform == WaveformKind::MSequence && self.code_table.is_none() {
            return Err(ConfigError::MissingCodeTable);
        }
        Ok(())
    }

    /// Δt. Only meaningful after `validate`.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz)
    }

    pub fn norm_freq(&self) -> f64 {
        normalize_freq(self.freq_hz, self.sample_rate_hz)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}
