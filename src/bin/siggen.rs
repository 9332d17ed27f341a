use anyhow::Context;
use clap::Parser;
use sigstream::error::RunError;
use sigstream::pacing::{self, CancelToken, PacingMode};
use sigstream::params::Config;
use sigstream::transport::TransportKind;
use sigstream::waveform::WaveformKind;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(about = "Streams a synthetic waveform as raw f32 LE samples over TCP or UDP")]
struct Args {
    /// Load settings from a TOML file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target address in the format x.x.x.x:port [default: 127.0.0.1:6969]
    #[arg(long)]
    ip: Option<String>,

    /// Transport protocol [default: tcp]
    #[arg(long, value_enum, ignore_case = true)]
    proto: Option<TransportKind>,

    /// Waveform: "sine", "exp" or "mSequence" (anything else streams a sine)
    #[arg(long)]
    waveform: Option<String>,

    /// Target frequency in Hz [default: 1]
    #[arg(long)]
    freq: Option<f64>,

    /// Uniform noise amplitude added to every channel [default: 0]
    #[arg(long)]
    noise: Option<f64>,

    /// Sample rate in Hz [default: 100000]
    #[arg(long, conflicts_with = "delta_t_us")]
    sample_rate_hz: Option<f64>,

    /// Quantized time step in microseconds (alternative to --sample-rate-hz)
    #[arg(long)]
    delta_t_us: Option<f64>,

    /// Code table file (flat f32 LE) for the mSequence waveform
    #[arg(long)]
    code_table: Option<PathBuf>,

    /// Write timeout in milliseconds (0 = no timeout)
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Noise RNG seed (random if unset)
    #[arg(long)]
    seed: Option<u64>,

    /// Pacing policy [default: deadline]
    #[arg(long, value_enum)]
    pacing: Option<PacingMode>,

    /// Stop after N samples (0 = run until interrupted)
    #[arg(long)]
    samples: Option<u64>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(v) = self.ip {
            cfg.addr = v;
        }
        if let Some(v) = self.proto {
            cfg.transport = v;
        }
        if let Some(v) = self.waveform {
            cfg.waveform = WaveformKind::from(v.as_str());
        }
        if let Some(v) = self.freq {
            cfg.freq_hz = v;
        }
        if let Some(v) = self.noise {
            cfg.noise_amp = v;
        }
        if let Some(v) = self.sample_rate_hz {
            cfg.sample_rate_hz = v;
        }
        if let Some(v) = self.delta_t_us {
            cfg.set_delta_t_us(v);
        }
        if let Some(v) = self.code_table {
            cfg.code_table = Some(v);
        }
        if let Some(v) = self.write_timeout_ms {
            cfg.write_timeout_ms = v;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        if let Some(v) = self.pacing {
            cfg.pacing = v;
        }
        if let Some(v) = self.samples {
            cfg.max_samples = v;
        }
        Ok(cfg)
    }
}

fn run(cfg: &Config, cancel: &CancelToken) -> Result<(), RunError> {
    let mut lp = pacing::start(cfg)?;
    lp.run(cancel)?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = match Args::parse().into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler.cancel()).context("install signal handler") {
        tracing::error!("{e:#}");
        return ExitCode::from(1);
    }

    match run(&cfg, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ RunError::Transport { .. }) => {
            tracing::error!("{e}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("startup failed: {e}");
            ExitCode::from(1)
        }
    }
}
