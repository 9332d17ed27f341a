//! Sample-clocked transmission loop.
//!
//! `Deadline` pacing releases tick `n` no earlier than `start + n·Δt` and
//! sends without sleeping while behind, so the long-run rate does not drift.
//! `Fixed` pacing sleeps a plain `Δt` after every tick; its rate falls short
//! of the target by the per-tick processing time.

use crate::code_table::CodeTable;
use crate::error::{ConfigError, RunError, TransportError};
use crate::noise::NoiseInjector;
use crate::params::Config;
use crate::transport::{SampleSink, Transmitter};
use crate::waveform::{Sample, Waveform, WaveformKind};
use crate::wire::SampleEncoder;
use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single sleep, bounds how late a cancellation is noticed.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    /// Tick `n` no earlier than `start + n·Δt`.
    #[default]
    Deadline,
    /// Plain `Δt` sleep after every tick.
    Fixed,
}

/// Stop request, checked at every tick boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sample index plus the constant Δt.
#[derive(Clone, Copy, Debug)]
pub struct SampleClock {
    n: u64,
    rate_hz: f64,
    interval: Duration,
}

impl SampleClock {
    /// Fails unless `rate_hz` is finite, positive and gives Δt of at least 1 ns.
    pub fn new(rate_hz: f64) -> Result<Self, ConfigError> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 || (1.0 / rate_hz) < 1e-9 {
            return Err(ConfigError::SampleRate(rate_hz));
        }
        Ok(Self {
            n: 0,
            rate_hz,
            interval: Duration::from_secs_f64(1.0 / rate_hz),
        })
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Scheduled offset of tick `n` from the start of the run.
    pub fn offset_of(&self, n: u64) -> Duration {
        Duration::from_secs_f64(n as f64 / self.rate_hz)
    }

    fn advance(&mut self) {
        self.n += 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Terminated,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RunStats {
    /// Ticks attempted, sent or dropped.
    pub ticks: u64,
    pub sent: u64,
    pub dropped: u64,
    pub elapsed: Duration,
    /// Worst lateness of a tick against its deadline.
    pub max_lag: Duration,
}

impl RunStats {
    pub fn achieved_rate_hz(&self) -> f64 {
        let s = self.elapsed.as_secs_f64();
        if s > 0.0 {
            self.ticks as f64 / s
        } else {
            0.0
        }
    }
}

pub struct PacingLoop<S: SampleSink, R: Rng> {
    waveform: Waveform,
    norm_freq: f64,
    noise: NoiseInjector<R>,
    encoder: SampleEncoder,
    sink: S,
    clock: SampleClock,
    pacing: PacingMode,
    max_samples: u64,
    state: LoopState,
}

/// Validates `cfg`, loads the code table if needed, connects.
pub fn start(cfg: &Config) -> Result<PacingLoop<Transmitter, StdRng>, RunError> {
    cfg.validate()?;
    let waveform = waveform_from_config(cfg)?;
    let sink = Transmitter::connect(cfg.transport, &cfg.addr, cfg.write_timeout())?;
    let noise = NoiseInjector::with_seed(cfg.noise_amp as f32, cfg.seed)?;
    let clock = SampleClock::new(cfg.sample_rate_hz)?;
    Ok(PacingLoop::new(waveform, cfg.norm_freq(), noise, sink, clock)
        .with_pacing(cfg.pacing)
        .with_max_samples(cfg.max_samples))
}

pub fn waveform_from_config(cfg: &Config) -> Result<Waveform, RunError> {
    Ok(match cfg.waveform {
        WaveformKind::Sine => Waveform::Sine,
        WaveformKind::Exp => Waveform::Exp,
        WaveformKind::MSequence => {
            let path = cfg
                .code_table
                .as_ref()
                .ok_or(ConfigError::MissingCodeTable)?;
            Waveform::CodeSequence(CodeTable::load(path)?)
        }
    })
}

impl<S: SampleSink, R: Rng> PacingLoop<S, R> {
    pub fn new(
        waveform: Waveform,
        norm_freq: f64,
        noise: NoiseInjector<R>,
        sink: S,
        clock: SampleClock,
    ) -> Self {
        Self {
            waveform,
            norm_freq,
            noise,
            encoder: SampleEncoder::new(),
            sink,
            clock,
            pacing: PacingMode::Deadline,
            max_samples: 0,
            state: LoopState::Idle,
        }
    }

    pub fn with_pacing(mut self, pacing: PacingMode) -> Self {
        self.pacing = pacing;
        self
    }

    /// 0 = unbounded.
    pub fn with_max_samples(mut self, max_samples: u64) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn clock(&self) -> &SampleClock {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Sample for the current index, noise included.
    pub fn next_sample(&mut self) -> Sample {
        let s = self.waveform.generate(self.norm_freq, self.clock.n());
        self.noise.inject(s)
    }

    fn tick(&mut self) -> Result<(), TransportError> {
        let sample = self.next_sample();
        let bytes = self.encoder.encode(&sample);
        self.sink.send(bytes)
    }

    fn done(&self) -> bool {
        self.max_samples > 0 && self.clock.n() >= self.max_samples
    }

    /// Streams until cancelled, the sample limit is hit, or the transport fails fatally.
    /// A loop runs once; calling `run` after it terminated is an error.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<RunStats, RunError> {
        if self.state == LoopState::Terminated {
            return Err(RunError::AlreadyTerminated);
        }
        self.state = LoopState::Running;
        tracing::info!(
            waveform = %self.waveform.kind(),
            channels = self.waveform.channel_count(),
            norm_freq = self.norm_freq,
            noise_amp = self.noise.amplitude(),
            interval_us = self.clock.interval().as_secs_f64() * 1e6,
            pacing = ?self.pacing,
            "streaming"
        );

        let mut stats = RunStats::default();
        let t0 = Instant::now();
        let mut next_release = t0;

        while !cancel.is_cancelled() && !self.done() {
            let n = self.clock.n();
            let lag = Instant::now().saturating_duration_since(next_release);
            stats.max_lag = stats.max_lag.max(lag);

            match self.tick() {
                Ok(()) => stats.sent += 1,
                Err(e) if !e.is_fatal() => {
                    stats.dropped += 1;
                    tracing::warn!(tick = n, error = %e, "tick dropped");
                }
                Err(e) => {
                    stats.ticks += 1;
                    stats.elapsed = t0.elapsed();
                    self.state = LoopState::Terminated;
                    tracing::error!(tick = n, error = %e, "transport failed, stopping");
                    log_summary(&stats);
                    return Err(RunError::Transport {
                        ticks: n,
                        source: e,
                    });
                }
            }
            stats.ticks += 1;
            self.clock.advance();
            if self.done() {
                break;
            }

            next_release = match self.pacing {
                PacingMode::Deadline => t0 + self.clock.offset_of(self.clock.n()),
                PacingMode::Fixed => Instant::now() + self.clock.interval(),
            };
            sleep_until(next_release, cancel);
        }

        stats.elapsed = t0.elapsed();
        self.state = LoopState::Terminated;
        if cancel.is_cancelled() {
            tracing::info!(tick = self.clock.n(), "cancelled");
        }
        log_summary(&stats);
        Ok(stats)
    }
}

fn sleep_until(deadline: Instant, cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(MAX_SLEEP_SLICE));
    }
}

fn log_summary(stats: &RunStats) {
    tracing::info!(
        ticks = stats.ticks,
        sent = stats.sent,
        dropped = stats.dropped,
        elapsed_s = stats.elapsed.as_secs_f64(),
        rate_hz = stats.achieved_rate_hz(),
        max_lag_us = stats.max_lag.as_micros() as u64,
        "stream summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_samples;
    use num_complex::Complex32;
    use rand::SeedableRng;
    use std::io;

    /// Records every tick; fails on scripted tick indices.
    #[derive(Default)]
    struct ScriptSink {
        bytes: Vec<u8>,
        calls: u64,
        transient_at: Vec<u64>,
        fatal_at: Option<u64>,
        cancel_after: Option<(u64, CancelToken)>,
    }

    impl SampleSink for ScriptSink {
        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            let call = self.calls;
            self.calls += 1;
            if let Some((k, token)) = &self.cancel_after {
                if self.calls >= *k {
                    token.cancel();
                }
            }
            if self.fatal_at == Some(call) {
                return Err(TransportError::Fatal(io::Error::from(
                    io::ErrorKind::BrokenPipe,
                )));
            }
            if self.transient_at.contains(&call) {
                return Err(TransportError::Transient(io::Error::from(
                    io::ErrorKind::TimedOut,
                )));
            }
            self.bytes.extend_from_slice(bytes);
            Ok(())
        }
    }

    fn counting_table(len: usize) -> Waveform {
        Waveform::CodeSequence(CodeTable::new((0..len).map(|i| i as f32).collect()).unwrap())
    }

    fn quiet() -> NoiseInjector<StdRng> {
        NoiseInjector::new(0.0, StdRng::seed_from_u64(0)).unwrap()
    }

    fn clock(rate_hz: f64) -> SampleClock {
        SampleClock::new(rate_hz).unwrap()
    }

    fn fast_clock() -> SampleClock {
        clock(1e6)
    }

    #[test]
    fn streams_exactly_max_samples_in_order() {
        let sink = ScriptSink::default();
        let mut lp =
            PacingLoop::new(counting_table(64), 0.0, quiet(), sink, fast_clock()).with_max_samples(10);
        assert_eq!(lp.state(), LoopState::Idle);
        let stats = lp.run(&CancelToken::new()).unwrap();
        assert_eq!(lp.state(), LoopState::Terminated);
        assert_eq!((stats.ticks, stats.sent, stats.dropped), (10, 10, 0));

        let got = decode_samples(&lp.sink().bytes, 2);
        let want: Vec<Sample> = (0..10)
            .map(|n| Sample::Iq(Complex32::new((2 * n) as f32, (2 * n + 1) as f32)))
            .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn transient_failure_skips_one_tick_only() {
        let sink = ScriptSink {
            transient_at: vec![2],
            ..Default::default()
        };
        let mut lp = PacingLoop::new(counting_table(64), 0.0, quiet(), sink, fast_clock())
            .with_max_samples(6);
        let stats = lp.run(&CancelToken::new()).unwrap();
        assert_eq!((stats.ticks, stats.sent, stats.dropped), (6, 5, 1));

        let firsts: Vec<f32> = decode_samples(&lp.sink().bytes, 2)
            .iter()
            .map(|s| s.channels().next().unwrap())
            .collect();
        assert_eq!(firsts, vec![0.0, 2.0, 6.0, 8.0, 10.0]);
        assert_eq!(lp.clock().n(), 6);
    }

    #[test]
    fn fatal_failure_terminates() {
        let sink = ScriptSink {
            fatal_at: Some(3),
            ..Default::default()
        };
        let mut lp = PacingLoop::new(Waveform::Exp, 0.0, quiet(), sink, fast_clock());
        let err = lp.run(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, RunError::Transport { ticks: 3, .. }));
        assert_eq!(lp.state(), LoopState::Terminated);
        assert_eq!(lp.sink().bytes.len(), 3 * 8);
    }

    #[test]
    fn cancelled_before_start_sends_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let sink = ScriptSink::default();
        let mut lp = PacingLoop::new(Waveform::Sine, 0.1, quiet(), sink, fast_clock());
        let stats = lp.run(&token).unwrap();
        assert_eq!(stats.ticks, 0);
        assert!(lp.sink().bytes.is_empty());
    }

    #[test]
    fn cancel_stops_at_next_tick_boundary() {
        let token = CancelToken::new();
        let sink = ScriptSink {
            cancel_after: Some((5, token.clone())),
            ..Default::default()
        };
        let mut lp = PacingLoop::new(Waveform::Sine, 0.1, quiet(), sink, fast_clock());
        let stats = lp.run(&token).unwrap();
        assert_eq!(stats.ticks, 5);
        assert_eq!(lp.sink().bytes.len(), 5 * 4);
    }

    #[test]
    fn cancel_interrupts_a_long_interval() {
        let token = CancelToken::new();
        let sink = ScriptSink {
            cancel_after: Some((1, token.clone())),
            ..Default::default()
        };
        let mut lp = PacingLoop::new(Waveform::Sine, 0.0, quiet(), sink, clock(0.1));
        let t = Instant::now();
        lp.run(&token).unwrap();
        assert!(t.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn both_pacing_modes_hold_the_interval() {
        for mode in [PacingMode::Deadline, PacingMode::Fixed] {
            let sink = ScriptSink::default();
            let mut lp = PacingLoop::new(Waveform::Sine, 0.1, quiet(), sink, clock(500.0))
                .with_pacing(mode)
                .with_max_samples(21);
            let stats = lp.run(&CancelToken::new()).unwrap();
            assert_eq!(stats.sent, 21);
            assert!(
                stats.elapsed >= Duration::from_millis(39),
                "{mode:?}: {:?}",
                stats.elapsed
            );
        }
    }

    #[test]
    fn noise_is_applied_per_tick() {
        let noise = NoiseInjector::new(0.5, StdRng::seed_from_u64(1)).unwrap();
        let sink = ScriptSink::default();
        let mut lp =
            PacingLoop::new(Waveform::Exp, 0.0, noise, sink, fast_clock()).with_max_samples(50);
        lp.run(&CancelToken::new()).unwrap();
        let got = decode_samples(&lp.sink().bytes, 2);
        assert_eq!(got.len(), 50);
        assert!(got.iter().any(|s| *s != Sample::Iq(Complex32::new(1.0, 0.0))));
        for s in got {
            if let Sample::Iq(c) = s {
                assert!((c.re - 1.0).abs() <= 0.5 + 1e-6 && c.im.abs() <= 0.5 + 1e-6);
            }
        }
    }

    /// Spends `delay` inside every send, like a slow peer.
    struct SlowSink {
        delay: Duration,
        calls: u64,
    }

    impl SampleSink for SlowSink {
        fn send(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            self.calls += 1;
            std::thread::sleep(self.delay);
            Ok(())
        }
    }

    fn timed_run(mode: PacingMode) -> Duration {
        let sink = SlowSink {
            delay: Duration::from_millis(1),
            calls: 0,
        };
        let mut lp = PacingLoop::new(Waveform::Sine, 0.1, quiet(), sink, clock(500.0))
            .with_pacing(mode)
            .with_max_samples(101);
        let stats = lp.run(&CancelToken::new()).unwrap();
        assert_eq!(lp.sink().calls, 101);
        stats.elapsed
    }

    #[test]
    fn deadline_pacing_absorbs_processing_time() {
        // 100 intervals of 2 ms, 1 ms spent in every send.
        let deadline = timed_run(PacingMode::Deadline);
        let fixed = timed_run(PacingMode::Fixed);
        assert!(deadline >= Duration::from_millis(200), "deadline {deadline:?}");
        assert!(deadline < Duration::from_millis(270), "deadline {deadline:?}");
        assert!(fixed >= Duration::from_millis(300), "fixed {fixed:?}");
        assert!(deadline < fixed, "deadline {deadline:?} fixed {fixed:?}");
    }

    #[test]
    fn terminated_loop_does_not_restart() {
        let sink = ScriptSink::default();
        let mut lp = PacingLoop::new(Waveform::Sine, 0.1, quiet(), sink, fast_clock())
            .with_max_samples(3);
        lp.run(&CancelToken::new()).unwrap();
        assert_eq!(lp.state(), LoopState::Terminated);

        let err = lp.run(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, RunError::AlreadyTerminated));
        assert_eq!(lp.state(), LoopState::Terminated);
        assert_eq!(lp.sink().calls, 3);
        assert_eq!(lp.clock().n(), 3);
    }

    #[test]
    fn clock_rejects_unusable_rates() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e12] {
            assert!(
                matches!(SampleClock::new(rate), Err(ConfigError::SampleRate(_))),
                "rate={rate}"
            );
        }
    }

    #[test]
    fn start_rejects_oversized_noise() {
        let cfg = Config {
            noise_amp: 2e38,
            ..Config::default()
        };
        assert!(matches!(
            start(&cfg),
            Err(RunError::Config(ConfigError::NoiseAmplitude(_)))
        ));
    }

    #[test]
    fn clock_offsets() {
        let c = clock(100_000.0);
        assert_eq!(c.interval(), Duration::from_micros(10));
        assert_eq!(c.offset_of(0), Duration::ZERO);
        assert_eq!(c.offset_of(100_000), Duration::from_secs(1));
    }

    #[test]
    fn config_startup_errors() {
        let cfg = Config {
            waveform: WaveformKind::MSequence,
            ..Config::default()
        };
        assert!(matches!(start(&cfg), Err(RunError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            waveform: WaveformKind::MSequence,
            code_table: Some(dir.path().join("missing.bin")),
            ..Config::default()
        };
        assert!(matches!(start(&cfg), Err(RunError::Resource(_))));
    }

    #[test]
    fn waveform_from_config_loads_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m_sequence.bin");
        CodeTable::from_mls(8).unwrap().write(&path).unwrap();
        let cfg = Config {
            waveform: WaveformKind::MSequence,
            code_table: Some(path),
            ..Config::default()
        };
        match waveform_from_config(&cfg).unwrap() {
            Waveform::CodeSequence(t) => assert_eq!(t.len(), 510),
            w => panic!("unexpected {w:?}"),
        }
    }
}
