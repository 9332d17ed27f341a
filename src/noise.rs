use crate::error::ConfigError;
use crate::waveform::Sample;
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Largest amplitude whose `[-a, a]` range rand can sample in f32.
pub const MAX_NOISE_AMP: f32 = f32::MAX / 4.0;

/// Adds independent uniform noise in `[-amplitude, +amplitude]` to every channel.
pub struct NoiseInjector<R: Rng> {
    amplitude: f32,
    /// `None` at zero amplitude.
    dist: Option<Uniform<f32>>,
    rng: R,
}

impl NoiseInjector<StdRng> {
    /// Seeded for reproducible runs, OS entropy otherwise.
    pub fn with_seed(amplitude: f32, seed: Option<u64>) -> Result<Self, ConfigError> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Self::new(amplitude, rng)
    }
}

impl<R: Rng> NoiseInjector<R> {
    pub fn new(amplitude: f32, rng: R) -> Result<Self, ConfigError> {
        if !(0.0..=MAX_NOISE_AMP).contains(&amplitude) {
            return Err(ConfigError::NoiseAmplitude(amplitude as f64));
        }
        let dist = if amplitude == 0.0 {
            None
        } else {
            let d = Uniform::new_inclusive(-amplitude, amplitude)
                .map_err(|_| ConfigError::NoiseAmplitude(amplitude as f64))?;
            Some(d)
        };
        Ok(Self {
            amplitude,
            dist,
            rng,
        })
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn inject(&mut self, sample: Sample) -> Sample {
        // No draws at zero amplitude so noise-free runs stay bit-exact.
        let Some(dist) = &self.dist else {
            return sample;
        };
        let rng = &mut self.rng;
        sample.map_channels(|x| x + dist.sample(rng))
    }
}
