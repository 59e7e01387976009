//! Stateful soil probe simulator for running the controller without hardware.
//!
//! Models:
//! - Soil humidity as a random walk with mean reversion and a drying drift
//! - Closed-loop wetting after each accepted watering command
//! - Diurnal soil temperature and light curves driven by the local clock
//! - Per-reading electronic noise
//! - Occasional read faults, to exercise the degraded-reading path

use anyhow::bail;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::sensor::{Channel, SoilProbe};

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal(rng: &mut fastrand::Rng) -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += rng.f64();
    }
    sum - 6.0
}

fn gaussian(rng: &mut fastrand::Rng, mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal(rng)
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable from config (`sensor.scenario`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily. Triggers watering on its own.
    Drying,
    /// Hovers near the centre with low noise.
    Stable,
    /// High noise and a 10% fault rate on every channel.
    Flaky,
    /// Starts near saturation and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SimulatedProbe {
    rng: fastrand::Rng,
    clock: Arc<dyn Clock>,

    /// Current "true" soil humidity in percent. Evolves on each humidity read.
    humidity: f64,
    center: f64,
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,

    /// Humidity gained per accepted watering command.
    wet_step: f64,
    fault_rate: f32,
}

impl SimulatedProbe {
    pub fn new(scenario: Scenario, clock: Arc<dyn Clock>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => fastrand::Rng::with_seed(s),
            None => fastrand::Rng::new(),
        };

        // (start, drift, walk_sigma, mean_reversion, noise_sigma, fault_rate)
        let (start, drift, walk, mean_rev, noise, fault_rate) = match scenario {
            Scenario::Drying => (45.0, -0.6, 0.4, 0.01, 0.3, 0.01_f32),
            Scenario::Stable => (45.0, 0.0, 0.2, 0.05, 0.1, 0.0),
            Scenario::Flaky => (45.0, -0.3, 1.0, 0.02, 1.5, 0.10),
            Scenario::Wet => (80.0, -0.1, 0.3, 0.01, 0.3, 0.0),
        };

        Self {
            rng,
            clock,
            humidity: start,
            center: start,
            drift_per_sample: drift,
            walk_sigma: walk,
            mean_reversion: mean_rev,
            noise_sigma: noise,
            wet_step: 15.0,
            fault_rate,
        }
    }

    /// Override the scenario's fault probability (0.0..=1.0).
    pub fn with_fault_rate(mut self, rate: f32) -> Self {
        self.fault_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fraction of the local day elapsed, 0.0 at midnight.
    fn day_fraction(&self) -> f64 {
        let t = self.clock.now().time();
        (t.hour() as f64 * 3600.0 + t.minute() as f64 * 60.0 + t.second() as f64) / 86_400.0
    }

    fn sample_humidity(&mut self) -> f64 {
        let pull = self.mean_reversion * (self.center - self.humidity);
        let walk = gaussian(&mut self.rng, 0.0, self.walk_sigma);
        self.humidity = (self.humidity + self.drift_per_sample + pull + walk).clamp(0.0, 100.0);

        let noise = gaussian(&mut self.rng, 0.0, self.noise_sigma);
        (self.humidity + noise).clamp(0.0, 100.0)
    }

    fn sample_temperature(&mut self) -> f64 {
        // Peaks mid-afternoon (15:00), trough at 03:00.
        let phase = 2.0 * std::f64::consts::PI * (self.day_fraction() - 0.375);
        let base = 18.0 + 8.0 * phase.sin();
        base + gaussian(&mut self.rng, 0.0, self.noise_sigma * 0.5)
    }

    fn sample_light(&mut self) -> f64 {
        // Daylight between 06:00 and 20:00, peak at 13:00.
        let frac = self.day_fraction();
        let (sunrise, sunset) = (6.0 / 24.0, 20.0 / 24.0);
        if !(sunrise..sunset).contains(&frac) {
            return 0.0;
        }
        let phase = std::f64::consts::PI * (frac - sunrise) / (sunset - sunrise);
        let lux = 1000.0 * phase.sin() + gaussian(&mut self.rng, 0.0, 20.0);
        lux.max(0.0)
    }
}

#[async_trait]
impl SoilProbe for SimulatedProbe {
    async fn read(&mut self, channel: Channel) -> anyhow::Result<f32> {
        if self.rng.f32() < self.fault_rate {
            bail!("simulated {channel} fault");
        }
        let v = match channel {
            Channel::Humidity => self.sample_humidity(),
            Channel::Temperature => self.sample_temperature(),
            Channel::Light => self.sample_light(),
        };
        Ok(v as f32)
    }

    fn note_watering(&mut self) {
        self.humidity = (self.humidity + self.wet_step).min(100.0);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
