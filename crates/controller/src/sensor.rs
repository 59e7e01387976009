//! Sensor reader: polls the soil probe channel by channel and falls back to
//! the last-known-good value when a channel fails.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
    /// Soil humidity, percent.
    pub humidity: f32,
    /// Soil temperature, degrees C.
    pub temperature: f32,
    /// Ambient light, lux.
    pub light: f32,
}

impl SensorReading {
    pub fn value(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Humidity => self.humidity,
            Channel::Temperature => self.temperature,
            Channel::Light => self.light,
        }
    }

    fn set(&mut self, channel: Channel, v: f32) {
        match channel {
            Channel::Humidity => self.humidity = v,
            Channel::Temperature => self.temperature = v,
            Channel::Light => self.light = v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Humidity,
    Temperature,
    Light,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Humidity, Channel::Temperature, Channel::Light];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Humidity => write!(f, "humidity"),
            Self::Temperature => write!(f, "temperature"),
            Self::Light => write!(f, "light"),
        }
    }
}

/// Result of one polling pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutcome {
    pub reading: SensorReading,
    /// Channels whose value was carried over from the last-known-good reading.
    pub stale: Vec<Channel>,
}

impl ReadOutcome {
    pub fn degraded(&self) -> bool {
        !self.stale.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SensorReadError {
    #[error("{channel} read failed: {detail}")]
    Probe { channel: Channel, detail: String },
    #[error("{channel} read timed out after {timeout:?}")]
    Timeout { channel: Channel, timeout: Duration },
    #[error("no last-known-good reading to fall back on: {0}")]
    NoFallback(Box<SensorReadError>),
}

// ---------------------------------------------------------------------------
// Probe seam
// ---------------------------------------------------------------------------

/// Hardware (or simulated) access to the soil sensors.
#[async_trait]
pub trait SoilProbe: Send {
    async fn read(&mut self, channel: Channel) -> anyhow::Result<f32>;

    /// Told after the irrigation controller accepted a watering command.
    fn note_watering(&mut self) {}
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct SensorReader<P> {
    probe: P,
    timeout: Duration,
    last_good: Option<SensorReading>,
}

impl<P: SoilProbe> SensorReader<P> {
    pub fn new(probe: P, timeout: Duration) -> Self {
        Self {
            probe,
            timeout,
            last_good: None,
        }
    }

    /// Read every channel. A failed channel reuses its last-known-good value
    /// and marks the outcome degraded; only a failure with nothing to fall
    /// back on is an error.
    pub async fn read_all(&mut self, now: OffsetDateTime) -> Result<ReadOutcome, SensorReadError> {
        let mut reading = SensorReading {
            taken_at: now,
            humidity: 0.0,
            temperature: 0.0,
            light: 0.0,
        };
        let mut stale = Vec::new();

        for channel in Channel::ALL {
            match self.read_channel(channel).await {
                Ok(v) => reading.set(channel, v),
                Err(e) => match &self.last_good {
                    Some(last) => {
                        warn!(
                            %channel,
                            error = %e,
                            fallback = last.value(channel),
                            "degraded reading: using last-known-good value"
                        );
                        reading.set(channel, last.value(channel));
                        stale.push(channel);
                    }
                    None => return Err(SensorReadError::NoFallback(Box::new(e))),
                },
            }
        }

        self.last_good = Some(reading);
        Ok(ReadOutcome { reading, stale })
    }

    async fn read_channel(&mut self, channel: Channel) -> Result<f32, SensorReadError> {
        match tokio::time::timeout(self.timeout, self.probe.read(channel)).await {
            Ok(Ok(v)) if v.is_finite() => Ok(v),
            Ok(Ok(v)) => Err(SensorReadError::Probe {
                channel,
                detail: format!("non-finite value {v}"),
            }),
            Ok(Err(e)) => Err(SensorReadError::Probe {
                channel,
                detail: format!("{e:#}"),
            }),
            Err(_) => Err(SensorReadError::Timeout {
                channel,
                timeout: self.timeout,
            }),
        }
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use time::macros::datetime;

    /// Scripted probe: each channel pops its next queued result; an empty
    /// queue repeats `default`.
    pub(crate) struct ScriptedProbe {
        pub(crate) humidity: VecDeque<anyhow::Result<f32>>,
        pub(crate) temperature: VecDeque<anyhow::Result<f32>>,
        pub(crate) light: VecDeque<anyhow::Result<f32>>,
        pub(crate) default: [f32; 3],
        pub(crate) hang: Option<Channel>,
        pub(crate) waterings: usize,
    }

    impl ScriptedProbe {
        pub(crate) fn steady(humidity: f32, temperature: f32, light: f32) -> Self {
            Self {
                humidity: VecDeque::new(),
                temperature: VecDeque::new(),
                light: VecDeque::new(),
                default: [humidity, temperature, light],
                hang: None,
                waterings: 0,
            }
        }
    }

    #[async_trait]
    impl SoilProbe for ScriptedProbe {
        async fn read(&mut self, channel: Channel) -> anyhow::Result<f32> {
            if self.hang == Some(channel) {
                std::future::pending::<()>().await;
            }
            let (queue, default) = match channel {
                Channel::Humidity => (&mut self.humidity, self.default[0]),
                Channel::Temperature => (&mut self.temperature, self.default[1]),
                Channel::Light => (&mut self.light, self.default[2]),
            };
            queue.pop_front().unwrap_or(Ok(default))
        }

        fn note_watering(&mut self) {
            self.waterings += 1;
        }
    }

    fn now() -> OffsetDateTime {
        datetime!(2024-06-01 10:00 -7)
    }

    fn reader(probe: ScriptedProbe) -> SensorReader<ScriptedProbe> {
        SensorReader::new(probe, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn healthy_read_returns_all_channels() {
        let mut r = reader(ScriptedProbe::steady(42.0, 21.5, 700.0));
        let out = r.read_all(now()).await.unwrap();
        assert!(!out.degraded());
        assert_eq!(out.reading.humidity, 42.0);
        assert_eq!(out.reading.temperature, 21.5);
        assert_eq!(out.reading.light, 700.0);
        assert_eq!(out.reading.taken_at, now());
        assert_eq!(r.last_good, Some(out.reading));
    }

    #[tokio::test]
    async fn failure_without_history_is_an_error() {
        let mut probe = ScriptedProbe::steady(42.0, 21.5, 700.0);
        probe.temperature.push_back(Err(anyhow::anyhow!("crc mismatch")));
        let mut r = reader(probe);

        let err = r.read_all(now()).await.unwrap_err();
        assert!(matches!(err, SensorReadError::NoFallback(_)));
        assert!(err.to_string().contains("temperature read failed: crc mismatch"));
        assert!(r.last_good.is_none());
    }

    #[tokio::test]
    async fn failed_channel_falls_back_to_last_known_good() {
        let mut probe = ScriptedProbe::steady(42.0, 21.5, 700.0);
        probe.humidity.push_back(Ok(40.0));
        probe.humidity.push_back(Err(anyhow::anyhow!("i2c nack")));
        let mut r = reader(probe);

        r.read_all(now()).await.unwrap();
        let out = r.read_all(now()).await.unwrap();

        assert!(out.degraded());
        assert_eq!(out.stale, vec![Channel::Humidity]);
        assert_eq!(out.reading.humidity, 40.0);
        assert_eq!(out.reading.light, 700.0);
    }

    #[tokio::test]
    async fn non_finite_value_is_treated_as_failure() {
        let mut probe = ScriptedProbe::steady(42.0, 21.5, 700.0);
        probe.light.push_back(Ok(300.0));
        probe.light.push_back(Ok(f32::NAN));
        let mut r = reader(probe);

        r.read_all(now()).await.unwrap();
        let out = r.read_all(now()).await.unwrap();
        assert_eq!(out.stale, vec![Channel::Light]);
        assert_eq!(out.reading.light, 300.0);
    }

    #[tokio::test]
    async fn hung_channel_times_out_and_falls_back() {
        let mut r = reader(ScriptedProbe::steady(42.0, 21.5, 700.0));
        r.read_all(now()).await.unwrap();

        r.probe_mut().hang = Some(Channel::Temperature);
        r.probe_mut().default = [50.0, 99.0, 100.0];
        let out = r.read_all(now()).await.unwrap();

        assert_eq!(out.stale, vec![Channel::Temperature]);
        assert_eq!(out.reading.temperature, 21.5);
        assert_eq!(out.reading.humidity, 50.0);
    }

    #[tokio::test]
    async fn hung_channel_without_history_reports_timeout() {
        let mut probe = ScriptedProbe::steady(42.0, 21.5, 700.0);
        probe.hang = Some(Channel::Humidity);
        let mut r = reader(probe);

        let err = r.read_all(now()).await.unwrap_err();
        match err {
            SensorReadError::NoFallback(inner) => {
                assert!(matches!(*inner, SensorReadError::Timeout { channel: Channel::Humidity, .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn recovered_channel_replaces_stale_value() {
        let mut probe = ScriptedProbe::steady(42.0, 21.5, 700.0);
        probe.humidity.push_back(Ok(40.0));
        probe.humidity.push_back(Err(anyhow::anyhow!("glitch")));
        probe.humidity.push_back(Ok(38.0));
        let mut r = reader(probe);

        r.read_all(now()).await.unwrap();
        r.read_all(now()).await.unwrap();
        let out = r.read_all(now()).await.unwrap();
        assert!(!out.degraded());
        assert_eq!(out.reading.humidity, 38.0);
    }
}
