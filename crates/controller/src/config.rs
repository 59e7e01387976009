//! TOML config file loading, environment overrides and validation.
//!
//! Every section is optional and defaults to the Sammamish deployment's
//! values; only the `[[plants]]` table has no default.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::decision::WateringWindow;
use crate::mqtt::is_valid_feed;
use crate::plant::Plant;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub schedule: ScheduleConfig,
    pub feeds: FeedConfig,
    pub mqtt: MqttConfig,
    pub actuator: ActuatorConfig,
    pub sensor: SensorConfig,
    pub plants: Vec<Plant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub location: String,
    /// Hours east of UTC.
    pub time_zone: i8,
    /// Informational: the host's NTP source. Time sync itself is the OS's job.
    pub ntp_server: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            location: "Sammamish".into(),
            time_zone: -7,
            ntp_server: "us.pool.ntp.org".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Multiplier on schedule timing. < 1 speeds the system up; 1 is real time.
    pub time_scale: f64,
    pub sensor_refresh_min: f64,
    /// `[start, end]` local hours, both inclusive.
    pub watering_hours: [u8; 2],
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time_scale: 0.1,
            sensor_refresh_min: 10.0,
            watering_hours: [6, 23],
        }
    }
}

/// Accepted range for the scaled sensor refresh interval.
const MIN_REFRESH: Duration = Duration::from_millis(1);
const MAX_REFRESH: Duration = Duration::from_secs(24 * 3600);

impl ScheduleConfig {
    /// Scale a real-time duration by `time_scale`, saturating at
    /// `Duration::MAX`.
    pub fn scaled(&self, d: Duration) -> Duration {
        self.try_scaled(d).unwrap_or(Duration::MAX)
    }

    fn try_scaled(&self, d: Duration) -> Option<Duration> {
        Duration::try_from_secs_f64(d.as_secs_f64() * self.time_scale).ok()
    }

    /// Scaled refresh interval, or `None` when it does not fit a `Duration`.
    fn try_refresh_interval(&self) -> Option<Duration> {
        let real = Duration::try_from_secs_f64(self.sensor_refresh_min * 60.0).ok()?;
        self.try_scaled(real)
    }

    /// Only meaningful on a validated config.
    pub fn refresh_interval(&self) -> Duration {
        self.try_refresh_interval().unwrap_or(MAX_REFRESH)
    }

    pub fn window(&self) -> WateringWindow {
        WateringWindow::new(self.watering_hours[0], self.watering_hours[1])
    }
}

/// MQTT topic names for each telemetry channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub humidity: String,
    pub temperature: String,
    pub light: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            humidity: "ivkhrul/soil/humidity".into(),
            temperature: "ivkhrul/soil/temperature".into(),
            light: "ivkhrul/soil/lux".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_sec: u64,
    pub publish_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.flespi.io".into(),
            port: 1883,
            client_id: "soil-controller".into(),
            keep_alive_sec: 30,
            publish_timeout_ms: 2000,
            max_attempts: 3,
            retry_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Irrigation program controller endpoint.
    pub url: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    pub backoff_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            url: "http://192.168.4.64/program.htm".into(),
            timeout_ms: 5000,
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub read_timeout_ms: u64,
    /// Simulated probe profile: drying, stable, flaky or wet.
    pub scenario: String,
    /// Overrides the scenario's fault rate when set.
    pub fault_rate: Option<f32>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            scenario: "drying".into(),
            fault_rate: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `MQTT_HOST`, `MQTT_PORT` and `IRRIGATION_URL` on top of the file.
    /// `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|s| s.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(url) = lookup("IRRIGATION_URL") {
            self.actuator.url = url;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_site(&mut errors);
        self.validate_schedule(&mut errors);
        self.validate_transport(&mut errors);
        self.validate_plants(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_site(&self, errors: &mut Vec<String>) {
        if !(-12..=14).contains(&self.site.time_zone) {
            errors.push(format!(
                "site.time_zone {} out of range [-12, 14]",
                self.site.time_zone
            ));
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let s = &self.schedule;
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !positive(s.time_scale) {
            errors.push(format!(
                "schedule.time_scale must be positive, got {}",
                s.time_scale
            ));
        }
        if !positive(s.sensor_refresh_min) {
            errors.push(format!(
                "schedule.sensor_refresh_min must be positive, got {}",
                s.sensor_refresh_min
            ));
        }
        if positive(s.time_scale) && positive(s.sensor_refresh_min) {
            match s.try_refresh_interval() {
                Some(d) if (MIN_REFRESH..=MAX_REFRESH).contains(&d) => {}
                Some(d) => errors.push(format!(
                    "schedule.sensor_refresh_min {} x time_scale {} gives {d:?}, \
                     out of range [{MIN_REFRESH:?}, {MAX_REFRESH:?}]",
                    s.sensor_refresh_min, s.time_scale
                )),
                None => errors.push(format!(
                    "schedule.sensor_refresh_min {} x time_scale {} is out of range",
                    s.sensor_refresh_min, s.time_scale
                )),
            }
        }
        for (i, h) in s.watering_hours.iter().enumerate() {
            if *h > 23 {
                errors.push(format!(
                    "schedule.watering_hours[{i}] {h} is not an hour of day (0-23)"
                ));
            }
        }
        if self.sensor.read_timeout_ms == 0 {
            errors.push("sensor.read_timeout_ms must be positive".to_string());
        }
        if let Some(rate) = self.sensor.fault_rate {
            if !(0.0..=1.0).contains(&rate) {
                errors.push(format!("sensor.fault_rate {rate} out of range [0.0, 1.0]"));
            }
        }
    }

    fn validate_transport(&self, errors: &mut Vec<String>) {
        // ── Feeds ───────────────────────────────────────────
        let feeds = [
            ("humidity", &self.feeds.humidity),
            ("temperature", &self.feeds.temperature),
            ("light", &self.feeds.light),
        ];
        let mut seen: HashSet<&str> = HashSet::new();
        for (name, topic) in feeds {
            if !is_valid_feed(topic) {
                errors.push(format!(
                    "feeds.{name} '{topic}' is not a publishable topic"
                ));
            } else if !seen.insert(topic.as_str()) {
                errors.push(format!("feeds.{name} '{topic}' is used by another feed"));
            }
        }

        // ── MQTT ────────────────────────────────────────────
        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt.port must be non-zero".to_string());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".to_string());
        }
        if self.mqtt.max_attempts == 0 {
            errors.push("mqtt.max_attempts must be at least 1".to_string());
        }
        if self.mqtt.publish_timeout_ms == 0 {
            errors.push("mqtt.publish_timeout_ms must be positive".to_string());
        }

        // ── Actuator ────────────────────────────────────────
        let url = self.actuator.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!("actuator.url '{url}' must be an http(s) URL"));
        }
        if self.actuator.max_attempts == 0 {
            errors.push("actuator.max_attempts must be at least 1".to_string());
        }
        if self.actuator.timeout_ms == 0 {
            errors.push("actuator.timeout_ms must be positive".to_string());
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = if p.name.trim().is_empty() {
                format!("plants[{i}]")
            } else {
                format!("plant '{}'", p.name)
            };

            if !p.name.trim().is_empty() && !seen.insert(&p.name) {
                errors.push(format!("{ctx}: duplicate name"));
            }
            for v in p.violations() {
                errors.push(format!("{ctx}: {v}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Parse and validate config text, without environment overrides.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
