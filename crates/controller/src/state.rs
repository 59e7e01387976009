use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::actuator::Ack;
use crate::decision::Decision;
use crate::sensor::{Channel, ReadOutcome, SensorReading};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub location: String,
    pub mqtt_connected: bool,
    pub last_reading: Option<SensorReading>,
    pub stale_channels: Vec<Channel>,
    pub sun_exposure: f32,
    pub plants: BTreeMap<String, PlantStatus>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Default, Serialize)]
pub struct PlantStatus {
    pub last_decision: Option<Decision>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
    pub waterings: u32,
    pub actuation_failures: u32,
    pub below_sun_min: bool,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Watering,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub location: String,
    pub mqtt_connected: bool,
    pub last_reading: Option<SensorReading>,
    pub degraded: bool,
    pub stale_channels: Vec<Channel>,
    pub sun_exposure: f32,
    pub plants: BTreeMap<String, PlantStatus>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new<'a>(location: &str, plant_names: impl IntoIterator<Item = &'a str>) -> Self {
        let plants = plant_names
            .into_iter()
            .map(|n| (n.to_string(), PlantStatus::default()))
            .collect();

        Self {
            started_at: Instant::now(),
            location: location.to_string(),
            mqtt_connected: false,
            last_reading: None,
            stale_channels: Vec::new(),
            sun_exposure: 0.0,
            plants,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Record a sensor pass and today's sun exposure.
    pub fn record_reading(&mut self, outcome: &ReadOutcome, sun_exposure: f32) {
        let r = &outcome.reading;
        let mut detail = format!(
            "humidity={:.1}% temperature={:.1}C light={:.0}lx sun={sun_exposure:.0}",
            r.humidity, r.temperature, r.light
        );
        if outcome.degraded() {
            let stale: Vec<String> = outcome.stale.iter().map(|c| c.to_string()).collect();
            detail.push_str(&format!(" (stale: {})", stale.join(", ")));
        }

        self.last_reading = Some(*r);
        self.stale_channels = outcome.stale.clone();
        self.sun_exposure = sun_exposure;
        self.push_event(EventKind::Reading, detail);
    }

    /// Record the latest decision for a plant. Not logged as an event;
    /// decisions are made every cycle.
    pub fn record_decision(&mut self, plant: &str, decision: Decision, below_sun_min: bool) {
        let status = self.plants.entry(plant.to_string()).or_default();
        status.last_decision = Some(decision);
        status.below_sun_min = below_sun_min;
    }

    /// Record a watering command accepted at local time `at`.
    pub fn record_watering(&mut self, plant: &str, ack: &Ack, at: OffsetDateTime) {
        let status = self.plants.entry(plant.to_string()).or_default();
        status.last_watered = Some(at);
        status.waterings += 1;
        self.push_event(
            EventKind::Watering,
            format!(
                "{plant}: watering accepted (HTTP {}, {} attempt{})",
                ack.status,
                ack.attempts,
                if ack.attempts == 1 { "" } else { "s" }
            ),
        );
    }

    /// Record a watering command that could not be delivered.
    pub fn record_actuation_failure(&mut self, plant: &str, detail: String) {
        let status = self.plants.entry(plant.to_string()).or_default();
        status.actuation_failures += 1;
        self.push_event(EventKind::Error, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            location: self.location.clone(),
            mqtt_connected: self.mqtt_connected,
            last_reading: self.last_reading,
            degraded: !self.stale_channels.is_empty(),
            stale_channels: self.stale_channels.clone(),
            sun_exposure: self.sun_exposure,
            plants: self.plants.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
