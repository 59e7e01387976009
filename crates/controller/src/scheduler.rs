//! Control loop: read sensors, publish telemetry, decide per plant, water.
//!
//! ```text
//! tick ─▶ read_all ─▶ sun ledger ─▶ publish feeds
//!                         │
//!                         ▼
//!           for each plant: decide ──[Water]──▶ actuator.water(name)
//! ```
//!
//! Nothing inside a cycle is fatal. A failed read skips the cycle; failed
//! telemetry or actuation is logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::clock::Clock;
use crate::config::{Config, FeedConfig};
use crate::decision::{decide, Decision, WateringWindow};
use crate::plant::{PlantId, PlantRegistry};
use crate::sensor::{SensorReader, SensorReading, SoilProbe};
use crate::state::SharedState;
use crate::sun::SunLedger;
use crate::telemetry::{self, Publisher};

/// What one cycle did, for logging and tests.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub reading: Option<SensorReading>,
    pub degraded: bool,
    pub sun_exposure: f32,
    pub published: usize,
    pub decisions: Vec<(PlantId, Decision)>,
    pub watered: Vec<PlantId>,
    pub actuation_failures: usize,
}

pub struct Scheduler<P> {
    registry: PlantRegistry,
    window: WateringWindow,
    feeds: FeedConfig,
    interval: Duration,
    reader: SensorReader<P>,
    sun: SunLedger,
    clock: Arc<dyn Clock>,
    actuator: Arc<dyn Actuator>,
    publisher: Arc<dyn Publisher>,
    shared: SharedState,
}

impl<P: SoilProbe> Scheduler<P> {
    pub fn new(
        config: &Config,
        registry: PlantRegistry,
        reader: SensorReader<P>,
        clock: Arc<dyn Clock>,
        actuator: Arc<dyn Actuator>,
        publisher: Arc<dyn Publisher>,
        shared: SharedState,
    ) -> Self {
        let interval = config.schedule.refresh_interval();
        Self {
            registry,
            window: config.schedule.window(),
            feeds: config.feeds.clone(),
            interval,
            reader,
            // Credit at most two refresh periods of light per reading.
            sun: SunLedger::new(interval * 2),
            clock,
            actuator,
            publisher,
            shared,
        }
    }

    /// Run forever at the configured refresh interval.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            plants = self.registry.len(),
            interval_ms = self.interval.as_millis() as u64,
            window = %self.window,
            "scheduler started"
        );
        {
            let mut st = self.shared.write().await;
            st.record_system(format!(
                "scheduler started ({} plant(s), every {:?}, watering {})",
                self.registry.len(),
                self.interval,
                self.window
            ));
        }

        loop {
            ticker.tick().await;
            let report = self.run_cycle().await;
            let watered: Vec<&str> = report
                .watered
                .iter()
                .filter_map(|id| self.registry.get(*id))
                .map(|p| p.name.as_str())
                .collect();
            debug!(
                published = report.published,
                ?watered,
                actuation_failures = report.actuation_failures,
                "cycle complete"
            );
        }
    }

    /// One pass of read → publish → decide → water.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let now: OffsetDateTime = self.clock.now();

        // ── Read ─────────────────────────────────────────────────────
        let outcome = match self.reader.read_all(now).await {
            Ok(o) => o,
            Err(e) => {
                error!("sensor read failed, skipping cycle: {e}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("sensor read failed: {e}"));
                return report;
            }
        };
        let reading = outcome.reading;
        report.reading = Some(reading);
        report.degraded = outcome.degraded();

        let sun_today = self.sun.record(&reading);
        report.sun_exposure = sun_today;

        // ── Publish ──────────────────────────────────────────────────
        report.published =
            telemetry::publish_reading(self.publisher.as_ref(), &self.feeds, &reading).await;

        self.shared.write().await.record_reading(&outcome, sun_today);

        info!(
            humidity = format!("{:.1}", reading.humidity),
            temperature = format!("{:.1}", reading.temperature),
            light = format!("{:.0}", reading.light),
            sun = format!("{sun_today:.0}"),
            degraded = report.degraded,
            "sensor reading"
        );

        // ── Decide + water ───────────────────────────────────────────
        let hour = reading.taken_at.hour();

        for (id, plant) in self.registry.iter() {
            let decision = decide(plant, &reading, hour, self.window, sun_today);
            report.decisions.push((id, decision));

            self.shared.write().await.record_decision(
                &plant.name,
                decision,
                sun_today < plant.sun_min,
            );

            if decision != Decision::Water {
                debug!(plant = %plant.name, %decision, hour, "no watering");
                continue;
            }

            info!(
                plant = %plant.name,
                humidity = format!("{:.1}", reading.humidity),
                min = format!("{:.1}", plant.soil_humidity_min),
                temperature = format!("{:.1}", reading.temperature),
                "watering"
            );

            match self.actuator.water(&plant.name).await {
                Ok(ack) => {
                    self.shared
                        .write()
                        .await
                        .record_watering(&plant.name, &ack, now);
                    self.reader.probe_mut().note_watering();
                    report.watered.push(id);
                }
                Err(e) => {
                    warn!(plant = %plant.name, "watering skipped this cycle: {e}");
                    self.shared
                        .write()
                        .await
                        .record_actuation_failure(&plant.name, e.to_string());
                    report.actuation_failures += 1;
                }
            }
        }

        report
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{Ack, ActuationError};
    use crate::clock::tests::FixedClock;
    use crate::plant::tests::basil;
    use crate::plant::Plant;
    use crate::sensor::tests::ScriptedProbe;
    use crate::state::{EventKind, SystemState};
    use crate::telemetry::tests::RecordingPublisher;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::macros::datetime;

    /// Records watering calls; plants listed in `failing` are refused.
    #[derive(Default)]
    struct FakeActuator {
        calls: Mutex<Vec<String>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl Actuator for FakeActuator {
        async fn water(&self, plant: &str) -> Result<Ack, ActuationError> {
            self.calls.lock().unwrap().push(plant.to_string());
            if self.failing.iter().any(|p| p == plant) {
                return Err(ActuationError::Exhausted {
                    plant: plant.to_string(),
                    attempts: 3,
                    last: "HTTP 503".into(),
                });
            }
            Ok(Ack {
                status: 200,
                attempts: 1,
            })
        }
    }

    fn fern() -> Plant {
        Plant {
            name: "fern".into(),
            soil_humidity_min: 50.0,
            soil_humidity_max: 80.0,
            soil_temperature_max: 28.0,
            ..basil()
        }
    }

    struct Harness {
        scheduler: Scheduler<ScriptedProbe>,
        clock: Arc<FixedClock>,
        actuator: Arc<FakeActuator>,
        publisher: Arc<RecordingPublisher>,
        shared: SharedState,
    }

    fn harness(probe: ScriptedProbe, at: OffsetDateTime, actuator: FakeActuator) -> Harness {
        let config = Config {
            plants: vec![basil(), fern()],
            ..Config::default()
        };
        let registry = PlantRegistry::new(config.plants.clone()).unwrap();
        let clock = Arc::new(FixedClock::at(at));
        let actuator = Arc::new(actuator);
        let publisher = Arc::new(RecordingPublisher::default());
        let shared = SystemState::new("Sammamish", registry.names()).shared();

        let scheduler = Scheduler::new(
            &config,
            registry,
            SensorReader::new(probe, Duration::from_millis(50)),
            clock.clone(),
            actuator.clone(),
            publisher.clone(),
            shared.clone(),
        );

        Harness {
            scheduler,
            clock,
            actuator,
            publisher,
            shared,
        }
    }

    #[tokio::test]
    async fn dry_soil_in_window_waters_every_thirsty_plant() {
        // 40% is dry for fern (min 50) but fine for basil (30..60).
        let mut h = harness(
            ScriptedProbe::steady(40.0, 20.0, 500.0),
            datetime!(2024-06-01 10:00 -7),
            FakeActuator::default(),
        );
        let report = h.scheduler.run_cycle().await;

        assert_eq!(report.published, 3);
        assert_eq!(
            report.decisions.iter().map(|(_, d)| *d).collect::<Vec<_>>(),
            vec![Decision::Withhold, Decision::Water]
        );
        assert_eq!(report.watered.len(), 1);
        assert_eq!(*h.actuator.calls.lock().unwrap(), vec!["fern".to_string()]);

        let st = h.shared.read().await;
        assert_eq!(st.plants["fern"].waterings, 1);
        assert_eq!(st.plants["fern"].last_watered, Some(datetime!(2024-06-01 10:00 -7)));
        assert_eq!(st.plants["basil"].last_decision, Some(Decision::Withhold));
    }

    #[tokio::test]
    async fn accepted_watering_is_fed_back_to_the_probe() {
        let mut h = harness(
            ScriptedProbe::steady(10.0, 20.0, 500.0),
            datetime!(2024-06-01 10:00 -7),
            FakeActuator::default(),
        );
        h.scheduler.run_cycle().await;
        assert_eq!(h.scheduler.reader.probe_mut().waterings, 2);
    }

    #[tokio::test]
    async fn outside_window_nothing_is_watered_but_telemetry_flows() {
        let mut h = harness(
            ScriptedProbe::steady(5.0, 40.0, 0.0),
            datetime!(2024-06-01 02:00 -7),
            FakeActuator::default(),
        );
        let report = h.scheduler.run_cycle().await;

        assert!(report
            .decisions
            .iter()
            .all(|(_, d)| *d == Decision::OutOfWindow));
        assert!(h.actuator.calls.lock().unwrap().is_empty());
        assert_eq!(h.publisher.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn actuation_failure_is_recorded_and_loop_continues() {
        let actuator = FakeActuator {
            failing: vec!["basil".into()],
            ..FakeActuator::default()
        };
        let mut h = harness(
            ScriptedProbe::steady(10.0, 20.0, 500.0),
            datetime!(2024-06-01 10:00 -7),
            actuator,
        );
        let report = h.scheduler.run_cycle().await;

        // basil failed, fern was still attempted and succeeded.
        assert_eq!(report.actuation_failures, 1);
        assert_eq!(report.watered.len(), 1);
        assert_eq!(h.actuator.calls.lock().unwrap().len(), 2);

        let st = h.shared.read().await;
        assert_eq!(st.plants["basil"].actuation_failures, 1);
        assert!(st
            .events
            .iter()
            .any(|e| e.kind == EventKind::Error && e.detail.contains("basil")));
    }

    #[tokio::test]
    async fn first_read_failure_skips_cycle() {
        let mut probe = ScriptedProbe::steady(10.0, 20.0, 500.0);
        probe.humidity.push_back(Err(anyhow::anyhow!("sensor unplugged")));
        let mut h = harness(probe, datetime!(2024-06-01 10:00 -7), FakeActuator::default());

        let report = h.scheduler.run_cycle().await;
        assert!(report.reading.is_none());
        assert!(report.decisions.is_empty());
        assert!(h.publisher.sent.lock().unwrap().is_empty());

        let st = h.shared.read().await;
        assert!(st.events.back().unwrap().detail.contains("sensor unplugged"));

        // Next cycle recovers.
        drop(st);
        let report = h.scheduler.run_cycle().await;
        assert!(report.reading.is_some());
    }

    #[tokio::test]
    async fn degraded_read_still_drives_decisions() {
        let mut probe = ScriptedProbe::steady(10.0, 20.0, 500.0);
        probe.humidity.push_back(Ok(70.0));
        probe.humidity.push_back(Err(anyhow::anyhow!("glitch")));
        let mut h = harness(probe, datetime!(2024-06-01 10:00 -7), FakeActuator::default());

        h.scheduler.run_cycle().await;
        h.clock.set(datetime!(2024-06-01 10:01 -7));
        let report = h.scheduler.run_cycle().await;

        assert!(report.degraded);
        assert_eq!(report.reading.unwrap().humidity, 70.0);
        // Stale 70% is too moist for both plants.
        assert!(h.actuator.calls.lock().unwrap().is_empty());
        assert!(h.shared.read().await.to_status().degraded);
    }

    #[tokio::test]
    async fn sun_saturation_stops_cooling_later_in_the_day() {
        // Mid humidity for basil, hot soil: only the cooling rule applies.
        let probe = ScriptedProbe::steady(45.0, 35.0, 1000.0);
        let config = Config {
            plants: vec![Plant {
                sun_max: 1.0,
                sun_min: 0.5,
                ..basil()
            }],
            ..Config::default()
        };
        let registry = PlantRegistry::new(config.plants.clone()).unwrap();
        let clock = Arc::new(FixedClock::at(datetime!(2024-06-01 12:00 -7)));
        let actuator = Arc::new(FakeActuator::default());
        let mut scheduler = Scheduler::new(
            &config,
            registry,
            SensorReader::new(probe, Duration::from_millis(50)),
            clock.clone(),
            actuator.clone(),
            Arc::new(RecordingPublisher::default()),
            SystemState::new("Sammamish", ["basil"]).shared(),
        );

        let first = scheduler.run_cycle().await;
        assert_eq!(first.decisions[0].1, Decision::Water);

        // One minute at 1000 lx is ~16.7 light-hours, past sun_max.
        clock.set(datetime!(2024-06-01 12:01 -7));
        let second = scheduler.run_cycle().await;
        assert!(second.sun_exposure >= 1.0, "sun={}", second.sun_exposure);
        assert_eq!(second.decisions[0].1, Decision::Withhold);
        assert_eq!(actuator.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn decisions_are_repeatable_for_identical_cycles() {
        let mut h = harness(
            ScriptedProbe::steady(40.0, 20.0, 0.0),
            datetime!(2024-06-01 10:00 -7),
            FakeActuator::default(),
        );
        let a = h.scheduler.run_cycle().await;
        let b = h.scheduler.run_cycle().await;
        assert_eq!(a.decisions, b.decisions);
    }
}
