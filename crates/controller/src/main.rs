mod actuator;
mod clock;
mod config;
mod decision;
mod mqtt;
mod plant;
mod scheduler;
mod sensor;
mod sim;
mod state;
mod sun;
mod telemetry;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use actuator::HttpActuator;
use clock::{Clock, SystemClock};
use plant::PlantRegistry;
use scheduler::Scheduler;
use sensor::SensorReader;
use sim::{Scenario, SimulatedProbe};
use state::SystemState;
use telemetry::MqttPublisher;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    cfg.apply_overrides(|k| env::var(k).ok());
    cfg.validate()
        .with_context(|| format!("invalid config after environment overrides: {config_path}"))?;

    let registry = PlantRegistry::new(cfg.plants.clone())?;
    if registry.is_empty() {
        warn!("no plants configured: telemetry only, nothing will be watered");
    }

    info!(
        location = %cfg.site.location,
        time_zone = cfg.site.time_zone,
        ntp_server = %cfg.site.ntp_server,
        time_scale = cfg.schedule.time_scale,
        plants = registry.len(),
        "config loaded from {config_path}"
    );

    // ── Clock ───────────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(cfg.site.time_zone)?);

    // ── Shared state + status API ───────────────────────────────────
    let shared = SystemState::new(&cfg.site.location, registry.names()).shared();
    shared
        .write()
        .await
        .record_system("controller started".to_string());

    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    tokio::spawn(web::serve(Arc::clone(&shared), web_port));

    // ── MQTT telemetry ──────────────────────────────────────────────
    let (client, eventloop) = mqtt::connect(&cfg.mqtt);
    tokio::spawn(mqtt::drive(eventloop, Arc::clone(&shared)));
    let publisher = Arc::new(MqttPublisher::new(client, &cfg.mqtt));
    info!(
        broker = format!("{}:{}", cfg.mqtt.host, cfg.mqtt.port),
        humidity = %cfg.feeds.humidity,
        temperature = %cfg.feeds.temperature,
        light = %cfg.feeds.light,
        "telemetry feeds"
    );

    // ── Irrigation controller ───────────────────────────────────────
    let actuator = Arc::new(HttpActuator::new(&cfg.actuator, &cfg.schedule)?);
    info!(url = %cfg.actuator.url, "irrigation controller");

    // ── Sensors ─────────────────────────────────────────────────────
    let scenario = Scenario::from_str_lossy(&cfg.sensor.scenario);
    let mut probe = SimulatedProbe::new(scenario, Arc::clone(&clock), None);
    if let Some(rate) = cfg.sensor.fault_rate {
        probe = probe.with_fault_rate(rate);
    }
    info!(%scenario, "using simulated soil probe");
    let reader = SensorReader::new(probe, Duration::from_millis(cfg.sensor.read_timeout_ms));

    // ── Control loop ────────────────────────────────────────────────
    Scheduler::new(&cfg, registry, reader, clock, actuator, publisher, shared)
        .run()
        .await;

    Ok(())
}
