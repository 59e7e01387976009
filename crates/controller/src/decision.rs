//! Per-plant watering decision.
//!
//! Pure function of the plant thresholds, the latest reading, the local hour
//! and today's sun exposure. Actuation is the caller's job.
//!
//! ```text
//! hour outside window ─────────────────────────────▶ OutOfWindow
//! humidity <  humidity_min ────────────────────────▶ Water
//! humidity >= humidity_max ────────────────────────▶ Withhold
//! temperature >= temperature_max && sun < sun_max ─▶ Water (cooling)
//! otherwise ───────────────────────────────────────▶ Withhold
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plant::Plant;
use crate::sensor::SensorReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Water,
    Withhold,
    OutOfWindow,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Water => write!(f, "water"),
            Self::Withhold => write!(f, "withhold"),
            Self::OutOfWindow => write!(f, "out-of-window"),
        }
    }
}

// ---------------------------------------------------------------------------
// Watering window
// ---------------------------------------------------------------------------

/// Hours of the day (both ends inclusive) during which watering may start.
/// A window whose start is after its end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WateringWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl WateringWindow {
    pub const fn new(start_hour: u8, end_hour: u8) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            (self.start_hour..=self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }
}

impl Default for WateringWindow {
    fn default() -> Self {
        Self::new(6, 23)
    }
}

impl fmt::Display for WateringWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:59", self.start_hour, self.end_hour)
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Decide whether `plant` should be watered right now.
///
/// Thresholds count as met on equality: humidity exactly at the minimum does
/// not trigger watering, exactly at the maximum withholds, and temperature
/// exactly at the maximum triggers cooling. Once `sun_today` reaches
/// `sun_max` the cooling rule is suppressed; the dry-soil rule still applies.
pub fn decide(
    plant: &Plant,
    reading: &SensorReading,
    hour: u8,
    window: WateringWindow,
    sun_today: f32,
) -> Decision {
    if !window.contains(hour) {
        return Decision::OutOfWindow;
    }

    if reading.humidity < plant.soil_humidity_min {
        return Decision::Water;
    }
    if reading.humidity >= plant.soil_humidity_max {
        return Decision::Withhold;
    }

    let too_hot = reading.temperature >= plant.soil_temperature_max;
    let sun_saturated = sun_today >= plant.sun_max;
    if too_hot && !sun_saturated {
        Decision::Water
    } else {
        Decision::Withhold
    }
}

// ===========================================================================
// Tests
// ===========================================================================
