//! Plant records and the immutable registry the scheduler iterates over.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Plant
// ---------------------------------------------------------------------------

/// Watering thresholds for one named plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub name: String,
    /// Water when soil humidity (%) falls below this.
    pub soil_humidity_min: f32,
    /// Soil is too moist at or above this; never water.
    pub soil_humidity_max: f32,
    /// Cumulative daily light exposure bounds, in light-hours.
    pub sun_min: f32,
    pub sun_max: f32,
    /// Soil is too cold below this (degrees C).
    pub soil_temperature_min: f32,
    /// Soil is too hot at or above this; water to cool it.
    pub soil_temperature_max: f32,
}

impl Plant {
    /// Every threshold invariant this plant breaks, formatted for humans.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name is empty".to_string());
        }

        let bounds = [
            ("soil_humidity", self.soil_humidity_min, self.soil_humidity_max),
            ("sun", self.sun_min, self.sun_max),
            (
                "soil_temperature",
                self.soil_temperature_min,
                self.soil_temperature_max,
            ),
        ];

        for (field, min, max) in bounds {
            if !min.is_finite() || !max.is_finite() {
                errors.push(format!("{field} bounds must be finite numbers"));
            } else if min >= max {
                errors.push(format!(
                    "{field}_min ({min}) must be less than {field}_max ({max})"
                ));
            }
        }

        if !(0.0..=100.0).contains(&self.soil_humidity_min)
            || !(0.0..=100.0).contains(&self.soil_humidity_max)
        {
            errors.push(format!(
                "soil humidity bounds ({}, {}) out of range [0, 100]",
                self.soil_humidity_min, self.soil_humidity_max
            ));
        }

        if self.sun_min < 0.0 {
            errors.push(format!("sun_min {} is negative", self.sun_min));
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Stable handle to a plant inside a [`PlantRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlantId(usize);

/// Read-only table of plants, loaded once at start-up.
#[derive(Debug, Clone, Default)]
pub struct PlantRegistry {
    plants: Vec<Plant>,
}

impl PlantRegistry {
    /// Build a registry, rejecting duplicate names and broken thresholds.
    pub fn new(plants: Vec<Plant>) -> Result<Self> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut errors: Vec<String> = Vec::new();

        for p in &plants {
            if !seen.insert(p.name.as_str()) {
                errors.push(format!("plant '{}': duplicate name", p.name));
            }
            for v in p.violations() {
                errors.push(format!("plant '{}': {v}", p.name));
            }
        }

        if !errors.is_empty() {
            bail!("invalid plant table:\n  - {}", errors.join("\n  - "));
        }

        Ok(Self { plants })
    }

    pub fn get(&self, id: PlantId) -> Option<&Plant> {
        self.plants.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlantId, &Plant)> {
        self.plants.iter().enumerate().map(|(i, p)| (PlantId(i), p))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plants.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.plants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plants.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
