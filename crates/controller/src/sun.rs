//! Daily sun exposure ledger.
//!
//! Exposure is measured in light-hours: each reading contributes its light
//! level multiplied by the hours since the previous reading. The ledger starts
//! from zero whenever the local calendar date changes.

use std::time::Duration;
use time::Date;

use crate::sensor::SensorReading;

#[derive(Debug, Clone)]
pub struct SunLedger {
    day: Option<Date>,
    exposure: f32,
    last_at: Option<time::OffsetDateTime>,
    /// Longest gap credited between two readings; anything longer is an
    /// outage, not sunshine.
    max_gap: Duration,
}

impl SunLedger {
    pub fn new(max_gap: Duration) -> Self {
        Self {
            day: None,
            exposure: 0.0,
            last_at: None,
            max_gap,
        }
    }

    /// Fold a reading into today's total and return the new total.
    pub fn record(&mut self, reading: &SensorReading) -> f32 {
        let taken_at = reading.taken_at;
        let date = taken_at.date();

        match self.day {
            Some(day) if date == day => {}
            // Clock stepped back across midnight: credit nothing, keep today.
            Some(day) if date < day => return self.exposure,
            previous => {
                if previous.is_some() {
                    tracing::info!(
                        day = %date,
                        previous_exposure = format!("{:.1}", self.exposure),
                        "sun ledger reset for new day"
                    );
                }
                self.day = Some(date);
                self.exposure = 0.0;
                self.last_at = Some(taken_at);
                return self.exposure;
            }
        }

        if let Some(last) = self.last_at {
            let gap_secs = (taken_at - last)
                .as_seconds_f64()
                .min(self.max_gap.as_secs_f64());
            if gap_secs > 0.0 {
                let light = reading.light.max(0.0) as f64;
                self.exposure += (light * gap_secs / 3600.0) as f32;
            }
        }
        match self.last_at {
            Some(last) if taken_at <= last => {}
            _ => self.last_at = Some(taken_at),
        }

        self.exposure
    }
}

// ===========================================================================
// Tests
// ===========================================================================
