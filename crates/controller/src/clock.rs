use anyhow::{Context, Result};
use time::{OffsetDateTime, UtcOffset};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// System time shifted into the configured time zone.
///
/// The host is expected to keep UTC in sync (NTP); only the offset is ours.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(time_zone_hours: i8) -> Result<Self> {
        let offset = UtcOffset::from_hms(time_zone_hours, 0, 0)
            .with_context(|| format!("invalid time zone offset: {time_zone_hours}h"))?;
        Ok(Self { offset })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}
