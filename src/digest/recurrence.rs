use chrono::{DateTime, Utc};
use std::time::Duration;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;
// 1970-01-01 was a Thursday, weekly boundaries fall on Monday 00:00 UTC
const WEEK_ANCHOR_OFFSET_MS: i64 = 4 * DAY as i64 * 1000;

/// How often the digest job fires. Configured as `hourly`, `daily`, `weekly` or a
/// positive number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum Recurrence {
    Hourly,
    Daily,
    Weekly,
    Every(Duration),
}

impl Recurrence {
    pub fn period(&self) -> Duration {
        match self {
            Recurrence::Hourly => Duration::from_secs(HOUR),
            Recurrence::Daily => Duration::from_secs(DAY),
            Recurrence::Weekly => Duration::from_secs(7 * DAY),
            Recurrence::Every(period) => *period,
        }
    }

    /// Time left until the next boundary of this recurrence, counted from the Unix
    /// epoch in UTC. Boundaries do not depend on when the process started, so a
    /// restart never pushes the next run further away. Always in `(0, period]`.
    pub fn delay_until_next(&self, now: DateTime<Utc>) -> Duration {
        let period_ms = (self.period().as_millis() as i64).max(1);
        let offset_ms = match self {
            Recurrence::Weekly => WEEK_ANCHOR_OFFSET_MS,
            _ => 0,
        };
        let elapsed_ms = (now.timestamp_millis() - offset_ms).rem_euclid(period_ms);

        Duration::from_millis((period_ms - elapsed_ms) as u64)
    }
}

impl TryFrom<String> for Recurrence {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "hourly" => Ok(Recurrence::Hourly),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            other => match other.parse::<u64>() {
                Ok(seconds) if seconds > 0 => Ok(Recurrence::Every(Duration::from_secs(seconds))),
                _ => Err(format!(
                    "{} is not a valid recurrence. Use 'hourly', 'daily', 'weekly' or a number of seconds.",
                    value
                )),
            },
        }
    }
}
