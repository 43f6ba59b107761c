use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

/// The year the king writes from.
pub const IN_CHARACTER_YEAR: i32 = 1462;

/// Source of "today". Swappable so day rollover can be tested.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock read in the court's zone, so the day turns at its midnight
/// whatever zone the host runs in.
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        date_in(self.tz, Utc::now())
    }
}

/// Calendar date of `now` in `tz`.
pub fn date_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Real-world date as `YYYY-MM-DD`.
pub fn present_date(today: NaiveDate) -> String {
    today.format("%Y-%m-%d").to_string()
}

/// Today's month and day, moved back to the king's own year.
pub fn in_character_date(today: NaiveDate) -> String {
    format!(
        "{IN_CHARACTER_YEAR}-{:02}-{:02}",
        today.month(),
        today.day()
    )
}
