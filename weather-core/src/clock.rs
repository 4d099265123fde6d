use chrono::{DateTime, NaiveTime, Utc};

/// Source of "now" for storage timestamps and the forecast window cutoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }

    /// Midnight UTC of the current date. Forecast rows at or after this
    /// instant belong to the replaceable window.
    pub fn start_of_today(&self) -> DateTime<Utc> {
        start_of_day(self.now())
    }
}

pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}
