use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Per-day digest of a forecast: temperature range and the first
/// description seen that day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub min_temp: f64,
    pub max_temp: f64,
    pub description: String,
}

/// Group `(time, temperature, description)` samples by UTC calendar date.
/// Days come out in chronological order, at most `days` of them.
pub fn daily_summaries<'a, I>(samples: I, days: usize) -> Vec<DailySummary>
where
    I: IntoIterator<Item = (DateTime<Utc>, f64, &'a str)>,
{
    let mut sorted: Vec<_> = samples.into_iter().collect();
    sorted.sort_by_key(|(at, _, _)| *at);

    let mut out: Vec<DailySummary> = Vec::new();
    for (at, temp, description) in sorted {
        let date = at.date_naive();
        match out.last_mut() {
            Some(day) if day.date == date => {
                day.min_temp = day.min_temp.min(temp);
                day.max_temp = day.max_temp.max(temp);
            }
            _ => {
                if out.len() == days {
                    break;
                }
                out.push(DailySummary {
                    date,
                    min_temp: temp,
                    max_temp: temp,
                    description: description.to_string(),
                });
            }
        }
    }
    out
}
