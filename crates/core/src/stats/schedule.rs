//! Next-check computation for swarm statistics.
//!
//! Sources whose counts barely move are polled less and less often (up to
//! the maximum interval); volatile ones are pulled back towards the minimum.
//! A random factor spreads checks so sources created together do not stay
//! in lockstep.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::repository::Source;

/// Relative change between two counts, in percent.
///
/// Going from zero to anything counts as 100%.
pub fn pct_delta(previous: u32, current: u32) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    (current as f64 - previous as f64).abs() / previous as f64 * 100.0
}

/// Largest relative change across broadcasters and watchers.
pub fn percent_change(source: &Source, broadcasters: u32, watchers: u32) -> f64 {
    pct_delta(source.broadcasters, broadcasters).max(pct_delta(source.watchers, watchers))
}

/// Interval bounds for stats checks.
#[derive(Debug, Clone, Copy)]
pub struct StatsSchedule {
    min_hours: f64,
    max_hours: f64,
}

impl Default for StatsSchedule {
    fn default() -> Self {
        Self {
            min_hours: 6.0,
            max_hours: 72.0,
        }
    }
}

impl StatsSchedule {
    pub fn new(min_hours: f64, max_hours: f64) -> Self {
        Self {
            min_hours,
            max_hours: max_hours.max(min_hours),
        }
    }

    pub fn min_hours(&self) -> f64 {
        self.min_hours
    }

    pub fn max_hours(&self) -> f64 {
        self.max_hours
    }

    /// Interval the source is currently on, in hours.
    pub fn current_interval_hours(&self, source: &Source) -> f64 {
        match (source.last_stats_check_at, source.next_stats_check_at) {
            (Some(last), Some(next)) => {
                let hours = (next - last).num_milliseconds() as f64 / 3_600_000.0;
                hours.clamp(self.min_hours, self.max_hours)
            }
            _ => self.min_hours,
        }
    }

    /// Interval following `current_hours` for a given change, before jitter.
    pub fn next_interval_hours(&self, current_hours: f64, percent_change: f64) -> f64 {
        if percent_change < 5.0 {
            (current_hours * 2.0).min(self.max_hours)
        } else if percent_change < 10.0 {
            current_hours
        } else if percent_change > 50.0 {
            self.min_hours
        } else if percent_change > 20.0 {
            (current_hours / 2.0).max(self.min_hours)
        } else {
            (current_hours * 0.75).max(self.min_hours)
        }
    }

    /// When to check `source` next, given the counts just observed.
    pub fn next_check_time(
        &self,
        source: &Source,
        broadcasters: u32,
        watchers: u32,
    ) -> DateTime<Utc> {
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        self.next_check_time_at(source, broadcasters, watchers, Utc::now(), jitter)
    }

    /// Deterministic variant of [`next_check_time`](Self::next_check_time).
    pub fn next_check_time_at(
        &self,
        source: &Source,
        broadcasters: u32,
        watchers: u32,
        now: DateTime<Utc>,
        jitter: f64,
    ) -> DateTime<Utc> {
        let change = percent_change(source, broadcasters, watchers);
        let current = self.current_interval_hours(source);
        let hours = (self.next_interval_hours(current, change) * jitter)
            .clamp(self.min_hours, self.max_hours);

        now + Duration::milliseconds((hours * 3_600_000.0).round() as i64)
    }
}
