//! Day-of-week x hour-of-day wait statistics
//!
//! Computed from the capped recency window on every read, so these are
//! recent-trend estimates rather than lifetime-exact figures.

use crate::domain::types::VisitEntry;
use serde::Serialize;

pub const DAYS_PER_WEEK: usize = 7;
pub const HOURS_PER_DAY: usize = 24;

/// Averages per (day, hour) cell and per day. `None` means no observations,
/// which is not the same as a zero-second wait.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationStats {
    pub hourly_averages: [[Option<f64>; HOURS_PER_DAY]; DAYS_PER_WEEK],
    pub weekly_averages: [Option<f64>; DAYS_PER_WEEK],
    pub counts: [[u32; HOURS_PER_DAY]; DAYS_PER_WEEK],
}

/// Stats for a single hour cell, ready for display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourStats {
    pub has_data: bool,
    pub seconds: Option<f64>,
}

impl LocationStats {
    /// Average for one cell; out-of-range indices have no data
    pub fn hourly(&self, day: usize, hour: usize) -> Option<f64> {
        self.hourly_averages.get(day)?.get(hour).copied().flatten()
    }

    pub fn current_hour_stats(&self, day: usize, hour: usize) -> HourStats {
        match self.hourly(day, hour).filter(|s| *s > 0.0) {
            Some(seconds) => HourStats { has_data: true, seconds: Some(seconds) },
            None => HourStats { has_data: false, seconds: None },
        }
    }

    /// Total number of visits that landed in a cell
    pub fn sample_count(&self) -> u32 {
        self.counts.iter().flatten().sum()
    }
}

/// Bucket waits by (day-of-week, hour-of-day); malformed entries are skipped
pub fn compute_location_stats(visits: &[VisitEntry]) -> LocationStats {
    let mut totals = [[0.0f64; HOURS_PER_DAY]; DAYS_PER_WEEK];
    let mut counts = [[0u32; HOURS_PER_DAY]; DAYS_PER_WEEK];

    for visit in visits {
        let day = visit.day_of_week as usize;
        let hour = visit.hour_of_day as usize;
        if day >= DAYS_PER_WEEK || hour >= HOURS_PER_DAY {
            continue;
        }
        if !visit.wait_seconds.is_finite() || visit.wait_seconds <= 0.0 {
            continue;
        }
        totals[day][hour] += visit.wait_seconds;
        counts[day][hour] += 1;
    }

    let mut hourly_averages = [[None; HOURS_PER_DAY]; DAYS_PER_WEEK];
    let mut weekly_averages = [None; DAYS_PER_WEEK];

    for day in 0..DAYS_PER_WEEK {
        let mut day_total = 0.0;
        let mut day_count = 0u32;
        for hour in 0..HOURS_PER_DAY {
            let count = counts[day][hour];
            if count > 0 {
                hourly_averages[day][hour] = Some(totals[day][hour] / f64::from(count));
            }
            day_total += totals[day][hour];
            day_count += count;
        }
        if day_count > 0 {
            weekly_averages[day] = Some(day_total / f64::from(day_count));
        }
    }

    LocationStats { hourly_averages, weekly_averages, counts }
}

/// `MM:SS`, minutes unbounded; negative or non-finite input renders as `00:00`
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "00:00".to_string();
    }
    let total = seconds.round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// `HH:00`, clamped to the day
pub fn format_hour_label(hour: usize) -> String {
    format!("{:02}:00", hour.min(HOURS_PER_DAY - 1))
}
