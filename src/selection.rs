//! Reduce raw snapshot lists to the requested capture cadence.
//!
//! The archive rarely holds a snapshot exactly on an ideal target date, so
//! each target date is satisfied by the nearest available snapshot instead,
//! with ties broken toward the earlier one. Target dates the archive cannot
//! satisfy are reported as unfulfilled rather than failing the request.

use std::collections::HashSet;

use chrono::{DateTime, Days, Duration, Months, Utc};
use serde::Serialize;
use url::Url;

use crate::wayback::SnapshotRecord;

/// Requested capture cadence between the start and end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    /// Single earliest available snapshot on or after the start date.
    First,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Fixed step in days.
    Custom { step_days: u32 },
}

/// One URL's worth of work: what to collect and at what cadence.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub source_url: Url,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Cap on selected snapshots, applied after selection in chronological order.
    pub max_per_url: Option<usize>,
    /// Maximum distance between a target date and the snapshot satisfying it.
    /// `None` accepts the nearest candidate regardless of distance.
    pub max_lookaround: Option<Duration>,
}

/// One point in the requested interval sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetPeriod {
    pub index: usize,
    pub target_date: DateTime<Utc>,
}

/// A snapshot chosen to satisfy one target period.
///
/// Carries the period so the dataset stays traceable when the nearest
/// available snapshot differs from the ideal date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSnapshot {
    pub record: SnapshotRecord,
    pub period: TargetPeriod,
}

/// Result of reducing one URL's snapshot list.
#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    /// Chosen snapshots, ordered by archived timestamp ascending.
    pub selected: Vec<SelectedSnapshot>,
    /// Target periods no snapshot could satisfy.
    pub unfulfilled: Vec<TargetPeriod>,
}

/// Generate the ideal target dates for an interval within `[start, end]`.
#[must_use]
pub fn target_dates(interval: Interval, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    if start > end {
        return Vec::new();
    }
    if interval == Interval::First {
        return vec![start];
    }

    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        match step(interval, current) {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}

fn step(interval: Interval, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match interval {
        Interval::First => None,
        Interval::Daily => current.checked_add_days(Days::new(1)),
        Interval::Weekly => current.checked_add_days(Days::new(7)),
        Interval::Monthly => current.checked_add_months(Months::new(1)),
        Interval::Yearly => current.checked_add_months(Months::new(12)),
        Interval::Custom { step_days } => current.checked_add_days(Days::new(u64::from(step_days))),
    }
}

/// Choose the snapshots satisfying each target period of `request`.
///
/// `records` must be the locator's output for the request's range. Selection
/// is pure: the same records and request always yield the same outcome.
#[must_use]
pub fn select(records: &[SnapshotRecord], request: &SnapshotRequest) -> SelectionOutcome {
    let targets = target_dates(request.interval, request.start, request.end);
    let mut used: HashSet<DateTime<Utc>> = HashSet::new();
    let mut outcome = SelectionOutcome::default();

    for (index, target_date) in targets.iter().copied().enumerate() {
        let period = TargetPeriod { index, target_date };
        // A record on or after the next target date belongs to that later
        // period; reaching past it here would starve the later target.
        let forward_bound = targets.get(index + 1).copied();

        let nearest = records
            .iter()
            .filter(|r| !used.contains(&r.archived_timestamp))
            .filter(|r| forward_bound.map_or(true, |bound| r.archived_timestamp < bound))
            .map(|r| ((r.archived_timestamp - target_date).abs(), r))
            .filter(|(distance, _)| {
                request.max_lookaround.map_or(true, |max| *distance <= max)
            })
            .min_by_key(|(distance, r)| (*distance, r.archived_timestamp));

        match nearest {
            Some((_, record)) => {
                used.insert(record.archived_timestamp);
                outcome.selected.push(SelectedSnapshot {
                    record: record.clone(),
                    period,
                });
            }
            None => outcome.unfulfilled.push(period),
        }
    }

    // Backward reach across periods can select out of timestamp order.
    outcome.selected.sort_by_key(|s| s.record.archived_timestamp);

    if let Some(cap) = request.max_per_url {
        outcome.selected.truncate(cap);
    }

    outcome
}
