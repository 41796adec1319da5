//! Inclusion predicates over parsed records.
//!
//! Filtering is pure and keeps input order. Every rejected record is returned
//! with the reason it was dropped so the run can account for it.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::config::FilterOptions;
use crate::records::{PersonTripRecord, VehicleTripRecord, WalkRecord};

/// Why a record left the pipeline before reaching the KPI calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Unfinished,
    VehicleType,
    BeforeWindow,
    AfterWindow,
    InconsistentTimes,
    UnknownVehicle,
    OutsideVehicleInterval,
}

impl DropReason {
    pub const ALL: [DropReason; 7] = [
        DropReason::Unfinished,
        DropReason::VehicleType,
        DropReason::BeforeWindow,
        DropReason::AfterWindow,
        DropReason::InconsistentTimes,
        DropReason::UnknownVehicle,
        DropReason::OutsideVehicleInterval,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Unfinished => "unfinished",
            DropReason::VehicleType => "vehicle_type",
            DropReason::BeforeWindow => "before_window",
            DropReason::AfterWindow => "after_window",
            DropReason::InconsistentTimes => "inconsistent_times",
            DropReason::UnknownVehicle => "unknown_vehicle",
            DropReason::OutsideVehicleInterval => "outside_vehicle_interval",
        }
    }
}

/// Number of dropped records per reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    counts: [usize; DropReason::ALL.len()],
}

impl DropCounts {
    pub fn record(&mut self, reason: DropReason) {
        self.counts[reason as usize] += 1;
    }

    pub fn get(&self, reason: DropReason) -> usize {
        self.counts[reason as usize]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn merge(&mut self, other: &DropCounts) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
    }

    /// `(reason, count)` pairs in [`DropReason::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (DropReason, usize)> + '_ {
        DropReason::ALL.iter().map(|reason| (*reason, self.get(*reason)))
    }
}

/// A record kind the filter understands.
///
/// A method returning `None` means the corresponding predicate does not apply
/// to this kind of record.
pub trait Filterable {
    fn vehicle_type(&self) -> Option<&str>;

    /// `(requested departure, arrival)` tested against the time window.
    fn window_times(&self) -> Option<(Option<f64>, Option<f64>)>;

    /// Whether the record completed; `None` where `require_finished` does not apply.
    fn finished(&self) -> Option<bool>;

    fn times_consistent(&self) -> bool {
        true
    }
}

impl Filterable for VehicleTripRecord {
    fn vehicle_type(&self) -> Option<&str> {
        Some(&self.vehicle_type)
    }

    fn window_times(&self) -> Option<(Option<f64>, Option<f64>)> {
        None
    }

    // An open vehicle trip still carried its finished rides.
    fn finished(&self) -> Option<bool> {
        None
    }

    fn times_consistent(&self) -> bool {
        self.arrival.is_none_or(|arrival| self.depart <= arrival)
    }
}

impl Filterable for PersonTripRecord {
    fn vehicle_type(&self) -> Option<&str> {
        None
    }

    fn window_times(&self) -> Option<(Option<f64>, Option<f64>)> {
        Some((self.requested_departure, self.arrival))
    }

    fn finished(&self) -> Option<bool> {
        Some(self.is_finished())
    }

    fn times_consistent(&self) -> bool {
        PersonTripRecord::times_consistent(self)
    }
}

/// Output of one filter pass.
#[derive(Debug, Clone)]
pub struct Filtered<T> {
    pub kept: Vec<T>,
    pub rejected: Vec<(T, DropReason)>,
}

impl<T> Filtered<T> {
    pub fn counts(&self) -> DropCounts {
        let mut counts = DropCounts::default();
        for (_, reason) in &self.rejected {
            counts.record(*reason);
        }
        counts
    }
}

impl FilterOptions {
    /// The first predicate `record` fails, if any.
    pub fn check<T: Filterable>(&self, record: &T) -> Option<DropReason> {
        if let (Some(wanted), Some(actual)) = (self.vehicle_type.as_deref(), record.vehicle_type()) {
            if wanted != actual {
                return Some(DropReason::VehicleType);
            }
        }
        if self.require_finished && record.finished() == Some(false) {
            return Some(DropReason::Unfinished);
        }
        if !record.times_consistent() {
            return Some(DropReason::InconsistentTimes);
        }
        if let Some((departure, arrival)) = record.window_times() {
            if let Some(earliest) = self.depart_earliest {
                if departure.is_none_or(|departure| departure < earliest) {
                    return Some(DropReason::BeforeWindow);
                }
            }
            if let Some(latest) = self.arrival_latest {
                if arrival.is_none_or(|arrival| arrival > latest) {
                    return Some(DropReason::AfterWindow);
                }
            }
        }
        None
    }

    pub fn apply<T: Filterable>(&self, records: Vec<T>) -> Filtered<T> {
        let mut kept = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        for record in records {
            match self.check(&record) {
                None => kept.push(record),
                Some(reason) => rejected.push((record, reason)),
            }
        }
        debug!(kept = kept.len(), rejected = rejected.len(), "Filter applied");
        Filtered { kept, rejected }
    }
}

/// Keeps the walks of persons none of whose rides were dropped.
pub fn retain_walks(walks: Vec<WalkRecord>, dropped_persons: &HashSet<String>) -> Vec<WalkRecord> {
    walks
        .into_iter()
        .filter(|walk| !dropped_persons.contains(&walk.person_id))
        .collect()
}
