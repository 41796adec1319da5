//! Typed records read from the simulator's output logs.
//!
//! Times are simulation seconds and distances are metres. Measurements the
//! simulator marks as "not reached" (negative values) are stored as `None`.

use serde::Serialize;

/// One stretch of a vehicle trip during which at least one passenger was aboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupiedStretch {
    pub time: f64,
    pub distance: Option<f64>,
}

/// A `<tripinfo>` element: one vehicle's trip through the scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleTripRecord {
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub depart: f64,
    pub arrival: Option<f64>,
    pub duration: Option<f64>,
    pub distance: Option<f64>,
    pub stop_time: Option<f64>,
    pub occupied: Vec<OccupiedStretch>,
}

impl VehicleTripRecord {
    /// Active time of the vehicle, preferring the logged duration.
    pub fn active_time(&self) -> Option<f64> {
        self.duration
            .or_else(|| self.arrival.map(|arrival| arrival - self.depart))
    }

    pub fn occupied_time(&self) -> f64 {
        self.occupied.iter().map(|s| s.time).sum()
    }

    pub fn occupied_distance(&self) -> f64 {
        self.occupied.iter().filter_map(|s| s.distance).sum()
    }

    /// Whether `[start, end]` lies within this trip's active interval.
    ///
    /// An unfinished trip is open towards the end of the simulation.
    pub fn contains(&self, start: f64, end: f64) -> bool {
        self.depart <= start && self.arrival.is_none_or(|arrival| end <= arrival)
    }
}

/// A `<ride>` leg inside a `<personinfo>` element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonTripRecord {
    pub person_id: String,
    /// 0-based index of the ride among the person's rides.
    pub leg: usize,
    pub requested_departure: Option<f64>,
    pub pickup: Option<f64>,
    pub arrival: Option<f64>,
    pub vehicle_id: Option<String>,
    pub route_length: Option<f64>,
    pub time_loss: Option<f64>,
    pub origin: Option<String>,
    pub destination: Option<String>,
}

impl PersonTripRecord {
    pub fn is_finished(&self) -> bool {
        self.pickup.is_some() && self.arrival.is_some() && self.vehicle_id.is_some()
    }

    /// `requested <= pickup <= arrival` over the timestamps that are present.
    pub fn times_consistent(&self) -> bool {
        let ordered = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => a <= b,
            _ => true,
        };
        ordered(self.requested_departure, self.pickup)
            && ordered(self.pickup, self.arrival)
            && ordered(self.requested_departure, self.arrival)
    }
}

/// A `<walk>` leg inside a `<personinfo>` element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkRecord {
    pub person_id: String,
    pub duration: Option<f64>,
    pub route_length: Option<f64>,
}

/// Assignment of a vehicle to one person's ride request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRecord {
    pub vehicle_id: String,
    pub person_id: String,
    pub time: f64,
    pub reservation_id: Option<String>,
}

/// A `<dispatchShared>` element: one pooled assignment and its time losses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedDispatchRecord {
    pub vehicle_id: String,
    pub time: f64,
    pub persons: Vec<String>,
    pub sharing_persons: Vec<String>,
    pub abs_loss: [Option<f64>; 2],
    pub rel_loss: [Option<f64>; 2],
}

impl SharedDispatchRecord {
    pub fn person_count(&self) -> usize {
        self.persons.len() + self.sharing_persons.len()
    }
}

/// Unshared baseline route of one person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectRouteRecord {
    pub person_id: String,
    pub duration: f64,
    pub distance: Option<f64>,
}

/// Everything read from a trip-info log.
#[derive(Debug, Clone, Default)]
pub struct TripInfoLog {
    pub vehicles: Vec<VehicleTripRecord>,
    pub persons: Vec<PersonTripRecord>,
    pub walks: Vec<WalkRecord>,
    /// Number of `<personinfo>` elements seen.
    pub person_infos: usize,
    /// Persons that walked but never rode.
    pub walking_only: usize,
}

/// Everything read from a dispatch-info log.
#[derive(Debug, Clone, Default)]
pub struct DispatchLog {
    pub dispatches: Vec<DispatchRecord>,
    pub shared: Vec<SharedDispatchRecord>,
}
