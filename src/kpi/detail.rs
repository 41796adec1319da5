//! Per-record detail tables: one row per joined ride, vehicle trip, drop and
//! skipped record.

use crate::filter::DropReason;
use crate::matcher::JoinedTripView;
use crate::output::{Cell, Table};
use crate::parser::Diagnostic;
use crate::records::VehicleTripRecord;
use crate::kpi::utility::ratio;

pub const TRIP_COLUMNS: [&str; 16] = [
    "person_id",
    "leg",
    "vehicle_id",
    "requested_departure_s",
    "pickup_s",
    "arrival_s",
    "waiting_time_s",
    "ride_duration_s",
    "route_length_m",
    "time_loss_s",
    "dispatch_time_s",
    "dispatch_latency_s",
    "reservation_id",
    "direct_duration_s",
    "detour_ratio",
    "detour_distance_ratio",
];

pub fn trip_table(views: &[JoinedTripView]) -> Table {
    let mut table = Table::new("trips", &TRIP_COLUMNS);
    for view in views {
        let dispatch = view.dispatch.as_ref();
        table.push_row(vec![
            Cell::from(view.person_id.as_str()),
            Cell::from(view.leg),
            Cell::from(view.vehicle_id.as_str()),
            Cell::from(view.requested_departure),
            Cell::from(view.pickup),
            Cell::from(view.arrival),
            Cell::from(view.waiting_time()),
            Cell::from(view.ride_duration()),
            Cell::from(view.route_length),
            Cell::from(view.time_loss),
            Cell::from(dispatch.map(|d| d.time)),
            Cell::from(view.dispatch_latency()),
            Cell::from(dispatch.and_then(|d| d.reservation_id.as_deref())),
            Cell::from(view.direct_route.as_ref().map(|r| r.duration)),
            Cell::from(view.detour_ratio()),
            Cell::from(view.detour_distance_ratio()),
        ]);
    }
    table
}

pub const VEHICLE_COLUMNS: [&str; 10] = [
    "vehicle_id",
    "vehicle_type",
    "depart_s",
    "arrival_s",
    "active_time_s",
    "distance_m",
    "stop_time_s",
    "occupied_time_s",
    "occupied_distance_m",
    "occupancy_rate",
];

pub fn vehicle_table(vehicles: &[VehicleTripRecord]) -> Table {
    let mut table = Table::new("vehicles", &VEHICLE_COLUMNS);
    for vehicle in vehicles {
        let active = vehicle.active_time();
        table.push_row(vec![
            Cell::from(vehicle.vehicle_id.as_str()),
            Cell::from(vehicle.vehicle_type.as_str()),
            Cell::from(vehicle.depart),
            Cell::from(vehicle.arrival),
            Cell::from(active),
            Cell::from(vehicle.distance),
            Cell::from(vehicle.stop_time),
            Cell::from(vehicle.occupied_time()),
            Cell::from(vehicle.occupied_distance()),
            Cell::from(active.and_then(|a| ratio(vehicle.occupied_time(), a))),
        ]);
    }
    table
}

/// A ride that did not become a [`JoinedTripView`].
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRide {
    pub person_id: String,
    pub leg: usize,
    pub vehicle_id: Option<String>,
    pub stage: &'static str,
    pub reason: DropReason,
}

pub fn drop_table(drops: &[DroppedRide]) -> Table {
    let mut table = Table::new("drops", &["person_id", "leg", "vehicle_id", "stage", "reason"]);
    for drop in drops {
        table.push_row(vec![
            Cell::from(drop.person_id.as_str()),
            Cell::from(drop.leg),
            Cell::from(drop.vehicle_id.as_deref()),
            Cell::from(drop.stage),
            Cell::from(drop.reason.as_str()),
        ]);
    }
    table
}

pub fn diagnostics_table(diagnostics: &[Diagnostic]) -> Table {
    let mut table = Table::new("diagnostics", &["file", "position", "element", "message"]);
    for diagnostic in diagnostics {
        table.push_row(vec![
            Cell::from(diagnostic.file.as_str()),
            Cell::from(diagnostic.position),
            Cell::from(diagnostic.element.as_str()),
            Cell::from(diagnostic.message.as_str()),
        ]);
    }
    table
}
