//! Joins filtered rides with the vehicle trip that carried them, the dispatch
//! that assigned them and their direct-route baseline.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::DispatchTieBreak;
use crate::filter::{DropCounts, DropReason};
use crate::records::{DirectRouteRecord, DispatchRecord, PersonTripRecord, VehicleTripRecord};

/// One completed ride with everything known about it.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTripView {
    pub person_id: String,
    pub leg: usize,
    pub vehicle_id: String,
    /// Index of the carrying trip in the vehicle collection passed to [`match_trips`].
    pub vehicle: usize,
    pub requested_departure: f64,
    pub pickup: f64,
    pub arrival: f64,
    pub route_length: Option<f64>,
    pub time_loss: Option<f64>,
    pub dispatch: Option<DispatchRecord>,
    pub direct_route: Option<DirectRouteRecord>,
}

impl JoinedTripView {
    pub fn waiting_time(&self) -> f64 {
        self.pickup - self.requested_departure
    }

    pub fn ride_duration(&self) -> f64 {
        self.arrival - self.pickup
    }

    pub fn dispatch_latency(&self) -> Option<f64> {
        self.dispatch.as_ref().map(|d| self.pickup - d.time)
    }

    pub fn detour_ratio(&self) -> Option<f64> {
        self.direct_route
            .as_ref()
            .map(|route| self.ride_duration() / route.duration)
    }

    pub fn detour_distance_ratio(&self) -> Option<f64> {
        let direct = self.direct_route.as_ref()?.distance.filter(|d| *d > 0.0)?;
        Some(self.route_length? / direct)
    }
}

/// Output of the join.
#[derive(Debug, Clone, Default)]
pub struct Matched {
    pub views: Vec<JoinedTripView>,
    pub dropped: Vec<(PersonTripRecord, DropReason)>,
    /// Dispatches ignored because they were issued after the pickup.
    pub dispatch_after_pickup: usize,
}

impl Matched {
    pub fn counts(&self) -> DropCounts {
        let mut counts = DropCounts::default();
        for (_, reason) in &self.dropped {
            counts.record(*reason);
        }
        counts
    }
}

/// Vehicle id to trip indices, in input order.
fn index_vehicles(vehicles: &[VehicleTripRecord]) -> HashMap<&str, Vec<usize>> {
    let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, vehicle) in vehicles.iter().enumerate() {
        index.entry(vehicle.vehicle_id.as_str()).or_default().push(i);
    }
    index
}

/// Person id to the single dispatch that represents them.
fn index_dispatches(
    dispatches: &[DispatchRecord],
    tie_break: DispatchTieBreak,
) -> HashMap<&str, usize> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, dispatch) in dispatches.iter().enumerate() {
        index
            .entry(dispatch.person_id.as_str())
            .and_modify(|chosen| {
                if tie_break == DispatchTieBreak::Earliest && dispatch.time < dispatches[*chosen].time {
                    *chosen = i;
                }
            })
            .or_insert(i);
    }
    index
}

/// Person id to the first direct route listed for them.
fn index_direct_routes(routes: &[DirectRouteRecord]) -> HashMap<&str, usize> {
    let mut index = HashMap::new();
    for (i, route) in routes.iter().enumerate() {
        index.entry(route.person_id.as_str()).or_insert(i);
    }
    index
}

/// Builds one [`JoinedTripView`] per ride that a vehicle trip accounts for.
///
/// `vehicles` is every parsed vehicle trip, finished or not. A ride carried
/// by a trip of another type than `vehicle_type` is dropped as
/// [`DropReason::VehicleType`]. Rides without a carrying vehicle trip are
/// dropped and counted; optional inputs that are absent leave the
/// corresponding view fields empty.
#[tracing::instrument(skip_all, fields(rides = persons.len(), vehicles = vehicles.len()))]
pub fn match_trips(
    persons: Vec<PersonTripRecord>,
    vehicles: &[VehicleTripRecord],
    dispatches: Option<&[DispatchRecord]>,
    direct_routes: Option<&[DirectRouteRecord]>,
    vehicle_type: Option<&str>,
    tie_break: DispatchTieBreak,
) -> Matched {
    let vehicle_index = index_vehicles(vehicles);
    let dispatch_index = dispatches.map(|d| index_dispatches(d, tie_break));
    let route_index = direct_routes.map(index_direct_routes);

    let mut matched = Matched::default();

    for person in persons {
        let (Some(vehicle_id), Some(requested), Some(pickup), Some(arrival)) = (
            person.vehicle_id.as_deref(),
            person.requested_departure,
            person.pickup,
            person.arrival,
        ) else {
            debug!(person = %person.person_id, leg = person.leg, "Ride not completed, not joinable");
            matched.dropped.push((person, DropReason::Unfinished));
            continue;
        };

        let Some(candidates) = vehicle_index.get(vehicle_id) else {
            warn!(
                person = %person.person_id,
                leg = person.leg,
                vehicle = vehicle_id,
                "No vehicle trip for ride, dropping"
            );
            matched.dropped.push((person, DropReason::UnknownVehicle));
            continue;
        };

        let Some(vehicle) = candidates
            .iter()
            .copied()
            .find(|i| vehicles[*i].contains(pickup, arrival))
        else {
            warn!(
                person = %person.person_id,
                leg = person.leg,
                vehicle = vehicle_id,
                pickup,
                arrival,
                "Ride lies outside every trip of its vehicle, dropping"
            );
            matched.dropped.push((person, DropReason::OutsideVehicleInterval));
            continue;
        };

        if vehicle_type.is_some_and(|wanted| vehicles[vehicle].vehicle_type != wanted) {
            debug!(
                person = %person.person_id,
                vehicle = vehicle_id,
                vehicle_type = %vehicles[vehicle].vehicle_type,
                "Ride carried by another vehicle type, dropping"
            );
            matched.dropped.push((person, DropReason::VehicleType));
            continue;
        }

        let mut dispatch = match (&dispatch_index, dispatches) {
            (Some(index), Some(records)) => index
                .get(person.person_id.as_str())
                .map(|i| records[*i].clone()),
            _ => None,
        };
        if dispatch.as_ref().is_some_and(|d| d.time > pickup) {
            debug!(person = %person.person_id, "Dispatch issued after pickup, ignoring it");
            matched.dispatch_after_pickup += 1;
            dispatch = None;
        }

        let direct_route = match (&route_index, direct_routes) {
            (Some(index), Some(records)) => index
                .get(person.person_id.as_str())
                .map(|i| records[*i].clone()),
            _ => None,
        };

        matched.views.push(JoinedTripView {
            vehicle_id: vehicle_id.to_string(),
            vehicle,
            requested_departure: requested,
            pickup,
            arrival,
            route_length: person.route_length,
            time_loss: person.time_loss,
            dispatch,
            direct_route,
            person_id: person.person_id,
            leg: person.leg,
        });
    }

    info!(
        views = matched.views.len(),
        dropped = matched.dropped.len(),
        dispatch_after_pickup = matched.dispatch_after_pickup,
        "Trips matched"
    );
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ride(person: &str, vehicle: &str, requested: f64, pickup: f64, arrival: f64) -> PersonTripRecord {
        PersonTripRecord {
            person_id: person.to_string(),
            leg: 0,
            requested_departure: Some(requested),
            pickup: Some(pickup),
            arrival: Some(arrival),
            vehicle_id: Some(vehicle.to_string()),
            route_length: Some(1000.0),
            time_loss: None,
            origin: None,
            destination: None,
        }
    }

    fn taxi(id: &str, depart: f64, arrival: Option<f64>) -> VehicleTripRecord {
        VehicleTripRecord {
            vehicle_id: id.to_string(),
            vehicle_type: "drt".to_string(),
            depart,
            arrival,
            duration: None,
            distance: None,
            stop_time: None,
            occupied: Vec::new(),
        }
    }

    fn dispatch(person: &str, time: f64, reservation: &str) -> DispatchRecord {
        DispatchRecord {
            vehicle_id: "taxi_0".to_string(),
            person_id: person.to_string(),
            time,
            reservation_id: Some(reservation.to_string()),
        }
    }

    #[test]
    fn test_vehicle_match_requires_containment() {
        let vehicles = vec![taxi("taxi_0", 0.0, Some(1000.0)), taxi("taxi_0", 2000.0, Some(3000.0))];
        let matched = match_trips(
            vec![
                ride("a", "taxi_0", 2000.0, 2100.0, 2500.0),
                ride("b", "taxi_0", 900.0, 950.0, 1100.0),
                ride("c", "taxi_9", 0.0, 10.0, 20.0),
            ],
            &vehicles,
            None,
            None,
            None,
            DispatchTieBreak::Earliest,
        );

        assert_eq!(matched.views.len(), 1);
        assert_eq!(matched.views[0].person_id, "a");
        assert_eq!(matched.views[0].vehicle, 1);

        let counts = matched.counts();
        assert_eq!(counts.get(DropReason::OutsideVehicleInterval), 1);
        assert_eq!(counts.get(DropReason::UnknownVehicle), 1);
    }

    #[test]
    fn test_unfinished_vehicle_trip_is_open_ended() {
        let vehicles = vec![taxi("taxi_0", 0.0, None)];
        let matched = match_trips(
            vec![ride("a", "taxi_0", 100.0, 150.0, 99999.0)],
            &vehicles,
            None,
            None,
            None,
            DispatchTieBreak::Earliest,
        );
        assert_eq!(matched.views.len(), 1);
    }

    #[test]
    fn test_ride_on_other_vehicle_type_dropped_as_vehicle_type() {
        let mut bus = taxi("bus_0", 0.0, Some(1000.0));
        bus.vehicle_type = "bus".to_string();
        let vehicles = vec![taxi("taxi_0", 0.0, None), bus];
        let matched = match_trips(
            vec![
                ride("a", "taxi_0", 0.0, 100.0, 400.0),
                ride("b", "bus_0", 0.0, 100.0, 400.0),
            ],
            &vehicles,
            None,
            None,
            Some("drt"),
            DispatchTieBreak::Earliest,
        );

        assert_eq!(matched.views.len(), 1);
        assert_eq!(matched.views[0].person_id, "a");
        let counts = matched.counts();
        assert_eq!(counts.get(DropReason::VehicleType), 1);
        assert_eq!(counts.get(DropReason::UnknownVehicle), 0);
    }

    #[test]
    fn test_unfinished_ride_dropped_at_join() {
        let mut open = ride("a", "taxi_0", 0.0, 10.0, 20.0);
        open.arrival = None;
        let matched = match_trips(
            vec![open],
            &[taxi("taxi_0", 0.0, Some(100.0))],
            None,
            None,
            None,
            DispatchTieBreak::Earliest,
        );
        assert!(matched.views.is_empty());
        assert_eq!(matched.counts().get(DropReason::Unfinished), 1);
    }

    #[test]
    fn test_dispatch_tie_break_policies() {
        let vehicles = vec![taxi("taxi_0", 0.0, Some(1000.0))];
        let dispatches = vec![
            dispatch("a", 50.0, "first"),
            dispatch("a", 20.0, "earliest"),
            dispatch("a", 20.0, "earliest_dup"),
        ];
        let rides = vec![ride("a", "taxi_0", 0.0, 100.0, 200.0)];

        let earliest = match_trips(
            rides.clone(),
            &vehicles,
            Some(dispatches.as_slice()),
            None,
            None,
            DispatchTieBreak::Earliest,
        );
        let chosen = earliest.views[0].dispatch.as_ref().unwrap();
        assert_eq!(chosen.reservation_id.as_deref(), Some("earliest"));
        assert_eq!(earliest.views[0].dispatch_latency(), Some(80.0));

        let first = match_trips(rides, &vehicles, Some(dispatches.as_slice()), None, None, DispatchTieBreak::First);
        let chosen = first.views[0].dispatch.as_ref().unwrap();
        assert_eq!(chosen.reservation_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_dispatch_after_pickup_is_discarded() {
        let matched = match_trips(
            vec![ride("a", "taxi_0", 0.0, 100.0, 200.0)],
            &[taxi("taxi_0", 0.0, Some(1000.0))],
            Some(&[dispatch("a", 150.0, "late")][..]),
            None,
            None,
            DispatchTieBreak::Earliest,
        );
        assert_eq!(matched.views[0].dispatch, None);
        assert_eq!(matched.dispatch_after_pickup, 1);
    }

    #[test]
    fn test_direct_route_lookup_and_ratios() {
        let routes = vec![DirectRouteRecord {
            person_id: "a".to_string(),
            duration: 50.0,
            distance: Some(500.0),
        }];
        let matched = match_trips(
            vec![
                ride("a", "taxi_0", 0.0, 100.0, 200.0),
                ride("b", "taxi_0", 0.0, 100.0, 200.0),
            ],
            &[taxi("taxi_0", 0.0, Some(1000.0))],
            None,
            Some(routes.as_slice()),
            None,
            DispatchTieBreak::Earliest,
        );

        assert_eq!(matched.views[0].detour_ratio(), Some(2.0));
        assert_eq!(matched.views[0].detour_distance_ratio(), Some(2.0));
        assert_eq!(matched.views[1].detour_ratio(), None);
        assert_eq!(matched.views[1].dispatch_latency(), None);
    }

    #[test]
    fn test_waiting_and_ride_duration() {
        let matched = match_trips(
            vec![ride("a", "taxi_0", 40.0, 100.0, 400.0)],
            &[taxi("taxi_0", 0.0, Some(1000.0))],
            None,
            None,
            None,
            DispatchTieBreak::Earliest,
        );
        let view = &matched.views[0];
        assert_eq!(view.waiting_time(), 60.0);
        assert_eq!(view.ride_duration(), 300.0);
    }
}
