//! KPI derivation from joined trip views.
//!
//! The summary is an ordered list of named values. Metrics that depend on an
//! optional input, or that aggregate over an empty set, are reported as
//! [`KpiValue::NotApplicable`].

pub mod detail;
pub mod utility;

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::filter::{DropCounts, DropReason};
use crate::matcher::JoinedTripView;
use crate::records::{SharedDispatchRecord, VehicleTripRecord, WalkRecord};
use utility::{max, mean, p90, ratio, stddev};

/// Text shown wherever a value is not applicable.
pub const NOT_APPLICABLE: &str = "n/a";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KpiValue {
    Count(usize),
    Measure(f64),
    NotApplicable,
}

impl KpiValue {
    pub fn measure(value: Option<f64>) -> Self {
        value.map_or(KpiValue::NotApplicable, KpiValue::Measure)
    }

    pub fn is_applicable(&self) -> bool {
        !matches!(self, KpiValue::NotApplicable)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KpiValue::Count(n) => Some(*n as f64),
            KpiValue::Measure(v) => Some(*v),
            KpiValue::NotApplicable => None,
        }
    }
}

impl fmt::Display for KpiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KpiValue::Count(n) => write!(f, "{n}"),
            KpiValue::Measure(v) => write!(f, "{v}"),
            KpiValue::NotApplicable => f.write_str(NOT_APPLICABLE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpi {
    pub name: &'static str,
    pub value: KpiValue,
}

/// Named KPI values in a fixed order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSet {
    entries: Vec<Kpi>,
}

impl KpiSet {
    fn push(&mut self, name: &'static str, value: KpiValue) {
        self.entries.push(Kpi { name, value });
    }

    fn count(&mut self, name: &'static str, n: usize) {
        self.push(name, KpiValue::Count(n));
    }

    fn measure(&mut self, name: &'static str, value: Option<f64>) {
        self.push(name, KpiValue::measure(value));
    }

    pub fn get(&self, name: &str) -> Option<KpiValue> {
        self.entries.iter().find(|k| k.name == name).map(|k| k.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kpi> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Record counts gathered along the pipeline, reported next to the KPIs.
#[derive(Debug, Clone, Default)]
pub struct Audit {
    pub person_infos: usize,
    pub ride_records: usize,
    pub walking_only: usize,
    pub parse_skipped: usize,
    /// Rides dropped by the filter and the matcher.
    pub ride_drops: DropCounts,
    pub vehicle_trips: usize,
    pub vehicle_drops: DropCounts,
    pub dispatch_after_pickup: usize,
}

/// Everything the calculator reads.
#[derive(Debug, Clone, Copy)]
pub struct KpiInputs<'a> {
    pub views: &'a [JoinedTripView],
    pub vehicles: &'a [VehicleTripRecord],
    pub walks: &'a [WalkRecord],
    /// `None` when no dispatch log was given.
    pub shared_dispatches: Option<&'a [SharedDispatchRecord]>,
    pub direct_routes_given: bool,
    pub audit: &'a Audit,
}

/// Computes the full summary.
#[tracing::instrument(skip_all, fields(views = inputs.views.len()))]
pub fn calculate(inputs: &KpiInputs<'_>) -> KpiSet {
    let mut kpis = KpiSet::default();
    audit_kpis(&mut kpis, inputs);
    ride_kpis(&mut kpis, inputs);
    detour_kpis(&mut kpis, inputs);
    dispatch_kpis(&mut kpis, inputs);
    walk_kpis(&mut kpis, inputs);
    fleet_kpis(&mut kpis, inputs);
    tracing::debug!(kpis = kpis.len(), "KPIs calculated");
    kpis
}

fn audit_kpis(kpis: &mut KpiSet, inputs: &KpiInputs<'_>) {
    let audit = inputs.audit;
    kpis.count("person_infos", audit.person_infos);
    kpis.count("ride_records", audit.ride_records);
    kpis.count("walking_only_persons", audit.walking_only);
    kpis.count("parse_skipped_records", audit.parse_skipped);
    for (reason, n) in audit.ride_drops.iter() {
        kpis.count(dropped_name(reason), n);
    }
    kpis.measure(
        "dropped_rate",
        ratio(audit.ride_drops.total() as f64, audit.ride_records as f64),
    );
    kpis.count("trips_considered", inputs.views.len());
}

fn dropped_name(reason: DropReason) -> &'static str {
    match reason {
        DropReason::Unfinished => "dropped_unfinished",
        DropReason::VehicleType => "dropped_vehicle_type",
        DropReason::BeforeWindow => "dropped_before_window",
        DropReason::AfterWindow => "dropped_after_window",
        DropReason::InconsistentTimes => "dropped_inconsistent_times",
        DropReason::UnknownVehicle => "dropped_unknown_vehicle",
        DropReason::OutsideVehicleInterval => "dropped_outside_vehicle_interval",
    }
}

fn ride_kpis(kpis: &mut KpiSet, inputs: &KpiInputs<'_>) {
    let views = inputs.views;
    let waiting: Vec<f64> = views.iter().map(JoinedTripView::waiting_time).collect();
    let duration: Vec<f64> = views.iter().map(JoinedTripView::ride_duration).collect();
    let distance: Vec<f64> = views.iter().filter_map(|v| v.route_length).collect();
    let time_loss: Vec<f64> = views.iter().filter_map(|v| v.time_loss).collect();

    let waiting_mean = mean(&waiting);
    kpis.measure("waiting_time_mean_s", waiting_mean);
    kpis.measure("waiting_time_p90_s", p90(&waiting));
    kpis.measure(
        "waiting_time_std_s",
        waiting_mean.and_then(|m| stddev(&waiting, m)),
    );
    kpis.measure("ride_duration_mean_s", mean(&duration));
    kpis.measure("ride_duration_max_s", max(&duration));
    kpis.measure(
        "ride_distance_total_m",
        (!distance.is_empty()).then(|| distance.iter().sum()),
    );
    kpis.measure("ride_distance_mean_m", mean(&distance));
    kpis.measure("ride_time_loss_mean_s", mean(&time_loss));
}

fn detour_kpis(kpis: &mut KpiSet, inputs: &KpiInputs<'_>) {
    if !inputs.direct_routes_given {
        for name in ["direct_route_matches", "detour_ratio_mean", "detour_distance_ratio_mean"] {
            kpis.push(name, KpiValue::NotApplicable);
        }
        return;
    }
    let views = inputs.views;
    let ratios: Vec<f64> = views.iter().filter_map(JoinedTripView::detour_ratio).collect();
    let distance_ratios: Vec<f64> = views
        .iter()
        .filter_map(JoinedTripView::detour_distance_ratio)
        .collect();

    kpis.count("direct_route_matches", ratios.len());
    kpis.measure("detour_ratio_mean", mean(&ratios));
    kpis.measure("detour_distance_ratio_mean", mean(&distance_ratios));
}

fn dispatch_kpis(kpis: &mut KpiSet, inputs: &KpiInputs<'_>) {
    const NAMES: [&str; 10] = [
        "dispatch_matches",
        "dispatch_after_pickup",
        "dispatch_latency_mean_s",
        "pooled_dispatches",
        "pooled_persons",
        "pooling_rate",
        "vehicle_trips_served",
        "requests_per_vehicle_trip",
        "rel_time_loss_mean",
        "rel_time_loss_max",
    ];
    let Some(shared) = inputs.shared_dispatches else {
        for name in NAMES {
            kpis.push(name, KpiValue::NotApplicable);
        }
        return;
    };

    let views = inputs.views;
    let latency: Vec<f64> = views.iter().filter_map(JoinedTripView::dispatch_latency).collect();
    kpis.count("dispatch_matches", latency.len());
    kpis.count("dispatch_after_pickup", inputs.audit.dispatch_after_pickup);
    kpis.measure("dispatch_latency_mean_s", mean(&latency));

    // Pooling only counts persons whose rides made it through the filter.
    let considered: HashSet<&str> = views.iter().map(|v| v.person_id.as_str()).collect();
    let mut pooled_dispatches = 0usize;
    let mut pooled_persons = 0usize;
    let mut rel_loss: Vec<f64> = Vec::new();
    for record in shared {
        let persons = record
            .persons
            .iter()
            .chain(&record.sharing_persons)
            .filter(|p| considered.contains(p.as_str()))
            .count();
        if persons == 0 {
            continue;
        }
        pooled_dispatches += 1;
        pooled_persons += persons;
        rel_loss.extend(record.rel_loss.iter().flatten().copied());
    }

    let trips = views.len();
    let served = (trips + pooled_dispatches).saturating_sub(pooled_persons);
    kpis.count("pooled_dispatches", pooled_dispatches);
    kpis.count("pooled_persons", pooled_persons);
    kpis.measure("pooling_rate", ratio(pooled_persons as f64, trips as f64));
    if served > 0 {
        kpis.count("vehicle_trips_served", served);
    } else {
        kpis.push("vehicle_trips_served", KpiValue::NotApplicable);
    }
    kpis.measure("requests_per_vehicle_trip", ratio(trips as f64, served as f64));
    kpis.measure("rel_time_loss_mean", mean(&rel_loss));
    kpis.measure("rel_time_loss_max", max(&rel_loss));
}

fn walk_kpis(kpis: &mut KpiSet, inputs: &KpiInputs<'_>) {
    let durations: Vec<f64> = inputs.walks.iter().filter_map(|w| w.duration).collect();
    let lengths: Vec<f64> = inputs.walks.iter().filter_map(|w| w.route_length).collect();
    let walk_mean = mean(&durations);
    let ride_mean = mean(
        &inputs
            .views
            .iter()
            .map(JoinedTripView::ride_duration)
            .collect::<Vec<_>>(),
    );

    kpis.count("walks", inputs.walks.len());
    kpis.measure("walk_duration_mean_s", walk_mean);
    kpis.measure("walk_distance_mean_m", mean(&lengths));
    kpis.measure(
        "trip_duration_mean_s",
        ride_mean.map(|ride| ride + 2.0 * walk_mean.unwrap_or(0.0)),
    );
}

fn fleet_kpis(kpis: &mut KpiSet, inputs: &KpiInputs<'_>) {
    let vehicles = inputs.vehicles;
    let distances: Vec<f64> = vehicles.iter().filter_map(|v| v.distance).collect();
    let active: Vec<f64> = vehicles.iter().filter_map(VehicleTripRecord::active_time).collect();
    let stops: Vec<f64> = vehicles.iter().filter_map(|v| v.stop_time).collect();
    // One entry per occupied stretch (`<taxi>` child), not per vehicle trip.
    let stretches = || vehicles.iter().flat_map(|v| v.occupied.iter());
    let stretch_times: Vec<f64> = stretches().map(|s| s.time).collect();
    let stretch_distances: Vec<f64> = stretches().filter_map(|s| s.distance).collect();
    let occupancy: Vec<f64> = vehicles
        .iter()
        .filter_map(|v| ratio(v.occupied_time(), v.active_time()?))
        .collect();

    let sum = |values: &[f64]| (!values.is_empty()).then(|| values.iter().sum::<f64>());
    let distance_total = sum(&distances);
    let occupied_distance: f64 = vehicles.iter().map(VehicleTripRecord::occupied_distance).sum();
    let occupied_time: f64 = vehicles.iter().map(VehicleTripRecord::occupied_time).sum();
    let duration_total = sum(&active);
    let stop_total = sum(&stops);
    let driving_total = duration_total.map(|d| d - stop_total.unwrap_or(0.0));
    let ride_time: f64 = inputs.views.iter().map(JoinedTripView::ride_duration).sum();
    let has_vehicles = !vehicles.is_empty();

    kpis.count("vehicle_trips_parsed", inputs.audit.vehicle_trips);
    kpis.count("vehicle_trips_dropped", inputs.audit.vehicle_drops.total());
    kpis.count("vehicles", vehicles.len());
    kpis.measure("vehicle_distance_total_m", distance_total);
    kpis.measure("vehicle_distance_mean_m", mean(&distances));
    kpis.measure(
        "vehicle_occupied_distance_total_m",
        has_vehicles.then_some(occupied_distance),
    );
    kpis.measure("vehicle_occupied_distance_mean_m", mean(&stretch_distances));
    kpis.measure(
        "vehicle_empty_distance_total_m",
        distance_total.map(|d| d - occupied_distance),
    );
    kpis.measure("vehicle_duration_total_s", duration_total);
    kpis.measure("vehicle_occupied_time_total_s", has_vehicles.then_some(occupied_time));
    kpis.measure("vehicle_occupied_time_mean_s", mean(&stretch_times));
    kpis.measure("vehicle_stop_time_total_s", stop_total);
    kpis.measure("vehicle_stop_time_mean_s", mean(&stops));
    kpis.measure("vehicle_driving_time_total_s", driving_total);
    kpis.measure("occupancy_rate_mean", mean(&occupancy));
    kpis.measure("passengers_per_occupied_time", ratio(ride_time, occupied_time));
    kpis.measure(
        "passengers_per_driving_time",
        driving_total.and_then(|driving| ratio(ride_time, driving)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DirectRouteRecord, DispatchRecord, OccupiedStretch};

    fn view(person: &str, requested: f64, pickup: f64, arrival: f64) -> JoinedTripView {
        JoinedTripView {
            person_id: person.to_string(),
            leg: 0,
            vehicle_id: "taxi_0".to_string(),
            vehicle: 0,
            requested_departure: requested,
            pickup,
            arrival,
            route_length: Some(1000.0),
            time_loss: None,
            dispatch: None,
            direct_route: None,
        }
    }

    fn taxi() -> VehicleTripRecord {
        VehicleTripRecord {
            vehicle_id: "taxi_0".to_string(),
            vehicle_type: "drt".to_string(),
            depart: 0.0,
            arrival: Some(2000.0),
            duration: Some(2000.0),
            distance: Some(10000.0),
            stop_time: Some(400.0),
            occupied: vec![OccupiedStretch {
                time: 1000.0,
                distance: Some(4000.0),
            }],
        }
    }

    fn inputs<'a>(
        views: &'a [JoinedTripView],
        vehicles: &'a [VehicleTripRecord],
        shared: Option<&'a [SharedDispatchRecord]>,
        direct: bool,
        audit: &'a Audit,
    ) -> KpiInputs<'a> {
        KpiInputs {
            views,
            vehicles,
            walks: &[],
            shared_dispatches: shared,
            direct_routes_given: direct,
            audit,
        }
    }

    fn three_trips() -> Vec<JoinedTripView> {
        vec![
            view("a", 0.0, 60.0, 360.0),
            view("b", 100.0, 220.0, 520.0),
            view("c", 200.0, 290.0, 590.0),
        ]
    }

    #[test]
    fn test_waiting_and_ride_aggregates() {
        let views = three_trips();
        let audit = Audit::default();
        let kpis = calculate(&inputs(&views, &[], None, false, &audit));

        assert_eq!(kpis.get("trips_considered"), Some(KpiValue::Count(3)));
        assert_eq!(kpis.get("waiting_time_mean_s"), Some(KpiValue::Measure(90.0)));
        assert_eq!(kpis.get("waiting_time_p90_s"), Some(KpiValue::Measure(90.0)));
        assert_eq!(kpis.get("ride_duration_mean_s"), Some(KpiValue::Measure(300.0)));
        assert_eq!(kpis.get("ride_duration_max_s"), Some(KpiValue::Measure(300.0)));
        assert_eq!(kpis.get("ride_distance_total_m"), Some(KpiValue::Measure(3000.0)));
    }

    #[test]
    fn test_empty_views_yield_not_applicable() {
        let audit = Audit::default();
        let kpis = calculate(&inputs(&[], &[], Some(&[]), true, &audit));
        assert_eq!(kpis.get("trips_considered"), Some(KpiValue::Count(0)));
        assert_eq!(kpis.get("waiting_time_mean_s"), Some(KpiValue::NotApplicable));
        assert_eq!(kpis.get("detour_ratio_mean"), Some(KpiValue::NotApplicable));
        assert_eq!(kpis.get("dispatch_latency_mean_s"), Some(KpiValue::NotApplicable));
        assert_eq!(kpis.get("pooling_rate"), Some(KpiValue::NotApplicable));
        assert_eq!(kpis.get("occupancy_rate_mean"), Some(KpiValue::NotApplicable));
        assert_eq!(kpis.get("dropped_rate"), Some(KpiValue::NotApplicable));
    }

    #[test]
    fn test_missing_dispatch_log_only_affects_dispatch_kpis() {
        let mut views = three_trips();
        views[0].dispatch = Some(DispatchRecord {
            vehicle_id: "taxi_0".to_string(),
            person_id: "a".to_string(),
            time: 30.0,
            reservation_id: None,
        });
        let audit = Audit::default();
        let vehicles = [taxi()];

        let with_dispatch = calculate(&inputs(&views, &vehicles, Some(&[]), false, &audit));
        assert_eq!(with_dispatch.get("dispatch_latency_mean_s"), Some(KpiValue::Measure(30.0)));

        for view in &mut views {
            view.dispatch = None;
        }
        let without = calculate(&inputs(&views, &vehicles, None, false, &audit));
        for kpi in with_dispatch.iter() {
            let other = without.get(kpi.name).unwrap();
            let dispatch_kpi = kpi.name.starts_with("dispatch_")
                || kpi.name.starts_with("pooled_")
                || kpi.name.starts_with("rel_time_loss")
                || ["pooling_rate", "vehicle_trips_served", "requests_per_vehicle_trip"]
                    .contains(&kpi.name);
            if dispatch_kpi {
                assert_eq!(other, KpiValue::NotApplicable, "{}", kpi.name);
            } else {
                assert_eq!(other, kpi.value, "{}", kpi.name);
            }
        }
    }

    #[test]
    fn test_detour_ratio_excludes_unmatched() {
        let mut views = three_trips();
        for (view, duration) in views.iter_mut().zip([150.0, 100.0]) {
            view.direct_route = Some(DirectRouteRecord {
                person_id: view.person_id.clone(),
                duration,
                distance: None,
            });
        }
        let audit = Audit::default();
        let kpis = calculate(&inputs(&views, &[], None, true, &audit));
        assert_eq!(kpis.get("direct_route_matches"), Some(KpiValue::Count(2)));
        assert_eq!(kpis.get("detour_ratio_mean"), Some(KpiValue::Measure(2.5)));
        assert_eq!(kpis.get("detour_distance_ratio_mean"), Some(KpiValue::NotApplicable));
    }

    #[test]
    fn test_pooling_counts_only_considered_persons() {
        let views = three_trips();
        let shared = [
            SharedDispatchRecord {
                vehicle_id: "taxi_0".to_string(),
                time: 50.0,
                persons: vec!["a".to_string()],
                sharing_persons: vec!["b".to_string()],
                abs_loss: [Some(10.0), Some(20.0)],
                rel_loss: [Some(0.1), Some(0.3)],
            },
            SharedDispatchRecord {
                vehicle_id: "taxi_0".to_string(),
                time: 60.0,
                persons: vec!["zz".to_string()],
                sharing_persons: vec![],
                abs_loss: [None, None],
                rel_loss: [Some(9.0), None],
            },
        ];
        let audit = Audit::default();
        let kpis = calculate(&inputs(&views, &[], Some(&shared), false, &audit));

        assert_eq!(kpis.get("pooled_dispatches"), Some(KpiValue::Count(1)));
        assert_eq!(kpis.get("pooled_persons"), Some(KpiValue::Count(2)));
        assert_eq!(kpis.get("vehicle_trips_served"), Some(KpiValue::Count(2)));
        assert_eq!(kpis.get("requests_per_vehicle_trip"), Some(KpiValue::Measure(1.5)));
        assert_eq!(kpis.get("rel_time_loss_max"), Some(KpiValue::Measure(0.3)));
        let rate = kpis.get("pooling_rate").and_then(|v| v.as_f64()).unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_fleet_kpis() {
        let views = three_trips();
        let vehicles = [taxi()];
        let audit = Audit::default();
        let kpis = calculate(&inputs(&views, &vehicles, None, false, &audit));

        assert_eq!(kpis.get("occupancy_rate_mean"), Some(KpiValue::Measure(0.5)));
        assert_eq!(kpis.get("vehicle_empty_distance_total_m"), Some(KpiValue::Measure(6000.0)));
        assert_eq!(kpis.get("vehicle_driving_time_total_s"), Some(KpiValue::Measure(1600.0)));
        assert_eq!(kpis.get("passengers_per_occupied_time"), Some(KpiValue::Measure(0.9)));
        assert_eq!(kpis.get("vehicle_occupied_distance_mean_m"), Some(KpiValue::Measure(4000.0)));
        assert_eq!(kpis.get("vehicle_occupied_time_mean_s"), Some(KpiValue::Measure(1000.0)));
        assert_eq!(kpis.get("vehicle_stop_time_mean_s"), Some(KpiValue::Measure(400.0)));
    }

    #[test]
    fn test_fleet_means_per_occupied_stretch() {
        let mut second = taxi();
        second.stop_time = None;
        second.occupied = vec![
            OccupiedStretch {
                time: 200.0,
                distance: Some(1000.0),
            },
            OccupiedStretch {
                time: 300.0,
                distance: None,
            },
        ];
        let vehicles = [taxi(), second];
        let audit = Audit::default();
        let kpis = calculate(&inputs(&[], &vehicles, None, false, &audit));

        assert_eq!(kpis.get("vehicle_occupied_time_mean_s"), Some(KpiValue::Measure(500.0)));
        assert_eq!(kpis.get("vehicle_occupied_distance_mean_m"), Some(KpiValue::Measure(2500.0)));
        assert_eq!(kpis.get("vehicle_stop_time_mean_s"), Some(KpiValue::Measure(400.0)));

        let empty = calculate(&inputs(&[], &[], None, false, &audit));
        for name in [
            "vehicle_occupied_distance_mean_m",
            "vehicle_occupied_time_mean_s",
            "vehicle_stop_time_mean_s",
        ] {
            assert_eq!(empty.get(name), Some(KpiValue::NotApplicable), "{name}");
        }
    }

    #[test]
    fn test_vehicle_trips_served_is_a_count() {
        let views = three_trips();
        let audit = Audit::default();
        let kpis = calculate(&inputs(&views, &[], Some(&[]), false, &audit));
        assert_eq!(kpis.get("vehicle_trips_served"), Some(KpiValue::Count(3)));
        assert_eq!(kpis.get("requests_per_vehicle_trip"), Some(KpiValue::Measure(1.0)));

        let none = calculate(&inputs(&[], &[], Some(&[]), false, &audit));
        assert_eq!(none.get("vehicle_trips_served"), Some(KpiValue::NotApplicable));
    }

    #[test]
    fn test_kpi_order_is_stable() {
        let views = three_trips();
        let audit = Audit::default();
        let first: Vec<_> = calculate(&inputs(&views, &[], None, false, &audit))
            .iter()
            .map(|k| k.name)
            .collect();
        let second: Vec<_> = calculate(&inputs(&views, &[], Some(&[]), true, &audit))
            .iter()
            .map(|k| k.name)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first[0], "person_infos");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(KpiValue::NotApplicable.to_string(), "n/a");
        assert_eq!(KpiValue::Count(3).to_string(), "3");
        assert_eq!(KpiValue::Measure(1.5).to_string(), "1.5");
    }
}
