//! Trip-info log: `<tripinfo>` vehicle trips and `<personinfo>` ride/walk legs.

use std::path::Path;
use tracing::{debug, info};

use super::{Diagnostics, Element, XmlEvent, scan_bytes, scan_file};
use crate::error::ParseError;
use crate::records::{OccupiedStretch, PersonTripRecord, TripInfoLog, VehicleTripRecord, WalkRecord};

/// Vehicle marker the simulator writes for a ride that never got a vehicle.
const NO_VEHICLE: &str = "NULL";

/// Parses a trip-info log from disk.
#[tracing::instrument(skip(path, diagnostics), fields(path = %path.display()))]
pub fn parse_tripinfo(path: &Path, diagnostics: &mut Diagnostics) -> Result<TripInfoLog, ParseError> {
    let mut builder = TripInfoBuilder::new(path, diagnostics);
    scan_file(path, |event| builder.on_event(event))?;
    let log = builder.finish();
    info!(
        vehicles = log.vehicles.len(),
        rides = log.persons.len(),
        walks = log.walks.len(),
        person_infos = log.person_infos,
        "Trip-info log parsed"
    );
    Ok(log)
}

/// Parses a trip-info document held in memory.
pub fn parse_tripinfo_bytes(
    path: &Path,
    xml: &[u8],
    diagnostics: &mut Diagnostics,
) -> Result<TripInfoLog, ParseError> {
    let mut builder = TripInfoBuilder::new(path, diagnostics);
    scan_bytes(path, xml, |event| builder.on_event(event))?;
    Ok(builder.finish())
}

/// The depth-1 element currently open.
enum Scope {
    Outside,
    Vehicle(VehicleTripRecord),
    Person {
        id: String,
        rides: usize,
        walks: usize,
    },
    /// A record element that failed to parse; its children are ignored.
    Skipped,
}

struct TripInfoBuilder<'a> {
    path: &'a Path,
    diagnostics: &'a mut Diagnostics,
    scope: Scope,
    log: TripInfoLog,
}

impl<'a> TripInfoBuilder<'a> {
    fn new(path: &'a Path, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            path,
            diagnostics,
            scope: Scope::Outside,
            log: TripInfoLog::default(),
        }
    }

    fn on_event(&mut self, event: XmlEvent<'_>) {
        match event {
            XmlEvent::Open { element, depth: 1 } => self.open_record(element),
            XmlEvent::Open { element, depth: 2 } => self.open_leg(element),
            XmlEvent::Close { depth: 1, .. } => self.close_record(),
            _ => {}
        }
    }

    fn open_record(&mut self, element: &Element) {
        self.scope = match element.name.as_str() {
            "tripinfo" => match vehicle_trip(element) {
                Ok(vehicle) => Scope::Vehicle(vehicle),
                Err(message) => {
                    self.diagnostics.push(self.path, element, message);
                    Scope::Skipped
                }
            },
            "personinfo" => {
                self.log.person_infos += 1;
                match element.required("id") {
                    Ok(id) => Scope::Person {
                        id: id.to_string(),
                        rides: 0,
                        walks: 0,
                    },
                    Err(message) => {
                        self.diagnostics.push(self.path, element, message);
                        Scope::Skipped
                    }
                }
            }
            other => {
                debug!(element = other, "Ignoring unknown element");
                Scope::Outside
            }
        };
    }

    fn open_leg(&mut self, element: &Element) {
        match &mut self.scope {
            Scope::Vehicle(vehicle) => {
                if element.attr("occupiedTime").is_none() {
                    return;
                }
                match occupied_stretch(element) {
                    Ok(stretch) => vehicle.occupied.push(stretch),
                    Err(message) => self.diagnostics.push(self.path, element, message),
                }
            }
            Scope::Person { id, rides, walks } => match element.name.as_str() {
                "ride" => {
                    let leg = *rides;
                    *rides += 1;
                    match person_trip(id, leg, element) {
                        Ok(ride) => self.log.persons.push(ride),
                        Err(message) => self.diagnostics.push(self.path, element, message),
                    }
                }
                "walk" => {
                    *walks += 1;
                    match walk(id, element) {
                        Ok(walk) => self.log.walks.push(walk),
                        Err(message) => self.diagnostics.push(self.path, element, message),
                    }
                }
                _ => {}
            },
            Scope::Outside | Scope::Skipped => {}
        }
    }

    fn close_record(&mut self) {
        match std::mem::replace(&mut self.scope, Scope::Outside) {
            Scope::Vehicle(vehicle) => self.log.vehicles.push(vehicle),
            Scope::Person { rides: 0, walks, .. } if walks > 0 => self.log.walking_only += 1,
            _ => {}
        }
    }

    fn finish(self) -> TripInfoLog {
        self.log
    }
}

fn vehicle_trip(element: &Element) -> Result<VehicleTripRecord, String> {
    Ok(VehicleTripRecord {
        vehicle_id: element.required("id")?.to_string(),
        vehicle_type: element.required("vType")?.to_string(),
        depart: element.required_number("depart")?,
        arrival: element.reached("arrival")?,
        duration: element.reached("duration")?,
        distance: element.reached("routeLength")?,
        stop_time: element.reached("stopTime")?,
        occupied: Vec::new(),
    })
}

fn occupied_stretch(element: &Element) -> Result<OccupiedStretch, String> {
    let time = element.required_number("occupiedTime")?;
    if time < 0.0 {
        return Err(format!("negative occupiedTime {time}"));
    }
    Ok(OccupiedStretch {
        time,
        distance: element.reached("occupiedDistance")?,
    })
}

fn person_trip(person_id: &str, leg: usize, element: &Element) -> Result<PersonTripRecord, String> {
    let vehicle = element.required("vehicle")?;
    let pickup = element.required_number("depart")?;
    let waiting = element.required_number("waitingTime")?;
    let pickup = (pickup >= 0.0).then_some(pickup);

    Ok(PersonTripRecord {
        person_id: person_id.to_string(),
        leg,
        requested_departure: pickup.map(|pickup| pickup - waiting),
        pickup,
        arrival: element.reached("arrival")?,
        vehicle_id: (vehicle != NO_VEHICLE).then(|| vehicle.to_string()),
        route_length: element.reached("routeLength")?,
        time_loss: element.optional_number("timeLoss")?,
        origin: element.attr("from").map(str::to_string),
        destination: element.attr("to").map(str::to_string),
    })
}

fn walk(person_id: &str, element: &Element) -> Result<WalkRecord, String> {
    Ok(WalkRecord {
        person_id: person_id.to_string(),
        duration: element.reached("duration")?,
        route_length: element.reached("routeLength")?,
    })
}
