//! Direct-route log: unshared baseline routes keyed by person.

use std::path::Path;
use tracing::info;

use super::{Diagnostics, Element, XmlEvent, scan_bytes, scan_file};
use crate::error::ParseError;
use crate::records::DirectRouteRecord;

#[tracing::instrument(skip(path, diagnostics), fields(path = %path.display()))]
pub fn parse_direct_routes(
    path: &Path,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<DirectRouteRecord>, ParseError> {
    let mut routes = Vec::new();
    scan_file(path, |event| on_event(path, event, &mut routes, diagnostics))?;
    info!(routes = routes.len(), "Direct-route log parsed");
    Ok(routes)
}

pub fn parse_direct_routes_bytes(
    path: &Path,
    xml: &[u8],
    diagnostics: &mut Diagnostics,
) -> Result<Vec<DirectRouteRecord>, ParseError> {
    let mut routes = Vec::new();
    scan_bytes(path, xml, |event| on_event(path, event, &mut routes, diagnostics))?;
    Ok(routes)
}

fn on_event(
    path: &Path,
    event: XmlEvent<'_>,
    routes: &mut Vec<DirectRouteRecord>,
    diagnostics: &mut Diagnostics,
) {
    match event {
        XmlEvent::Open { element, depth: 1 } if element.name == "directRoute" => {
            match direct_route(element) {
                Ok(route) => routes.push(route),
                Err(message) => diagnostics.push(path, element, message),
            }
        }
        _ => {}
    }
}

fn direct_route(element: &Element) -> Result<DirectRouteRecord, String> {
    let person_id = element.required("id")?.to_string();
    let duration = element.required_number("duration")?;
    if duration <= 0.0 {
        return Err(format!("duration must be positive, got {duration}"));
    }
    Ok(DirectRouteRecord {
        person_id,
        duration,
        distance: element.reached("routeLength")?,
    })
}
