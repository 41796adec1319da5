//! Dispatch-info log: `<dispatch>` and `<dispatchShared>` assignments.

use std::path::Path;
use tracing::info;

use super::{Diagnostics, Element, XmlEvent, scan_bytes, scan_file};
use crate::error::ParseError;
use crate::records::{DispatchLog, DispatchRecord, SharedDispatchRecord};

#[tracing::instrument(skip(path, diagnostics), fields(path = %path.display()))]
pub fn parse_dispatchinfo(path: &Path, diagnostics: &mut Diagnostics) -> Result<DispatchLog, ParseError> {
    let mut log = DispatchLog::default();
    scan_file(path, |event| on_event(path, event, &mut log, diagnostics))?;
    info!(
        dispatches = log.dispatches.len(),
        shared = log.shared.len(),
        "Dispatch-info log parsed"
    );
    Ok(log)
}

pub fn parse_dispatchinfo_bytes(
    path: &Path,
    xml: &[u8],
    diagnostics: &mut Diagnostics,
) -> Result<DispatchLog, ParseError> {
    let mut log = DispatchLog::default();
    scan_bytes(path, xml, |event| on_event(path, event, &mut log, diagnostics))?;
    Ok(log)
}

fn on_event(path: &Path, event: XmlEvent<'_>, log: &mut DispatchLog, diagnostics: &mut Diagnostics) {
    let XmlEvent::Open { element, depth: 1 } = event else {
        return;
    };
    let shared = match element.name.as_str() {
        "dispatch" => false,
        "dispatchShared" => true,
        _ => return,
    };
    match dispatch(element, shared) {
        Ok((records, pooled)) => {
            log.dispatches.extend(records);
            log.shared.extend(pooled);
        }
        Err(message) => diagnostics.push(path, element, message),
    }
}

fn dispatch(
    element: &Element,
    shared: bool,
) -> Result<(Vec<DispatchRecord>, Option<SharedDispatchRecord>), String> {
    let vehicle_id = element.required("id")?.to_string();
    let time = element.required_number("time")?;
    element.required("persons")?;
    let persons = element.id_list("persons");
    if persons.is_empty() {
        return Err("attribute `persons` is empty".to_string());
    }
    let sharing_persons = element.id_list("sharingPersons");
    let reservation_id = element
        .attr("reservation")
        .or_else(|| element.attr("reservations"))
        .map(str::to_string);

    let records = persons
        .iter()
        .chain(&sharing_persons)
        .map(|person_id| DispatchRecord {
            vehicle_id: vehicle_id.clone(),
            person_id: person_id.clone(),
            time,
            reservation_id: reservation_id.clone(),
        })
        .collect();

    let pooled = if shared {
        Some(SharedDispatchRecord {
            vehicle_id,
            time,
            persons,
            sharing_persons,
            abs_loss: [element.optional_number("absLoss")?, element.optional_number("absLoss2")?],
            rel_loss: [element.optional_number("relLoss")?, element.optional_number("relLoss2")?],
        })
    } else {
        None
    };

    Ok((records, pooled))
}
