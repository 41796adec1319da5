//! End-to-end run: parse, filter, match, calculate, lay out and write.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::filter::{DropCounts, retain_walks};
use crate::kpi::detail::{DroppedRide, diagnostics_table, drop_table, trip_table, vehicle_table};
use crate::kpi::{Audit, KpiInputs, KpiSet, calculate};
use crate::matcher::match_trips;
use crate::output::{Cell, Table, summary_table, write_csv_tables, write_workbook};
use crate::parser::{Diagnostics, parse_direct_routes, parse_dispatchinfo, parse_tripinfo};

/// Result of one run, before or after it was written out.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub kpis: KpiSet,
    pub audit: Audit,
    pub diagnostics: Diagnostics,
    pub drops: Vec<DroppedRide>,
    /// Sheets in workbook order.
    pub tables: Vec<Table>,
}

impl RunReport {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Reads the inputs and computes every table without writing anything.
#[tracing::instrument(skip_all, fields(tripinfo = %config.tripinfo.display()))]
pub fn analyze(config: &RunConfig) -> Result<RunReport> {
    config.filter.validate().context("invalid filter options")?;

    let mut diagnostics = Diagnostics::new();
    let trip_log = parse_tripinfo(&config.tripinfo, &mut diagnostics)?;
    let dispatch_log = config
        .dispatchinfo
        .as_deref()
        .map(|path| parse_dispatchinfo(path, &mut diagnostics))
        .transpose()?;
    let direct_routes = config
        .direct_routes
        .as_deref()
        .map(|path| parse_direct_routes(path, &mut diagnostics))
        .transpose()?;

    let mut audit = Audit {
        person_infos: trip_log.person_infos,
        ride_records: trip_log.persons.len(),
        walking_only: trip_log.walking_only,
        parse_skipped: diagnostics.len(),
        vehicle_trips: trip_log.vehicles.len(),
        ..Default::default()
    };

    let persons = config.filter.apply(trip_log.persons);
    let mut ride_drops = persons.counts();
    let mut drops: Vec<DroppedRide> = persons
        .rejected
        .into_iter()
        .map(|(ride, reason)| DroppedRide {
            person_id: ride.person_id,
            leg: ride.leg,
            vehicle_id: ride.vehicle_id,
            stage: "filter",
            reason,
        })
        .collect();

    let matched = match_trips(
        persons.kept,
        &trip_log.vehicles,
        dispatch_log.as_ref().map(|log| log.dispatches.as_slice()),
        direct_routes.as_deref(),
        config.filter.vehicle_type.as_deref(),
        config.tie_break,
    );
    ride_drops.merge(&matched.counts());
    audit.ride_drops = ride_drops;
    audit.dispatch_after_pickup = matched.dispatch_after_pickup;
    drops.extend(matched.dropped.into_iter().map(|(ride, reason)| DroppedRide {
        person_id: ride.person_id,
        leg: ride.leg,
        vehicle_id: ride.vehicle_id,
        stage: "match",
        reason,
    }));
    let views = matched.views;

    let vehicles = config.filter.apply(trip_log.vehicles);
    audit.vehicle_drops = vehicles.counts();
    let vehicles = vehicles.kept;

    let dropped_persons: HashSet<String> = drops.iter().map(|d| d.person_id.clone()).collect();
    let walks = retain_walks(trip_log.walks, &dropped_persons);

    let kpis = calculate(&KpiInputs {
        views: &views,
        vehicles: &vehicles,
        walks: &walks,
        shared_dispatches: dispatch_log.as_ref().map(|log| log.shared.as_slice()),
        direct_routes_given: direct_routes.is_some(),
        audit: &audit,
    });

    let tables = vec![
        summary_table(&kpis),
        trip_table(&views),
        vehicle_table(&vehicles),
        drop_table(&drops),
        diagnostics_table(diagnostics.entries()),
        run_table(config, Utc::now()),
    ];

    Ok(RunReport {
        kpis,
        audit,
        diagnostics,
        drops,
        tables,
    })
}

/// Runs the pipeline and writes the workbook (and CSV tables, if asked for).
pub fn run(config: &RunConfig) -> Result<RunReport> {
    let report = analyze(config)?;

    write_workbook(&config.output, &report.tables)
        .with_context(|| format!("cannot write report {}", config.output.display()))?;
    if let Some(dir) = &config.csv_dir {
        write_csv_tables(dir, &report.tables)?;
    }

    log_drop_summary(&report.audit);
    info!(
        output = %config.output.display(),
        trips = report.audit.ride_records - report.audit.ride_drops.total(),
        "Report written"
    );
    Ok(report)
}

/// One line of the end-of-run drop summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropLine {
    /// `rides`, `vehicle_trips`, `dispatches` or `records`.
    pub kind: &'static str,
    pub reason: &'static str,
    pub count: usize,
}

/// Every non-zero record-level drop count of a run.
pub fn drop_summary(audit: &Audit) -> Vec<DropLine> {
    let lines = |kind: &'static str, drops: &DropCounts| {
        drops
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(move |(reason, count)| DropLine {
                kind,
                reason: reason.as_str(),
                count,
            })
            .collect::<Vec<_>>()
    };
    let mut summary = lines("rides", &audit.ride_drops);
    summary.extend(lines("vehicle_trips", &audit.vehicle_drops));
    if audit.dispatch_after_pickup > 0 {
        summary.push(DropLine {
            kind: "dispatches",
            reason: "dispatch_after_pickup",
            count: audit.dispatch_after_pickup,
        });
    }
    if audit.parse_skipped > 0 {
        summary.push(DropLine {
            kind: "records",
            reason: "malformed",
            count: audit.parse_skipped,
        });
    }
    summary
}

fn log_drop_summary(audit: &Audit) {
    let summary = drop_summary(audit);
    if summary.is_empty() {
        info!("No records dropped");
    }
    for line in summary {
        warn!(kind = line.kind, reason = line.reason, count = line.count, "Records dropped");
    }
}

fn path_cell(path: Option<&Path>) -> Cell {
    path.map(|p| p.display().to_string())
        .map_or(Cell::NotApplicable, Cell::Text)
}

/// Inputs and settings the report was produced with.
fn run_table(config: &RunConfig, generated_at: DateTime<Utc>) -> Table {
    let filter = &config.filter;
    let mut table = Table::new("run", &["setting", "value"]);
    let rows: Vec<(&'static str, Cell)> = vec![
        ("generated_at", Cell::Text(generated_at.to_rfc3339())),
        ("version", Cell::from(env!("CARGO_PKG_VERSION"))),
        ("tripinfo", path_cell(Some(&config.tripinfo))),
        ("dispatchinfo", path_cell(config.dispatchinfo.as_deref())),
        ("direct_routes", path_cell(config.direct_routes.as_deref())),
        ("vehicle_type", Cell::from(filter.vehicle_type.as_deref())),
        ("depart_earliest", Cell::from(filter.depart_earliest)),
        ("arrival_latest", Cell::from(filter.arrival_latest)),
        ("require_finished", Cell::Text(filter.require_finished.to_string())),
        ("dispatch_tie_break", Cell::Text(format!("{:?}", config.tie_break).to_lowercase())),
    ];
    for (setting, value) in rows {
        table.push_row(vec![Cell::from(setting), value]);
    }
    table
}
