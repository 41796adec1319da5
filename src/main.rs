//! CLI entry point for the DRT KPI report tool.
//!
//! Reads the SUMO trip-info log (plus optional dispatch and direct-route logs),
//! joins rides to vehicle trips and writes the KPI workbook.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use drt_kpi::config::{ConfigFile, DispatchTieBreak, RunConfig};
use drt_kpi::output::{print_json, print_pretty};
use drt_kpi::pipeline;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "drt_kpi")]
#[command(about = "Compute DRT service KPIs from SUMO simulation logs", long_about = None)]
struct Cli {
    /// SUMO tripinfo output (vehicle trips, person rides and walks)
    #[arg(long, value_name = "FILE")]
    tripinfo: PathBuf,

    /// Dispatch log written by the taxi device
    #[arg(long, value_name = "FILE")]
    dispatchinfo: Option<PathBuf>,

    /// Unshared direct routes per person, for detour KPIs
    #[arg(long, value_name = "FILE")]
    direct_routes: Option<PathBuf>,

    /// Workbook to write (.xlsx)
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Vehicle type of the DRT fleet [default: drt]
    #[arg(long)]
    vtype: Option<String>,

    /// Drop rides requested before this simulation time (s)
    #[arg(long)]
    depart_earliest: Option<f64>,

    /// Drop rides arriving after this simulation time (s)
    #[arg(long)]
    arrival_latest: Option<f64>,

    /// Which dispatch to join when a person has several
    #[arg(long, value_enum)]
    dispatch_tie_break: Option<DispatchTieBreak>,

    /// Also write every sheet as CSV into this directory
    #[arg(long, value_name = "DIR")]
    csv_dir: Option<PathBuf>,

    /// JSON file with filter settings; flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON log file, rolled daily (also read from LOG_FILE_PATH)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Log the KPI set after the report is written
    #[arg(long, value_enum)]
    print_kpis: Option<KpiFormat>,
}

#[derive(Clone, Copy, ValueEnum)]
enum KpiFormat {
    Json,
    Pretty,
}

impl Cli {
    fn into_run_config(self) -> Result<RunConfig> {
        let mut config = RunConfig::new(self.tripinfo, self.output);
        config.dispatchinfo = self.dispatchinfo;
        config.direct_routes = self.direct_routes;
        config.csv_dir = self.csv_dir;
        config.filter.depart_earliest = self.depart_earliest;
        config.filter.arrival_latest = self.arrival_latest;

        if let Some(path) = &self.config {
            let file = ConfigFile::load(path)?;
            config.merge_file(file, self.vtype.is_some());
        }
        if let Some(vtype) = self.vtype {
            config.filter.vehicle_type = Some(vtype);
        }
        if let Some(tie_break) = self.dispatch_tie_break {
            config.tie_break = tie_break;
        }
        Ok(config)
    }
}

/// Installs the stderr layer and, when a log file is configured, a JSON
/// layer behind a daily rolling appender. The guard must outlive `main`'s work.
fn init_logging(log_file: Option<PathBuf>) -> Option<WorkerGuard> {
    let log_file = log_file.or_else(|| std::env::var_os("LOG_FILE_PATH").map(PathBuf::from));

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("RUST_LOG")
                .from_env_lossy(),
        );

    let (json_layer, guard) = match log_file {
        Some(path) => {
            let log_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let log_file_name = path.file_name().unwrap_or(OsStr::new("drt_kpi.log"));
            let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(non_blocking_file)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(LevelFilter::DEBUG.into())
                        .with_env_var("RUST_LOG_JSON")
                        .from_env_lossy(),
                );
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let mut cli = Cli::parse();
    let _file_guard = init_logging(cli.log_file.take());
    let print_kpis = cli.print_kpis;
    let config = cli.into_run_config()?;

    info!(
        tripinfo = %config.tripinfo.display(),
        output = %config.output.display(),
        vehicle_type = config.filter.vehicle_type.as_deref().unwrap_or("*"),
        "Starting DRT KPI report"
    );
    let report = pipeline::run(&config)?;

    match print_kpis {
        Some(KpiFormat::Json) => print_json(&report.kpis)?,
        Some(KpiFormat::Pretty) => print_pretty(&report.kpis),
        None => {}
    }

    Ok(())
}
