//! Run configuration: filter options, dispatch tie-break and input/output paths.
//!
//! Filter settings may also come from a JSON file:
//! ```json
//! {
//!   "vehicle_type": "drt",
//!   "depart_earliest": 3600.0,
//!   "arrival_latest": 86400.0,
//!   "require_finished": true,
//!   "dispatch_tie_break": "earliest"
//! }
//! ```
//! Every key is optional; command-line flags take precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Vehicle type of the taxi fleet in the usual DRT scenario.
pub const DEFAULT_VEHICLE_TYPE: &str = "drt";

/// Inclusion predicates over parsed records. Unset options impose no constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub vehicle_type: Option<String>,
    /// Inclusive lower bound on the requested departure time.
    pub depart_earliest: Option<f64>,
    /// Inclusive upper bound on the arrival time.
    pub arrival_latest: Option<f64>,
    pub require_finished: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            vehicle_type: None,
            depart_earliest: None,
            arrival_latest: None,
            require_finished: true,
        }
    }
}

impl FilterOptions {
    pub fn for_vehicle_type(vehicle_type: &str) -> Self {
        Self {
            vehicle_type: Some(vehicle_type.to_string()),
            ..Default::default()
        }
    }

    /// Rejects bounds that no trip could ever satisfy.
    ///
    /// Infinite bounds are accepted and behave like unset ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vehicle_type.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyVehicleType);
        }
        if self.depart_earliest.is_some_and(f64::is_nan) {
            return Err(ConfigError::NotANumber {
                option: "depart_earliest",
            });
        }
        if self.arrival_latest.is_some_and(f64::is_nan) {
            return Err(ConfigError::NotANumber {
                option: "arrival_latest",
            });
        }
        if let (Some(depart_earliest), Some(arrival_latest)) =
            (self.depart_earliest, self.arrival_latest)
        {
            if depart_earliest > arrival_latest {
                return Err(ConfigError::InvertedWindow {
                    depart_earliest,
                    arrival_latest,
                });
            }
        }
        Ok(())
    }
}

/// Which dispatch record represents a person when the log holds several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DispatchTieBreak {
    /// Earliest dispatch time; equal times keep the first in the file.
    #[default]
    Earliest,
    /// First record in file order.
    First,
}

/// Filter settings as stored in a JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub vehicle_type: Option<String>,
    pub depart_earliest: Option<f64>,
    pub arrival_latest: Option<f64>,
    pub require_finished: Option<bool>,
    pub dispatch_tie_break: Option<DispatchTieBreak>,
}

impl ConfigFile {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }
}

/// Everything one pipeline run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub tripinfo: PathBuf,
    pub dispatchinfo: Option<PathBuf>,
    pub direct_routes: Option<PathBuf>,
    pub output: PathBuf,
    pub csv_dir: Option<PathBuf>,
    pub filter: FilterOptions,
    pub tie_break: DispatchTieBreak,
}

impl RunConfig {
    pub fn new(tripinfo: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            tripinfo: tripinfo.into(),
            dispatchinfo: None,
            direct_routes: None,
            output: output.into(),
            csv_dir: None,
            filter: FilterOptions::for_vehicle_type(DEFAULT_VEHICLE_TYPE),
            tie_break: DispatchTieBreak::default(),
        }
    }

    /// Fills settings the command line left open from a config file.
    pub fn merge_file(&mut self, file: ConfigFile, cli_set_vehicle_type: bool) {
        if !cli_set_vehicle_type {
            if let Some(vehicle_type) = file.vehicle_type {
                self.filter.vehicle_type = Some(vehicle_type);
            }
        }
        if self.filter.depart_earliest.is_none() {
            self.filter.depart_earliest = file.depart_earliest;
        }
        if self.filter.arrival_latest.is_none() {
            self.filter.arrival_latest = file.arrival_latest;
        }
        if let Some(require_finished) = file.require_finished {
            self.filter.require_finished = require_finished;
        }
        if let Some(tie_break) = file.dispatch_tie_break {
            self.tie_break = tie_break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_requires_finished_and_no_bounds() {
        let options = FilterOptions::default();
        assert!(options.require_finished);
        assert_eq!(options.vehicle_type, None);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_inverted_window_rejected() {
        let options = FilterOptions {
            depart_earliest: Some(500.0),
            arrival_latest: Some(100.0),
            ..Default::default()
        };
        assert_eq!(
            options.validate(),
            Err(ConfigError::InvertedWindow {
                depart_earliest: 500.0,
                arrival_latest: 100.0
            })
        );
    }

    #[test]
    fn test_infinite_bounds_accepted() {
        let options = FilterOptions {
            depart_earliest: Some(0.0),
            arrival_latest: Some(f64::INFINITY),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_nan_and_empty_type_rejected() {
        let nan = FilterOptions {
            arrival_latest: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(
            nan.validate(),
            Err(ConfigError::NotANumber {
                option: "arrival_latest"
            })
        );

        let empty = FilterOptions::for_vehicle_type("  ");
        assert_eq!(empty.validate(), Err(ConfigError::EmptyVehicleType));
    }

    #[test]
    fn test_config_file_merge_respects_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"vehicle_type": "taxi", "depart_earliest": 60.0, "dispatch_tie_break": "first"}}"#
        )
        .unwrap();

        let loaded = ConfigFile::load(file.path()).unwrap();
        let mut run = RunConfig::new("tripinfo.xml", "out.xlsx");
        run.filter.depart_earliest = Some(10.0);
        run.merge_file(loaded, false);

        assert_eq!(run.filter.vehicle_type.as_deref(), Some("taxi"));
        assert_eq!(run.filter.depart_earliest, Some(10.0));
        assert_eq!(run.tie_break, DispatchTieBreak::First);
    }

    #[test]
    fn test_config_file_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"vtype": "taxi"}}"#).unwrap();
        assert!(ConfigFile::load(file.path()).is_err());
    }
}
