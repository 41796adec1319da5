//! Report layout and persistence.
//!
//! Tables are written as sheets of one `.xlsx` workbook and, optionally, as
//! one CSV file per table. Every file is first written next to its
//! destination and moved into place only once complete.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::kpi::{KpiSet, KpiValue, NOT_APPLICABLE};

/// One spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    NotApplicable,
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Number(value) => value.to_string(),
            Cell::NotApplicable => NOT_APPLICABLE.to_string(),
        }
    }
}

impl From<KpiValue> for Cell {
    fn from(value: KpiValue) -> Self {
        match value {
            KpiValue::Count(n) => Cell::Number(n as f64),
            KpiValue::Measure(v) => Cell::Number(v),
            KpiValue::NotApplicable => Cell::NotApplicable,
        }
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::NotApplicable, Cell::Number)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Number(value as f64)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<Option<&str>> for Cell {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Cell::NotApplicable, Cell::from)
    }
}

/// A named table with fixed column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: &[&'static str]) -> Self {
        Self {
            name: name.into(),
            headers: headers.to_vec(),
            rows: Vec::new(),
        }
    }

    /// Appends a row; it must have exactly one cell per header.
    pub fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.headers.len(), "row width of table {}", self.name);
        self.rows.push(row);
    }

    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| *h == header)
    }
}

/// Lays out a [`KpiSet`] as a two-column `kpi`/`value` table.
pub fn summary_table(kpis: &KpiSet) -> Table {
    let mut table = Table::new("summary", &["kpi", "value"]);
    for kpi in kpis.iter() {
        table.push_row(vec![Cell::from(kpi.name), Cell::from(kpi.value)]);
    }
    table
}

/// Logs the KPI summary as aligned `name = value` lines.
pub fn print_pretty(kpis: &KpiSet) {
    let width = kpis.iter().map(|k| k.name.len()).max().unwrap_or(0);
    for kpi in kpis.iter() {
        info!("{:<width$} = {}", kpi.name, kpi.value);
    }
}

/// Logs the KPI summary as pretty-printed JSON.
pub fn print_json(kpis: &KpiSet) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(kpis)?);
    Ok(())
}

/// Creates a scratch file in the directory that will receive `path`.
fn staging_file(path: &Path) -> Result<NamedTempFile> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tempfile::Builder::new()
        .prefix(".drt_kpi-")
        .tempfile_in(dir)
        .with_context(|| format!("cannot create a temporary file in {}", dir.display()))
}

fn persist(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .with_context(|| format!("cannot move report into place at {}", path.display()))?;
    Ok(())
}

fn fill_sheet(sheet: &mut Worksheet, table: &Table, header_format: &Format) -> Result<()> {
    sheet.set_name(&table.name)?;
    for (col, header) in table.headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, header_format)?;
    }
    for (i, row) in table.rows.iter().enumerate() {
        let r = i as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let c = col as u16;
            match cell {
                Cell::Number(value) if value.is_finite() => {
                    sheet.write_number(r, c, *value)?;
                }
                other => {
                    sheet.write_string(r, c, other.render())?;
                }
            }
        }
    }
    sheet.set_freeze_panes(1, 0)?;
    Ok(())
}

/// Writes every table as one sheet of an `.xlsx` workbook at `path`.
///
/// Nothing is left at `path` if any sheet fails.
#[tracing::instrument(skip(tables), fields(path = %path.display(), sheets = tables.len()))]
pub fn write_workbook(path: &Path, tables: &[Table]) -> Result<()> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    for table in tables {
        let sheet = workbook.add_worksheet();
        fill_sheet(sheet, table, &header_format)
            .with_context(|| format!("cannot lay out sheet {}", table.name))?;
    }
    let bytes = workbook.save_to_buffer().context("cannot encode workbook")?;

    let mut staged = staging_file(path)?;
    staged.write_all(&bytes)?;
    persist(staged, path)?;
    info!(bytes = bytes.len(), "Workbook written");
    Ok(())
}

/// Writes each table to `<dir>/<table name>.csv`.
#[tracing::instrument(skip(tables), fields(dir = %dir.display()))]
pub fn write_csv_tables(dir: &Path, tables: &[Table]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create CSV directory {}", dir.display()))?;
    for table in tables {
        let path = dir.join(format!("{}.csv", table.name));
        let mut staged = staging_file(&path)?;
        {
            let mut writer = WriterBuilder::new().has_headers(false).from_writer(staged.as_file_mut());
            writer.write_record(&table.headers)?;
            for row in &table.rows {
                writer.write_record(row.iter().map(Cell::render))?;
            }
            writer.flush()?;
        }
        persist(staged, &path)?;
        debug!(path = %path.display(), rows = table.rows.len(), "CSV table written");
    }
    Ok(())
}
