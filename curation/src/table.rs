//! Metric tables: one row per cluster, named columns, CSV on disk.
//!
//! Cells are unavailable (`Missing`), numeric, or free text. An unavailable
//! value is never the same thing as `0.0`; an SNR that could not be computed
//! stays `Missing` all the way to the classification rules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::errors::{CurationError, Result};
use crate::persist::write_atomic;

/// Key column shared by every metric table.
pub const CLUSTER_ID: &str = "cluster_id";

/// One value of a metric table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Parse a raw CSV field. Empty and `NaN` fields are unavailable.
    pub fn parse(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
            return Cell::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(value) => Cell::Number(value),
            Err(_) => Cell::Text(trimmed.to_string()),
        }
    }

    /// Cell for an optional numeric value; NaN collapses to `Missing`.
    pub fn from_option(value: Option<f64>) -> Cell {
        match value {
            Some(v) if !v.is_nan() => Cell::Number(v),
            _ => Cell::Missing,
        }
    }

    /// Numeric value, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Cell::Missing => String::new(),
            Cell::Number(v) => v.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// Which upstream table a metric originates from. Decides the suffix a
/// column gets when both tables carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSource {
    Quality,
    Waveform,
}

impl MetricSource {
    /// Column suffix used to disambiguate overlapping columns after a merge
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Quality => "_quality_metrics",
            Self::Waveform => "_waveform_metrics",
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Quality => Self::Waveform,
            Self::Waveform => Self::Quality,
        }
    }
}

/// Metrics the classification rules know by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricField {
    NumSpikes,
    FiringRate,
    PresenceRatio,
    IsiViol,
    NumViol,
    ContamRate,
    AmplitudeCutoff,
    Depth,
    PeakChannel,
    Snr,
    Amplitude,
    Halfwidth,
    RepolarizationSlope,
}

impl MetricField {
    /// Columns of the quality table, in output order
    pub const QUALITY: [MetricField; 8] = [
        MetricField::NumSpikes,
        MetricField::FiringRate,
        MetricField::PresenceRatio,
        MetricField::IsiViol,
        MetricField::NumViol,
        MetricField::ContamRate,
        MetricField::AmplitudeCutoff,
        MetricField::Depth,
    ];

    /// Columns of the waveform-shape table, in output order
    pub const WAVEFORM: [MetricField; 5] = [
        MetricField::PeakChannel,
        MetricField::Snr,
        MetricField::Amplitude,
        MetricField::Halfwidth,
        MetricField::RepolarizationSlope,
    ];

    /// Column name on disk
    pub fn column(&self) -> &'static str {
        match self {
            Self::NumSpikes => "num_spikes",
            Self::FiringRate => "firing_rate",
            Self::PresenceRatio => "presence_ratio",
            Self::IsiViol => "isi_viol",
            Self::NumViol => "num_viol",
            Self::ContamRate => "contam_rate",
            Self::AmplitudeCutoff => "amplitude_cutoff",
            Self::Depth => "depth",
            Self::PeakChannel => "peak_channel",
            Self::Snr => "snr",
            Self::Amplitude => "amplitude",
            Self::Halfwidth => "halfwidth",
            Self::RepolarizationSlope => "repolarization_slope",
        }
    }

    /// Table this metric is normally computed in
    pub fn source(&self) -> MetricSource {
        match self {
            Self::PeakChannel
            | Self::Snr
            | Self::Amplitude
            | Self::Halfwidth
            | Self::RepolarizationSlope => MetricSource::Waveform,
            _ => MetricSource::Quality,
        }
    }
}

impl std::fmt::Display for MetricField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Metrics of a single cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    cluster_id: i64,
    cells: BTreeMap<String, Cell>,
}

impl MetricRow {
    pub fn new(cluster_id: i64) -> Self {
        Self {
            cluster_id,
            cells: BTreeMap::new(),
        }
    }

    /// Builder-style setter for a known metric, mostly for fixtures
    pub fn with(mut self, field: MetricField, value: f64) -> Self {
        self.set_field(field, Some(value));
        self
    }

    pub fn cluster_id(&self) -> i64 {
        self.cluster_id
    }

    pub fn set(&mut self, column: impl Into<String>, cell: Cell) {
        self.cells.insert(column.into(), cell);
    }

    pub fn set_field(&mut self, field: MetricField, value: Option<f64>) {
        self.set(field.column(), Cell::from_option(value));
    }

    pub fn cell(&self, column: &str) -> Option<&Cell> {
        self.cells.get(column)
    }

    /// Value of a known metric, or `None` when it is unavailable.
    ///
    /// After a merge the metric may only exist under a source suffix; the
    /// copy from the metric's own source table is preferred.
    pub fn value(&self, field: MetricField) -> Option<f64> {
        let column = field.column();
        if let Some(cell) = self.cells.get(column) {
            return cell.as_number();
        }
        let preferred = field.source();
        [preferred, preferred.other()]
            .into_iter()
            .find_map(|source| {
                self.cells
                    .get(&format!("{column}{}", source.suffix()))
                    .and_then(Cell::as_number)
            })
    }

    fn into_cells(self) -> BTreeMap<String, Cell> {
        self.cells
    }
}

/// Ordered collection of metric rows with a fixed column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricTable {
    columns: Vec<String>,
    rows: Vec<MetricRow>,
}

impl MetricTable {
    /// Empty table with the given non-key columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Empty table whose columns are the given metrics
    pub fn with_fields(fields: &[MetricField]) -> Self {
        Self::new(fields.iter().map(|f| f.column().to_string()).collect())
    }

    /// Non-key column names in output order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row. Columns the table has not seen yet are appended to the
    /// column order.
    pub fn push(&mut self, row: MetricRow) {
        for column in row.cells.keys() {
            if !self.columns.iter().any(|c| c == column) {
                self.columns.push(column.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Whether the metric exists under its own name or a merge suffix
    pub fn has_field(&self, field: MetricField) -> bool {
        let column = field.column();
        self.has_column(column)
            || [MetricSource::Quality, MetricSource::Waveform]
                .iter()
                .any(|s| self.has_column(&format!("{column}{}", s.suffix())))
    }

    /// Row lookup by cluster id; the first row wins when ids repeat
    pub fn index(&self) -> HashMap<i64, &MetricRow> {
        let mut index = HashMap::with_capacity(self.rows.len());
        for row in &self.rows {
            index.entry(row.cluster_id).or_insert(row);
        }
        index
    }

    pub fn get(&self, cluster_id: i64) -> Option<&MetricRow> {
        self.rows.iter().find(|r| r.cluster_id == cluster_id)
    }

    /// Split into column order and rows
    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<MetricRow>) {
        (self.columns, self.rows)
    }

    /// Rebuild a row with columns renamed through `rename`
    pub(crate) fn rename_row(row: MetricRow, rename: &HashMap<String, String>) -> MetricRow {
        let cluster_id = row.cluster_id;
        let cells = row
            .into_cells()
            .into_iter()
            .map(|(column, cell)| {
                let column = rename.get(&column).cloned().unwrap_or(column);
                (column, cell)
            })
            .collect();
        MetricRow { cluster_id, cells }
    }

    /// Read a metric table from CSV.
    ///
    /// A leading unnamed index column (empty header or `Unnamed: …`) is
    /// dropped. The `cluster_id` column may sit anywhere.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| CurationError::io(path, e))?;
        Self::from_reader(file, path)
    }

    /// Parse CSV from any reader; `origin` is only used in error messages.
    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| CurationError::format(origin, format!("unreadable header: {e}")))?
            .clone();

        let skip_index = headers
            .get(0)
            .is_some_and(|h| h.trim().is_empty() || h.starts_with("Unnamed"));

        let mut seen = HashSet::new();
        let mut key_position = None;
        let mut columns = Vec::new();
        let mut positions = Vec::new();
        for (position, header) in headers.iter().enumerate() {
            if position == 0 && skip_index {
                continue;
            }
            let header = header.trim();
            if !seen.insert(header.to_string()) {
                return Err(CurationError::format(
                    origin,
                    format!("duplicate column `{header}`"),
                ));
            }
            if header == CLUSTER_ID {
                key_position = Some(position);
            } else {
                columns.push(header.to_string());
                positions.push(position);
            }
        }

        let key_position = key_position.ok_or_else(|| {
            let found = headers.iter().collect::<Vec<_>>().join(", ");
            CurationError::format(
                origin,
                format!("expected a `{CLUSTER_ID}` column, found [{found}]"),
            )
        })?;

        let mut table = MetricTable::new(columns.clone());
        for (line, record) in reader.records().enumerate() {
            let record = record
                .map_err(|e| CurationError::format(origin, format!("row {}: {e}", line + 1)))?;
            let raw_id = record.get(key_position).unwrap_or_default();
            let cluster_id = parse_cluster_id(raw_id).ok_or_else(|| {
                CurationError::format(
                    origin,
                    format!("row {}: cluster_id `{raw_id}` is not an integer", line + 1),
                )
            })?;

            let mut row = MetricRow::new(cluster_id);
            for (column, &position) in columns.iter().zip(&positions) {
                row.set(column.clone(), Cell::parse(record.get(position).unwrap_or_default()));
            }
            table.rows.push(row);
        }

        Ok(table)
    }

    /// Serialize to CSV bytes, `cluster_id` first.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        let to_internal = |e: csv::Error| CurationError::internal(format!("csv encode: {e}"));

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(CLUSTER_ID.to_string());
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header).map_err(to_internal)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(header.len());
            record.push(row.cluster_id.to_string());
            for column in &self.columns {
                record.push(row.cells.get(column).map(Cell::render).unwrap_or_default());
            }
            writer.write_record(&record).map_err(to_internal)?;
        }

        writer
            .into_inner()
            .map_err(|e| CurationError::internal(format!("csv flush: {e}")))
    }

    /// Write the table to `path`, replacing any existing file atomically.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let bytes = self.to_csv_bytes()?;
        write_atomic(path, &bytes)?;
        tracing::info!(path = %path.display(), rows = self.len(), "Wrote metric table");
        Ok(())
    }
}

/// Cluster ids are integers, but tables that went through a float column
/// sometimes carry them as `12.0`.
pub(crate) fn parse_cluster_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let value = raw.parse::<f64>().ok()?;
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}
