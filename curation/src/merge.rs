//! Left join of metric tables on `cluster_id`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::errors::Result;
use crate::table::{MetricSource, MetricTable};

/// Left-join `secondary` onto `primary`.
///
/// Every primary row is kept, in order, and gains the secondary's columns.
/// Columns present in both tables are renamed with their source suffix.
/// Secondary rows without a primary match are dropped; when the secondary
/// repeats a cluster id the first occurrence is used.
pub fn merge(
    primary: MetricTable,
    primary_source: MetricSource,
    secondary: &MetricTable,
    secondary_source: MetricSource,
) -> MetricTable {
    let overlap: HashSet<String> = primary
        .columns()
        .iter()
        .filter(|c| secondary.has_column(c))
        .cloned()
        .collect();

    let rename_for = |source: MetricSource| -> HashMap<String, String> {
        overlap
            .iter()
            .map(|c| (c.to_string(), format!("{c}{}", source.suffix())))
            .collect()
    };
    let primary_rename = rename_for(primary_source);
    let secondary_rename = rename_for(secondary_source);

    let rename_column = |column: &String, rename: &HashMap<String, String>| {
        rename.get(column).cloned().unwrap_or_else(|| column.clone())
    };
    let mut columns: Vec<String> = primary
        .columns()
        .iter()
        .map(|c| rename_column(c, &primary_rename))
        .collect();
    columns.extend(
        secondary
            .columns()
            .iter()
            .map(|c| rename_column(c, &secondary_rename)),
    );

    let index = secondary.index();
    let (_, rows) = primary.into_parts();
    let mut merged = MetricTable::new(columns);
    let mut matched = 0usize;
    for row in rows {
        let cluster_id = row.cluster_id();
        let mut row = MetricTable::rename_row(row, &primary_rename);
        if let Some(extra) = index.get(&cluster_id) {
            matched += 1;
            let extra = MetricTable::rename_row((*extra).clone(), &secondary_rename);
            for column in secondary.columns() {
                let column = rename_column(column, &secondary_rename);
                if let Some(cell) = extra.cell(&column) {
                    row.set(column, cell.clone());
                }
            }
        }
        merged.push(row);
    }

    tracing::debug!(
        rows = merged.len(),
        matched,
        overlapping = overlap.len(),
        "Merged metric tables"
    );
    merged
}

/// Merge the table stored at `secondary_path` onto `primary`, or return
/// `primary` unchanged when there is no such file.
pub fn merge_with_file(
    primary: MetricTable,
    primary_source: MetricSource,
    secondary_path: &Path,
    secondary_source: MetricSource,
) -> Result<MetricTable> {
    if !secondary_path.exists() {
        tracing::warn!(
            path = %secondary_path.display(),
            "Secondary metric table not found; shape rules will not apply"
        );
        return Ok(primary);
    }
    let secondary = MetricTable::read_csv(secondary_path)?;
    Ok(merge(primary, primary_source, &secondary, secondary_source))
}
