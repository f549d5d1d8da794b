//! Table reshaping
//!
//! This module turns annotated tables into the shapes downstream consumers
//! expect:
//! - Per-animal phase means for phase-level plots and statistics
//! - Wide (one row per subject) tables for statistical-software export
//! - Stimulus-aligned trial windows for trial-level time series

use crate::error::{FearDataError, Result};
use crate::timeline::{linspace, round_to};
use crate::types::{
    BoundaryTable, Field, Measure, MeltedRecord, Phase, PhaseSummary, Record, Row, Table,
    TrialWindow, WideRow, WideTable,
};
use std::collections::HashMap;
use tracing::debug;

/// Default stimulus label fragment for trial windows
pub const DEFAULT_STIMULUS_PATTERN: &str = "tone";

/// Default window relative to stimulus onset, in seconds
pub const DEFAULT_WINDOW: (f64, f64) = (-20.0, 60.0);

/// Decimal places kept on the trial time axis
const TRIAL_TIME_PLACES: i32 = 1;

#[derive(Default)]
struct MeanAccumulator {
    sum: f64,
    count: usize,
}

impl MeanAccumulator {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Mean PctFreeze/AvgMotion per (Animal, [extra key], Phase)
///
/// Groups appear in first-seen order. `extra_group_key` may be `Group` or
/// `Sex`; rows where it is unset are left out of the aggregate.
pub fn aggregate_by_phase(table: &Table, extra_group_key: Option<Field>) -> Result<Vec<PhaseSummary>> {
    if let Some(field) = extra_group_key {
        if !matches!(field, Field::Group | Field::Sex) {
            return Err(FearDataError::Format(format!(
                "cannot group phases by `{}`",
                field.column_name()
            )));
        }
    }

    let mut order: Vec<PhaseSummary> = Vec::new();
    let mut sums: Vec<(MeanAccumulator, MeanAccumulator)> = Vec::new();
    let mut index: HashMap<(String, Option<String>, Phase), usize> = HashMap::new();
    let mut skipped = 0usize;

    for row in table.rows() {
        let phase = row.phase.ok_or_else(|| {
            FearDataError::Format(format!(
                "animal {} component `{}` has no phase; derive phases first",
                row.animal, row.component
            ))
        })?;

        let extra = match extra_group_key {
            Some(field) => match row.label(field) {
                Some(value) => Some(value),
                None => {
                    skipped += 1;
                    continue;
                }
            },
            None => None,
        };

        let key = (row.animal.clone(), extra.clone(), phase);
        let slot = *index.entry(key).or_insert_with(|| {
            let (group, sex) = match extra_group_key {
                Some(Field::Group) => (extra.clone(), None),
                Some(Field::Sex) => (None, extra.clone()),
                _ => (None, None),
            };
            order.push(PhaseSummary {
                animal: row.animal.clone(),
                sex,
                group,
                phase,
                pct_freeze: None,
                avg_motion: None,
            });
            sums.push(Default::default());
            order.len() - 1
        });

        sums[slot].0.add(row.pct_freeze);
        sums[slot].1.add(row.avg_motion);
    }

    for (summary, (freeze, motion)) in order.iter_mut().zip(&sums) {
        summary.pct_freeze = freeze.mean();
        summary.avg_motion = motion.mean();
    }

    if let Some(field) = extra_group_key {
        if order.is_empty() && !table.is_empty() {
            return Err(FearDataError::Format(format!(
                "no row carries `{}`; assign it before grouping phases by it",
                field.column_name()
            )));
        }
    }

    if skipped > 0 {
        debug!(skipped, "rows without the extra group key left out of phase means");
    }
    Ok(order)
}

/// Cross-tabulate `value_field` by `group_keys` × distinct `pivot_column`
///
/// Columns keep first-seen order. Cells average every contributing record.
/// Rows are sorted by the last group key, ties broken by the full key.
pub fn pivot_wide<R: Record>(
    records: &[R],
    value_field: Measure,
    group_keys: &[Field],
    pivot_column: Field,
) -> Result<WideTable> {
    if group_keys.is_empty() {
        return Err(FearDataError::Format(
            "pivot needs at least one group key".to_string(),
        ));
    }

    let mut columns: Vec<String> = Vec::new();
    let mut column_index: HashMap<String, usize> = HashMap::new();
    let mut row_keys: Vec<Vec<String>> = Vec::new();
    let mut row_index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut cells: HashMap<(usize, usize), MeanAccumulator> = HashMap::new();
    let mut skipped = 0usize;

    for record in records {
        let keys: Option<Vec<String>> = group_keys.iter().map(|f| record.label(*f)).collect();
        let (Some(keys), Some(column)) = (keys, record.label(pivot_column)) else {
            skipped += 1;
            continue;
        };

        let col = *column_index.entry(column.clone()).or_insert_with(|| {
            columns.push(column);
            columns.len() - 1
        });
        let row = *row_index.entry(keys.clone()).or_insert_with(|| {
            row_keys.push(keys);
            row_keys.len() - 1
        });

        cells
            .entry((row, col))
            .or_default()
            .add(record.measure(value_field));
    }

    if skipped > 0 {
        debug!(skipped, "records missing a pivot key were left out");
    }

    let mut rows: Vec<WideRow> = row_keys
        .into_iter()
        .enumerate()
        .map(|(r, keys)| WideRow {
            keys,
            values: (0..columns.len())
                .map(|c| cells.get(&(r, c)).and_then(MeanAccumulator::mean))
                .collect(),
        })
        .collect();

    rows.sort_by(|a, b| a.keys.last().cmp(&b.keys.last()).then_with(|| a.keys.cmp(&b.keys)));

    Ok(WideTable {
        index: group_keys.to_vec(),
        value: value_field,
        columns,
        rows,
    })
}

/// Long form of a wide table: one record per non-empty cell
pub fn melt(wide: &WideTable) -> Vec<MeltedRecord> {
    wide.rows
        .iter()
        .flat_map(|row| {
            wide.columns
                .iter()
                .zip(&row.values)
                .filter_map(move |(column, value)| {
                    value.map(|value| MeltedRecord {
                        keys: row.keys.clone(),
                        column: column.clone(),
                        value,
                    })
                })
        })
        .collect()
}

/// Trial windows for every boundary whose label contains `pattern`,
/// numbered from 1 in boundary-table order
pub fn trial_windows(
    boundaries: &BoundaryTable,
    pattern: &str,
    window_start: f64,
    window_end: f64,
) -> Vec<TrialWindow> {
    boundaries
        .entries
        .iter()
        .filter(|b| b.phase.contains(pattern))
        .enumerate()
        .map(|(i, b)| TrialWindow {
            trial_index: i + 1,
            onset: b.start,
            window_start,
            window_end,
        })
        .collect()
}

/// Slice a boundary-labeled table into stimulus-aligned trials
///
/// Output is trial-major, then animal-major in first-seen animal order,
/// then time order. Every (trial, animal) block must hold the same number
/// of rows; `trial_time` spans `window_start..=window_end` over that count.
pub fn windowed_trials(
    table: &Table,
    boundaries: &BoundaryTable,
    stimulus_label_pattern: &str,
    window_start: f64,
    window_end: f64,
) -> Result<Table> {
    if !(window_start <= window_end) {
        return Err(FearDataError::Format(format!(
            "window start {} is after window end {}",
            window_start, window_end
        )));
    }

    let windows = trial_windows(boundaries, stimulus_label_pattern, window_start, window_end);
    if windows.is_empty() {
        return Err(FearDataError::Format(format!(
            "no boundary label contains `{}`",
            stimulus_label_pattern
        )));
    }

    let mut by_animal: HashMap<&str, Vec<(f64, &Row)>> = HashMap::new();
    for row in table.rows() {
        let t = row.component.timestamp().ok_or_else(|| {
            FearDataError::Format(format!(
                "component `{}` is not a timestamp; label the table from boundaries first",
                row.component
            ))
        })?;
        by_animal.entry(row.animal.as_str()).or_default().push((t, row));
    }
    let animals = table.animals();

    let mut blocks: Vec<(usize, &str, Vec<&Row>)> = Vec::new();
    for window in &windows {
        let mut selected = 0;
        for animal in &animals {
            let rows: Vec<&Row> = by_animal[animal]
                .iter()
                .filter(|(t, _)| window.contains(*t))
                .map(|(_, row)| *row)
                .collect();
            selected += rows.len();
            blocks.push((window.trial_index, *animal, rows));
        }
        if selected == 0 {
            return Err(FearDataError::EmptyWindow(window.trial_index));
        }
    }

    let n_points = blocks[0].2.len();
    if let Some((trial, animal, rows)) = blocks.iter().find(|(_, _, rows)| rows.len() != n_points) {
        return Err(FearDataError::NonUniform(format!(
            "trial {} animal {} has {} rows, expected {}",
            trial,
            animal,
            rows.len(),
            n_points
        )));
    }

    let trial_time: Vec<f64> = linspace(window_start, window_end, n_points)
        .into_iter()
        .map(|t| round_to(t, TRIAL_TIME_PLACES))
        .collect();

    let mut out = Vec::with_capacity(blocks.len() * n_points);
    for (trial, _, rows) in blocks {
        for (row, t) in rows.into_iter().zip(&trial_time) {
            let mut row = row.clone();
            row.trial = Some(trial);
            row.trial_time = Some(*t);
            out.push(row);
        }
    }

    debug!(
        trials = windows.len(),
        animals = animals.len(),
        n_points,
        "windowed trials"
    );
    Ok(Table::new(out))
}
