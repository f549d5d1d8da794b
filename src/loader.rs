//! Session export loading
//!
//! VideoFreeze exports start with a free-form preamble (experiment name,
//! dates, settings) of varying length. The real header is the first record
//! with a cell starting with `Experiment`. This module finds that record,
//! selects the five measured columns through an explicit schema mapping,
//! and produces a canonical [`Table`].

use crate::config::ExperimentConfig;
use crate::error::{FearDataError, Result};
use crate::types::{Component, Row, Table};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::Read;
use tracing::{debug, warn};

/// Marker prefix of the first header cell
pub const DEFAULT_START_MARKER: &str = "Experiment";

/// Source column → canonical column, consulted once per load
pub const SCHEMA_MAPPING: [(&str, &str); 5] = [
    ("Animal", "Animal"),
    ("Group", "Group"),
    ("Component Name", "Component"),
    ("Pct Component Time Freezing", "PctFreeze"),
    ("Avg Motion Index", "AvgMotion"),
];

const ANIMAL: usize = 0;
const PCT_FREEZE: usize = 3;
const AVG_MOTION: usize = 4;

/// Rows with fewer non-null selected cells are trailing junk
const MIN_NON_NULL: usize = 2;

/// Valid range of percent freezing
const PCT_FREEZE_RANGE: (f64, f64) = (0.0, 100.0);

/// Valid range of the motion index
const AVG_MOTION_RANGE: (f64, f64) = (0.0, f64::MAX);

/// Cell texts treated as missing
const NULL_TOKENS: [&str; 5] = ["", "nan", "NaN", "NA", "N/A"];

/// Index of the first record containing a cell that starts with `marker`
pub fn locate_data_start(records: &[StringRecord], marker: &str) -> Result<usize> {
    records
        .iter()
        .position(|record| record.iter().any(|cell| cell.starts_with(marker)))
        .ok_or_else(|| {
            FearDataError::Format(format!("no record starts with marker `{}`", marker))
        })
}

/// Read every record of a delimited export, allowing ragged preamble rows
pub fn read_records<R: Read>(reader: R) -> Result<Vec<StringRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Integer-truncating id conversion (`3.0` → `"3"`)
pub fn animal_id_from_number(value: f64) -> String {
    (value.trunc() as i64).to_string()
}

/// Loader for VideoFreeze session exports
pub struct TableLoader;

impl TableLoader {
    /// Load the export configured for `session`
    pub fn load(config: &ExperimentConfig, session: &str) -> Result<Table> {
        if !config.has_session(session) {
            return Err(FearDataError::InvalidSession(session.to_string()));
        }

        let path = config.session_path(session)?;
        debug!(session, path = %path.display(), "loading session export");

        let file = File::open(&path).map_err(|e| {
            warn!(path = %path.display(), "cannot open session export");
            FearDataError::Io(e)
        })?;
        Self::load_from_reader(file)
    }

    /// Parse an export from any reader
    pub fn load_from_reader<R: Read>(reader: R) -> Result<Table> {
        let records = read_records(reader)?;
        Self::from_records(&records)
    }

    /// Build a table from already-split records, preamble included
    pub fn from_records(records: &[StringRecord]) -> Result<Table> {
        let start = locate_data_start(records, DEFAULT_START_MARKER)?;
        let columns = select_columns(&records[start])?;

        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for (offset, record) in records[start + 1..].iter().enumerate() {
            // 1-based line number in the source file
            let line = start + offset + 2;
            let cells = columns.map(|idx| normalize_cell(record.get(idx)));

            if cells.iter().filter(|c| c.is_some()).count() < MIN_NON_NULL {
                dropped += 1;
                continue;
            }
            kept.push((line, cells));
        }

        if dropped > 0 {
            debug!(dropped, "dropped near-empty records");
        }

        let numeric_ids = kept
            .iter()
            .filter_map(|(_, cells)| cells[ANIMAL].as_deref())
            .all(|id| id.parse::<f64>().map(f64::is_finite).unwrap_or(false));

        let rows = kept
            .into_iter()
            .map(|(line, cells)| build_row(line, cells, numeric_ids))
            .collect::<Result<Vec<_>>>()?;

        debug!(rows = rows.len(), "parsed session export");
        Ok(Table::new(rows))
    }
}

/// Resolve each mapped source column to its index in the header record
fn select_columns(header: &StringRecord) -> Result<[usize; 5]> {
    let mut indices = [0usize; 5];

    for (slot, (source, _)) in SCHEMA_MAPPING.iter().enumerate() {
        indices[slot] = header
            .iter()
            .position(|cell| cell.trim() == *source)
            .ok_or_else(|| {
                FearDataError::Format(format!("expected column `{}` is absent", source))
            })?;
    }

    Ok(indices)
}

fn normalize_cell(cell: Option<&str>) -> Option<String> {
    let cell = cell?.trim();
    if NULL_TOKENS.contains(&cell) {
        None
    } else {
        Some(cell.to_string())
    }
}

fn build_row(line: usize, cells: [Option<String>; 5], numeric_ids: bool) -> Result<Row> {
    let [animal, group, component, pct_freeze, avg_motion] = cells;

    let animal = animal
        .ok_or_else(|| FearDataError::Format(format!("line {}: missing Animal", line)))?;
    let animal = if numeric_ids {
        let value = animal.parse::<f64>().map_err(|_| {
            FearDataError::Format(format!("line {}: Animal `{}` is not numeric", line, animal))
        })?;
        animal_id_from_number(value)
    } else {
        animal
    };

    let component = component
        .ok_or_else(|| FearDataError::Format(format!("line {}: missing Component Name", line)))?;

    let mut row = Row::new(animal, Component::Label(component));
    row.group = group;
    row.pct_freeze = parse_measure(line, SCHEMA_MAPPING[PCT_FREEZE].0, pct_freeze, PCT_FREEZE_RANGE)?;
    row.avg_motion = parse_measure(line, SCHEMA_MAPPING[AVG_MOTION].0, avg_motion, AVG_MOTION_RANGE)?;

    Ok(row)
}

fn parse_measure(
    line: usize,
    column: &str,
    cell: Option<String>,
    (min, max): (f64, f64),
) -> Result<Option<f64>> {
    cell.map(|text| {
        let value = text.parse::<f64>().map_err(|_| {
            FearDataError::Format(format!(
                "line {}: `{}` value `{}` is not a number",
                line, column, text
            ))
        })?;
        if !(min..=max).contains(&value) {
            return Err(FearDataError::Format(format!(
                "line {}: `{}` value {} is outside [{}, {}]",
                line, column, value, min, max
            )));
        }
        Ok(value)
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    const EXPORT: &str = "\
VideoFreeze Export,,
Date,2019-03-02,
Settings,Motion threshold 18,
,,
Experiment,Trial,Animal,Group,Component Name,Pct Component Time Freezing,Avg Motion Index,Notes
FC1,1,1.0,,Baseline-1,0.0,420.5,x
FC1,1,1.0,,Tone-1,12.5,210.0,
FC1,1,2.0,,Baseline-1,5.0,300.0,
FC1,1,2.0,,Tone-1,55.0,80.25,
,,,,,,,
";

    fn records(text: &str) -> Vec<StringRecord> {
        read_records(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_locate_data_start_after_junk() {
        let text = "a,b\nc\nd,e,f\n,,\nfoo\nExperiment 1,x\nFC,1\n";
        assert_eq!(locate_data_start(&records(text), DEFAULT_START_MARKER).unwrap(), 5);
    }

    #[test]
    fn test_locate_data_start_matches_any_cell() {
        let text = "junk\n,,Experiment Name\n";
        assert_eq!(locate_data_start(&records(text), DEFAULT_START_MARKER).unwrap(), 1);
    }

    #[test]
    fn test_locate_data_start_is_prefix_match() {
        let text = "My Experiment,x\n";
        let err = locate_data_start(&records(text), DEFAULT_START_MARKER).unwrap_err();
        assert!(matches!(err, FearDataError::Format(_)));
    }

    #[test]
    fn test_load_selects_canonical_columns() {
        let table = TableLoader::load_from_reader(EXPORT.as_bytes()).unwrap();

        assert_eq!(table.len(), 4);
        let json = serde_json::to_value(&table.rows()[0]).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["Animal", "AvgMotion", "Component", "Group", "PctFreeze"]
        );
        assert!(json.get("Notes").is_none());
    }

    #[test]
    fn test_float_animal_ids_truncate() {
        let table = TableLoader::load_from_reader(EXPORT.as_bytes()).unwrap();
        assert_eq!(table.animals(), vec!["1", "2"]);
    }

    #[test]
    fn test_text_animal_ids_kept() {
        let text = EXPORT.replace("FC1,1,2.0,", "FC1,1,M2,");
        let table = TableLoader::load_from_reader(text.as_bytes()).unwrap();
        assert_eq!(table.animals(), vec!["1.0", "M2"]);
    }

    #[test]
    fn test_measures_parsed() {
        let table = TableLoader::load_from_reader(EXPORT.as_bytes()).unwrap();
        let row = &table.rows()[1];
        assert_eq!(row.component, Component::Label("Tone-1".to_string()));
        assert_eq!(row.pct_freeze, Some(12.5));
        assert_eq!(row.avg_motion, Some(210.0));
        assert_eq!(row.group, None);
    }

    #[test]
    fn test_missing_column_is_format_error() {
        let text = EXPORT.replace("Avg Motion Index", "Motion");
        let err = TableLoader::load_from_reader(text.as_bytes()).unwrap_err();
        match err {
            FearDataError::Format(msg) => assert!(msg.contains("Avg Motion Index")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bad_measure_names_line() {
        let text = EXPORT.replace("12.5", "twelve");
        let err = TableLoader::load_from_reader(text.as_bytes()).unwrap_err();
        match err {
            FearDataError::Format(msg) => assert!(msg.contains("line 7")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_freezing_above_hundred_names_line() {
        let text = EXPORT.replace("55.0", "150");
        let err = TableLoader::load_from_reader(text.as_bytes()).unwrap_err();
        match err {
            FearDataError::Format(msg) => {
                assert!(msg.contains("line 9"));
                assert!(msg.contains("Pct Component Time Freezing"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_motion_rejected() {
        let text = EXPORT.replace("420.5", "-1");
        let err = TableLoader::load_from_reader(text.as_bytes()).unwrap_err();
        match err {
            FearDataError::Format(msg) => assert!(msg.contains("line 6")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_freezing_bounds_inclusive() {
        let text = EXPORT.replace("55.0", "100").replace("12.5", "0");
        let table = TableLoader::load_from_reader(text.as_bytes()).unwrap();
        assert_eq!(table.rows()[3].pct_freeze, Some(100.0));
    }

    #[test]
    fn test_nan_rows_dropped() {
        let text = format!("{}FC1,nan,NaN,,nan,,,\n", EXPORT);
        let table = TableLoader::load_from_reader(text.as_bytes()).unwrap();
        assert_eq!(table.len(), 4);
    }

    fn write_config(dir: &std::path::Path) -> ExperimentConfig {
        fs::create_dir_all(dir.join("raw")).unwrap();
        fs::write(dir.join("raw/train.csv"), EXPORT).unwrap();
        let yaml = "\
sessions: [train, context]
raw_data: true
raw_data_path: raw
train_file: train.csv
context_file: missing.csv
";
        let path = dir.join("expt_config.yaml");
        fs::write(&path, yaml).unwrap();
        ExperimentConfig::from_path(&path).unwrap()
    }

    #[test]
    fn test_load_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());

        let table = TableLoader::load(&config, "TRAIN").unwrap();
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_load_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());

        let err = TableLoader::load(&config, "extinction").unwrap_err();
        assert!(matches!(err, FearDataError::InvalidSession(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());

        let err = TableLoader::load(&config, "context").unwrap_err();
        assert!(matches!(err, FearDataError::Io(_)));
    }
}
