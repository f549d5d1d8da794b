//! Table export
//!
//! Writes canonical tables, phase summaries and wide tables as CSV for
//! statistical software, or wraps them in a JSON envelope with provenance.

use crate::error::Result;
use crate::types::{Field, PhaseSummary, Record, Table, WideTable};
use crate::{PRODUCER_NAME, VERSION};
use chrono::{DateTime, Utc};
use csv::Writer;
use serde::Serialize;
use std::io::Write;

/// Column order of a cleaned session table
pub const TABLE_COLUMNS: [Field; 5] = [
    Field::Animal,
    Field::Sex,
    Field::Group,
    Field::Phase,
    Field::Component,
];

/// Annotation columns written only when any row carries them
const ANNOTATION_COLUMNS: [Field; 2] = [Field::Sex, Field::Phase];

/// Optional columns appended when any row carries them
const OPTIONAL_COLUMNS: [Field; 3] = [Field::Epoch, Field::Trial, Field::TrialTime];

/// JSON output with provenance
#[derive(Debug, Serialize)]
pub struct JsonEnvelope<'a, T: Serialize + ?Sized> {
    pub producer: &'static str,
    pub version: &'static str,
    pub session: &'a str,
    pub computed_at: DateTime<Utc>,
    pub records: &'a T,
}

impl<'a, T: Serialize + ?Sized> JsonEnvelope<'a, T> {
    pub fn new(session: &'a str, records: &'a T) -> Self {
        Self {
            producer: PRODUCER_NAME,
            version: VERSION,
            session,
            computed_at: Utc::now(),
            records,
        }
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

/// Wrap `records` in a provenance envelope and serialize it
pub fn to_json_envelope<T: Serialize + ?Sized>(session: &str, records: &T, pretty: bool) -> Result<String> {
    JsonEnvelope::new(session, records).to_json(pretty)
}

/// Write a long-format table as CSV
pub fn write_table_csv<W: Write>(table: &Table, writer: W) -> Result<()> {
    let extra: Vec<Field> = OPTIONAL_COLUMNS
        .into_iter()
        .filter(|f| table.has_field(*f))
        .collect();

    let keys: Vec<Field> = TABLE_COLUMNS
        .into_iter()
        .filter(|f| !ANNOTATION_COLUMNS.contains(f) || table.has_field(*f))
        .collect();

    let mut out = Writer::from_writer(writer);

    let mut header: Vec<&str> = keys.iter().map(Field::column_name).collect();
    header.extend(["PctFreeze", "AvgMotion"]);
    header.extend(extra.iter().map(Field::column_name));
    out.write_record(&header)?;

    for row in table.rows() {
        let mut record: Vec<String> = keys
            .iter()
            .map(|f| row.label(*f).unwrap_or_default())
            .collect();
        record.push(number(row.pct_freeze));
        record.push(number(row.avg_motion));
        record.extend(extra.iter().map(|f| row.label(*f).unwrap_or_default()));
        out.write_record(&record)?;
    }

    out.flush()?;
    Ok(())
}

/// Write phase summaries as CSV, including whichever extra key is present
pub fn write_summary_csv<W: Write>(summaries: &[PhaseSummary], writer: W) -> Result<()> {
    let mut keys = vec![Field::Animal];
    for field in [Field::Sex, Field::Group] {
        if summaries.iter().any(|s| s.label(field).is_some()) {
            keys.push(field);
        }
    }
    keys.push(Field::Phase);

    let mut out = Writer::from_writer(writer);

    let mut header: Vec<&str> = keys.iter().map(Field::column_name).collect();
    header.extend(["PctFreeze", "AvgMotion"]);
    out.write_record(&header)?;

    for summary in summaries {
        let mut record: Vec<String> = keys
            .iter()
            .map(|f| summary.label(*f).unwrap_or_default())
            .collect();
        record.push(number(summary.pct_freeze));
        record.push(number(summary.avg_motion));
        out.write_record(&record)?;
    }

    out.flush()?;
    Ok(())
}

/// Write a wide table as CSV: key columns, then one column per pivot value
pub fn write_wide_csv<W: Write>(wide: &WideTable, writer: W) -> Result<()> {
    let mut out = Writer::from_writer(writer);

    let mut header: Vec<&str> = wide.index.iter().map(Field::column_name).collect();
    header.extend(wide.columns.iter().map(String::as_str));
    out.write_record(&header)?;

    for row in &wide.rows {
        let mut record = row.keys.clone();
        record.extend(row.values.iter().map(|v| number(*v)));
        out.write_record(&record)?;
    }

    out.flush()?;
    Ok(())
}

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Component, Measure, Phase, Row, WideRow};
    use pretty_assertions::assert_eq;

    fn as_text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_write_table_csv() {
        let mut row = Row::new("3", Component::Label("tone-1".to_string())).with_measures(12.5, 40.0);
        row.group = Some("ctl".to_string());
        row.phase = Some(Phase::Tone);

        let mut buf = Vec::new();
        write_table_csv(&Table::new(vec![row]), &mut buf).unwrap();

        assert_eq!(
            as_text(buf),
            "Animal,Group,Phase,Component,PctFreeze,AvgMotion\n3,ctl,tone,tone-1,12.5,40\n"
        );
    }

    #[test]
    fn test_write_table_csv_trial_columns() {
        let mut row = Row::new("3", Component::Time(81.0)).with_measures(0.0, 1.0);
        row.trial = Some(1);
        row.trial_time = Some(-19.0);

        let mut buf = Vec::new();
        write_table_csv(&Table::new(vec![row]), &mut buf).unwrap();

        let text = as_text(buf);
        assert!(text.starts_with("Animal,Group,Component,PctFreeze,AvgMotion,Trial,trial_time\n"));
        assert!(text.ends_with("3,,81,0,1,1,-19\n"));
    }

    #[test]
    fn test_write_table_csv_freshly_loaded() {
        let text = "Experiment,Animal,Group,Component Name,Pct Component Time Freezing,Avg Motion Index,Extra\nFC,3.0,,Tone-1,10,20,z\n";
        let table = crate::loader::TableLoader::load_from_reader(text.as_bytes()).unwrap();

        let mut buf = Vec::new();
        write_table_csv(&table, &mut buf).unwrap();
        assert_eq!(
            as_text(buf),
            "Animal,Group,Component,PctFreeze,AvgMotion\n3,,Tone-1,10,20\n"
        );
    }

    #[test]
    fn test_write_table_csv_with_sex() {
        let mut row = Row::new("3", Component::Bin(1)).with_measures(5.0, 2.0);
        row.sex = Some("F".to_string());
        row.phase = Some(Phase::Context);

        let mut buf = Vec::new();
        write_table_csv(&Table::new(vec![row]), &mut buf).unwrap();
        assert_eq!(
            as_text(buf),
            "Animal,Sex,Group,Phase,Component,PctFreeze,AvgMotion\n3,F,,context,1,5,2\n"
        );
    }

    #[test]
    fn test_write_summary_csv() {
        let summaries = vec![PhaseSummary {
            animal: "1".to_string(),
            sex: None,
            group: Some("ctl".to_string()),
            phase: Phase::Baseline,
            pct_freeze: Some(5.0),
            avg_motion: None,
        }];

        let mut buf = Vec::new();
        write_summary_csv(&summaries, &mut buf).unwrap();
        assert_eq!(as_text(buf), "Animal,Group,Phase,PctFreeze,AvgMotion\n1,ctl,baseline,5,\n");
    }

    #[test]
    fn test_write_wide_csv() {
        let wide = WideTable {
            index: vec![Field::Animal, Field::Group],
            value: Measure::PctFreeze,
            columns: vec!["baseline-1".to_string(), "tone-1".to_string()],
            rows: vec![WideRow {
                keys: vec!["1".to_string(), "ctl".to_string()],
                values: vec![Some(0.0), None],
            }],
        };

        let mut buf = Vec::new();
        write_wide_csv(&wide, &mut buf).unwrap();
        assert_eq!(as_text(buf), "Animal,Group,baseline-1,tone-1\n1,ctl,0,\n");
    }

    #[test]
    fn test_json_envelope() {
        let table = Table::new(vec![Row::new("1", Component::Bin(4))]);
        let json = to_json_envelope("context", &table, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["producer"], PRODUCER_NAME);
        assert_eq!(value["session"], "context");
        assert_eq!(value["records"][0]["Component"], 4);
        assert!(value["computed_at"].is_string());
    }
}
