//! Core types for the fear-data pipeline
//!
//! This module defines the data structures that flow through each stage:
//! canonical rows and tables, phase summaries, wide (cross-tabulated) tables,
//! and the phase-boundary reference tables used for high-resolution labeling.

use crate::error::{FearDataError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Coarse phase label assigned over components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Baseline,
    Tone,
    Trace,
    Iti,
    Context,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Baseline => "baseline",
            Phase::Tone => "tone",
            Phase::Trace => "trace",
            Phase::Iti => "iti",
            Phase::Context => "context",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time bin within a session export
///
/// Components start out as the export's text token (`"Baseline-1"`,
/// `"Tone-3"`). Context sessions cast them to integer bins, and the
/// boundary-table labeling path replaces them with session timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Component {
    Bin(i64),
    Time(f64),
    Label(String),
}

impl Component {
    /// Text token, if this component has not been converted yet
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Component::Label(label) => Some(label),
            _ => None,
        }
    }

    /// Session timestamp in seconds, only set by boundary-table labeling
    pub fn timestamp(&self) -> Option<f64> {
        match self {
            Component::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Bin(bin) => write!(f, "{}", bin),
            Component::Time(t) => write!(f, "{}", t),
            Component::Label(label) => f.write_str(label),
        }
    }
}

/// Fine-grained epoch label: a boundary-table phase, or the raw timestamp
/// when no boundary covers the row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Epoch {
    Time(f64),
    Label(String),
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Epoch::Time(t) => write!(f, "{}", t),
            Epoch::Label(label) => f.write_str(label),
        }
    }
}

/// One animal's measurements for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Animal identifier (always string-typed)
    #[serde(rename = "Animal")]
    pub animal: String,
    /// Sex label, set by membership in the configured sex sets
    #[serde(rename = "Sex", skip_serializing_if = "Option::is_none", default)]
    pub sex: Option<String>,
    /// Group label, set by membership in the configured group sets
    #[serde(rename = "Group")]
    pub group: Option<String>,
    /// Coarse phase, set by phase derivation
    #[serde(rename = "Phase", skip_serializing_if = "Option::is_none", default)]
    pub phase: Option<Phase>,
    /// Time bin
    #[serde(rename = "Component")]
    pub component: Component,
    /// Percent of component time spent freezing (0-100)
    #[serde(rename = "PctFreeze")]
    pub pct_freeze: Option<f64>,
    /// Average motion index (>= 0)
    #[serde(rename = "AvgMotion")]
    pub avg_motion: Option<f64>,
    /// Epoch label from the boundary-table path
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub epoch: Option<Epoch>,
    /// Trial number (1-based) from trial windowing
    #[serde(rename = "Trial", skip_serializing_if = "Option::is_none", default)]
    pub trial: Option<usize>,
    /// Time relative to stimulus onset within a trial window
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trial_time: Option<f64>,
}

impl Row {
    pub fn new(animal: impl Into<String>, component: Component) -> Self {
        Self {
            animal: animal.into(),
            sex: None,
            group: None,
            phase: None,
            component,
            pct_freeze: None,
            avg_motion: None,
            epoch: None,
            trial: None,
            trial_time: None,
        }
    }

    pub fn with_measures(mut self, pct_freeze: f64, avg_motion: f64) -> Self {
        self.pct_freeze = Some(pct_freeze);
        self.avg_motion = Some(avg_motion);
        self
    }
}

/// Ordered sequence of rows sharing one schema
///
/// Row order is the export order; animals are expected in contiguous blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table {
    rows: Vec<Row>,
}

impl Table {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct animal ids in first-seen order
    pub fn animals(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.animal.as_str()) {
                seen.push(row.animal.as_str());
            }
        }
        seen
    }

    /// Number of rows per animal, failing if animals differ
    pub fn rows_per_animal(&self) -> Result<usize> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for row in &self.rows {
            *counts.entry(row.animal.as_str()).or_default() += 1;
        }

        let animals = self.animals();
        let Some(first) = animals.first() else {
            return Ok(0);
        };
        let expected = counts[first];

        for animal in &animals {
            if counts[animal] != expected {
                return Err(FearDataError::NonUniform(format!(
                    "animal {} has {} rows but animal {} has {}",
                    animal, counts[animal], first, expected
                )));
            }
        }

        Ok(expected)
    }

    /// True when any row carries the given optional column
    pub fn has_field(&self, field: Field) -> bool {
        self.rows.iter().any(|row| row.label(field).is_some())
    }
}

impl FromIterator<Row> for Table {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Label (non-numeric) columns that can key a grouping or pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Animal,
    Group,
    Sex,
    Phase,
    Component,
    Epoch,
    Trial,
    TrialTime,
}

impl Field {
    /// Canonical column name
    pub fn column_name(&self) -> &'static str {
        match self {
            Field::Animal => "Animal",
            Field::Group => "Group",
            Field::Sex => "Sex",
            Field::Phase => "Phase",
            Field::Component => "Component",
            Field::Epoch => "epoch",
            Field::Trial => "Trial",
            Field::TrialTime => "trial_time",
        }
    }
}

/// Numeric measurement columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Measure {
    PctFreeze,
    AvgMotion,
}

impl Measure {
    pub fn column_name(&self) -> &'static str {
        match self {
            Measure::PctFreeze => "PctFreeze",
            Measure::AvgMotion => "AvgMotion",
        }
    }
}

/// Uniform read access to keyed records for grouping and pivoting
pub trait Record {
    /// Text value of a label column, `None` when unset or absent
    fn label(&self, field: Field) -> Option<String>;
    /// Value of a measurement column
    fn measure(&self, measure: Measure) -> Option<f64>;
}

impl Record for Row {
    fn label(&self, field: Field) -> Option<String> {
        match field {
            Field::Animal => Some(self.animal.clone()),
            Field::Group => self.group.clone(),
            Field::Sex => self.sex.clone(),
            Field::Phase => self.phase.map(|p| p.as_str().to_string()),
            Field::Component => Some(self.component.to_string()),
            Field::Epoch => self.epoch.as_ref().map(|e| e.to_string()),
            Field::Trial => self.trial.map(|t| t.to_string()),
            Field::TrialTime => self.trial_time.map(|t| t.to_string()),
        }
    }

    fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::PctFreeze => self.pct_freeze,
            Measure::AvgMotion => self.avg_motion,
        }
    }
}

/// Per-animal, per-phase mean of the measurements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    #[serde(rename = "Animal")]
    pub animal: String,
    #[serde(rename = "Sex", skip_serializing_if = "Option::is_none", default)]
    pub sex: Option<String>,
    #[serde(rename = "Group", skip_serializing_if = "Option::is_none", default)]
    pub group: Option<String>,
    #[serde(rename = "Phase")]
    pub phase: Phase,
    #[serde(rename = "PctFreeze")]
    pub pct_freeze: Option<f64>,
    #[serde(rename = "AvgMotion")]
    pub avg_motion: Option<f64>,
}

impl Record for PhaseSummary {
    fn label(&self, field: Field) -> Option<String> {
        match field {
            Field::Animal => Some(self.animal.clone()),
            Field::Group => self.group.clone(),
            Field::Sex => self.sex.clone(),
            Field::Phase => Some(self.phase.as_str().to_string()),
            _ => None,
        }
    }

    fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::PctFreeze => self.pct_freeze,
            Measure::AvgMotion => self.avg_motion,
        }
    }
}

/// Cross-tabulated table: one row per subject, one column per pivot value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideTable {
    /// Fields keying each row, in order
    pub index: Vec<Field>,
    /// Measurement spread across the columns
    pub value: Measure,
    /// Column labels in first-seen order
    pub columns: Vec<String>,
    pub rows: Vec<WideRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideRow {
    /// Key values, aligned with `WideTable::index`
    pub keys: Vec<String>,
    /// Cell values, aligned with `WideTable::columns`
    pub values: Vec<Option<f64>>,
}

/// One non-empty cell of a wide table in long form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeltedRecord {
    pub keys: Vec<String>,
    pub column: String,
    pub value: f64,
}

/// Protocol keying a phase-boundary table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Train,
    Tone,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Train => "train",
            Protocol::Tone => "tone",
        }
    }

    /// Resolve the protocol from a session name
    pub fn from_session(session: &str) -> Result<Self> {
        let session = session.to_lowercase();
        if session.contains("train") {
            Ok(Protocol::Train)
        } else if session.contains("tone") {
            Ok(Protocol::Tone)
        } else {
            Err(FearDataError::Format(format!(
                "session `{}` must include \"train\" or \"tone\" to select a boundary table",
                session
            )))
        }
    }
}

/// One labeled interval of a session, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBoundary {
    pub phase: String,
    pub start: f64,
    pub end: f64,
}

impl PhaseBoundary {
    pub fn new(phase: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            phase: phase.into(),
            start,
            end,
        }
    }

    /// Inclusive on both ends
    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Ordered boundary entries for one protocol; order is authoritative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryTable {
    pub protocol: Protocol,
    pub entries: Vec<PhaseBoundary>,
}

impl BoundaryTable {
    pub fn new(protocol: Protocol, entries: Vec<PhaseBoundary>) -> Self {
        Self { protocol, entries }
    }

    /// End of the last-ending boundary, i.e. the session duration
    pub fn session_end(&self) -> Option<f64> {
        self.entries.iter().map(|b| b.end).reduce(f64::max)
    }
}

/// Stimulus-aligned window for one trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialWindow {
    /// 1-based trial number
    pub trial_index: usize,
    /// Stimulus onset (boundary start) in session seconds
    pub onset: f64,
    /// Offset of the window start relative to onset
    pub window_start: f64,
    /// Offset of the window end relative to onset
    pub window_end: f64,
}

impl TrialWindow {
    /// Inclusive on both ends, in session seconds
    pub fn contains(&self, t: f64) -> bool {
        self.onset + self.window_start <= t && t <= self.onset + self.window_end
    }
}
