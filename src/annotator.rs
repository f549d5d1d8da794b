//! Metadata annotation
//!
//! This module fills in experimental metadata on a loaded table:
//! - Group and sex labels from configured id sets (last match wins)
//! - Coarse phases derived from component names
//! - Timestamps and epoch labels from a phase-boundary table

use crate::config::{ExperimentConfig, Membership};
use crate::error::{FearDataError, Result};
use crate::timeline::{linspace, round_to};
use crate::types::{BoundaryTable, Component, Epoch, Phase, Row, Table};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Session whose bins are numbered rather than named
pub const CONTEXT_SESSION: &str = "context";

/// Component that ends the baseline prefix
const FIRST_TONE: &str = "tone-1";

/// Decimal places kept on boundary-path timestamps
const TIMESTAMP_PLACES: i32 = 2;

/// Annotator for group, sex, phase and epoch labels
pub struct Annotator;

impl Annotator {
    /// Set Group on every row whose animal is in a configured group
    pub fn assign_groups(mut table: Table, config: &ExperimentConfig) -> Table {
        let matched = apply_membership(&mut table, config.group_ids(), |row, label| {
            row.group = Some(label.to_string())
        });
        debug!(matched, "assigned groups");
        table
    }

    /// Set Sex on member rows, only when the experiment records sex
    pub fn assign_sex(mut table: Table, config: &ExperimentConfig) -> Table {
        if !config.sex_recorded() {
            return table;
        }
        let matched = apply_membership(&mut table, config.sex_ids(), |row, label| {
            row.sex = Some(label.to_string())
        });
        debug!(matched, "assigned sex");
        table
    }

    /// Label each row with its coarse phase
    ///
    /// Context sessions get a constant `context` phase and integer bins.
    /// Other sessions lower-case their component names; the components
    /// before the first `tone-1` are baseline, then names containing `tone`
    /// or `trace` take that phase and everything else is `iti`.
    pub fn derive_phase(mut table: Table, session: &str) -> Result<Table> {
        if session.eq_ignore_ascii_case(CONTEXT_SESSION) {
            for row in table.rows_mut() {
                row.component = Component::Bin(component_bin(&row.component)?);
                row.phase = Some(Phase::Context);
            }
            return Ok(table);
        }

        for row in table.rows_mut() {
            let token = row.component.as_label().ok_or_else(|| {
                FearDataError::Format(format!(
                    "component `{}` of animal {} is not a name",
                    row.component, row.animal
                ))
            })?;
            row.component = Component::Label(token.to_lowercase());
        }

        let baseline = baseline_tokens(&table);
        for row in table.rows_mut() {
            // Lower-cased labels were set just above
            let token = row.component.as_label().unwrap_or_default();
            row.phase = Some(classify(token, &baseline));
        }

        Ok(table)
    }

    /// Replace components with session timestamps and label epochs
    ///
    /// Each animal's rows become `n` evenly spaced times from 0 to the
    /// session end (2 decimals). Epochs start as the timestamp; each
    /// boundary in order then overwrites rows inside `[start, end]`.
    pub fn label_by_boundary_table(mut table: Table, boundaries: &BoundaryTable) -> Result<Table> {
        let n = table.rows_per_animal()?;
        let session_end = boundaries.session_end().ok_or_else(|| {
            FearDataError::Format(format!(
                "boundary table `{}` is empty",
                boundaries.protocol.as_str()
            ))
        })?;

        let times: Vec<f64> = linspace(0.0, session_end, n)
            .into_iter()
            .map(|t| round_to(t, TIMESTAMP_PLACES))
            .collect();

        let mut position: HashMap<String, usize> = HashMap::new();
        for row in table.rows_mut() {
            let idx = position.entry(row.animal.clone()).or_default();
            let t = times[*idx];
            *idx += 1;

            row.component = Component::Time(t);
            row.epoch = Some(Epoch::Time(t));
            for boundary in &boundaries.entries {
                if boundary.contains(t) {
                    row.epoch = Some(Epoch::Label(boundary.phase.clone()));
                }
            }
        }

        debug!(
            samples_per_animal = n,
            session_end,
            "labeled epochs from boundary table"
        );
        Ok(table)
    }
}

/// Apply a label to member rows in mapping order, returning rows touched
fn apply_membership(
    table: &mut Table,
    membership: &Membership,
    mut set: impl FnMut(&mut Row, &str),
) -> usize {
    let mut matched = 0;
    for (label, ids) in membership {
        for row in table.rows_mut() {
            if ids.contains(&row.animal) {
                set(row, label);
                matched += 1;
            }
        }
    }
    matched
}

/// Distinct component tokens before the first `tone-1`, in table order
fn baseline_tokens(table: &Table) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut found_tone = false;

    for row in table.rows() {
        let token = row.component.to_string();
        if token == FIRST_TONE {
            found_tone = true;
            break;
        }
        tokens.insert(token);
    }

    if !found_tone && !table.is_empty() {
        warn!("no `{}` component found; every component is baseline", FIRST_TONE);
    }
    tokens
}

fn classify(token: &str, baseline: &HashSet<String>) -> Phase {
    if baseline.contains(token) {
        Phase::Baseline
    } else if token.contains("tone") {
        Phase::Tone
    } else if token.contains("trace") {
        Phase::Trace
    } else {
        Phase::Iti
    }
}

fn component_bin(component: &Component) -> Result<i64> {
    let invalid = || {
        FearDataError::Format(format!(
            "context component `{}` is not an integer bin",
            component
        ))
    };

    match component {
        Component::Bin(bin) => Ok(*bin),
        Component::Label(text) => match text.trim().parse::<i64>() {
            Ok(bin) => Ok(bin),
            Err(_) => {
                let value = text.trim().parse::<f64>().map_err(|_| invalid())?;
                if value.fract() == 0.0 && value.is_finite() {
                    Ok(value as i64)
                } else {
                    Err(invalid())
                }
            }
        },
        Component::Time(_) => Err(invalid()),
    }
}
