//! Pipeline orchestration
//!
//! This module provides the end-to-end entry points. Each one is a straight
//! line of stage calls from an experiment config and a session name to a
//! table, summary or wide export.

use crate::annotator::Annotator;
use crate::boundaries::load_for_session;
use crate::config::ExperimentConfig;
use crate::error::{FearDataError, Result};
use crate::loader::TableLoader;
use crate::reshape::{aggregate_by_phase, pivot_wide, windowed_trials};
use crate::types::{BoundaryTable, Field, Measure, PhaseSummary, Table, WideTable};
use std::path::Path;
use tracing::{debug, info};

/// Load a session and annotate it with groups, sex and phases.
///
/// Pipeline stages:
/// 1. TableLoader - Find the data header and select the canonical columns
/// 2. Annotator - Join group and sex membership
/// 3. Annotator - Derive phases from component names
///
/// # Example
/// ```ignore
/// let config = ExperimentConfig::from_path("expt_config.yaml")?;
/// let table = clean_session(&config, "train")?;
/// ```
pub fn clean_session(config: &ExperimentConfig, session: &str) -> Result<Table> {
    let table = load_annotated(config, session)?;

    // Stage 3: Phase labels
    let table = Annotator::derive_phase(table, session)?;

    info!(session, rows = table.len(), "cleaned session");
    Ok(table)
}

/// Per-animal phase means of a cleaned session
///
/// `extra_group_key` adds Group or Sex to the grouping.
pub fn phase_totals(
    config: &ExperimentConfig,
    session: &str,
    extra_group_key: Option<Field>,
) -> Result<Vec<PhaseSummary>> {
    let table = clean_session(config, session)?;
    let summaries = aggregate_by_phase(&table, extra_group_key)?;
    debug!(session, summaries = summaries.len(), "computed phase totals");
    Ok(summaries)
}

/// Wide freezing table keyed by Animal and Group, one column per value of
/// `pivot_column` (components by default in the CLI)
pub fn prism_export(
    config: &ExperimentConfig,
    session: &str,
    pivot_column: Field,
) -> Result<WideTable> {
    let table = clean_session(config, session)?;
    let wide = pivot_wide(
        table.rows(),
        Measure::PctFreeze,
        &[Field::Animal, Field::Group],
        pivot_column,
    )?;
    debug!(
        session,
        rows = wide.rows.len(),
        columns = wide.columns.len(),
        "built wide export"
    );
    Ok(wide)
}

/// Load a session and label it from its protocol's boundary table.
///
/// The boundary file is `boundary_file` when given, else the one named in
/// the config.
pub fn label_session(
    config: &ExperimentConfig,
    session: &str,
    boundary_file: Option<&Path>,
) -> Result<Table> {
    let boundaries = resolve_boundaries(config, session, boundary_file)?;
    label_with(config, session, &boundaries)
}

/// Label a session, then cut it into stimulus-aligned trial windows
pub fn trial_session(
    config: &ExperimentConfig,
    session: &str,
    boundary_file: Option<&Path>,
    stimulus_label_pattern: &str,
    window_start: f64,
    window_end: f64,
) -> Result<Table> {
    let boundaries = resolve_boundaries(config, session, boundary_file)?;
    let labeled = label_with(config, session, &boundaries)?;

    let trials = windowed_trials(
        &labeled,
        &boundaries,
        stimulus_label_pattern,
        window_start,
        window_end,
    )?;

    info!(session, rows = trials.len(), "built trial windows");
    Ok(trials)
}

fn load_annotated(config: &ExperimentConfig, session: &str) -> Result<Table> {
    // Stage 1: Load the export
    let table = TableLoader::load(config, session)?;
    debug!(session, rows = table.len(), "loaded session");

    // Stage 2: Membership
    let table = Annotator::assign_groups(table, config);
    Ok(Annotator::assign_sex(table, config))
}

fn label_with(
    config: &ExperimentConfig,
    session: &str,
    boundaries: &BoundaryTable,
) -> Result<Table> {
    let table = load_annotated(config, session)?;

    // Stage 3: Timestamps and epochs
    let table = Annotator::label_by_boundary_table(table, boundaries)?;

    info!(session, rows = table.len(), "labeled session");
    Ok(table)
}

fn resolve_boundaries(
    config: &ExperimentConfig,
    session: &str,
    boundary_file: Option<&Path>,
) -> Result<BoundaryTable> {
    let path = boundary_file.or_else(|| config.boundary_file()).ok_or_else(|| {
        FearDataError::ConfigRead("no boundary_file configured".to_string())
    })?;
    load_for_session(path, session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Component, Epoch, Phase};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    const COMPONENTS: [&str; 11] = [
        "Baseline-1", "Baseline-2", "Baseline-3", "Tone-1", "Trace-1", "ITI-1", "Tone-2",
        "Trace-2", "ITI-2", "Tone-3", "Trace-3",
    ];

    const BOUNDARIES: &str = r#"
train:
  - { phase: baseline, start: 0, end: 40 }
  - { phase: tone-1, start: 40, end: 60 }
  - { phase: trace-1, start: 60, end: 80 }
  - { phase: iti-1, start: 80, end: 100 }
"#;

    fn export(components: &[&str]) -> String {
        let mut text = String::from(
            "VideoFreeze Export,,\n,,\nExperiment,Animal,Group,Component Name,Pct Component Time Freezing,Avg Motion Index\n",
        );
        for animal in ["1", "2"] {
            for (i, component) in components.iter().enumerate() {
                let freeze = if animal == "1" { 0.0 } else { i as f64 * 10.0 };
                text.push_str(&format!("FC,{},,{},{},100\n", animal, component, freeze));
            }
        }
        text
    }

    fn fixture(with_boundaries: bool) -> (TempDir, ExperimentConfig) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("raw")).unwrap();
        fs::write(dir.path().join("raw/train.csv"), export(&COMPONENTS)).unwrap();
        fs::write(dir.path().join("phases.yaml"), BOUNDARIES).unwrap();

        let mut yaml = String::from(
            "sessions: [train]\nraw_data: true\nraw_data_path: raw\nproc_data_path: proc\ntrain_file: train.csv\ngroup_ids:\n  control: [1]\n  shock: [2]\nsex: false\n",
        );
        if with_boundaries {
            yaml.push_str("boundary_file: phases.yaml\n");
        }
        let path = dir.path().join("expt_config.yaml");
        fs::write(&path, yaml).unwrap();

        let config = ExperimentConfig::from_path(&path).unwrap();
        (dir, config)
    }

    #[test]
    fn test_clean_session() {
        let (_dir, config) = fixture(false);
        let table = clean_session(&config, "Train").unwrap();

        assert_eq!(table.len(), 22);
        let first = &table.rows()[0];
        assert_eq!(first.group.as_deref(), Some("control"));
        assert_eq!(first.sex, None);
        assert_eq!(first.phase, Some(Phase::Baseline));
        assert_eq!(first.component, Component::Label("baseline-1".to_string()));

        let phases: Vec<Phase> = table.rows()[..6].iter().filter_map(|r| r.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Baseline,
                Phase::Baseline,
                Phase::Baseline,
                Phase::Tone,
                Phase::Trace,
                Phase::Iti
            ]
        );
    }

    #[test]
    fn test_unknown_session() {
        let (_dir, config) = fixture(false);
        let err = clean_session(&config, "extinction").unwrap_err();
        assert!(matches!(err, FearDataError::InvalidSession(_)));
    }

    #[test]
    fn test_phase_totals() {
        let (_dir, config) = fixture(false);
        let summaries = phase_totals(&config, "train", Some(Field::Group)).unwrap();

        assert_eq!(summaries.len(), 8);
        let baseline_2 = summaries
            .iter()
            .find(|s| s.animal == "2" && s.phase == Phase::Baseline)
            .unwrap();
        assert_eq!(baseline_2.group.as_deref(), Some("shock"));
        assert_eq!(baseline_2.pct_freeze, Some(10.0));
    }

    #[test]
    fn test_prism_export() {
        let (_dir, config) = fixture(false);
        let wide = prism_export(&config, "train", Field::Component).unwrap();

        assert_eq!(wide.columns.len(), 11);
        assert_eq!(wide.columns[3], "tone-1");
        assert_eq!(wide.rows.len(), 2);
        assert_eq!(wide.rows[0].keys, vec!["1", "control"]);
        assert_eq!(wide.rows[1].values[3], Some(30.0));
    }

    #[test]
    fn test_label_session_from_config() {
        let (_dir, config) = fixture(true);
        let table = label_session(&config, "train", None).unwrap();

        let row = &table.rows()[4];
        assert_eq!(row.component, Component::Time(40.0));
        assert_eq!(row.epoch, Some(Epoch::Label("tone-1".to_string())));
    }

    #[test]
    fn test_label_session_needs_boundaries() {
        let (_dir, config) = fixture(false);
        let err = label_session(&config, "train", None).unwrap_err();
        assert!(matches!(err, FearDataError::ConfigRead(_)));
    }

    #[test]
    fn test_trial_session() {
        let (dir, config) = fixture(false);
        let boundaries = dir.path().join("phases.yaml");
        let trials =
            trial_session(&config, "train", Some(&boundaries), "tone", -20.0, 20.0).unwrap();

        assert_eq!(trials.len(), 10);
        let times: Vec<f64> = trials.rows()[..5].iter().filter_map(|r| r.trial_time).collect();
        assert_eq!(times, vec![-20.0, -10.0, 0.0, 10.0, 20.0]);
        assert!(trials.rows().iter().all(|r| r.trial == Some(1)));
        assert_eq!(trials.rows()[5].animal, "2");
    }
}
