//! Experiment descriptor
//!
//! The experiment config is a YAML file naming the data directories, the
//! export file for each session, and group/sex membership of the animals.
//! It is loaded once and never mutated.
//!
//! ```yaml
//! sessions: [train, tone, context]
//! raw_data: true
//! raw_data_path: data/raw
//! proc_data_path: data/processed
//! train_file: train.csv
//! tone_file: tone.csv
//! context_file: context.csv
//! group_ids:
//!   control: [1, 2, 3]
//!   experimental: [4, 5, 6]
//! sex: true
//! sex_ids:
//!   F: [1, 4]
//!   M: [2, 3, 5, 6]
//! ```

use crate::error::{FearDataError, Result};
use crate::loader::animal_id_from_number;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ordered label → animal-id-set membership (mapping order is significant)
pub type Membership = Vec<(String, BTreeSet<String>)>;

/// Shape of the YAML document before validation
#[derive(Debug, Deserialize)]
struct RawConfig {
    sessions: Vec<String>,
    raw_data: bool,
    #[serde(default)]
    raw_data_path: Option<String>,
    #[serde(default)]
    proc_data_path: Option<String>,
    #[serde(default)]
    group_ids: Mapping,
    #[serde(default)]
    sex: bool,
    #[serde(default)]
    sex_ids: Mapping,
    #[serde(default)]
    fig_path: Option<String>,
    #[serde(default)]
    boundary_file: Option<String>,
    /// Per-session `{session}_file` keys and anything else
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Immutable experiment descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    sessions: Vec<String>,
    raw_data: bool,
    data_dir: PathBuf,
    session_files: BTreeMap<String, String>,
    group_ids: Membership,
    sex_recorded: bool,
    sex_ids: Membership,
    fig_path: Option<PathBuf>,
    boundary_file: Option<PathBuf>,
}

impl ExperimentConfig {
    /// Load and validate the descriptor at `path`.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            FearDataError::ConfigRead(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse(&text, base)
    }

    /// Parse a descriptor from YAML text; paths are taken as written
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Self::parse(text, Path::new(""))
    }

    fn parse(text: &str, base: &Path) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)
            .map_err(|e| FearDataError::ConfigRead(format!("malformed YAML: {}", e)))?;

        let sessions: Vec<String> = raw.sessions.iter().map(|s| s.to_lowercase()).collect();
        if sessions.is_empty() {
            return Err(FearDataError::ConfigRead(
                "`sessions` must list at least one session".to_string(),
            ));
        }

        let (data_key, data_path) = if raw.raw_data {
            ("raw_data_path", raw.raw_data_path)
        } else {
            ("proc_data_path", raw.proc_data_path)
        };
        let data_path = data_path.ok_or_else(|| {
            FearDataError::ConfigRead(format!(
                "missing `{}` (selected by raw_data: {})",
                data_key, raw.raw_data
            ))
        })?;

        let mut session_files = BTreeMap::new();
        for session in &sessions {
            let key = format!("{}_file", session);
            let file = match raw.extra.get(&key) {
                Some(Value::String(file)) => file.clone(),
                Some(_) => {
                    return Err(FearDataError::ConfigRead(format!(
                        "`{}` must be a file name",
                        key
                    )))
                }
                None => {
                    return Err(FearDataError::ConfigRead(format!(
                        "missing `{}` for session `{}`",
                        key, session
                    )))
                }
            };
            session_files.insert(session.clone(), file);
        }

        let group_ids = parse_membership("group_ids", &raw.group_ids)?;
        let sex_ids = parse_membership("sex_ids", &raw.sex_ids)?;
        if raw.sex && sex_ids.is_empty() {
            return Err(FearDataError::ConfigRead(
                "`sex` is true but `sex_ids` is empty".to_string(),
            ));
        }

        let config = Self {
            sessions,
            raw_data: raw.raw_data,
            data_dir: base.join(data_path),
            session_files,
            group_ids,
            sex_recorded: raw.sex,
            sex_ids,
            fig_path: raw.fig_path.map(|p| base.join(p)),
            boundary_file: raw.boundary_file.map(|p| base.join(p)),
        };

        debug!(
            sessions = ?config.sessions,
            groups = config.group_ids.len(),
            data_dir = %config.data_dir.display(),
            "loaded experiment config"
        );

        Ok(config)
    }

    /// Valid session names, lower-case
    pub fn sessions(&self) -> &[String] {
        &self.sessions
    }

    /// Case-insensitive session membership
    pub fn has_session(&self, session: &str) -> bool {
        let session = session.to_lowercase();
        self.sessions.iter().any(|s| *s == session)
    }

    /// Whether exports are read from the raw (vs processed) data directory
    pub fn raw_data(&self) -> bool {
        self.raw_data
    }

    /// Directory selected by the raw/processed flag
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Full path of a session's export file
    pub fn session_path(&self, session: &str) -> Result<PathBuf> {
        let session = session.to_lowercase();
        self.session_files
            .get(&session)
            .map(|file| self.data_dir.join(file))
            .ok_or(FearDataError::InvalidSession(session))
    }

    pub fn group_ids(&self) -> &Membership {
        &self.group_ids
    }

    pub fn sex_recorded(&self) -> bool {
        self.sex_recorded
    }

    pub fn sex_ids(&self) -> &Membership {
        &self.sex_ids
    }

    /// Default directory for saved figures
    pub fn fig_path(&self) -> Option<&Path> {
        self.fig_path.as_deref()
    }

    /// Phase-boundary table file, if configured
    pub fn boundary_file(&self) -> Option<&Path> {
        self.boundary_file.as_deref()
    }
}

fn parse_membership(key: &str, mapping: &Mapping) -> Result<Membership> {
    let mut membership = Vec::with_capacity(mapping.len());

    for (label, ids) in mapping {
        let label = scalar_text(label).ok_or_else(|| {
            FearDataError::ConfigRead(format!("`{}` labels must be scalars", key))
        })?;
        let ids = match ids {
            Value::Sequence(ids) => ids,
            Value::Null => {
                membership.push((label, BTreeSet::new()));
                continue;
            }
            _ => {
                return Err(FearDataError::ConfigRead(format!(
                    "`{}.{}` must be a list of animal ids",
                    key, label
                )))
            }
        };

        let mut set = BTreeSet::new();
        for id in ids {
            let id = animal_id(id).ok_or_else(|| {
                FearDataError::ConfigRead(format!("`{}.{}` contains a non-scalar id", key, label))
            })?;
            set.insert(id);
        }
        membership.push((label, set));
    }

    Ok(membership)
}

/// Animal ids follow the loader's rule: numbers truncate to integers
fn animal_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i.to_string()),
            None => n.as_f64().map(animal_id_from_number),
        },
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
