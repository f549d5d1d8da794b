//! Phase-boundary reference tables
//!
//! High-resolution sessions are labeled from a table of `{phase, start,
//! end}` intervals, one table per protocol. The tables live either in a
//! YAML file keyed by protocol:
//!
//! ```yaml
//! train:
//!   - { phase: baseline, start: 0, end: 120 }
//!   - { phase: tone-1, start: 120, end: 140 }
//! tone:
//!   - { phase: baseline, start: 0, end: 120 }
//! ```
//!
//! or in a CSV file with `phase,start,end` columns holding a single table.

use crate::error::{FearDataError, Result};
use crate::types::{BoundaryTable, PhaseBoundary, Protocol};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Boundary tables for every protocol in one file
#[derive(Debug, Clone, Default)]
pub struct BoundaryStore {
    tables: HashMap<Protocol, BoundaryTable>,
}

#[derive(Debug, Deserialize)]
struct RawStore {
    #[serde(default)]
    train: Option<Vec<PhaseBoundary>>,
    #[serde(default)]
    tone: Option<Vec<PhaseBoundary>>,
}

impl BoundaryStore {
    /// Parse a YAML store
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: RawStore = serde_yaml::from_str(text)
            .map_err(|e| FearDataError::Format(format!("boundary table: {}", e)))?;

        let mut store = Self::default();
        for (protocol, entries) in [(Protocol::Train, raw.train), (Protocol::Tone, raw.tone)] {
            if let Some(entries) = entries {
                store.insert(BoundaryTable::new(protocol, entries))?;
            }
        }
        Ok(store)
    }

    /// Read a YAML store from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Add or replace a protocol's table after validating it
    pub fn insert(&mut self, table: BoundaryTable) -> Result<()> {
        validate(&table)?;
        self.tables.insert(table.protocol, table);
        Ok(())
    }

    pub fn table(&self, protocol: Protocol) -> Result<&BoundaryTable> {
        self.tables.get(&protocol).ok_or_else(|| {
            FearDataError::Format(format!(
                "no boundary table for protocol `{}`",
                protocol.as_str()
            ))
        })
    }

    /// Table for the protocol named by `session`
    pub fn for_session(&self, session: &str) -> Result<&BoundaryTable> {
        self.table(Protocol::from_session(session)?)
    }
}

/// Read a single-protocol table from CSV with `phase,start,end` headers
pub fn read_boundary_csv<R: Read>(reader: R, protocol: Protocol) -> Result<BoundaryTable> {
    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let entries = reader
        .deserialize::<PhaseBoundary>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let table = BoundaryTable::new(protocol, entries);
    validate(&table)?;
    Ok(table)
}

/// Resolve the boundary table for `session` from a YAML store or a CSV table
pub fn load_for_session(path: impl AsRef<Path>, session: &str) -> Result<BoundaryTable> {
    let path = path.as_ref();
    let protocol = Protocol::from_session(session)?;
    debug!(path = %path.display(), protocol = protocol.as_str(), "loading boundary table");

    let is_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        read_boundary_csv(fs::File::open(path)?, protocol)
    } else {
        BoundaryStore::from_path(path)?.table(protocol).cloned()
    }
}

fn validate(table: &BoundaryTable) -> Result<()> {
    if table.entries.is_empty() {
        return Err(FearDataError::Format(format!(
            "boundary table `{}` is empty",
            table.protocol.as_str()
        )));
    }

    for entry in &table.entries {
        if !entry.start.is_finite() || !entry.end.is_finite() || entry.start > entry.end {
            return Err(FearDataError::Format(format!(
                "boundary `{}` has invalid interval [{}, {}]",
                entry.phase, entry.start, entry.end
            )));
        }
    }

    Ok(())
}
