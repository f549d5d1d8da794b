//! Fear Data - Normalization and reshaping of fear-conditioning exports
//!
//! Turns VideoFreeze session exports (freezing and motion per animal per
//! time bin) into a canonical long-format table through a straight-line
//! pipeline: export loading → group/sex membership → phase or epoch
//! labeling → reshaping for plots or statistical software.
//!
//! ## Modules
//!
//! - **Loading**: Experiment config, session exports and phase-boundary tables
//! - **Annotation**: Group, sex, phase and epoch labels
//! - **Reshaping**: Phase means, wide tables and stimulus-aligned trials
//! - **Output**: CSV/JSON export and chart specifications

pub mod annotator;
pub mod boundaries;
pub mod config;
pub mod error;
pub mod export;
pub mod loader;
pub mod pipeline;
pub mod reshape;
pub mod timeline;
pub mod types;
pub mod viz;

pub use annotator::Annotator;
pub use boundaries::BoundaryStore;
pub use config::ExperimentConfig;
pub use error::{FearDataError, Result};
pub use loader::TableLoader;
pub use pipeline::{clean_session, label_session, phase_totals, prism_export, trial_session};
pub use types::{Component, Epoch, Field, Measure, Phase, PhaseSummary, Row, Table, WideTable};

/// Crate version embedded in JSON output
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for JSON output
pub const PRODUCER_NAME: &str = "fear-data";
