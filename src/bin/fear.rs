//! Fear CLI - Command-line interface for fear-data
//!
//! Commands:
//! - clean: Load a session and label groups, sex and phases
//! - phases: Per-animal phase means
//! - export: Wide table for statistical software
//! - label: Timestamp and epoch labels from a boundary table
//! - trials: Stimulus-aligned trial windows
//! - chart: Chart specification for a renderer
//! - doctor: Diagnose config, data files and boundary tables

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use fear_data::boundaries::load_for_session;
use fear_data::export::{to_json_envelope, write_summary_csv, write_table_csv, write_wide_csv};
use fear_data::reshape::{DEFAULT_STIMULUS_PATTERN, DEFAULT_WINDOW};
use fear_data::viz::{BinChartSpec, FigureOptions, PhaseChartKind, PhaseChartSpec};
use fear_data::{
    clean_session, label_session, phase_totals, prism_export, trial_session, ExperimentConfig,
    FearDataError, Field, Measure, PhaseSummary, Table, WideTable, PRODUCER_NAME, VERSION,
};

/// Fear - Normalize and reshape fear-conditioning session exports
#[derive(Parser)]
#[command(name = "fear")]
#[command(version = VERSION)]
#[command(about = "Normalize and reshape fear-conditioning data", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SessionArgs {
    /// Experiment config (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Session name listed in the config
    #[arg(short, long)]
    session: String,

    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Output format [default: csv, or json for charts]
    #[arg(long)]
    format: Option<OutputFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a session and label groups, sex and phases
    Clean {
        #[command(flatten)]
        args: SessionArgs,
    },

    /// Per-animal phase means
    Phases {
        #[command(flatten)]
        args: SessionArgs,

        /// Also group by this label
        #[arg(long)]
        by: Option<GroupKey>,
    },

    /// Wide freezing table keyed by animal and group
    Export {
        #[command(flatten)]
        args: SessionArgs,

        /// Column spread across the wide table
        #[arg(long, default_value = "component")]
        pivot: PivotColumn,
    },

    /// Replace components with timestamps and label epochs
    Label {
        #[command(flatten)]
        args: SessionArgs,

        /// Boundary table file (defaults to boundary_file in the config)
        #[arg(long)]
        boundaries: Option<PathBuf>,
    },

    /// Cut a labeled session into stimulus-aligned trials
    Trials {
        #[command(flatten)]
        args: SessionArgs,

        /// Boundary table file (defaults to boundary_file in the config)
        #[arg(long)]
        boundaries: Option<PathBuf>,

        /// Boundary label fragment marking a stimulus
        #[arg(long, default_value = DEFAULT_STIMULUS_PATTERN)]
        pattern: String,

        /// Window start relative to stimulus onset, in seconds
        #[arg(long, default_value_t = DEFAULT_WINDOW.0, allow_hyphen_values = true)]
        window_start: f64,

        /// Window end relative to stimulus onset, in seconds
        #[arg(long, default_value_t = DEFAULT_WINDOW.1, allow_hyphen_values = true)]
        window_end: f64,
    },

    /// Emit a chart specification as JSON
    Chart {
        #[command(flatten)]
        args: SessionArgs,

        /// Chart to build
        #[arg(long, default_value = "bins")]
        kind: ChartKind,

        /// Split series by this label
        #[arg(long)]
        hue: Option<GroupKey>,

        /// Plot motion instead of freezing
        #[arg(long)]
        motion: bool,

        /// Save the figure under this name
        #[arg(long)]
        save: Option<String>,

        /// Figure directory (defaults to fig_path in the config)
        #[arg(long)]
        fig_path: Option<PathBuf>,
    },

    /// Diagnose config, data files and boundary tables
    Doctor {
        /// Experiment config to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values with a header row
    Csv,
    /// JSON envelope with provenance
    Json,
    /// Pretty-printed JSON envelope
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum GroupKey {
    Group,
    Sex,
}

impl From<GroupKey> for Field {
    fn from(key: GroupKey) -> Self {
        match key {
            GroupKey::Group => Field::Group,
            GroupKey::Sex => Field::Sex,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PivotColumn {
    Component,
    Phase,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChartKind {
    /// Point plot across component bins
    Bins,
    /// Bar plot of phase means with individual animals
    PhaseBar,
    /// Point plot of phase means
    PhasePoint,
}

/// Data produced by one command
enum Output<'a> {
    Table(&'a Table),
    Summaries(&'a [PhaseSummary]),
    Wide(&'a WideTable),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), FearCliError> {
    match cli.command {
        Commands::Clean { args } => {
            let config = ExperimentConfig::from_path(&args.config)?;
            let table = clean_session(&config, &args.session)?;
            emit(&args, Output::Table(&table))
        }

        Commands::Phases { args, by } => {
            let config = ExperimentConfig::from_path(&args.config)?;
            let summaries = phase_totals(&config, &args.session, by.map(Field::from))?;
            emit(&args, Output::Summaries(&summaries))
        }

        Commands::Export { args, pivot } => {
            let config = ExperimentConfig::from_path(&args.config)?;
            let pivot_column = match pivot {
                PivotColumn::Component => Field::Component,
                PivotColumn::Phase => Field::Phase,
            };
            let wide = prism_export(&config, &args.session, pivot_column)?;
            emit(&args, Output::Wide(&wide))
        }

        Commands::Label { args, boundaries } => {
            let config = ExperimentConfig::from_path(&args.config)?;
            let table = label_session(&config, &args.session, boundaries.as_deref())?;
            emit(&args, Output::Table(&table))
        }

        Commands::Trials {
            args,
            boundaries,
            pattern,
            window_start,
            window_end,
        } => {
            let config = ExperimentConfig::from_path(&args.config)?;
            let table = trial_session(
                &config,
                &args.session,
                boundaries.as_deref(),
                &pattern,
                window_start,
                window_end,
            )?;
            emit(&args, Output::Table(&table))
        }

        Commands::Chart {
            args,
            kind,
            hue,
            motion,
            save,
            fig_path,
        } => cmd_chart(&args, kind, hue.map(Field::from), motion, save, fig_path),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_chart(
    args: &SessionArgs,
    kind: ChartKind,
    hue: Option<Field>,
    motion: bool,
    save: Option<String>,
    fig_path: Option<PathBuf>,
) -> Result<(), FearCliError> {
    let pretty = match args.format.unwrap_or(OutputFormat::Json) {
        OutputFormat::Csv => {
            return Err(FearCliError::Unsupported(
                "charts are emitted as JSON".to_string(),
            ))
        }
        OutputFormat::Json => false,
        OutputFormat::JsonPretty => true,
    };

    let config = ExperimentConfig::from_path(&args.config)?;
    let table = clean_session(&config, &args.session)?;
    let measure = if motion {
        Measure::AvgMotion
    } else {
        Measure::PctFreeze
    };

    let mut figure = match save {
        Some(name) => FigureOptions::saved_as(name),
        None => FigureOptions::default(),
    };
    figure.path = fig_path.or_else(|| config.fig_path().map(Path::to_path_buf));

    let json = match kind {
        ChartKind::Bins => {
            let chart = BinChartSpec::from_table(&table, &args.session, measure, hue, figure);
            to_json_envelope(&args.session, &chart, pretty)?
        }
        ChartKind::PhaseBar | ChartKind::PhasePoint => {
            let phase_kind = match kind {
                ChartKind::PhasePoint => PhaseChartKind::Point,
                _ => PhaseChartKind::Bar,
            };
            let chart = PhaseChartSpec::from_table(&table, phase_kind, measure, hue, figure)?;
            to_json_envelope(&args.session, &chart, pretty)?
        }
    };

    let mut out = open_output(&args.output)?;
    writeln!(out, "{}", json)?;
    out.flush()?;
    Ok(())
}

fn emit(args: &SessionArgs, output: Output<'_>) -> Result<(), FearCliError> {
    let mut out = open_output(&args.output)?;

    let format = args.format.unwrap_or(OutputFormat::Csv);
    match format {
        OutputFormat::Csv => match output {
            Output::Table(table) => write_table_csv(table, &mut out)?,
            Output::Summaries(summaries) => write_summary_csv(summaries, &mut out)?,
            Output::Wide(wide) => write_wide_csv(wide, &mut out)?,
        },
        OutputFormat::Json | OutputFormat::JsonPretty => {
            let pretty = matches!(format, OutputFormat::JsonPretty);
            let json = match output {
                Output::Table(table) => to_json_envelope(&args.session, table, pretty)?,
                Output::Summaries(summaries) => to_json_envelope(&args.session, summaries, pretty)?,
                Output::Wide(wide) => to_json_envelope(&args.session, wide, pretty)?,
            };
            writeln!(out, "{}", json)?;
        }
    }

    out.flush()?;
    Ok(())
}

fn open_output(path: &Path) -> Result<Box<dyn Write>, FearCliError> {
    if path.to_string_lossy() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        Ok(Box::new(io::BufWriter::new(fs::File::create(path)?)))
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), FearCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "fear_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("fear-data version {}", VERSION),
    });

    if let Some(path) = config_path {
        match ExperimentConfig::from_path(path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid ({} sessions, {} groups, sex recorded: {})",
                        config.sessions().len(),
                        config.group_ids().len(),
                        config.sex_recorded()
                    ),
                });
                check_sessions(&config, &mut checks);
                check_boundaries(&config, &mut checks);
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
            }
        }
    } else {
        checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "No config given (use --config)".to_string(),
        });
    }

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        "stdout is a TTY (use --output to write a file)"
    } else {
        "stdout is a pipe"
    };
    checks.push(DoctorCheck {
        name: "stdout".to_string(),
        status: CheckStatus::Ok,
        message: stdout_check.to_string(),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Fear Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FearCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_sessions(config: &ExperimentConfig, checks: &mut Vec<DoctorCheck>) {
    for session in config.sessions() {
        let check = match config.session_path(session) {
            Ok(path) if path.is_file() => DoctorCheck {
                name: format!("session:{}", session),
                status: CheckStatus::Ok,
                message: path.display().to_string(),
            },
            Ok(path) => DoctorCheck {
                name: format!("session:{}", session),
                status: CheckStatus::Warning,
                message: format!("Export not found at {}", path.display()),
            },
            Err(e) => DoctorCheck {
                name: format!("session:{}", session),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        };
        checks.push(check);
    }
}

fn check_boundaries(config: &ExperimentConfig, checks: &mut Vec<DoctorCheck>) {
    let Some(path) = config.boundary_file() else {
        return;
    };

    if !path.exists() {
        checks.push(DoctorCheck {
            name: "boundaries".to_string(),
            status: CheckStatus::Warning,
            message: format!("Boundary file does not exist: {}", path.display()),
        });
        return;
    }

    for protocol in ["train", "tone"] {
        let check = match load_for_session(path, protocol) {
            Ok(table) => DoctorCheck {
                name: format!("boundaries:{}", protocol),
                status: CheckStatus::Ok,
                message: format!("{} boundaries", table.entries.len()),
            },
            Err(e) => DoctorCheck {
                name: format!("boundaries:{}", protocol),
                status: CheckStatus::Warning,
                message: e.to_string(),
            },
        };
        checks.push(check);
    }
}

// Error types

#[derive(Debug)]
enum FearCliError {
    Io(io::Error),
    Data(FearDataError),
    Json(serde_json::Error),
    Unsupported(String),
    DoctorFailed,
}

impl From<io::Error> for FearCliError {
    fn from(e: io::Error) -> Self {
        FearCliError::Io(e)
    }
}

impl From<FearDataError> for FearCliError {
    fn from(e: FearDataError) -> Self {
        FearCliError::Data(e)
    }
}

impl From<serde_json::Error> for FearCliError {
    fn from(e: serde_json::Error) -> Self {
        FearCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FearCliError> for CliError {
    fn from(e: FearCliError) -> Self {
        match e {
            FearCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FearCliError::Data(e) => data_error(e),
            FearCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FearCliError::Unsupported(msg) => CliError {
                code: "UNSUPPORTED".to_string(),
                message: msg,
                hint: Some("Use --format json or json-pretty".to_string()),
            },
            FearCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

fn data_error(e: FearDataError) -> CliError {
    let (code, hint) = match &e {
        FearDataError::ConfigRead(_) => ("CONFIG_ERROR", Some("Run 'fear doctor --config <path>'")),
        FearDataError::InvalidSession(_) => {
            ("INVALID_SESSION", Some("Use a session listed under `sessions` in the config"))
        }
        FearDataError::Format(_) | FearDataError::Csv(_) => {
            ("FORMAT_ERROR", Some("Check the export and boundary table layout"))
        }
        FearDataError::EmptyWindow(_) => {
            ("EMPTY_WINDOW", Some("Widen the window or check the boundary onsets"))
        }
        FearDataError::NonUniform(_) => {
            ("NON_UNIFORM", Some("Every animal needs the same number of bins"))
        }
        FearDataError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
        FearDataError::Json(_) => ("JSON_ERROR", None),
    };

    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: hint.map(str::to_string),
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
