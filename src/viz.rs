//! Chart specifications
//!
//! The crate does not draw. It describes what a renderer should draw: the
//! categories on the x axis, shaded stimulus spans, shock markers, minute
//! ticks and the mean/SEM points per hue level. Styling and saving are
//! explicit option objects carried alongside the chart.

use crate::annotator::CONTEXT_SESSION;
use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::reshape::aggregate_by_phase;
use crate::types::{Field, Measure, PhaseSummary, Record, Table};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Default color cycle: blue, red, orange, green, purple, cyan, salmon,
/// yellow, gray
pub const PALETTE: [&str; 9] = [
    "#2b88f0", "#FF0036", "#EF862E", "#28A649", "#9147B1", "#00B9B9", "#F97B7B", "#FFD85B",
    "#bdbdbd",
];

/// Fill color of the shock marker
pub const SHOCK_COLOR: &str = "#ffb200";

/// Fill color and alpha of a stimulus span
pub const TONE_SPAN_COLOR: &str = "grey";
pub const TONE_SPAN_ALPHA: f64 = 0.15;

pub const FREEZING_AXIS_LABEL: &str = "Freezing (%)";
pub const MINUTES_AXIS_LABEL: &str = "Time (mins)";

/// Bins per minute on the x axis of a bin chart
const BINS_PER_MINUTE: usize = 3;

/// Width of a shock marker in category units
const SHOCK_WIDTH: f64 = 0.15;

/// Text and legend styling applied after drawing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleOptions {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub xlim: Option<(f64, f64)>,
    pub ylim: Option<(f64, f64)>,
    pub title_fontsize: f64,
    pub label_size: f64,
    pub labelpad: f64,
    pub tick_labelsize: f64,
    pub legend_size: f64,
    pub legend_loc: String,
    pub markerscale: f64,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            title: None,
            xlabel: None,
            ylabel: None,
            xlim: None,
            ylim: None,
            title_fontsize: 40.0,
            label_size: 36.0,
            labelpad: 5.0,
            tick_labelsize: 32.0,
            legend_size: 18.0,
            legend_loc: "best".to_string(),
            markerscale: 1.0,
        }
    }
}

/// Figure size, styling and where (if anywhere) to save it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureOptions {
    pub save: bool,
    /// Output directory; falls back to the configured figure directory
    pub path: Option<PathBuf>,
    pub name: String,
    /// Width and height in inches
    pub size: (f64, f64),
    pub style: StyleOptions,
}

impl Default for FigureOptions {
    fn default() -> Self {
        Self {
            save: false,
            path: None,
            name: "figure".to_string(),
            size: (16.0, 10.0),
            style: StyleOptions::default(),
        }
    }
}

impl FigureOptions {
    pub fn saved_as(name: impl Into<String>) -> Self {
        Self {
            save: true,
            name: name.into(),
            ..Self::default()
        }
    }

    /// File to write, or `None` when the figure is not saved
    ///
    /// A name without an extension gets `.png`.
    pub fn output_path(&self, config: Option<&ExperimentConfig>) -> Option<PathBuf> {
        if !self.save {
            return None;
        }

        let mut file = PathBuf::from(&self.name);
        if file.extension().is_none() {
            file.set_extension("png");
        }

        let dir = self
            .path
            .clone()
            .or_else(|| config.and_then(|c| c.fig_path()).map(PathBuf::from));

        Some(match dir {
            Some(dir) => dir.join(file),
            None => file,
        })
    }
}

/// Horizontal extent in category units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Category index
    pub position: usize,
    pub label: String,
}

/// Mean and standard error of one category for one hue level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointStat {
    pub category: String,
    pub n: usize,
    pub mean: Option<f64>,
    /// Undefined below two observations
    pub sem: Option<f64>,
    /// Individual observations, drawn as a swarm on phase charts
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Hue level, `None` for a single-series chart
    pub hue: Option<String>,
    pub points: Vec<PointStat>,
}

/// Point plot of a measurement across the component bins of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinChartSpec {
    pub session: String,
    pub measure: Measure,
    pub hue: Option<Field>,
    /// Component labels in first-seen order
    pub categories: Vec<String>,
    /// Shaded `[i - 0.5, i + 0.5]` spans over stimulus bins
    pub tone_spans: Vec<Span>,
    /// Narrow markers at the end of each trace bin (train sessions only)
    pub shock_marks: Vec<Span>,
    /// Minute ticks replacing the component labels
    pub ticks: Vec<Tick>,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
    pub figure: FigureOptions,
}

impl BinChartSpec {
    pub fn from_table(
        table: &Table,
        session: &str,
        measure: Measure,
        hue: Option<Field>,
        figure: FigureOptions,
    ) -> Self {
        let categories = distinct_labels(table.rows(), Field::Component);
        let lower: Vec<String> = categories.iter().map(|c| c.to_lowercase()).collect();
        let is_context = session.eq_ignore_ascii_case(CONTEXT_SESSION);

        let tone_spans = if is_context {
            Vec::new()
        } else {
            positions(&lower, "tone-")
                .map(|i| Span {
                    start: i as f64 - 0.5,
                    end: i as f64 + 0.5,
                })
                .collect()
        };

        let shock_marks = if session.eq_ignore_ascii_case("train") {
            positions(&lower, "trace-")
                .map(|i| Span {
                    start: i as f64 + 0.5,
                    end: i as f64 + 0.5 + SHOCK_WIDTH,
                })
                .collect()
        } else {
            Vec::new()
        };

        let ticks = if is_context {
            Vec::new()
        } else {
            minute_ticks(categories.len())
        };

        let series = build_series(table.rows(), &categories, Field::Component, measure, hue);
        debug!(
            session,
            categories = categories.len(),
            series = series.len(),
            "built bin chart"
        );

        Self {
            session: session.to_string(),
            measure,
            hue,
            categories,
            tone_spans,
            shock_marks,
            ticks,
            x_label: MINUTES_AXIS_LABEL.to_string(),
            y_label: FREEZING_AXIS_LABEL.to_string(),
            series,
            figure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseChartKind {
    Bar,
    Point,
}

/// Per-phase summary chart over per-animal phase means
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChartSpec {
    pub kind: PhaseChartKind,
    pub measure: Measure,
    pub hue: Option<Field>,
    /// Phases in first-seen order
    pub categories: Vec<String>,
    /// Overlay individual animals; never set for point charts
    pub show_points: bool,
    pub y_label: String,
    pub series: Vec<Series>,
    pub figure: FigureOptions,
}

impl PhaseChartSpec {
    pub fn from_summaries(
        summaries: &[PhaseSummary],
        kind: PhaseChartKind,
        measure: Measure,
        hue: Option<Field>,
        figure: FigureOptions,
    ) -> Self {
        let categories = distinct_labels(summaries, Field::Phase);
        let series = build_series(summaries, &categories, Field::Phase, measure, hue);

        Self {
            kind,
            measure,
            hue,
            categories,
            show_points: kind == PhaseChartKind::Bar,
            y_label: FREEZING_AXIS_LABEL.to_string(),
            series,
            figure,
        }
    }

    /// Aggregate a phase-labeled table per animal, then chart it
    pub fn from_table(
        table: &Table,
        kind: PhaseChartKind,
        measure: Measure,
        hue: Option<Field>,
        figure: FigureOptions,
    ) -> Result<Self> {
        let summaries = aggregate_by_phase(table, hue)?;
        Ok(Self::from_summaries(&summaries, kind, measure, hue, figure))
    }
}

/// Tick at every third bin, labeled by minute
pub fn minute_ticks(bins: usize) -> Vec<Tick> {
    (0..bins)
        .filter(|i| (i + 1) % BINS_PER_MINUTE == 0)
        .enumerate()
        .map(|(minute, position)| Tick {
            position,
            label: (minute + 1).to_string(),
        })
        .collect()
}

/// Sample mean and standard error of the mean
pub fn mean_sem(values: &[f64]) -> (Option<f64>, Option<f64>) {
    let n = values.len();
    if n == 0 {
        return (None, None);
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (Some(mean), None);
    }

    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (Some(mean), Some(var.sqrt() / (n as f64).sqrt()))
}

fn positions<'a>(labels: &'a [String], needle: &'a str) -> impl Iterator<Item = usize> + 'a {
    labels
        .iter()
        .enumerate()
        .filter(move |(_, label)| label.contains(needle))
        .map(|(i, _)| i)
}

fn distinct_labels<R: Record>(records: &[R], field: Field) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for label in records.iter().filter_map(|r| r.label(field)) {
        if !seen.contains(&label) {
            seen.push(label);
        }
    }
    seen
}

fn build_series<R: Record>(
    records: &[R],
    categories: &[String],
    x: Field,
    measure: Measure,
    hue: Option<Field>,
) -> Vec<Series> {
    let levels: Vec<Option<String>> = match hue {
        Some(field) => distinct_labels(records, field).into_iter().map(Some).collect(),
        None => vec![None],
    };

    levels
        .into_iter()
        .map(|level| {
            let points = categories
                .iter()
                .map(|category| {
                    let values: Vec<f64> = records
                        .iter()
                        .filter(|r| r.label(x).as_deref() == Some(category.as_str()))
                        .filter(|r| match (hue, &level) {
                            (Some(field), Some(level)) => r.label(field).as_ref() == Some(level),
                            _ => true,
                        })
                        .filter_map(|r| r.measure(measure))
                        .collect();
                    let (mean, sem) = mean_sem(&values);
                    PointStat {
                        category: category.clone(),
                        n: values.len(),
                        mean,
                        sem,
                        values,
                    }
                })
                .collect();
            Series { hue: level, points }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Component, Phase, Row};
    use pretty_assertions::assert_eq;

    fn session_table(labels: &[&str]) -> Table {
        let mut rows = Vec::new();
        for (animal, group, freeze) in [("1", "ctl", 10.0), ("2", "exp", 30.0)] {
            for label in labels {
                let mut row = Row::new(animal, Component::Label(label.to_string()))
                    .with_measures(freeze, 5.0);
                row.group = Some(group.to_string());
                rows.push(row);
            }
        }
        Table::new(rows)
    }

    #[test]
    fn test_bin_chart_train_marks() {
        let labels = ["baseline-1", "baseline-2", "tone-1", "trace-1", "iti-1", "tone-2"];
        let chart = BinChartSpec::from_table(
            &session_table(&labels),
            "train",
            Measure::PctFreeze,
            None,
            FigureOptions::default(),
        );

        assert_eq!(chart.categories.len(), 6);
        assert_eq!(
            chart.tone_spans,
            vec![Span { start: 1.5, end: 2.5 }, Span { start: 4.5, end: 5.5 }]
        );
        assert_eq!(chart.shock_marks.len(), 1);
        assert_eq!(chart.shock_marks[0].start, 3.5);
        assert!((chart.shock_marks[0].end - 3.65).abs() < 1e-9);
        assert_eq!(
            chart.ticks,
            vec![
                Tick { position: 2, label: "1".to_string() },
                Tick { position: 5, label: "2".to_string() },
            ]
        );

        let point = &chart.series[0].points[0];
        assert_eq!(point.n, 2);
        assert_eq!(point.mean, Some(20.0));
        assert!((point.sem.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_bin_chart_tone_session_has_no_shocks() {
        let chart = BinChartSpec::from_table(
            &session_table(&["baseline-1", "tone-1", "trace-1"]),
            "tone",
            Measure::PctFreeze,
            Some(Field::Group),
            FigureOptions::default(),
        );

        assert!(chart.shock_marks.is_empty());
        assert_eq!(chart.tone_spans.len(), 1);
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[1].hue.as_deref(), Some("exp"));
        assert_eq!(chart.series[1].points[0].mean, Some(30.0));
        assert_eq!(chart.series[1].points[0].sem, None);
    }

    #[test]
    fn test_bin_chart_context_plain() {
        let mut table = session_table(&["1", "2", "3"]);
        for row in table.rows_mut() {
            row.component = Component::Bin(row.component.to_string().parse().unwrap());
            row.phase = Some(Phase::Context);
        }
        let chart = BinChartSpec::from_table(
            &table,
            "Context",
            Measure::PctFreeze,
            None,
            FigureOptions::default(),
        );

        assert_eq!(chart.categories, vec!["1", "2", "3"]);
        assert!(chart.tone_spans.is_empty());
        assert!(chart.ticks.is_empty());
    }

    #[test]
    fn test_phase_chart_from_summaries() {
        let summary = |animal: &str, phase, pct| PhaseSummary {
            animal: animal.to_string(),
            sex: None,
            group: None,
            phase,
            pct_freeze: Some(pct),
            avg_motion: None,
        };
        let summaries = vec![
            summary("1", Phase::Baseline, 0.0),
            summary("1", Phase::Tone, 40.0),
            summary("2", Phase::Baseline, 4.0),
            summary("2", Phase::Tone, 60.0),
        ];

        let chart = PhaseChartSpec::from_summaries(
            &summaries,
            PhaseChartKind::Point,
            Measure::PctFreeze,
            None,
            FigureOptions::default(),
        );

        assert_eq!(chart.categories, vec!["baseline", "tone"]);
        assert!(!chart.show_points);
        assert_eq!(chart.series[0].points[1].mean, Some(50.0));
        assert_eq!(chart.series[0].points[1].values, vec![40.0, 60.0]);
    }

    #[test]
    fn test_output_path() {
        assert_eq!(FigureOptions::default().output_path(None), None);

        let mut opts = FigureOptions::saved_as("train_bins");
        assert_eq!(opts.output_path(None), Some(PathBuf::from("train_bins.png")));

        opts.path = Some(PathBuf::from("/tmp/figs"));
        assert_eq!(
            opts.output_path(None),
            Some(PathBuf::from("/tmp/figs/train_bins.png"))
        );
    }

    #[test]
    fn test_style_defaults() {
        let style = StyleOptions::default();
        assert_eq!(style.title_fontsize, 40.0);
        assert_eq!(style.tick_labelsize, 32.0);
        assert_eq!(style.legend_loc, "best");
    }

    #[test]
    fn test_mean_sem() {
        assert_eq!(mean_sem(&[]), (None, None));
        assert_eq!(mean_sem(&[3.0]), (Some(3.0), None));
        let (mean, sem) = mean_sem(&[2.0, 4.0, 6.0]);
        assert_eq!(mean, Some(4.0));
        assert!((sem.unwrap() - 2.0 / 3f64.sqrt()).abs() < 1e-12);
    }
}
