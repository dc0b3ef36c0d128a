mod load;
mod plot;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use rayon::prelude::*;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unitime::{
    AlignError, Aligner, Alignment, MethodChoice, MethodQuality, Settings, Table, TimeParamPair,
    TypeDetails,
};

use crate::plot::{render_chart_guard, ChartKind};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Align CSV time series onto a universal timeline",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify the columns of a CSV file and show the detected pairs
    Inspect(InspectArgs),
    /// Interpolate every time/parameter pair onto one timeline
    Align(AlignArgs),
    /// Compare interpolation methods for every pair
    Advise(AdviseArgs),
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// CSV file to inspect
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Print the column profile as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Settings JSON path
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct AlignArgs {
    /// CSV file to align
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Explicit pair (repeatable); pairs are detected automatically when omitted
    #[arg(long = "pair", value_name = "TIME:PARAM", value_parser = parse_pair)]
    pairs: Vec<TimeParamPair>,

    /// Timeline step in seconds (defaults to the configured step)
    #[arg(long)]
    step: Option<f64>,

    /// Interpolation method (linear|nearest|cubic|polynomial|step|auto)
    #[arg(long)]
    method: Option<String>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "aligned.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output PNG figure path (defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Optional JSON report path (timeline info, per-series stats, warnings)
    #[arg(long, value_hint = ValueHint::FilePath)]
    report: Option<PathBuf>,

    /// Settings JSON path
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct AdviseArgs {
    /// CSV file to analyse
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Explicit pair (repeatable)
    #[arg(long = "pair", value_name = "TIME:PARAM", value_parser = parse_pair)]
    pairs: Vec<TimeParamPair>,

    /// Timeline step in seconds
    #[arg(long)]
    step: Option<f64>,

    /// Print the comparison as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Settings JSON path
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn parse_pair(raw: &str) -> Result<TimeParamPair, String> {
    raw.parse().map_err(|e: AlignError| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Inspect(args) => args.verbose,
        Command::Align(args) => args.verbose,
        Command::Advise(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Inspect(args) => handle_inspect(args),
        Command::Align(args) => handle_align(args),
        Command::Advise(args) => handle_advise(args),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    let settings = Settings::from_json(&text)
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    info!("Loaded settings: {}", path.display());
    Ok(settings)
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let aligner = Aligner::new(load_settings(args.config.as_deref())?)?;
    let table = load::load_table(&args.input)?;
    for warning in table.validate()? {
        warn!("{}", warning);
    }
    let profile = aligner.classify_table(&table);
    let pairs = aligner.auto_pair(&table);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        let doc = json!({
            "summary": profile.summary(),
            "columns": profile.columns,
            "pairs": pairs,
        });
        serde_json::to_writer_pretty(&mut out, &doc)?;
        writeln!(out)?;
        return Ok(());
    }

    let summary = profile.summary();
    writeln!(
        out,
        "{}: {} rows, {} columns ({} time, {} numeric, {} text)",
        args.input.display(),
        summary.rows,
        summary.columns,
        summary.time_columns,
        summary.numeric_columns,
        summary.text_columns
    )?;
    for column in &profile.columns {
        let detail = match &column.stats.details {
            TypeDetails::Time { format, range } => {
                let range = match range {
                    Some((lo, hi)) => format!("{} .. {}", lo, hi),
                    None => "n/a".to_string(),
                };
                let format = format.as_deref().unwrap_or("n/a");
                format!("format={} range={}", format, range)
            }
            TypeDetails::Numeric { min, max, mean } => {
                format!("min={:.3} max={:.3} mean={:.3}", min, max, mean)
            }
            TypeDetails::Text { samples } => format!("samples={:?}", samples),
            TypeDetails::Unknown => String::new(),
        };
        writeln!(
            out,
            "  {:<24} {:<8} non_null={} nulls={} distinct={} {}",
            column.name,
            column.column_type.as_str(),
            column.stats.non_null,
            column.stats.nulls,
            column.stats.distinct,
            detail
        )?;
    }
    if pairs.is_empty() {
        writeln!(out, "No time/parameter pairs detected")?;
    } else {
        writeln!(out, "Pairs:")?;
        for pair in &pairs {
            writeln!(out, "  {}", pair)?;
        }
    }
    Ok(())
}

fn handle_align(args: AlignArgs) -> Result<()> {
    let settings = load_settings(args.config.as_deref())?;
    let (choice, method_warning) = match args.method.as_deref() {
        Some(name) => MethodChoice::from_name(name),
        None => (
            MethodChoice::Fixed(settings.interpolation.default_method),
            None,
        ),
    };
    let aligner = Aligner::new(settings)?;
    let table = load::load_table(&args.input)?;

    let (pairs, pair_warnings) = select_pairs(&aligner, &table, &args.pairs);
    let mut alignment = match aligner.run(&table, Some(&pairs), args.step, choice) {
        Ok(alignment) => alignment,
        Err(AlignError::Pairing(reason)) => {
            warn!("Nothing to plot: {}", reason);
            return Ok(());
        }
        Err(err) => return Err(anyhow::Error::new(err).context("alignment failed")),
    };
    let mut warnings: Vec<AlignError> = method_warning.into_iter().chain(pair_warnings).collect();
    warnings.append(&mut alignment.warnings);
    alignment.warnings = warnings;

    let summary = alignment.info();
    info!(
        "Aligned {} pairs onto {} points ({} .. {}, step {} s)",
        summary.pairs, summary.timeline_points, summary.start, summary.end, summary.step_seconds
    );
    for warning in &alignment.warnings {
        warn!("{}", warning);
    }

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_alignment_rows(&alignment, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_alignment_rows(&alignment, &mut writer)?;
        info!("Wrote aligned CSV: {}", args.output.display());
    }

    if let Some(path) = args.report.as_ref() {
        let text = serde_json::to_string_pretty(&report_json(&alignment))?;
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote report: {}", path.display());
    }

    if !args.no_plot {
        let png_path = args.png.clone().or_else(|| {
            (args.output.as_os_str() != "-").then(|| args.output.with_extension("png"))
        });
        if let Some(path) = png_path {
            if let Err(err) = render_chart_guard(&alignment, &path, ChartKind::Png) {
                warn!("Skipping PNG render ({}): {}", path.display(), err);
            } else {
                info!("Wrote plot: {}", path.display());
            }
        }
        if let Some(path) = args.svg.as_ref() {
            if let Err(err) = render_chart_guard(&alignment, path, ChartKind::Svg) {
                warn!("Skipping SVG render ({}): {}", path.display(), err);
            } else {
                info!("Wrote plot: {}", path.display());
            }
        }
    }

    Ok(())
}

/// Auto-detected pairs when none were given, otherwise the given pairs that
/// pass validation.
fn select_pairs(
    aligner: &Aligner,
    table: &Table,
    requested: &[TimeParamPair],
) -> (Vec<TimeParamPair>, Vec<AlignError>) {
    if requested.is_empty() {
        (aligner.auto_pair(table), Vec::new())
    } else {
        aligner.validate_pairs(table, requested)
    }
}

fn write_alignment_rows<W: Write>(
    alignment: &Alignment,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let mut header = vec!["universal_time".to_string()];
    header.extend(
        alignment
            .series
            .keys()
            .map(|param| format!("{}_interpolated", param)),
    );
    writer.write_record(&header)?;

    for (k, ts) in alignment.timeline.points().enumerate() {
        let mut row = Vec::with_capacity(header.len());
        row.push(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string());
        for series in alignment.series.values() {
            row.push(
                series
                    .values
                    .get(k)
                    .copied()
                    .flatten()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn report_json(alignment: &Alignment) -> JsonValue {
    let series: serde_json::Map<String, JsonValue> = alignment
        .series
        .iter()
        .map(|(param, s)| {
            let entry = json!({
                "time_column": s.time_column,
                "requested_method": s.requested_method,
                "applied_method": s.applied_method,
                "source_points": s.source_points,
                "source_range": s.source_range,
                "valid_points": s.valid_count(),
                "coverage_ratio": s.coverage_ratio(),
                "stats": s.stats(),
            });
            (param.clone(), entry)
        })
        .collect();
    json!({
        "info": alignment.info(),
        "series": series,
        "warnings": alignment.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
    })
}

fn handle_advise(args: AdviseArgs) -> Result<()> {
    let aligner = Aligner::new(load_settings(args.config.as_deref())?)?;
    let table = load::load_table(&args.input)?;
    table.validate()?;

    let (pairs, pair_warnings) = select_pairs(&aligner, &table, &args.pairs);
    for warning in &pair_warnings {
        warn!("{}", warning);
    }
    if pairs.is_empty() {
        warn!("Nothing to compare: no time/parameter pairs");
        return Ok(());
    }
    let (timeline, warnings) = aligner
        .build_timeline(&table, &pairs, args.step)
        .context("failed to build the universal timeline")?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    let reports: Vec<(TimeParamPair, Result<Vec<MethodQuality>, AlignError>)> = pairs
        .par_iter()
        .map(|pair| {
            let report = aligner.compare_methods(&table, pair, &timeline);
            (pair.clone(), report)
        })
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        let doc: Vec<JsonValue> = reports
            .iter()
            .map(|(pair, report)| match report {
                Ok(methods) => json!({
                    "pair": pair,
                    "recommended": unitime::advisor::best(methods),
                    "methods": methods,
                }),
                Err(err) => json!({ "pair": pair, "error": err.to_string() }),
            })
            .collect();
        serde_json::to_writer_pretty(&mut out, &doc)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(
        out,
        "Timeline: {} points, step {} s",
        timeline.len(),
        timeline.step_seconds()
    )?;
    for (pair, report) in &reports {
        let methods = match report {
            Ok(methods) => methods,
            Err(err) => {
                warn!("Skipping {}: {}", pair, err);
                writeln!(out, "{}: {}", pair, err)?;
                continue;
            }
        };
        writeln!(
            out,
            "{} (recommended: {})",
            pair,
            unitime::advisor::best(methods)
        )?;
        writeln!(
            out,
            "  {:<12} {:>9} {:>13} {:>8}",
            "method", "coverage", "valid/total", "score"
        )?;
        for q in methods {
            writeln!(
                out,
                "  {:<12} {:>8.1}% {:>13} {:>8.1}",
                q.method.name(),
                q.coverage_ratio * 100.0,
                format!("{}/{}", q.valid_points, q.total_target_points),
                q.score
            )?;
        }
    }
    if reports.iter().all(|(_, r)| r.is_err()) {
        return Err(anyhow!("no pair could be evaluated"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitime::{Cell, Column};

    fn alignment() -> Alignment {
        let table = Table::new(vec![
            Column::new(
                "Time_1",
                vec![
                    Cell::from_text("2024-01-01 00:00:00"),
                    Cell::from_text("2024-01-01 00:00:02"),
                ],
            ),
            Column::new("A_1", vec![Cell::Number(1.0), Cell::Number(2.0)]),
            Column::new(
                "Time_2",
                vec![
                    Cell::from_text("2024-01-01 00:00:01"),
                    Cell::from_text("2024-01-01 00:00:03"),
                ],
            ),
            Column::new("B_2", vec![Cell::Number(5.0), Cell::Number(7.0)]),
        ]);
        Aligner::default()
            .run(&table, None, Some(1.0), MethodChoice::default())
            .unwrap()
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("Time_1:Temp_1").unwrap(),
            TimeParamPair::new("Time_1", "Temp_1")
        );
        assert!(parse_pair("Temp_1").is_err());
    }

    #[test]
    fn test_csv_rows() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_alignment_rows(&alignment(), &mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "universal_time,A_1_interpolated,B_2_interpolated");
        assert_eq!(lines[1], "2024-01-01 00:00:00,1,");
        assert_eq!(lines[2], "2024-01-01 00:00:01,1.5,5");
        assert_eq!(lines[4], "2024-01-01 00:00:03,,7");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_report_json() {
        let report = report_json(&alignment());
        assert_eq!(report["info"]["timeline_points"], 4);
        assert_eq!(report["series"]["A_1"]["applied_method"], "linear");
        assert_eq!(report["series"]["B_2"]["valid_points"], 3);
        assert_eq!(report["warnings"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_select_pairs_drops_invalid_user_pairs() {
        let table = Table::new(vec![
            Column::new(
                "Time_1",
                vec![
                    Cell::from_text("2024-01-01 00:00:00"),
                    Cell::from_text("2024-01-01 00:00:02"),
                ],
            ),
            Column::new("A_1", vec![Cell::Number(1.0), Cell::Number(2.0)]),
            Column::new(
                "Time_2",
                vec![
                    Cell::from_text("2024-01-01 00:00:05"),
                    Cell::from_text("2024-01-01 00:00:05"),
                ],
            ),
            Column::new("B_2", vec![Cell::Number(5.0), Cell::Number(7.0)]),
        ]);
        let aligner = Aligner::default();
        let requested = vec![
            TimeParamPair::new("Time_1", "A_1"),
            TimeParamPair::new("Time_2", "B_2"),
            TimeParamPair::new("Time_1", "Missing"),
        ];
        let (pairs, warnings) = select_pairs(&aligner, &table, &requested);
        assert_eq!(pairs, vec![TimeParamPair::new("Time_1", "A_1")]);
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], AlignError::TimeParsing { .. }));
        assert_eq!(warnings[1], AlignError::UnknownColumn("Missing".into()));

        let (auto, auto_warnings) = select_pairs(&aligner, &table, &[]);
        assert_eq!(auto, vec![TimeParamPair::new("Time_1", "A_1")]);
        assert!(auto_warnings.is_empty());
    }
}
