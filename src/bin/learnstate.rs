//! Learnstate CLI - Command-line interface for the learning-state pipeline
//!
//! Commands:
//! - replay: Run recorded frame records through a pipeline
//! - validate: Validate frame-record schema
//! - config: Print the effective pipeline configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use learnstate::schema::{FrameRecord, FrameRecordReader};
use learnstate::types::{DetectionStats, LearningState};
use learnstate::{InferenceError, LearningStatePipeline, PipelineConfig, LEARNSTATE_VERSION};

/// Learnstate - learning-state inference from facial landmarks and expressions
#[derive(Parser)]
#[command(name = "learnstate")]
#[command(version = LEARNSTATE_VERSION)]
#[command(about = "Infer learning states from recorded face-model output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run frame records through a pipeline and report every frame
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only write the final summary
        #[arg(long)]
        summary_only: bool,
    },

    /// Validate frame-record schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration (defaults, file, then LEARNSTATE_* env)
    Config {
        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

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

/// Logs go to stderr: JSON when LOG_FORMAT=json, colored text on a terminal
fn init_tracing() {
    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "learnstate=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(atty::is(atty::Stream::Stderr))
                    .with_target(false),
            )
            .with(env_filter)
            .init();
    }
}

fn run(cli: Cli) -> Result<(), LearnstateCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            config,
            summary_only,
        } => cmd_replay(&input, &output, input_format, config.as_deref(), summary_only),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn read_input(input: &Path) -> Result<String, LearnstateCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_records(input: &Path, format: InputFormat) -> Result<Vec<FrameRecord>, LearnstateCliError> {
    let data = read_input(input)?;
    let records = match format {
        InputFormat::Ndjson => FrameRecordReader::parse_ndjson(&data)?,
        InputFormat::Json => FrameRecordReader::parse_array(&data)?,
    };
    Ok(records)
}

/// Defaults, overridden by the config file, overridden by LEARNSTATE_* env
fn load_config(path: Option<&Path>) -> Result<PipelineConfig, LearnstateCliError> {
    let base = match path {
        Some(path) => serde_json::from_str::<PipelineConfig>(&fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };
    let config = base.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    config: Option<&Path>,
    summary_only: bool,
) -> Result<(), LearnstateCliError> {
    let config = load_config(config)?;
    let records = read_records(input, input_format)?;

    let mut writer: Box<dyn Write> = if output.to_string_lossy() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(io::BufWriter::new(fs::File::create(output)?))
    };

    replay(config, &records, &mut writer, summary_only)?;
    writer.flush()?;
    Ok(())
}

/// Run records through a fresh pipeline, one NDJSON line per frame plus a
/// final summary line. Malformed face payloads become failed frames.
fn replay(
    config: PipelineConfig,
    records: &[FrameRecord],
    writer: &mut dyn Write,
    summary_only: bool,
) -> Result<ReplaySummary, LearnstateCliError> {
    let first = records.first().ok_or(LearnstateCliError::NoRecords)?;

    let mut pipeline = LearningStatePipeline::with_config(config)?;
    info!(
        session_id = %pipeline.session_id(),
        records = records.len(),
        "replaying frame records"
    );

    let mut clarifications = 0usize;
    let mut last_timestamp = first.timestamp;
    for record in records {
        if record.timestamp < last_timestamp {
            warn!(timestamp = %record.timestamp, "frame record out of order");
        }
        last_timestamp = last_timestamp.max(record.timestamp);

        let outcome = pipeline.process_frame(record.model_output(), record.context());
        if outcome.clarification_requested() {
            clarifications += 1;
        }
        if !summary_only {
            writeln!(writer, "{}", serde_json::to_string(&outcome)?)?;
        }
    }

    let summary = ReplaySummary {
        session_id: pipeline.session_id(),
        frames: records.len(),
        stats: pipeline.stats(),
        published: pipeline.published_state(),
        dominant_recent: pipeline.dominant_recent_state(last_timestamp),
        clarifications,
        evaluated_at: last_timestamp,
    };
    writeln!(writer, "{}", serde_json::to_string(&SummaryLine { summary: &summary })?)?;
    Ok(summary)
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), LearnstateCliError> {
    let records = read_records(input, input_format)?;
    let results = FrameRecordReader::validate_records(&records);

    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - results.len(),
        invalid_records: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                timestamp: r.timestamp,
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Record {} ({}): {}", err.index, err.timestamp, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        return Err(LearnstateCliError::ValidationFailed(report.invalid_records));
    }
    Ok(())
}

fn cmd_config(config: Option<&Path>) -> Result<(), LearnstateCliError> {
    let config = load_config(config)?;
    println!("{}", config.to_json()?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum LearnstateCliError {
    Io(io::Error),
    Inference(InferenceError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
}

impl From<io::Error> for LearnstateCliError {
    fn from(e: io::Error) -> Self {
        LearnstateCliError::Io(e)
    }
}

impl From<InferenceError> for LearnstateCliError {
    fn from(e: InferenceError) -> Self {
        LearnstateCliError::Inference(e)
    }
}

impl From<serde_json::Error> for LearnstateCliError {
    fn from(e: serde_json::Error) -> Self {
        LearnstateCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<LearnstateCliError> for CliError {
    fn from(e: LearnstateCliError) -> Self {
        match e {
            LearnstateCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            LearnstateCliError::Inference(e) => {
                let hint = match &e {
                    InferenceError::InvalidConfig(_) => "Run 'learnstate config' to inspect settings",
                    _ => "Ensure input lines are frame records",
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            LearnstateCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            LearnstateCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No frame records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            LearnstateCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct SummaryLine<'a> {
    summary: &'a ReplaySummary,
}

#[derive(serde::Serialize)]
struct ReplaySummary {
    session_id: Uuid,
    frames: usize,
    stats: DetectionStats,
    published: LearningState,
    dominant_recent: LearningState,
    clarifications: usize,
    evaluated_at: DateTime<Utc>,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    timestamp: DateTime<Utc>,
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = r#"
{"timestamp": "2024-03-01T10:00:00Z", "face": null}
{"timestamp": "2024-03-01T10:00:01Z", "face": {"expressions": {"happy": 0.1, "sad": 0.0, "angry": 0.0, "fearful": 0.0, "disgusted": 0.0, "surprised": 0.0, "neutral": 0.9, "contempt": 0.1}}}
{"timestamp": "2024-03-01T10:00:02Z", "face": null}
"#;

    #[test]
    fn test_replay_continues_past_malformed_face() {
        let records = FrameRecordReader::parse_ndjson(SESSION).unwrap();
        let mut out = Vec::new();

        let summary = replay(PipelineConfig::default(), &records, &mut out, false).unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.stats.total, 3);
        assert_eq!(summary.stats.failed, 3);

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["outcome"], "no_face");
        assert_eq!(lines[1]["outcome"], "failed");
        assert_eq!(lines[1]["code"], "SCHEMA_ERROR");
        assert_eq!(lines[2]["outcome"], "no_face");
        assert_eq!(lines[3]["summary"]["stats"]["failed"], 3);
    }

    #[test]
    fn test_replay_rejects_empty_input() {
        let mut out = Vec::new();
        let result = replay(PipelineConfig::default(), &[], &mut out, false);
        assert!(matches!(result, Err(LearnstateCliError::NoRecords)));
        assert!(out.is_empty());
    }
}
