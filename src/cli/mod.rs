//! Command-line interface for trialmatch.
//!
//! Provides commands for segmenting and parsing eligibility text,
//! batch-parsing trial records, and ranking trials for a patient.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::info;

use crate::config::{self, Settings};
use crate::core::{rank_matches, CriteriaGate};
use crate::criteria::preprocess;
use crate::domain::{PatientProfile, TrialRecord};

/// trialmatch - Clinical-trial eligibility parsing and patient matching
#[derive(Parser, Debug)]
#[command(name = "trialmatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split eligibility text into inclusion/exclusion sentences
    Segment {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Parse eligibility text into structured rules
    Parse {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Skip the LLM parser and run rule_v1 only
        #[arg(long)]
        rule_only: bool,
    },

    /// Parse every trial in a JSONL file and emit trials with criteria_json
    ParseBatch {
        /// Trials file, one JSON record per line (reads from stdin if not provided)
        #[arg(short, long)]
        trials: Option<PathBuf>,

        /// Parallel parses (defaults to batch.concurrency)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Skip the LLM parser and run rule_v1 only
        #[arg(long)]
        rule_only: bool,

        /// Call the LLM only when rule_v1 leaves too many rules unknown
        /// (gate.unknown_ratio_trigger)
        #[arg(long, conflicts_with = "rule_only")]
        selective: bool,
    },

    /// Rank trials for a patient
    Match {
        /// Patient profile JSON file
        #[arg(short, long)]
        patient: PathBuf,

        /// Trials file, one JSON record per line (reads from stdin if not provided)
        #[arg(short, long)]
        trials: Option<PathBuf>,

        /// Maximum results (defaults to matching.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Parse trials that have no criteria_json before matching
        #[arg(long)]
        parse: bool,

        /// With --parse, call the LLM only when rule_v1 leaves too many
        /// rules unknown
        #[arg(long, requires = "parse")]
        selective: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Segment { input } => segment(input.as_deref()),
            Commands::Parse { input, rule_only } => parse(input.as_deref(), rule_only).await,
            Commands::ParseBatch {
                trials,
                concurrency,
                rule_only,
                selective,
            } => {
                let mode = ParseMode::from_flags(rule_only, selective);
                parse_batch(trials.as_deref(), concurrency, mode).await
            }
            Commands::Match {
                patient,
                trials,
                top_k,
                parse,
                selective,
            } => {
                let mode = parse.then(|| ParseMode::from_flags(false, selective));
                match_patient(&patient, trials.as_deref(), top_k, mode).await
            }
            Commands::Config => show_config(),
        }
    }
}

/// Read a file, or stdin when no path is given and stdin is piped
fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }

    if io::stdin().is_terminal() {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

/// Parse JSON Lines, or a single JSON array
fn read_records<T: DeserializeOwned>(content: &str) -> Result<Vec<T>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Failed to parse JSON array");
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid JSON on line {}", i + 1))
        })
        .collect()
}

/// Which extractors a parse may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    RuleOnly,
    /// llm_v1 first, rule_v1 fallback
    Full,
    /// rule_v1 first, llm_v1 when the re-parse trigger fires
    Selective,
}

impl ParseMode {
    fn from_flags(rule_only: bool, selective: bool) -> Self {
        match (rule_only, selective) {
            (true, _) => ParseMode::RuleOnly,
            (false, true) => ParseMode::Selective,
            (false, false) => ParseMode::Full,
        }
    }
}

fn build_gate(settings: &Settings, mode: ParseMode) -> CriteriaGate {
    match mode {
        ParseMode::RuleOnly => CriteriaGate::rule_only(),
        ParseMode::Full => CriteriaGate::from_settings(settings),
        ParseMode::Selective => CriteriaGate::from_settings(settings)
            .with_reparse_trigger(settings.gate.unknown_ratio_trigger),
    }
}

fn segment(input: Option<&Path>) -> Result<()> {
    let text = read_input(input)?;
    let segmented = preprocess(Some(&text));
    println!("{}", serde_json::to_string_pretty(&segmented)?);
    Ok(())
}

async fn parse(input: Option<&Path>, rule_only: bool) -> Result<()> {
    let text = read_input(input)?;
    let mode = ParseMode::from_flags(rule_only, false);
    let gate = build_gate(config::config()?, mode);

    // The LLM transport blocks
    let parsed = tokio::task::spawn_blocking(move || gate.parse(&text))
        .await
        .context("Parse task failed")?;

    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

/// Attach a parsed rule set to each trial, preserving input order
pub async fn parse_trials(
    trials: Vec<TrialRecord>,
    gate: Arc<CriteriaGate>,
    concurrency: usize,
) -> Result<Vec<TrialRecord>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(trials.len());

    for mut trial in trials {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Semaphore closed")?;
        let gate = gate.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let parsed = gate.parse(trial.eligibility_text());
            trial.criteria_json = Some(parsed.into_parsed_criteria());
            trial
        }));
    }

    let mut parsed = Vec::with_capacity(handles.len());
    for handle in handles {
        parsed.push(handle.await.context("Parse task failed")?);
    }
    Ok(parsed)
}

async fn parse_batch(
    trials_path: Option<&Path>,
    concurrency: Option<usize>,
    mode: ParseMode,
) -> Result<()> {
    let settings = config::config()?;
    let trials: Vec<TrialRecord> = read_records(&read_input(trials_path)?)?;
    let concurrency = concurrency.unwrap_or(settings.batch_concurrency);

    info!(trials = trials.len(), concurrency, ?mode, "Parsing trial batch");
    let gate = Arc::new(build_gate(settings, mode));
    let parsed = parse_trials(trials, gate, concurrency).await?;

    for trial in &parsed {
        println!("{}", serde_json::to_string(trial)?);
    }
    Ok(())
}

async fn match_patient(
    patient_path: &Path,
    trials_path: Option<&Path>,
    top_k: Option<usize>,
    parse_mode: Option<ParseMode>,
) -> Result<()> {
    let settings = config::config()?;

    let patient: PatientProfile = serde_json::from_str(&read_input(Some(patient_path))?)
        .with_context(|| format!("Invalid patient profile: {}", patient_path.display()))?;
    let mut trials: Vec<TrialRecord> = read_records(&read_input(trials_path)?)?;

    if let Some(mode) = parse_mode {
        let (ready, unparsed): (Vec<_>, Vec<_>) = trials
            .into_iter()
            .partition(|t| t.criteria_json.is_some());
        let gate = Arc::new(build_gate(settings, mode));
        trials = ready;
        trials.extend(parse_trials(unparsed, gate, settings.batch_concurrency).await?);
    }

    let results = rank_matches(&patient, &trials, top_k.unwrap_or(settings.top_k));
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    print!("{}", serde_yaml::to_string(cfg).context("Failed to render configuration")?);

    Ok(())
}
