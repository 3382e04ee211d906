//! trialmatch - Clinical-trial eligibility parsing and patient matching
//!
//! Converts free-text eligibility criteria into structured rules and scores
//! patient profiles against them.
//!
//! # Architecture
//!
//! Segmenter -> Extractor(s) -> Evaluator -> Summarizer -> ranked matches
//! - Eligibility text is split into inclusion/exclusion sentences
//! - `rule_v1` (regex matchers) or `llm_v1` (LLM + schema validation)
//!   produce rules; the gate falls back to `rule_v1` on any LLM failure
//! - Each rule is evaluated to PASS/FAIL/UNKNOWN, never erroring on
//!   missing patient data
//! - Verdicts are scored and tiered, then trials are ranked
//!
//! # Modules
//!
//! - `adapters`: LLM completion transport (OpenAI-compatible)
//! - `criteria`: Segmenter, extractors, grounding and coverage
//! - `core`: Gate, quality limits, evaluator, summarizer, ranking
//! - `domain`: Data structures (CriteriaRule, TrialRecord, MatchResult)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Parse criteria text
//! trialmatch parse --input criteria.txt --rule-only
//!
//! # Attach parsed rules to a batch of trials
//! trialmatch parse-batch --trials trials.jsonl > parsed.jsonl
//!
//! # Rank trials for a patient
//! trialmatch match --patient patient.json --trials parsed.jsonl --top-k 10
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod criteria;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{
    evaluate_trial, match_trial, rank_matches, CriteriaGate, GatedParse, ParseMetadata,
    QualityLimits,
};
pub use criteria::{
    extract_rules_v1, parse_criteria_v1, preprocess, should_trigger_llm_reparse, CoverageStats,
    LlmCriteriaParser, LlmParseError, ParserSource, SegmentedCriteria,
};
pub use domain::{CriteriaRule, MatchResult, PatientProfile, RuleVerdict, Tier, TrialRecord, Verdict};
