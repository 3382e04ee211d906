//! Core matching logic.
//!
//! This module contains:
//! - Gate: llm_v1 with rule_v1 fallback and provenance
//! - Quality: limits applied to LLM output
//! - Evaluator: per-rule verdicts for one patient and trial
//! - Summary: score, certainty and tier
//! - Ranking: ordering results across trials

pub mod evaluator;
pub mod gate;
pub mod quality;
pub mod ranking;
pub mod summary;

// Re-export commonly used types
pub use evaluator::{evaluate_rule, evaluate_trial, TrialEvaluation};
pub use gate::{CriteriaGate, GatedParse, ParseMetadata};
pub use quality::{QualityLimits, QualityViolation};
pub use ranking::{rank_matches, sort_results};
pub use summary::{match_trial, summarize};
