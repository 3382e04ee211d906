//! Domain types for the matching engine.
//!
//! This module contains the core data structures:
//! - Rule: Structured eligibility constraints
//! - Trial: Registry records with optional parsed rule sets
//! - Patient: Profiles scored against trials
//! - Verdict: Per-rule verdicts and per-trial match results

pub mod patient;
pub mod rule;
pub mod trial;
pub mod verdict;

// Re-export commonly used types
pub use patient::PatientProfile;
pub use rule::{
    AgeRule, Certainty, Comparator, ConceptOp, ConceptRule, Constraint, CriteriaRule, Field,
    LabRule, OtherOp, OtherRule, RuleType, RuleValue, SexOp, SexRule, SexValue, SourceSpan,
    StoredRule,
};
pub use trial::{EligibilityModule, ParsedCriteria, TrialRecord};
pub use verdict::{
    Checklist, DowngradeReason, EvaluationMeta, EvaluationPath, MatchResult, MatchSummary,
    ReasonCode, RequiredAction, RuleMeta, RuleVerdict, Tier, Verdict,
};
