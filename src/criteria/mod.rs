//! Eligibility criteria parsing.
//!
//! - `segment`: split free text into inclusion/exclusion sentences
//! - `rule_v1`: deterministic regex extractor
//! - `llm_v1`: LLM extractor with schema validation
//! - `grounding`: evidence lookup used for hallucination checks and spans
//! - `coverage`: coverage statistics and the re-parse trigger

pub mod coverage;
pub mod grounding;
pub mod llm_v1;
pub mod prompt;
pub mod rule_v1;
pub mod segment;
pub mod validation;

pub use coverage::{should_trigger_llm_reparse, CoverageStats, ParserSource};
pub use grounding::{compute_hash, is_grounded, locate_evidence};
pub use llm_v1::{LlmCriteriaParser, LlmExtraction, LlmParseError};
pub use rule_v1::{extract_rules_v1, parse_criteria_v1, MatchError, RuleExtraction};
pub use segment::{preprocess, SegmentedCriteria};
