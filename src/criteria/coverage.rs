//! Coverage statistics and the selective re-parse trigger.

use serde::{Deserialize, Serialize};

use crate::adapters::LlmUsage;
use crate::domain::CriteriaRule;

/// Which extractor produced a rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserSource {
    LlmV1,
    RuleV1,
}

impl ParserSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserSource::LlmV1 => "llm_v1",
            ParserSource::RuleV1 => "rule_v1",
        }
    }
}

impl std::fmt::Display for ParserSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coverage and provenance for one parsed rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    pub total_rules: usize,
    /// Rules that are neither `other` nor low certainty
    pub known_rules: usize,
    pub unknown_rules: usize,
    /// Sentences whose matchers failed (rule_v1 only)
    #[serde(default)]
    pub failed_rules: usize,
    pub coverage_ratio: f64,
    pub parser_source: ParserSource,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_usage: Option<LlmUsage>,
}

impl CoverageStats {
    pub fn from_rules(rules: &[CriteriaRule], parser_source: ParserSource) -> Self {
        let known = rules.iter().filter(|r| r.is_known()).count();
        Self::from_counts(rules.len(), known, parser_source)
    }

    fn from_counts(total: usize, known: usize, parser_source: ParserSource) -> Self {
        Self {
            total_rules: total,
            known_rules: known,
            unknown_rules: total - known,
            failed_rules: 0,
            coverage_ratio: if total == 0 {
                0.0
            } else {
                known as f64 / total as f64
            },
            parser_source,
            fallback_used: false,
            fallback_reason: None,
            llm_usage: None,
        }
    }

    pub fn with_failed(mut self, failed: usize) -> Self {
        self.failed_rules = failed;
        self
    }

    /// Share of rules the evaluator cannot act on confidently
    pub fn unknown_ratio(&self) -> f64 {
        if self.total_rules == 0 {
            0.0
        } else {
            self.unknown_rules as f64 / self.total_rules as f64
        }
    }
}

/// Whether a rule_v1 result looks weak enough to spend an LLM call on.
///
/// Fires when the unknown share exceeds `unknown_ratio_trigger`, or when the
/// set is tiny (two rules or fewer) and contains any unknown rule.
pub fn should_trigger_llm_reparse(stats: &CoverageStats, unknown_ratio_trigger: f64) -> bool {
    if stats.total_rules == 0 {
        return false;
    }
    stats.unknown_ratio() > unknown_ratio_trigger
        || (stats.total_rules <= 2 && stats.unknown_rules >= 1)
}
