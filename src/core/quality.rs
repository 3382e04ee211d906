//! Quality limits applied to LLM parser output.
//!
//! A successful llm_v1 call can still produce output not worth keeping:
//! - Nothing at all for non-empty criteria text
//! - An implausible number of rules
//! - Mostly unknown rules (coverage below a floor)
//!
//! Any violation makes the gate fall back to rule_v1.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::criteria::{CoverageStats, ParserSource};
use crate::domain::CriteriaRule;

/// Quality limits for LLM parser output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLimits {
    /// Reject an empty rule list for non-empty text (default: true)
    #[serde(default = "default_reject_empty")]
    pub reject_empty_output: bool,

    /// Maximum rules per trial (default: 200)
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,

    /// Minimum known/total ratio (default: 0.0, disabled)
    #[serde(default = "default_min_coverage")]
    pub min_coverage_ratio: f64,
}

fn default_reject_empty() -> bool {
    true
}
fn default_max_rules() -> usize {
    200
}
fn default_min_coverage() -> f64 {
    0.0
}

impl Default for QualityLimits {
    fn default() -> Self {
        Self {
            reject_empty_output: default_reject_empty(),
            max_rules: default_max_rules(),
            min_coverage_ratio: default_min_coverage(),
        }
    }
}

impl QualityLimits {
    /// Check LLM rules produced for `source`
    pub fn check(&self, rules: &[CriteriaRule], source: &str) -> Result<(), QualityViolation> {
        if rules.is_empty() {
            if self.reject_empty_output && !source.trim().is_empty() {
                return Err(QualityViolation::EmptyOutput);
            }
            return Ok(());
        }

        if rules.len() > self.max_rules {
            return Err(QualityViolation::TooManyRules {
                actual: rules.len(),
                limit: self.max_rules,
            });
        }

        let coverage = CoverageStats::from_rules(rules, ParserSource::LlmV1).coverage_ratio;
        if coverage < self.min_coverage_ratio {
            return Err(QualityViolation::LowCoverage {
                actual: coverage,
                limit: self.min_coverage_ratio,
            });
        }

        Ok(())
    }
}

/// Quality limit violation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QualityViolation {
    #[error("LLM returned no rules for non-empty criteria text")]
    EmptyOutput,

    #[error("LLM returned {actual} rules (limit: {limit})")]
    TooManyRules { actual: usize, limit: usize },

    #[error("LLM coverage {actual:.2} below minimum {limit:.2}")]
    LowCoverage { actual: f64, limit: f64 },
}
