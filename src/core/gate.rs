//! Fallback gate between the two criteria extractors.
//!
//! The gate is the only place llm_v1 and rule_v1 compose. It tries llm_v1,
//! applies the quality limits, and on any error or violation returns the
//! rule_v1 result with the reason recorded. The gate itself never fails.
//!
//! With a re-parse trigger set, rule_v1 runs first and llm_v1 is only
//! attempted when the rule_v1 output looks low-confidence.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::quality::QualityLimits;
use crate::adapters::LlmUsage;
use crate::config::Settings;
use crate::criteria::{
    compute_hash, extract_rules_v1, should_trigger_llm_reparse, CoverageStats,
    LlmCriteriaParser, LlmParseError, ParserSource,
};
use crate::domain::{CriteriaRule, ParsedCriteria};

/// Provenance of a parsed rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub parser_source: ParserSource,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_usage: Option<LlmUsage>,
    /// Hash of the eligibility text the rules were parsed from
    pub source_sha256: String,
}

/// Rules plus provenance and coverage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatedParse {
    pub rules: Vec<CriteriaRule>,
    pub metadata: ParseMetadata,
    pub coverage: CoverageStats,
}

impl GatedParse {
    /// Shape stored on a trial record
    pub fn into_parsed_criteria(self) -> ParsedCriteria {
        ParsedCriteria::new(self.metadata.parser_source.as_str(), self.rules)
            .with_coverage(self.coverage)
    }
}

/// Gate composing llm_v1 with a rule_v1 fallback
pub struct CriteriaGate {
    llm: Option<LlmCriteriaParser>,
    limits: QualityLimits,
    reparse_trigger: Option<f64>,
}

impl CriteriaGate {
    /// Gate that attempts llm_v1 first
    pub fn new(llm: LlmCriteriaParser, limits: QualityLimits) -> Self {
        Self {
            llm: Some(llm),
            limits,
            reparse_trigger: None,
        }
    }

    /// Gate that only runs rule_v1
    pub fn rule_only() -> Self {
        Self {
            llm: None,
            limits: QualityLimits::default(),
            reparse_trigger: None,
        }
    }

    /// Only attempt llm_v1 when rule_v1's unknown share exceeds `ratio`
    pub fn with_reparse_trigger(mut self, ratio: f64) -> Self {
        self.reparse_trigger = Some(ratio);
        self
    }

    /// Gate built from resolved settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            LlmCriteriaParser::new(settings.llm.clone()),
            settings.gate.quality.clone(),
        )
    }

    /// Parse eligibility text into rules with provenance
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub fn parse(&self, text: &str) -> GatedParse {
        let source_sha256 = compute_hash(text.as_bytes());

        let Some(llm) = &self.llm else {
            return rule_v1_parse(text, source_sha256, None, None);
        };

        if let Some(ratio) = self.reparse_trigger {
            let first_pass = rule_v1_parse(text, source_sha256.clone(), None, None);
            if !should_trigger_llm_reparse(&first_pass.coverage, ratio) {
                debug!(
                    unknown = first_pass.coverage.unknown_rules,
                    total = first_pass.coverage.total_rules,
                    "rule_v1 coverage sufficient, skipping llm_v1"
                );
                return first_pass;
            }
            info!(
                unknown = first_pass.coverage.unknown_rules,
                total = first_pass.coverage.total_rules,
                "rule_v1 coverage low, attempting llm_v1"
            );
        }

        match llm.parse(text) {
            Ok(extraction) => match self.limits.check(&extraction.rules, text) {
                Ok(()) => {
                    info!(rules = extraction.rules.len(), "Using llm_v1 rules");
                    let mut coverage =
                        CoverageStats::from_rules(&extraction.rules, ParserSource::LlmV1);
                    coverage.llm_usage = extraction.usage;
                    GatedParse {
                        rules: extraction.rules,
                        metadata: ParseMetadata {
                            parser_source: ParserSource::LlmV1,
                            fallback_used: false,
                            fallback_reason: None,
                            llm_usage: extraction.usage,
                            source_sha256,
                        },
                        coverage,
                    }
                }
                Err(violation) => {
                    warn!(%violation, "LLM output rejected, falling back to rule_v1");
                    rule_v1_parse(
                        text,
                        source_sha256,
                        Some(violation.to_string()),
                        extraction.usage,
                    )
                }
            },
            Err(e) => {
                match e {
                    LlmParseError::Disabled => debug!("LLM parser disabled, using rule_v1"),
                    _ => warn!(error = %e, "LLM parse failed, falling back to rule_v1"),
                }
                rule_v1_parse(text, source_sha256, Some(e.to_string()), None)
            }
        }
    }
}

fn rule_v1_parse(
    text: &str,
    source_sha256: String,
    fallback_reason: Option<String>,
    llm_usage: Option<LlmUsage>,
) -> GatedParse {
    let extraction = extract_rules_v1(text);
    let fallback_used = fallback_reason.is_some();

    let mut coverage = CoverageStats::from_rules(&extraction.rules, ParserSource::RuleV1)
        .with_failed(extraction.failed_sentences);
    coverage.fallback_used = fallback_used;
    coverage.fallback_reason = fallback_reason.clone();
    coverage.llm_usage = llm_usage;

    GatedParse {
        rules: extraction.rules,
        metadata: ParseMetadata {
            parser_source: ParserSource::RuleV1,
            fallback_used,
            fallback_reason,
            llm_usage,
            source_sha256,
        },
        coverage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapters::CannedTransport;
    use crate::config::LlmSettings;

    fn enabled() -> LlmSettings {
        LlmSettings {
            enabled: true,
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    const TEXT: &str = "Inclusion Criteria:\n- Adults aged 18 years or older.\nExclusion Criteria:\n- Pregnant or breastfeeding.";

    #[test]
    fn test_rule_only_gate_is_not_a_fallback() {
        let parsed = CriteriaGate::rule_only().parse(TEXT);
        assert_eq!(parsed.metadata.parser_source, ParserSource::RuleV1);
        assert!(!parsed.metadata.fallback_used);
        assert!(parsed.metadata.fallback_reason.is_none());
        assert!(parsed.metadata.source_sha256.starts_with("sha256:"));
        assert_eq!(parsed.coverage.total_rules, parsed.rules.len());
    }

    #[test]
    fn test_disabled_llm_falls_back_with_reason() {
        let gate = CriteriaGate::new(
            LlmCriteriaParser::new(LlmSettings::default()),
            QualityLimits::default(),
        );
        let parsed = gate.parse(TEXT);
        assert_eq!(parsed.metadata.parser_source, ParserSource::RuleV1);
        assert!(parsed.metadata.fallback_used);
        assert_eq!(
            parsed.metadata.fallback_reason.as_deref(),
            Some("LLM parser is disabled")
        );
        assert!(parsed.coverage.fallback_used);
    }

    #[test]
    fn test_reparse_trigger_skips_llm_when_coverage_is_good() {
        let transport = Arc::new(CannedTransport::with_content("{\"rules\": []}"));
        let gate = CriteriaGate::new(
            LlmCriteriaParser::with_transport(enabled(), transport.clone()),
            QualityLimits::default(),
        )
        .with_reparse_trigger(0.5);

        let parsed = gate.parse(TEXT);
        assert_eq!(transport.call_count(), 0);
        assert_eq!(parsed.metadata.parser_source, ParserSource::RuleV1);
        assert!(!parsed.metadata.fallback_used);
    }

    #[test]
    fn test_reparse_trigger_fires_on_low_coverage() {
        let transport = Arc::new(CannedTransport::with_content("{\"rules\": []}"));
        let gate = CriteriaGate::new(
            LlmCriteriaParser::with_transport(enabled(), transport.clone()),
            QualityLimits::default(),
        )
        .with_reparse_trigger(0.5);

        // Only a placeholder comes out of rule_v1
        let parsed = gate.parse("Able to provide informed consent");
        assert_eq!(transport.call_count(), 1);
        // Empty LLM output is rejected, so rule_v1 stands with a reason
        assert!(parsed.metadata.fallback_used);
    }

    #[test]
    fn test_into_parsed_criteria_keeps_version() {
        let stored = CriteriaGate::rule_only().parse(TEXT).into_parsed_criteria();
        assert_eq!(stored.parser_version, "rule_v1");
        assert!(stored.coverage.is_some());
        assert!(!stored.rules.is_empty());
    }
}
