//! Trial records as supplied by the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rule::{CriteriaRule, StoredRule};
use crate::criteria::coverage::CoverageStats;

/// Registry eligibility module (field names follow the registry's camelCase)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityModule {
    /// Free-text inclusion/exclusion criteria
    #[serde(default)]
    pub eligibility_criteria: Option<String>,

    /// e.g. "18 Years"
    #[serde(default)]
    pub minimum_age: Option<String>,

    /// e.g. "65 Years"
    #[serde(default)]
    pub maximum_age: Option<String>,

    /// "ALL", "FEMALE" or "MALE"
    #[serde(default)]
    pub sex: Option<String>,
}

/// A parsed rule set with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCriteria {
    /// `llm_v1` or `rule_v1`
    pub parser_version: String,

    pub rules: Vec<StoredRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageStats>,
}

impl ParsedCriteria {
    pub fn new(parser_version: impl Into<String>, rules: Vec<CriteriaRule>) -> Self {
        Self {
            parser_version: parser_version.into(),
            rules: rules.into_iter().map(StoredRule::from).collect(),
            coverage: None,
        }
    }

    pub fn with_coverage(mut self, coverage: CoverageStats) -> Self {
        self.coverage = Some(coverage);
        self
    }
}

/// One clinical trial, identified by its registry id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub nct_id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub phase: Option<String>,

    #[serde(default)]
    pub conditions: Vec<String>,

    #[serde(default)]
    pub eligibility: EligibilityModule,

    #[serde(default)]
    pub locations: Vec<String>,

    /// Previously parsed rule set, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_json: Option<ParsedCriteria>,

    /// When the record was pulled from the registry (ranking tie-breaker)
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl TrialRecord {
    pub fn new(nct_id: impl Into<String>) -> Self {
        Self {
            nct_id: nct_id.into(),
            title: String::new(),
            status: None,
            phase: None,
            conditions: Vec::new(),
            eligibility: EligibilityModule::default(),
            locations: Vec::new(),
            criteria_json: None,
            fetched_at: None,
        }
    }

    /// Eligibility free text, empty when the registry had none
    pub fn eligibility_text(&self) -> &str {
        self.eligibility.eligibility_criteria.as_deref().unwrap_or("")
    }

    /// The parsed rules, if a non-empty rule set is attached
    pub fn parsed_rules(&self) -> Option<&[StoredRule]> {
        self.criteria_json
            .as_ref()
            .map(|parsed| parsed.rules.as_slice())
            .filter(|rules| !rules.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_fields_use_camel_case() {
        let json = r#"{
            "nct_id": "NCT00000001",
            "title": "Metformin study",
            "conditions": ["diabetes mellitus"],
            "eligibility": {"minimumAge": "18 Years", "maximumAge": "65 Years", "sex": "FEMALE"}
        }"#;
        let trial: TrialRecord = serde_json::from_str(json).unwrap();
        assert_eq!(trial.eligibility.minimum_age.as_deref(), Some("18 Years"));
        assert_eq!(trial.eligibility.sex.as_deref(), Some("FEMALE"));
        assert!(trial.parsed_rules().is_none());
        assert_eq!(trial.eligibility_text(), "");
    }

    #[test]
    fn test_empty_rule_set_counts_as_unparsed() {
        let mut trial = TrialRecord::new("NCT00000002");
        trial.criteria_json = Some(ParsedCriteria::new("rule_v1", Vec::new()));
        assert!(trial.parsed_rules().is_none());
    }
}
