//! Evaluation output: per-rule verdicts and per-trial match results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rule::{Certainty, CriteriaRule, Field, RuleType};

/// Outcome of evaluating one rule against one patient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    Unknown,
}

/// Why a verdict is UNKNOWN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// The patient profile lacks the data the rule needs
    MissingField,
    /// The rule itself cannot be evaluated mechanically
    NoEvidence,
}

/// What would let the rule be evaluated next time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredAction {
    AddAge,
    AddSex,
    AddConditions,
    AddMedications,
    AddProcedures,
    AddHistory,
    AddLabValue,
    AddHistoryTimeline,
    AddProfileNotes,
}

/// Explanation attached to UNKNOWN verdicts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_field: Option<String>,
    pub reason_code: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
}

impl EvaluationMeta {
    pub fn missing(field: impl Into<String>, action: RequiredAction) -> Self {
        Self {
            missing_field: Some(field.into()),
            reason_code: ReasonCode::MissingField,
            required_action: Some(action),
        }
    }

    pub fn no_evidence(action: Option<RequiredAction>) -> Self {
        Self {
            missing_field: None,
            reason_code: ReasonCode::NoEvidence,
            required_action: action,
        }
    }
}

/// Rule description carried alongside a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMeta {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub field: String,
    pub operator: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certainty: Option<Certainty>,
    /// Rule was synthesized by the evaluator rather than parsed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub injected: bool,
}

impl RuleMeta {
    pub fn from_rule(rule: &CriteriaRule) -> Self {
        Self {
            rule_type: rule.rule_type,
            field: rule.field().as_str().to_string(),
            operator: rule.constraint.operator().to_string(),
            value: rule.constraint.value(),
            unit: rule.constraint.unit().map(str::to_string),
            time_window: rule.constraint.time_window().map(str::to_string),
            certainty: Some(rule.certainty),
            injected: false,
        }
    }
}

/// Evaluation output for one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub rule_id: String,
    pub verdict: Verdict,
    pub evidence: String,
    pub rule_meta: RuleMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_meta: Option<EvaluationMeta>,
}

impl RuleVerdict {
    pub fn field(&self) -> Option<Field> {
        Field::parse(&self.rule_meta.field)
    }

    /// A failing age/sex exclusion check carries the large score penalty
    pub fn is_hard_fail(&self) -> bool {
        self.verdict == Verdict::Fail
            && self.rule_meta.rule_type == RuleType::Exclusion
            && self.field().is_some_and(|field| field.is_demographic())
    }

    /// Field name to report in `missing_info`, if the verdict is UNKNOWN
    /// because of absent patient data
    pub fn missing_field(&self) -> Option<&str> {
        self.evaluation_meta
            .as_ref()
            .filter(|meta| meta.reason_code == ReasonCode::MissingField)
            .and_then(|meta| meta.missing_field.as_deref())
    }
}

/// Coarse match classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Eligible,
    Potential,
    Ineligible,
}

/// Why an otherwise ELIGIBLE result was lowered to POTENTIAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DowngradeReason {
    /// Fewer evaluated rules than the evidence-volume floor
    InsufficientRuleVolume,
    /// Registry-field evaluation only checks condition overlap and age/sex
    LegacyPathCap,
    /// No inclusion condition rule passed
    ConditionNotConfirmed,
    /// Too few non-demographic rules passed
    InsufficientClinicalEvidence,
    /// No history/procedure/medication/lab rule passed
    NoStrongEvidence,
}

/// Which evaluation path produced the checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPath {
    /// Parsed criteria rules
    Parsed,
    /// Raw registry fields (no parsed rules available)
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub tier: Tier,
    pub pass_count: usize,
    pub fail_count: usize,
    pub unknown_count: usize,
    pub missing_count: usize,
    pub total_rules: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub downgrade_reasons: Vec<DowngradeReason>,
}

/// Inclusion and exclusion verdict lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub inclusion: Vec<RuleVerdict>,
    pub exclusion: Vec<RuleVerdict>,
}

impl Checklist {
    pub fn iter(&self) -> impl Iterator<Item = &RuleVerdict> {
        self.inclusion.iter().chain(self.exclusion.iter())
    }

    pub fn len(&self) -> usize {
        self.inclusion.len() + self.exclusion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.iter().filter(|v| v.verdict == verdict).count()
    }
}

/// Result for one (patient, trial) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub nct_id: String,
    pub title: String,
    pub checklist: Checklist,
    /// Deduplicated patient fields that blocked evaluation
    pub missing_info: Vec<String>,
    pub score: f64,
    /// Fraction of rules that passed
    pub certainty: f64,
    pub match_summary: MatchSummary,
    pub evaluation_path: EvaluationPath,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}
