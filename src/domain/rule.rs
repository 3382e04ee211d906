//! Criteria rule types.
//!
//! A rule is a shared envelope (id, type, certainty, evidence) flattened
//! together with a field-specific [`Constraint`]. The constraint enum is
//! tagged by `field`, so the JSON shape stays flat:
//!
//! ```json
//! {"id": "inc_01_age", "type": "INCLUSION", "field": "age", "operator": ">=",
//!  "value": 18, "unit": "years", "certainty": "high",
//!  "evidence_text": "Adults aged 18 years or older."}
//! ```
//!
//! Operators always state the requirement the patient must satisfy, so a
//! PASS verdict is favourable regardless of the rule's type.

use serde::{Deserialize, Serialize};

/// Which section of the eligibility text a rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Inclusion,
    Exclusion,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Inclusion => "INCLUSION",
            RuleType::Exclusion => "EXCLUSION",
        }
    }

    /// Short prefix used in generated rule ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            RuleType::Inclusion => "inc",
            RuleType::Exclusion => "exc",
        }
    }
}

/// Extraction confidence (not a clinical probability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Certainty {
    High,
    Medium,
    Low,
}

impl Certainty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Certainty::High => "high",
            Certainty::Medium => "medium",
            Certainty::Low => "low",
        }
    }
}

/// Field names of the criteria grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Age,
    Sex,
    Condition,
    Medication,
    Lab,
    Procedure,
    History,
    Other,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Age => "age",
            Field::Sex => "sex",
            Field::Condition => "condition",
            Field::Medication => "medication",
            Field::Lab => "lab",
            Field::Procedure => "procedure",
            Field::History => "history",
            Field::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "age" => Some(Field::Age),
            "sex" => Some(Field::Sex),
            "condition" => Some(Field::Condition),
            "medication" => Some(Field::Medication),
            "lab" => Some(Field::Lab),
            "procedure" => Some(Field::Procedure),
            "history" => Some(Field::History),
            "other" => Some(Field::Other),
            _ => None,
        }
    }

    /// Age and sex are demographic gates rather than clinical evidence
    pub fn is_demographic(&self) -> bool {
        matches!(self, Field::Age | Field::Sex)
    }

    /// Fields whose PASS counts as strong clinical evidence for a match
    pub fn is_strong_evidence(&self) -> bool {
        matches!(
            self,
            Field::History | Field::Procedure | Field::Medication | Field::Lab
        )
    }
}

/// Numeric comparison used by age, lab and duration rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "=")]
    Eq,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Gte => ">=",
            Comparator::Lte => "<=",
            Comparator::Eq => "=",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            ">=" => Some(Comparator::Gte),
            "<=" => Some(Comparator::Lte),
            "=" => Some(Comparator::Eq),
            _ => None,
        }
    }

    /// `actual OP threshold`
    pub fn holds(&self, actual: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gte => actual >= threshold,
            Comparator::Lte => actual <= threshold,
            Comparator::Eq => (actual - threshold).abs() < 1e-9,
        }
    }

    /// Requirement left over when a *strict* bound in this direction
    /// excludes: "HbA1c > 10%" excludes, so the requirement is `<= 10`.
    ///
    /// An excluded inclusive bound (`>= 10`) or value (`= 3`) leaves a
    /// strict or not-equal requirement, which this grammar cannot state.
    pub fn strict_complement(&self) -> Option<Self> {
        match self {
            Comparator::Gte => Some(Comparator::Lte),
            Comparator::Lte => Some(Comparator::Gte),
            Comparator::Eq => None,
        }
    }
}

/// The only operator a sex rule accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SexOp {
    #[serde(rename = "=")]
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SexValue {
    Male,
    Female,
    All,
}

impl SexValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            SexValue::Male => "male",
            SexValue::Female => "female",
            SexValue::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "male" => Some(SexValue::Male),
            "female" => Some(SexValue::Female),
            "all" => Some(SexValue::All),
            _ => None,
        }
    }
}

/// Operators for list-valued patient fields (condition, medication,
/// procedure, history)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConceptOp {
    In,
    NotIn,
    NoHistory,
    WithinLast,
    Exists,
    NotExists,
}

impl ConceptOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptOp::In => "IN",
            ConceptOp::NotIn => "NOT_IN",
            ConceptOp::NoHistory => "NO_HISTORY",
            ConceptOp::WithinLast => "WITHIN_LAST",
            ConceptOp::Exists => "EXISTS",
            ConceptOp::NotExists => "NOT_EXISTS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN" => Some(ConceptOp::In),
            "NOT_IN" => Some(ConceptOp::NotIn),
            "NO_HISTORY" => Some(ConceptOp::NoHistory),
            "WITHIN_LAST" => Some(ConceptOp::WithinLast),
            "EXISTS" => Some(ConceptOp::Exists),
            "NOT_EXISTS" => Some(ConceptOp::NotExists),
            _ => None,
        }
    }

    /// True when a match against the patient's list counts as satisfied
    pub fn is_positive(&self) -> bool {
        matches!(self, ConceptOp::In | ConceptOp::Exists)
    }
}

/// Operators for free-form `other` rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtherOp {
    #[serde(rename = "EXISTS")]
    Exists,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "=")]
    Eq,
}

impl OtherOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtherOp::Exists => "EXISTS",
            OtherOp::Gte => ">=",
            OtherOp::Lte => "<=",
            OtherOp::Eq => "=",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EXISTS" => Some(OtherOp::Exists),
            ">=" => Some(OtherOp::Gte),
            "<=" => Some(OtherOp::Lte),
            "=" => Some(OtherOp::Eq),
            _ => None,
        }
    }
}

/// Loosely typed value for `other` rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeRule {
    pub operator: Comparator,
    pub value: f64,
    /// `None` or `"years"`
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SexRule {
    pub operator: SexOp,
    pub value: SexValue,
}

/// Rule over a list-valued patient field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRule {
    pub operator: ConceptOp,
    pub value: String,
    /// Human-readable duration, only for `WITHIN_LAST`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabRule {
    /// Lab marker name, e.g. "HbA1c"
    pub analyte: String,
    pub operator: Comparator,
    pub value: f64,
    pub unit: Option<String>,
}

impl LabRule {
    /// True for thresholds such as "ALT <= 3 x ULN"
    pub fn is_relative_to_uln(&self) -> bool {
        self.unit
            .as_deref()
            .is_some_and(|unit| unit.to_ascii_lowercase().contains("uln"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherRule {
    pub operator: OtherOp,
    #[serde(default)]
    pub value: Option<RuleValue>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Field-specific part of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "lowercase")]
pub enum Constraint {
    Age(AgeRule),
    Sex(SexRule),
    Condition(ConceptRule),
    Medication(ConceptRule),
    Procedure(ConceptRule),
    History(ConceptRule),
    Lab(LabRule),
    Other(OtherRule),
}

impl Constraint {
    pub fn field(&self) -> Field {
        match self {
            Constraint::Age(_) => Field::Age,
            Constraint::Sex(_) => Field::Sex,
            Constraint::Condition(_) => Field::Condition,
            Constraint::Medication(_) => Field::Medication,
            Constraint::Procedure(_) => Field::Procedure,
            Constraint::History(_) => Field::History,
            Constraint::Lab(_) => Field::Lab,
            Constraint::Other(_) => Field::Other,
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Constraint::Age(rule) => rule.operator.as_str(),
            Constraint::Sex(_) => "=",
            Constraint::Condition(rule)
            | Constraint::Medication(rule)
            | Constraint::Procedure(rule)
            | Constraint::History(rule) => rule.operator.as_str(),
            Constraint::Lab(rule) => rule.operator.as_str(),
            Constraint::Other(rule) => rule.operator.as_str(),
        }
    }

    pub fn value(&self) -> serde_json::Value {
        match self {
            Constraint::Age(rule) => serde_json::json!(rule.value),
            Constraint::Sex(rule) => serde_json::json!(rule.value.as_str()),
            Constraint::Condition(rule)
            | Constraint::Medication(rule)
            | Constraint::Procedure(rule)
            | Constraint::History(rule) => serde_json::json!(rule.value),
            Constraint::Lab(rule) => serde_json::json!(rule.value),
            Constraint::Other(rule) => match &rule.value {
                Some(RuleValue::Number(n)) => serde_json::json!(n),
                Some(RuleValue::Text(s)) => serde_json::json!(s),
                None => serde_json::Value::Null,
            },
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            Constraint::Age(rule) => rule.unit.as_deref(),
            Constraint::Lab(rule) => rule.unit.as_deref(),
            Constraint::Other(rule) => rule.unit.as_deref(),
            _ => None,
        }
    }

    pub fn time_window(&self) -> Option<&str> {
        match self {
            Constraint::Condition(rule)
            | Constraint::Medication(rule)
            | Constraint::Procedure(rule)
            | Constraint::History(rule) => rule.time_window.as_deref(),
            _ => None,
        }
    }
}

/// Character offsets into the original eligibility text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

/// One atomic eligibility constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaRule {
    /// Unique within a trial's rule set
    pub id: String,

    #[serde(rename = "type")]
    pub rule_type: RuleType,

    #[serde(flatten)]
    pub constraint: Constraint,

    pub certainty: Certainty,

    /// Excerpt of the source text supporting the rule (never empty)
    pub evidence_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_span: Option<SourceSpan>,
}

impl CriteriaRule {
    pub fn field(&self) -> Field {
        self.constraint.field()
    }

    /// Known rules are the ones the evaluator can act on with some confidence
    pub fn is_known(&self) -> bool {
        self.field() != Field::Other && self.certainty != Certainty::Low
    }

    /// Placeholder emitted for an inclusion sentence no matcher understood
    pub fn placeholder(id: String, sentence: &str) -> Self {
        Self {
            id,
            rule_type: RuleType::Inclusion,
            constraint: Constraint::Other(OtherRule {
                operator: OtherOp::Exists,
                value: None,
                unit: None,
            }),
            certainty: Certainty::Low,
            evidence_text: sentence.to_string(),
            source_span: None,
        }
    }
}

/// A rule as stored by the persistence layer.
///
/// Rule sets written by older parser versions may not fit the typed grammar;
/// those are kept verbatim and evaluated as unknown instead of failing the
/// whole trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredRule {
    Typed(CriteriaRule),
    Raw(serde_json::Value),
}

impl From<CriteriaRule> for StoredRule {
    fn from(rule: CriteriaRule) -> Self {
        StoredRule::Typed(rule)
    }
}
