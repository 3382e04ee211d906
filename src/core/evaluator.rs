//! Rule evaluator: one patient against one trial.
//!
//! Trials with a parsed rule set are evaluated rule by rule. Trials without
//! one take the legacy path over raw registry fields: condition overlap plus
//! age and sex exclusion checks. Missing patient data never errors, it turns
//! into an UNKNOWN verdict naming the field that would resolve it.

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{
    Checklist, ConceptOp, ConceptRule, Constraint, CriteriaRule, EvaluationMeta, EvaluationPath,
    Field, PatientProfile, RequiredAction, RuleMeta, RuleType, RuleVerdict, SexValue, StoredRule,
    TrialRecord, Verdict,
};

/// Id of the condition-overlap rule added by the evaluator
pub const CONDITION_OVERLAP_ID: &str = "condition_overlap";
pub const LEGACY_AGE_ID: &str = "legacy_age";
pub const LEGACY_SEX_ID: &str = "legacy_sex";

/// Verdicts for one (patient, trial) pair
#[derive(Debug, Clone, PartialEq)]
pub struct TrialEvaluation {
    pub checklist: Checklist,
    /// Deduplicated patient fields that blocked evaluation, in first-seen order
    pub missing_info: Vec<String>,
    pub path: EvaluationPath,
}

/// Evaluate a patient against a trial
pub fn evaluate_trial(patient: &PatientProfile, trial: &TrialRecord) -> TrialEvaluation {
    let (checklist, path) = match trial.parsed_rules() {
        Some(rules) => (evaluate_parsed(patient, trial, rules), EvaluationPath::Parsed),
        None => (evaluate_legacy(patient, trial), EvaluationPath::Legacy),
    };

    let mut missing_info: Vec<String> = Vec::new();
    for field in checklist.iter().filter_map(RuleVerdict::missing_field) {
        if !missing_info.iter().any(|f| f == field) {
            missing_info.push(field.to_string());
        }
    }

    debug!(
        nct_id = %trial.nct_id,
        path = ?path,
        rules = checklist.len(),
        missing = missing_info.len(),
        "Evaluated trial"
    );

    TrialEvaluation {
        checklist,
        missing_info,
        path,
    }
}

fn evaluate_parsed(patient: &PatientProfile, trial: &TrialRecord, rules: &[StoredRule]) -> Checklist {
    let mut checklist = Checklist::default();

    let has_condition_inclusion = rules.iter().any(|rule| {
        matches!(rule, StoredRule::Typed(r)
            if r.rule_type == RuleType::Inclusion && r.field() == Field::Condition)
    });
    if !has_condition_inclusion {
        checklist
            .inclusion
            .push(condition_overlap(patient, &trial.conditions));
    }

    for (index, stored) in rules.iter().enumerate() {
        let verdict = match stored {
            StoredRule::Typed(rule) => evaluate_rule(patient, rule),
            StoredRule::Raw(raw) => evaluate_untyped(index, raw),
        };
        match verdict.rule_meta.rule_type {
            RuleType::Inclusion => checklist.inclusion.push(verdict),
            RuleType::Exclusion => checklist.exclusion.push(verdict),
        }
    }

    checklist
}

fn evaluate_legacy(patient: &PatientProfile, trial: &TrialRecord) -> Checklist {
    Checklist {
        inclusion: vec![condition_overlap(patient, &trial.conditions)],
        exclusion: vec![
            legacy_age_check(
                patient,
                trial.eligibility.minimum_age.as_deref(),
                trial.eligibility.maximum_age.as_deref(),
            ),
            legacy_sex_check(patient, trial.eligibility.sex.as_deref()),
        ],
    }
}

/// Evaluate one typed rule
pub fn evaluate_rule(patient: &PatientProfile, rule: &CriteriaRule) -> RuleVerdict {
    let (verdict, evidence, meta) = match &rule.constraint {
        Constraint::Age(age) => match patient.age() {
            None => missing("age", RequiredAction::AddAge),
            Some(actual) => {
                let passed = age.operator.holds(actual, age.value);
                (
                    pass_fail(passed),
                    format!(
                        "patient age {} {} {} {}",
                        actual,
                        if passed { "satisfies" } else { "violates" },
                        age.operator.as_str(),
                        age.value
                    ),
                    None,
                )
            }
        },
        Constraint::Sex(sex) => match patient.sex() {
            None => missing("sex", RequiredAction::AddSex),
            Some(actual) => {
                let passed = sex.value == SexValue::All || actual == sex.value.as_str();
                (
                    pass_fail(passed),
                    format!("patient sex '{}' vs required '{}'", actual, sex.value.as_str()),
                    None,
                )
            }
        },
        Constraint::Condition(concept) => evaluate_concept(
            concept,
            patient.conditions(),
            Field::Condition,
            conditions_match,
        ),
        Constraint::Medication(concept) => evaluate_concept(
            concept,
            patient.medications(),
            Field::Medication,
            substring_match,
        ),
        Constraint::Procedure(concept) => evaluate_concept(
            concept,
            patient.procedures(),
            Field::Procedure,
            substring_match,
        ),
        Constraint::History(concept) => evaluate_concept(
            concept,
            patient.history(),
            Field::History,
            substring_match,
        ),
        // Thresholds relative to the upper limit of normal need the lab's own
        // reference range, which profiles do not carry
        Constraint::Lab(lab) if lab.is_relative_to_uln() => (
            Verdict::Unknown,
            format!(
                "{} threshold {} {} is relative to the upper limit of normal",
                lab.analyte,
                lab.operator.as_str(),
                lab.value
            ),
            Some(EvaluationMeta::no_evidence(Some(RequiredAction::AddProfileNotes))),
        ),
        Constraint::Lab(lab) => match patient.lab_value(&lab.analyte) {
            None => missing(
                format!("labs.{}", lab.analyte),
                RequiredAction::AddLabValue,
            ),
            Some(actual) => {
                let passed = lab.operator.holds(actual, lab.value);
                (
                    pass_fail(passed),
                    format!(
                        "{} {} {} {}{}",
                        lab.analyte,
                        actual,
                        if passed { "satisfies" } else { "violates" },
                        lab.operator.as_str(),
                        lab.value
                    ),
                    None,
                )
            }
        },
        Constraint::Other(_) => (
            Verdict::Unknown,
            "rule cannot be evaluated from structured profile data".to_string(),
            Some(EvaluationMeta::no_evidence(Some(RequiredAction::AddProfileNotes))),
        ),
    };

    debug!(rule_id = %rule.id, ?verdict, "Rule evaluated");

    RuleVerdict {
        rule_id: rule.id.clone(),
        verdict,
        evidence,
        rule_meta: RuleMeta::from_rule(rule),
        evaluation_meta: meta,
    }
}

type Outcome = (Verdict, String, Option<EvaluationMeta>);

fn pass_fail(passed: bool) -> Verdict {
    if passed {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

fn missing(field: impl Into<String>, action: RequiredAction) -> Outcome {
    let field = field.into();
    (
        Verdict::Unknown,
        format!("patient profile has no {}", field),
        Some(EvaluationMeta::missing(field, action)),
    )
}

fn evaluate_concept(
    concept: &ConceptRule,
    patient_items: Option<&[String]>,
    field: Field,
    matcher: fn(&str, &str) -> bool,
) -> Outcome {
    if concept.operator == ConceptOp::WithinLast {
        return (
            Verdict::Unknown,
            format!(
                "timing of '{}' within {} is not recorded",
                concept.value,
                concept.time_window.as_deref().unwrap_or("the stated window")
            ),
            Some(EvaluationMeta::missing(
                "history_timeline",
                RequiredAction::AddHistoryTimeline,
            )),
        );
    }

    let (list_name, action) = match field {
        Field::Condition => ("conditions", RequiredAction::AddConditions),
        Field::Medication => ("medications", RequiredAction::AddMedications),
        Field::Procedure => ("procedures", RequiredAction::AddProcedures),
        _ => ("history", RequiredAction::AddHistory),
    };
    let Some(items) = patient_items else {
        return missing(list_name, action);
    };

    let matched = items.iter().find(|item| matcher(item, &concept.value));
    let passed = matched.is_some() == concept.operator.is_positive();
    let evidence = match matched {
        Some(item) => format!("patient {} '{}' matches '{}'", list_name, item, concept.value),
        None => format!("no patient {} match '{}'", list_name, concept.value),
    };
    (pass_fail(passed), evidence, None)
}

/// Alphanumeric runs longer than two characters, lowercased
fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Substring in either direction, case-insensitive
pub fn substring_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// Substring in either direction, or any shared token
pub fn conditions_match(a: &str, b: &str) -> bool {
    substring_match(a, b) || !tokens(a).is_disjoint(&tokens(b))
}

/// Inclusion rule checking the patient against the trial's condition list
fn condition_overlap(patient: &PatientProfile, trial_conditions: &[String]) -> RuleVerdict {
    let trial_conditions: Vec<&String> = trial_conditions
        .iter()
        .filter(|c| !c.trim().is_empty())
        .collect();

    let (verdict, evidence, meta) = if trial_conditions.is_empty() {
        (
            Verdict::Unknown,
            "trial lists no conditions".to_string(),
            Some(EvaluationMeta::no_evidence(None)),
        )
    } else {
        match patient.conditions() {
            None => missing("conditions", RequiredAction::AddConditions),
            Some(items) => {
                let hit = items.iter().find_map(|item| {
                    trial_conditions
                        .iter()
                        .find(|tc| conditions_match(item, tc))
                        .map(|tc| (item, *tc))
                });
                match hit {
                    Some((item, tc)) => (
                        Verdict::Pass,
                        format!("patient condition '{}' overlaps trial condition '{}'", item, tc),
                        None,
                    ),
                    None => (
                        Verdict::Fail,
                        "no patient condition overlaps the trial conditions".to_string(),
                        None,
                    ),
                }
            }
        }
    };

    RuleVerdict {
        rule_id: CONDITION_OVERLAP_ID.to_string(),
        verdict,
        evidence,
        rule_meta: RuleMeta {
            rule_type: RuleType::Inclusion,
            field: Field::Condition.as_str().to_string(),
            operator: ConceptOp::In.as_str().to_string(),
            value: json!(trial_conditions),
            unit: None,
            time_window: None,
            certainty: None,
            injected: true,
        },
        evaluation_meta: meta,
    }
}

/// Parse a registry age such as "18 Years" or "6 Months" into years
pub fn parse_registry_age(raw: &str) -> Option<f64> {
    let mut parts = raw.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let unit = parts.next().map(str::to_lowercase).unwrap_or_default();
    let years = if unit.starts_with("month") {
        // TODO: confirm months/12 against the registry export; the legacy text says /52
        value / 12.0
    } else if unit.starts_with("week") {
        value / 52.0
    } else if unit.starts_with("day") {
        value / 365.0
    } else if unit.is_empty() || unit.starts_with("year") {
        value
    } else {
        return None;
    };
    Some(years)
}

fn legacy_age_check(
    patient: &PatientProfile,
    minimum_age: Option<&str>,
    maximum_age: Option<&str>,
) -> RuleVerdict {
    let min = minimum_age.and_then(parse_registry_age);
    let max = maximum_age.and_then(parse_registry_age);

    let (verdict, evidence, meta) = match patient.age() {
        None => missing("age", RequiredAction::AddAge),
        Some(age) => {
            let passed = min.map_or(true, |m| age >= m) && max.map_or(true, |m| age <= m);
            (
                pass_fail(passed),
                format!(
                    "patient age {} vs registry range [{}, {}]",
                    age,
                    minimum_age.unwrap_or("none"),
                    maximum_age.unwrap_or("none")
                ),
                None,
            )
        }
    };

    RuleVerdict {
        rule_id: LEGACY_AGE_ID.to_string(),
        verdict,
        evidence,
        rule_meta: RuleMeta {
            rule_type: RuleType::Exclusion,
            field: Field::Age.as_str().to_string(),
            operator: "BETWEEN".to_string(),
            value: json!({"min": min, "max": max}),
            unit: Some("years".to_string()),
            time_window: None,
            certainty: None,
            injected: true,
        },
        evaluation_meta: meta,
    }
}

fn legacy_sex_check(patient: &PatientProfile, registry_sex: Option<&str>) -> RuleVerdict {
    let required = registry_sex
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && s != "all");

    let (verdict, evidence, meta) = match patient.sex() {
        None => missing("sex", RequiredAction::AddSex),
        Some(actual) => match &required {
            None => (Verdict::Pass, "trial accepts all sexes".to_string(), None),
            Some(required) => (
                pass_fail(&actual == required),
                format!("patient sex '{}' vs registry '{}'", actual, required),
                None,
            ),
        },
    };

    RuleVerdict {
        rule_id: LEGACY_SEX_ID.to_string(),
        verdict,
        evidence,
        rule_meta: RuleMeta {
            rule_type: RuleType::Exclusion,
            field: Field::Sex.as_str().to_string(),
            operator: "=".to_string(),
            value: json!(required.unwrap_or_else(|| "all".to_string())),
            unit: None,
            time_window: None,
            certainty: None,
            injected: true,
        },
        evaluation_meta: meta,
    }
}

/// Stored rules that no longer fit the typed grammar
fn evaluate_untyped(index: usize, raw: &Value) -> RuleVerdict {
    let text = |key: &str| raw.get(key).and_then(Value::as_str);
    let rule_type = match text("type") {
        Some("EXCLUSION") => RuleType::Exclusion,
        _ => RuleType::Inclusion,
    };

    RuleVerdict {
        rule_id: text("id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("stored_{:02}", index + 1)),
        verdict: Verdict::Unknown,
        evidence: text("evidence_text")
            .unwrap_or("stored rule could not be interpreted")
            .to_string(),
        rule_meta: RuleMeta {
            rule_type,
            field: text("field").unwrap_or("other").to_string(),
            operator: text("operator").unwrap_or("").to_string(),
            value: raw.get("value").cloned().unwrap_or(Value::Null),
            unit: text("unit").map(str::to_string),
            time_window: text("time_window").map(str::to_string),
            certainty: None,
            injected: false,
        },
        evaluation_meta: Some(EvaluationMeta::no_evidence(Some(RequiredAction::AddProfileNotes))),
    }
}
