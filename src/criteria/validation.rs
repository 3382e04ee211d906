//! Schema validation for LLM-produced rules.
//!
//! The model's JSON is checked field by field before anything is typed.
//! One bad rule rejects the whole response.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::grounding::locate_evidence;
use super::llm_v1::LlmParseError;
use super::rule_v1::concept_constraint;
use crate::domain::{
    AgeRule, Certainty, Comparator, ConceptOp, ConceptRule, Constraint, CriteriaRule, Field,
    LabRule, OtherOp, OtherRule, RuleType, RuleValue, SexOp, SexRule, SexValue, SourceSpan,
};

/// Validate the `{"rules": [...]}` root and type every rule
pub fn validate_rules(root: &Value, source: &str) -> Result<Vec<CriteriaRule>, LlmParseError> {
    let object = root
        .as_object()
        .ok_or_else(|| LlmParseError::MalformedResponse("root is not a JSON object".into()))?;
    let rules = object
        .get("rules")
        .ok_or_else(|| LlmParseError::MalformedResponse("missing 'rules' key".into()))?
        .as_array()
        .ok_or_else(|| LlmParseError::MalformedResponse("'rules' is not an array".into()))?;

    let source_chars = source.chars().count();
    let mut seen_ids = HashSet::new();
    let mut typed = Vec::with_capacity(rules.len());

    for (index, raw) in rules.iter().enumerate() {
        let rule = validate_rule(index, raw, source, source_chars)?;
        if !seen_ids.insert(rule.id.clone()) {
            return Err(schema(index, format!("duplicate id '{}'", rule.id)));
        }
        typed.push(rule);
    }

    Ok(typed)
}

fn validate_rule(
    index: usize,
    raw: &Value,
    source: &str,
    source_chars: usize,
) -> Result<CriteriaRule, LlmParseError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| schema(index, "rule is not an object"))?;

    let id = required_str(index, obj, "id")?.to_string();
    let rule_type = match required_str(index, obj, "type")? {
        "INCLUSION" => RuleType::Inclusion,
        "EXCLUSION" => RuleType::Exclusion,
        other => return Err(schema(index, format!("unknown type '{}'", other))),
    };
    let field_name = required_str(index, obj, "field")?;
    let field =
        Field::parse(field_name).ok_or_else(|| schema(index, format!("unknown field '{}'", field_name)))?;
    let certainty = match required_str(index, obj, "certainty")? {
        "high" => Certainty::High,
        "medium" => Certainty::Medium,
        "low" => Certainty::Low,
        other => return Err(schema(index, format!("unknown certainty '{}'", other))),
    };
    let operator = required_str(index, obj, "operator")?;

    let evidence_text = required_str(index, obj, "evidence_text")?.trim().to_string();
    let located = locate_evidence(source, &evidence_text);
    if !located.is_grounded() {
        return Err(LlmParseError::Hallucination {
            index,
            rule_id: id,
        });
    }

    let source_span = match obj.get("source_span") {
        None | Some(Value::Null) => located.span,
        Some(span) => Some(validate_span(index, span, source_chars)?),
    };

    let unit = optional_str(index, obj, "unit")?;
    let time_window = optional_str(index, obj, "time_window")?;
    let value = obj.get("value").unwrap_or(&Value::Null);

    let constraint = match field {
        Field::Age => {
            let unit = match unit.as_deref() {
                None | Some("years") => Some("years".to_string()),
                Some(other) => return Err(schema(index, format!("age unit '{}' is not years", other))),
            };
            Constraint::Age(AgeRule {
                operator: comparator(index, operator)?,
                value: number(index, value)?,
                unit,
            })
        }
        Field::Sex => {
            if operator != "=" {
                return Err(schema(index, format!("sex operator '{}' is not '='", operator)));
            }
            require_null_unit(index, &unit)?;
            let sex = value
                .as_str()
                .and_then(SexValue::parse)
                .ok_or_else(|| schema(index, "sex value must be male, female or all"))?;
            Constraint::Sex(SexRule {
                operator: SexOp::Eq,
                value: sex,
            })
        }
        Field::Lab => Constraint::Lab(LabRule {
            analyte: required_str(index, obj, "analyte")?.to_string(),
            operator: comparator(index, operator)?,
            value: number(index, value)?,
            unit,
        }),
        Field::Condition | Field::Medication | Field::Procedure | Field::History => {
            require_null_unit(index, &unit)?;
            let op = ConceptOp::parse(operator)
                .ok_or_else(|| schema(index, format!("operator '{}' not allowed for {}", operator, field_name)))?;
            let concept = value
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| schema(index, "concept value must be a non-empty string"))?;
            match (op, &time_window) {
                (ConceptOp::WithinLast, None) => {
                    return Err(schema(index, "WITHIN_LAST requires time_window"))
                }
                (op, Some(_)) if op != ConceptOp::WithinLast => {
                    return Err(schema(index, "time_window only allowed with WITHIN_LAST"))
                }
                _ => {}
            }
            let rule = ConceptRule {
                operator: op,
                value: concept.to_string(),
                time_window: time_window.clone(),
            };
            concept_constraint(field, rule)
                .ok_or_else(|| schema(index, format!("field '{}' is not list-valued", field_name)))?
        }
        Field::Other => {
            let op = OtherOp::parse(operator)
                .ok_or_else(|| schema(index, format!("operator '{}' not allowed for other", operator)))?;
            let rule_value = match (op, value) {
                (_, Value::Number(n)) => n.as_f64().map(RuleValue::Number),
                (_, Value::String(s)) if op == OtherOp::Exists => Some(RuleValue::Text(s.clone())),
                (OtherOp::Exists, Value::Null) => None,
                _ => return Err(schema(index, "other comparison needs a numeric value")),
            };
            Constraint::Other(OtherRule {
                operator: op,
                value: rule_value,
                unit,
            })
        }
    };

    if time_window.is_some() && constraint.time_window().is_none() {
        return Err(schema(index, "time_window only allowed with WITHIN_LAST"));
    }

    Ok(CriteriaRule {
        id,
        rule_type,
        constraint,
        certainty,
        evidence_text,
        source_span,
    })
}

fn schema(index: usize, reason: impl Into<String>) -> LlmParseError {
    LlmParseError::Schema {
        index,
        reason: reason.into(),
    }
}

fn required_str<'a>(
    index: usize,
    obj: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, LlmParseError> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| schema(index, format!("'{}' must be a non-empty string", key)))
}

fn optional_str(
    index: usize,
    obj: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, LlmParseError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(schema(index, format!("'{}' must be a string or null", key))),
    }
}

fn require_null_unit(index: usize, unit: &Option<String>) -> Result<(), LlmParseError> {
    match unit {
        None => Ok(()),
        Some(u) => Err(schema(index, format!("unit '{}' not allowed for this field", u))),
    }
}

fn comparator(index: usize, operator: &str) -> Result<Comparator, LlmParseError> {
    Comparator::parse(operator)
        .ok_or_else(|| schema(index, format!("comparison operator '{}' not allowed", operator)))
}

fn number(index: usize, value: &Value) -> Result<f64, LlmParseError> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| schema(index, "value must be numeric"))
}

fn validate_span(index: usize, span: &Value, source_chars: usize) -> Result<SourceSpan, LlmParseError> {
    let start = span.get("start").and_then(Value::as_u64);
    let end = span.get("end").and_then(Value::as_u64);
    match (start, end) {
        (Some(start), Some(end)) if start < end && end as usize <= source_chars => Ok(SourceSpan {
            start: start as usize,
            end: end as usize,
        }),
        _ => Err(schema(index, "source_span must satisfy 0 <= start < end <= text length")),
    }
}
