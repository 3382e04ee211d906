//! Prompt and request payload for the LLM criteria extractor.

use serde_json::{json, Value};

pub const CRITERIA_SYSTEM_PROMPT: &str = r#"
You convert clinical-trial eligibility criteria into structured rules.
Extract ONLY constraints explicitly stated in the text. Never infer, never add
clinical advice.

Return a single JSON object and nothing else:
{"rules": [RULE, ...]}

Each RULE is an object with exactly these keys:
- "id": short unique string, e.g. "inc_01_age"
- "type": "INCLUSION" or "EXCLUSION"
- "field": one of "age", "sex", "condition", "medication", "lab", "procedure", "history", "other"
- "operator": depends on field
    age, lab: ">=", "<=", "="
    sex: "="
    condition, medication, procedure, history: "IN", "NOT_IN", "NO_HISTORY", "WITHIN_LAST", "EXISTS", "NOT_EXISTS"
    other: "EXISTS", ">=", "<=", "="
- "value": age and lab take a number; sex takes "male", "female" or "all";
  condition/medication/procedure/history take the concept as a string
- "analyte": lab rules only, the lab marker name, e.g. "HbA1c"
- "unit": age uses "years" or null; lab uses the stated unit; sex, condition,
  medication, procedure and history use null
- "time_window": only for WITHIN_LAST, a duration such as "6 months"; otherwise null
- "certainty": "high", "medium" or "low"
- "evidence_text": the exact excerpt of the criteria text supporting the rule
- "source_span": optional {"start": int, "end": int} character offsets of evidence_text

The operator states what the patient must satisfy. For exclusion criteria use
NOT_IN, NO_HISTORY or NOT_EXISTS. Invert strict thresholds only (exclude
age > 75 becomes age "<=" 75). An excluded inclusive bound such as age >= 75
cannot be inverted exactly: emit it as field "other", operator "EXISTS",
certainty "low".
"#;

/// Build the chat-completion request body
pub fn build_payload(model: &str, max_output_tokens: u32, criteria_text: &str) -> Value {
    json!({
        "model": model,
        "temperature": 0,
        "max_tokens": max_output_tokens,
        "response_format": {"type": "json_object"},
        "messages": [
            {"role": "system", "content": CRITERIA_SYSTEM_PROMPT.trim()},
            {"role": "user", "content": build_user_message(criteria_text)},
        ],
    })
}

fn build_user_message(criteria_text: &str) -> String {
    format!(
        "<criteria>\n{}\n</criteria>\n\nExtract every eligibility rule from the criteria above.",
        criteria_text.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload = build_payload("gpt-4o-mini", 2000, "  Adults aged 18 or older. ");
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["temperature"], 0);
        assert_eq!(payload["response_format"]["type"], "json_object");
        let user = payload["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("<criteria>\nAdults aged 18 or older.\n</criteria>"));
    }
}
