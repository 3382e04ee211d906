//! Patient profile supplied to the evaluator.
//!
//! Every field is optional. Accessors return `None` for absent data (and for
//! empty lists), which the evaluator turns into UNKNOWN verdicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    #[serde(default)]
    pub age: Option<f64>,

    #[serde(default)]
    pub sex: Option<String>,

    #[serde(default)]
    pub conditions: Option<Vec<String>>,

    #[serde(default)]
    pub medications: Option<Vec<String>>,

    #[serde(default)]
    pub procedures: Option<Vec<String>>,

    #[serde(default)]
    pub history: Option<Vec<String>>,

    /// Lab name -> latest value
    #[serde(default)]
    pub labs: Option<BTreeMap<String, f64>>,
}

impl PatientProfile {
    /// Age in years, ignoring negative or non-finite values
    pub fn age(&self) -> Option<f64> {
        self.age.filter(|age| age.is_finite() && *age >= 0.0)
    }

    /// Sex normalized to lowercase
    pub fn sex(&self) -> Option<String> {
        self.sex
            .as_deref()
            .map(|sex| sex.trim().to_lowercase())
            .filter(|sex| !sex.is_empty())
    }

    pub fn conditions(&self) -> Option<&[String]> {
        non_empty(&self.conditions)
    }

    pub fn medications(&self) -> Option<&[String]> {
        non_empty(&self.medications)
    }

    pub fn procedures(&self) -> Option<&[String]> {
        non_empty(&self.procedures)
    }

    pub fn history(&self) -> Option<&[String]> {
        non_empty(&self.history)
    }

    /// Look up a lab value by name, ignoring case and punctuation
    /// ("HbA1c", "hba1c" and "Hb A1c" all match).
    ///
    /// Without an exact match, a qualified name matches its bare form:
    /// "Serum creatinine" finds "creatinine" and the other way round.
    pub fn lab_value(&self, analyte: &str) -> Option<f64> {
        let wanted = normalize_lab_name(analyte);
        if wanted.is_empty() {
            return None;
        }
        let labs = self.labs.as_ref()?;
        let finite = |value: &f64| value.is_finite().then_some(*value);

        labs.iter()
            .find(|(name, _)| normalize_lab_name(name) == wanted)
            .and_then(|(_, value)| finite(value))
            .or_else(|| {
                let wanted_tail = lab_name_tail(analyte);
                labs.iter()
                    .find(|(name, _)| {
                        lab_name_tail(name).is_some_and(|tail| tail == wanted)
                            || wanted_tail
                                .as_deref()
                                .is_some_and(|tail| tail == normalize_lab_name(name))
                    })
                    .and_then(|(_, value)| finite(value))
            })
    }
}

fn non_empty(list: &Option<Vec<String>>) -> Option<&[String]> {
    list.as_deref().filter(|items| !items.is_empty())
}

fn normalize_lab_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalized last word of a multi-word lab name
fn lab_name_tail(name: &str) -> Option<String> {
    let mut words = name.split_whitespace();
    let last = words.next_back()?;
    words.next()?;
    Some(normalize_lab_name(last)).filter(|tail| tail.chars().count() >= 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default_to_none() {
        let patient: PatientProfile = serde_json::from_str(r#"{"age": 45}"#).unwrap();
        assert_eq!(patient.age(), Some(45.0));
        assert!(patient.sex().is_none());
        assert!(patient.conditions().is_none());
        assert!(patient.lab_value("hba1c").is_none());
    }

    #[test]
    fn test_empty_lists_count_as_absent() {
        let patient = PatientProfile {
            medications: Some(Vec::new()),
            ..Default::default()
        };
        assert!(patient.medications().is_none());
    }

    #[test]
    fn test_negative_age_is_ignored() {
        let patient = PatientProfile {
            age: Some(-3.0),
            ..Default::default()
        };
        assert!(patient.age().is_none());
    }

    #[test]
    fn test_lab_lookup_normalizes_names() {
        let patient = PatientProfile {
            labs: Some([("HbA1c".to_string(), 7.4)].into_iter().collect()),
            ..Default::default()
        };
        assert_eq!(patient.lab_value("Hb A1c"), Some(7.4));
        assert_eq!(patient.lab_value("hba1c"), Some(7.4));
        assert!(patient.lab_value("egfr").is_none());
    }

    #[test]
    fn test_lab_lookup_matches_qualified_names() {
        let patient = PatientProfile {
            labs: Some(
                [
                    ("creatinine".to_string(), 1.1),
                    ("Serum albumin".to_string(), 3.9),
                    ("Neutrophil count".to_string(), 2.0),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };
        assert_eq!(patient.lab_value("Serum creatinine"), Some(1.1));
        assert_eq!(patient.lab_value("albumin"), Some(3.9));

        // a shared generic last word is not enough
        assert!(patient.lab_value("white blood cell count").is_none());
    }

    #[test]
    fn test_sex_is_lowercased() {
        let patient = PatientProfile {
            sex: Some(" Female ".to_string()),
            ..Default::default()
        };
        assert_eq!(patient.sex().as_deref(), Some("female"));
    }
}
