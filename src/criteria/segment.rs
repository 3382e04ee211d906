//! Eligibility text segmentation.
//!
//! Splits registry eligibility text into inclusion and exclusion sentences.
//! Headings ("Inclusion Criteria:", "Exclusion:") switch the active section;
//! text before the first heading, or all text when no heading exists, is
//! attributed to inclusion.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::RuleType;

/// Inline heading preceded by other text on the same line
static INLINE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\S)[ \t]+((?:inclusion|exclusion)(?:[ \t]+criteria)?[ \t]*:)").unwrap()
});

/// Heading at line start: needs "criteria" or a colon to count
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(inclusion|exclusion)(?:\s+criteria\b\s*:?|\s*:)\s*(.*)$").unwrap()
});

/// Bullet and list-number prefixes
static LIST_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*•·▪●◦‣]+|\(?\d{1,3}[.)]|\(?[a-zA-Z]\))\s+").unwrap()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Segmented eligibility text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentedCriteria {
    pub inclusion_sentences: Vec<String>,
    pub exclusion_sentences: Vec<String>,
    /// Whether any section heading was found
    #[serde(default)]
    pub has_headings: bool,
}

impl SegmentedCriteria {
    /// All sentences tagged with their section, inclusion first
    pub fn tagged(&self) -> impl Iterator<Item = (RuleType, &str)> {
        self.inclusion_sentences
            .iter()
            .map(|s| (RuleType::Inclusion, s.as_str()))
            .chain(
                self.exclusion_sentences
                    .iter()
                    .map(|s| (RuleType::Exclusion, s.as_str())),
            )
    }

    pub fn is_empty(&self) -> bool {
        self.inclusion_sentences.is_empty() && self.exclusion_sentences.is_empty()
    }
}

/// Split eligibility text into inclusion/exclusion sentences.
///
/// Total over all inputs: `None`, empty or whitespace-only text yields two
/// empty lists.
pub fn preprocess(text: Option<&str>) -> SegmentedCriteria {
    let mut segmented = SegmentedCriteria::default();
    let text = match text {
        Some(t) if !t.trim().is_empty() => t,
        _ => return segmented,
    };

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let normalized = INLINE_HEADING.replace_all(&normalized, "$1\n$2");

    let mut section = RuleType::Inclusion;

    for raw_line in normalized.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let content = match HEADING.captures(line) {
            Some(caps) => {
                segmented.has_headings = true;
                section = if caps[1].eq_ignore_ascii_case("exclusion") {
                    RuleType::Exclusion
                } else {
                    RuleType::Inclusion
                };
                caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string()
            }
            None => line.to_string(),
        };

        let cleaned = clean_line(&content);
        if cleaned.is_empty() {
            continue;
        }

        let target = match section {
            RuleType::Inclusion => &mut segmented.inclusion_sentences,
            RuleType::Exclusion => &mut segmented.exclusion_sentences,
        };
        target.extend(split_sentences(&cleaned));
    }

    segmented
}

/// Strip list prefixes and collapse whitespace
fn clean_line(line: &str) -> String {
    let mut current = line.trim().to_string();
    // Nested markers such as "- 1. text"
    loop {
        let stripped = LIST_PREFIX.replace(&current, "").to_string();
        if stripped == current {
            break;
        }
        current = stripped;
    }
    WHITESPACE.replace_all(current.trim(), " ").to_string()
}

/// Split on sentence-ending punctuation followed by whitespace
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    let sentence = text[start..idx + c.len_utf8()].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence.to_string());
                    }
                    start = next_idx;
                }
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(preprocess(None).is_empty());
        assert!(preprocess(Some("")).is_empty());
        assert!(preprocess(Some("   \n\t ")).is_empty());
    }

    #[test]
    fn test_headings_and_bullets() {
        let text = "Inclusion Criteria:\n- Adults aged 18 years or older.\n\nExclusion Criteria:\n1. Pregnant or breastfeeding.";
        let seg = preprocess(Some(text));
        assert_eq!(seg.inclusion_sentences, vec!["Adults aged 18 years or older."]);
        assert_eq!(seg.exclusion_sentences, vec!["Pregnant or breastfeeding."]);
        assert!(seg.has_headings);
    }

    #[test]
    fn test_no_heading_is_inclusion_only() {
        let seg = preprocess(Some("Adults over 18. Must sign consent."));
        assert_eq!(seg.inclusion_sentences.len(), 2);
        assert!(seg.exclusion_sentences.is_empty());
        assert!(!seg.has_headings);
    }

    #[test]
    fn test_inline_headings_are_split() {
        let seg = preprocess(Some(
            "Inclusion: age 18 or older. Exclusion: active infection.",
        ));
        assert_eq!(seg.inclusion_sentences, vec!["age 18 or older."]);
        assert_eq!(seg.exclusion_sentences, vec!["active infection."]);
    }

    #[test]
    fn test_preamble_goes_to_inclusion() {
        let text = "Healthy volunteers only\nExclusion Criteria\n* Smokers";
        let seg = preprocess(Some(text));
        assert_eq!(seg.inclusion_sentences, vec!["Healthy volunteers only"]);
        assert_eq!(seg.exclusion_sentences, vec!["Smokers"]);
    }

    #[test]
    fn test_crlf_and_whitespace_collapse() {
        let seg = preprocess(Some("Inclusion Criteria:\r\n  -   Adults    with   asthma\r\n"));
        assert_eq!(seg.inclusion_sentences, vec!["Adults with asthma"]);
    }

    #[test]
    fn test_word_starting_with_exclusion_is_not_heading() {
        let seg = preprocess(Some("Exclusion of smokers is planned."));
        assert_eq!(seg.inclusion_sentences, vec!["Exclusion of smokers is planned."]);
        assert!(!seg.has_headings);
    }

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let sentences = split_sentences("HbA1c between 7.5% and 10%. BMI under 40.");
        assert_eq!(sentences, vec!["HbA1c between 7.5% and 10%.", "BMI under 40."]);
    }
}
