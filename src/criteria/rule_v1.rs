//! Rule-based criteria extractor (`rule_v1`).
//!
//! Each sentence from the segmenter is run through a fixed, ordered list of
//! matchers. Every matcher whose predicate accepts the sentence runs (there
//! is no short-circuit, several fields can share one sentence) and the
//! results are concatenated in matcher order.
//!
//! Sentences that yield nothing are handled asymmetrically: inclusion
//! sentences produce a low-certainty `other/EXISTS` placeholder so the gap
//! shows up in coverage, exclusion sentences are dropped.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::grounding::locate_evidence;
use super::segment::preprocess;
use crate::domain::{
    AgeRule, Certainty, Comparator, ConceptOp, ConceptRule, Constraint, CriteriaRule, Field,
    LabRule, OtherOp, OtherRule, RuleType, RuleValue, SexOp, SexRule, SexValue,
};

/// Parser version tag recorded in provenance metadata
pub const PARSER_VERSION: &str = "rule_v1";

/// Oldest plausible age in years
const MAX_PLAUSIBLE_AGE: f64 = 120.0;

/// Failure inside a single matcher. The sentence contributes no rules.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MatchError {
    #[error("{matcher} matcher could not read number '{raw}'")]
    Number { matcher: &'static str, raw: String },

    #[error("{matcher} matcher produced implausible value {value}")]
    Implausible { matcher: &'static str, value: f64 },
}

/// Rules from one eligibility text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleExtraction {
    pub rules: Vec<CriteriaRule>,
    /// Sentences whose matchers failed
    pub failed_sentences: usize,
}

/// A rule before it receives an id and evidence
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub constraint: Constraint,
    pub certainty: Certainty,
}

impl Draft {
    fn new(constraint: Constraint, certainty: Certainty) -> Self {
        Self {
            constraint,
            certainty,
        }
    }
}

struct Sentence<'a> {
    text: &'a str,
    lower: String,
    rule_type: RuleType,
}

struct Matcher {
    name: &'static str,
    applies: fn(&Sentence) -> bool,
    extract: fn(&Sentence) -> Result<Vec<Draft>, MatchError>,
}

const MATCHERS: &[Matcher] = &[
    Matcher {
        name: "age",
        applies: mentions_age,
        extract: match_age,
    },
    Matcher {
        name: "sex",
        applies: is_inclusion,
        extract: match_sex,
    },
    Matcher {
        name: "lab",
        applies: has_digit,
        extract: match_labs,
    },
    Matcher {
        name: "condition",
        applies: always,
        extract: match_conditions,
    },
    Matcher {
        name: "duration",
        applies: mentions_duration,
        extract: match_duration,
    },
    Matcher {
        name: "common_exclusion",
        applies: is_exclusion,
        extract: match_common_exclusions,
    },
];

/// Parse eligibility text into rules
pub fn parse_criteria_v1(text: &str) -> Vec<CriteriaRule> {
    extract_rules_v1(text).rules
}

/// Parse eligibility text, also reporting sentences whose matchers failed
pub fn extract_rules_v1(text: &str) -> RuleExtraction {
    let segmented = preprocess(Some(text));
    let mut extraction = RuleExtraction::default();
    let mut seq = 0usize;

    for (rule_type, sentence) in segmented.tagged() {
        let drafts = match extract_sentence(sentence, rule_type) {
            Ok(drafts) => drafts,
            Err(e) => {
                debug!(error = %e, sentence, "Matcher failed, sentence yields no rules");
                extraction.failed_sentences += 1;
                Vec::new()
            }
        };

        let span = locate_evidence(text, sentence).span;

        if drafts.is_empty() {
            if rule_type == RuleType::Inclusion {
                seq += 1;
                let mut rule = CriteriaRule::placeholder(
                    rule_id(rule_type, seq, Field::Other),
                    sentence,
                );
                rule.source_span = span;
                extraction.rules.push(rule);
            }
            continue;
        }

        for draft in drafts {
            seq += 1;
            extraction.rules.push(CriteriaRule {
                id: rule_id(rule_type, seq, draft.constraint.field()),
                rule_type,
                constraint: draft.constraint,
                certainty: draft.certainty,
                evidence_text: sentence.to_string(),
                source_span: span,
            });
        }
    }

    extraction
}

/// Run every applicable matcher over one sentence
pub fn extract_sentence(text: &str, rule_type: RuleType) -> Result<Vec<Draft>, MatchError> {
    let sentence = Sentence {
        text,
        lower: text.to_lowercase(),
        rule_type,
    };

    let mut drafts = Vec::new();
    for matcher in MATCHERS {
        if (matcher.applies)(&sentence) {
            let found = (matcher.extract)(&sentence)?;
            if !found.is_empty() {
                debug!(matcher = matcher.name, count = found.len(), "Matcher hit");
            }
            drafts.extend(found);
        }
    }
    Ok(drafts)
}

fn rule_id(rule_type: RuleType, seq: usize, field: Field) -> String {
    format!("{}_{:02}_{}", rule_type.id_prefix(), seq, field.as_str())
}

// ============================================================================
// Predicates
// ============================================================================

fn always(_: &Sentence) -> bool {
    true
}

fn is_inclusion(s: &Sentence) -> bool {
    s.rule_type == RuleType::Inclusion
}

fn is_exclusion(s: &Sentence) -> bool {
    s.rule_type == RuleType::Exclusion
}

fn has_digit(s: &Sentence) -> bool {
    s.text.chars().any(|c| c.is_ascii_digit())
}

/// Keyword gate so bare numbers are not read as ages
fn mentions_age(s: &Sentence) -> bool {
    ["age", "year", "older", "younger"]
        .iter()
        .any(|kw| s.lower.contains(kw))
}

fn mentions_duration(s: &Sentence) -> bool {
    s.lower.contains("for ")
}

// ============================================================================
// Age
// ============================================================================

static AGE_RANGE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\bage[ds]?\s*(?:of\s*|between\s*|from\s*)?(\d{1,3})\s*(?:-|–|to|and)\s*(\d{1,3})\b").unwrap(),
        Regex::new(r"\b(\d{1,3})\s*(?:-|–|to|and)\s*(\d{1,3})\s*(?:years?|yrs?)\b").unwrap(),
    ]
});

/// Minimum-age patterns; a captured leading "for" marks a duration, not an age
static AGE_MIN: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b(?P<num>\d{1,3})\s*(?:years?|yrs?)?(?:\s+of\s+age)?\s+(?:or|and)\s+(?:older|over|above|greater)\b").unwrap(),
        Regex::new(r"\bage[ds]?\s*(?P<op>>=|≥|=>|>|of at least|at least|over|above|older than|greater than)\s*(?P<num>\d{1,3})\b").unwrap(),
        Regex::new(r"(?P<dur>\bfor\s+)?(?P<op>≥|>=|=>|>|at least|older than|over|above)\s*(?P<num>\d{1,3})\s*(?:years?|yrs?)\b").unwrap(),
        Regex::new(r"\b(?P<num>\d{1,3})\s*\+\s*(?:years?|yrs?)\b").unwrap(),
    ]
});

static AGE_MAX: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b(?P<num>\d{1,3})\s*(?:years?|yrs?)?(?:\s+of\s+age)?\s+(?:or|and)\s+(?:younger|under|below|less)\b").unwrap(),
        Regex::new(r"\bage[ds]?\s*(?P<op><=|≤|=<|<|of at most|at most|under|below|younger than|less than|up to)\s*(?P<num>\d{1,3})\b").unwrap(),
        Regex::new(r"(?P<dur>\bfor\s+)?(?P<op>≤|<=|=<|<|younger than|under|below|less than|up to|no older than)\s*(?P<num>\d{1,3})\s*(?:years?|yrs?)\b").unwrap(),
    ]
});

/// Operator phrases that leave the threshold itself out
const STRICT_OPERATORS: &[&str] = &[
    ">", "<", "over", "above", "older than", "greater than", "under", "below", "younger than",
    "less than",
];

/// A threshold as written in the sentence
struct Bound {
    comparator: Comparator,
    strict: bool,
}

impl Bound {
    /// Operator the patient must satisfy; `None` when an excluded bound
    /// leaves a requirement the grammar cannot express
    fn requirement(&self, rule_type: RuleType) -> Option<Comparator> {
        match rule_type {
            RuleType::Inclusion => Some(self.comparator),
            RuleType::Exclusion if self.strict => self.comparator.strict_complement(),
            RuleType::Exclusion => None,
        }
    }
}

fn match_age(s: &Sentence) -> Result<Vec<Draft>, MatchError> {
    let mut drafts = Vec::new();

    // An excluded range cannot be expressed as a conjunction of bounds
    if s.rule_type == RuleType::Inclusion {
        if let Some(caps) = AGE_RANGE.iter().find_map(|re| re.captures(&s.lower)) {
            let low = parse_age(&caps[1])?;
            let high = parse_age(&caps[2])?;
            let (low, high) = if low <= high { (low, high) } else { (high, low) };
            drafts.push(age_rule(Comparator::Gte, low));
            drafts.push(age_rule(Comparator::Lte, high));
            return Ok(drafts);
        }
    }

    if let Some(caps) = first_bound(&AGE_MIN, &s.lower) {
        drafts.push(age_draft(&caps, Comparator::Gte, s.rule_type)?);
    }
    if let Some(caps) = first_bound(&AGE_MAX, &s.lower) {
        drafts.push(age_draft(&caps, Comparator::Lte, s.rule_type)?);
    }
    Ok(drafts)
}

/// First match without a leading "for"
fn first_bound<'t>(patterns: &[Regex], text: &'t str) -> Option<Captures<'t>> {
    patterns
        .iter()
        .find_map(|re| re.captures_iter(text).find(|caps| caps.name("dur").is_none()))
}

fn age_draft(
    caps: &Captures,
    direction: Comparator,
    rule_type: RuleType,
) -> Result<Draft, MatchError> {
    let value = parse_age(&caps["num"])?;
    let bound = Bound {
        comparator: direction,
        strict: caps
            .name("op")
            .is_some_and(|op| STRICT_OPERATORS.contains(&op.as_str())),
    };

    Ok(match bound.requirement(rule_type) {
        Some(operator) => age_rule(operator, value),
        None => unexpressed_threshold(caps[0].trim().to_string(), Some("years".to_string())),
    })
}

fn age_rule(operator: Comparator, value: f64) -> Draft {
    Draft::new(
        Constraint::Age(AgeRule {
            operator,
            value,
            unit: Some("years".to_string()),
        }),
        Certainty::High,
    )
}

/// Low-certainty stand-in for an excluded threshold the grammar cannot
/// state; it evaluates as UNKNOWN and counts against coverage
fn unexpressed_threshold(description: String, unit: Option<String>) -> Draft {
    Draft::new(
        Constraint::Other(OtherRule {
            operator: OtherOp::Exists,
            value: Some(RuleValue::Text(description)),
            unit,
        }),
        Certainty::Low,
    )
}

fn parse_age(raw: &str) -> Result<f64, MatchError> {
    let value = parse_number(raw, "age")?;
    if value > MAX_PLAUSIBLE_AGE {
        return Err(MatchError::Implausible {
            matcher: "age",
            value,
        });
    }
    Ok(value)
}

fn parse_number(raw: &str, matcher: &'static str) -> Result<f64, MatchError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MatchError::Number {
            matcher,
            raw: raw.to_string(),
        })
}

// ============================================================================
// Sex
// ============================================================================

static SEX_ALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:all|both|either|any)\s+(?:sexes|sex|genders|gender)\b|\b(?:male|males|men)\s+(?:or|and)\s+(?:female|females|women)\b|\b(?:female|females|women)\s+(?:or|and)\s+(?:male|males|men)\b").unwrap()
});

static SEX_MALE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:male|males|men|man|boys?)\b").unwrap());

static SEX_FEMALE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:female|females|women|woman|girls?)\b").unwrap());

fn match_sex(s: &Sentence) -> Result<Vec<Draft>, MatchError> {
    let (value, certainty) = if SEX_ALL.is_match(&s.lower) {
        (SexValue::All, Certainty::High)
    } else {
        match (SEX_MALE.is_match(&s.lower), SEX_FEMALE.is_match(&s.lower)) {
            (true, true) => (SexValue::All, Certainty::Medium),
            (true, false) => (SexValue::Male, Certainty::Medium),
            (false, true) => (SexValue::Female, Certainty::Medium),
            (false, false) => return Ok(Vec::new()),
        }
    };

    Ok(vec![Draft::new(
        Constraint::Sex(SexRule {
            operator: SexOp::Eq,
            value,
        }),
        certainty,
    )])
}

// ============================================================================
// Lab thresholds
// ============================================================================

static LAB_THRESHOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b([a-z][a-z0-9\-]*(?:\s+[a-z0-9][a-z0-9\-]*){0,3})\s*",
        r"(>=|<=|=>|=<|≥|≤|>|<|=)\s*",
        r"(\d+(?:\.\d+)?)\s*",
        r"(%|mg/dl|g/dl|mmol/mol|mmol/l|µmol/l|umol/l|ml/min/1\.73\s*m2|ml/min/1\.73\s*m²|ml/min|kg/m2|kg/m²|mmhg|iu/l|u/l|ng/ml|pg/ml|cells/mm3|cells/µl|x\s*uln|×\s*uln|x\s*10\^?9/l|/mm3|/µl|mg/l|g/l)?"
    ))
    .unwrap()
});

const LAB_LEADING_NOISE: &[&str] = &[
    "a", "an", "the", "with", "and", "or", "if", "of", "patients", "patient", "participants",
    "subjects", "must", "have", "has", "having", "be", "is", "screening", "baseline", "level",
    "levels",
];

const LAB_TRAILING_NOISE: &[&str] = &[
    "level", "levels", "value", "values", "of", "is", "was", "must", "be", "should",
];

fn match_labs(s: &Sentence) -> Result<Vec<Draft>, MatchError> {
    let mut drafts = Vec::new();

    for caps in LAB_THRESHOLD.captures_iter(s.text) {
        let Some(analyte) = clean_analyte(&caps[1]) else {
            continue;
        };

        let (comparator, strict) = match &caps[2] {
            ">" => (Comparator::Gte, true),
            "<" => (Comparator::Lte, true),
            ">=" | "=>" | "≥" => (Comparator::Gte, false),
            "<=" | "=<" | "≤" => (Comparator::Lte, false),
            _ => (Comparator::Eq, false),
        };
        let value = parse_number(&caps[3], "lab")?;
        let unit = caps.get(4).map(|m| m.as_str().trim().to_string());

        let bound = Bound { comparator, strict };
        drafts.push(match bound.requirement(s.rule_type) {
            Some(operator) => Draft::new(
                Constraint::Lab(LabRule {
                    analyte,
                    operator,
                    value,
                    unit,
                }),
                Certainty::Medium,
            ),
            None => unexpressed_threshold(format!("{} {} {}", analyte, &caps[2], &caps[3]), unit),
        });
    }

    Ok(drafts)
}

/// Strip filler words around a captured lab name; `None` when nothing
/// lab-like remains or the marker is really an age
fn clean_analyte(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let start = words
        .iter()
        .position(|w| !LAB_LEADING_NOISE.contains(&w.to_lowercase().as_str()))?;
    let end = words
        .iter()
        .rposition(|w| !LAB_TRAILING_NOISE.contains(&w.to_lowercase().as_str()))?;
    if start > end {
        return None;
    }

    let analyte = words[start..=end].join(" ");
    let lower = analyte.to_lowercase();
    let last = lower.rsplit(' ').next().unwrap_or("");
    if matches!(last, "age" | "aged" | "ages" | "year" | "years" | "old")
        || lower.chars().all(|c| c.is_ascii_digit() || c == ' ')
    {
        return None;
    }
    Some(analyte)
}

// ============================================================================
// Conditions
// ============================================================================

const CONDITION_STOP: &str = r"(?:\s*[,.;:()\[\]]|\s+(?:who|and|or|that|which|for|in|at|on|within|as|by|defined|according|requiring|receiving|treated|despite|including|is|are|was|were|must|will|should|but|per|if|unless|without)\b|$)";

static CONDITION_PATTERNS: LazyLock<Vec<(Regex, Certainty)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(&format!(
                r"\bdiagnos(?:is|ed)\s+(?:of|with)\s+([a-z][a-z0-9'\- ]*?){}",
                CONDITION_STOP
            ))
            .unwrap(),
            Certainty::High,
        ),
        (
            Regex::new(r"\b((?:[a-z0-9'\-]+\s+){0,3}[a-z0-9'\-]+)\s+diagnosis\b").unwrap(),
            Certainty::High,
        ),
        (
            Regex::new(&format!(
                r"\bwith\s+([a-z][a-z0-9'\- ]*?){}",
                CONDITION_STOP
            ))
            .unwrap(),
            Certainty::Medium,
        ),
        (
            Regex::new(r"\b((?:[a-z0-9'\-]+\s+){0,2}[a-z0-9'\-]+)\s+symptoms\b").unwrap(),
            Certainty::Medium,
        ),
    ]
});

const CONDITION_NOISE: &[&str] = &[
    "a", "an", "the", "any", "with", "have", "has", "had", "having", "patients", "patient",
    "participants", "participant", "subjects", "subject", "adults", "adult", "men", "women",
    "who", "must", "be", "are", "is", "confirmed", "documented", "known", "diagnosed",
    "diagnosis", "history", "of", "prior", "previous", "current", "currently", "established",
    "newly", "clinical", "clinically", "histologically", "cytologically", "pathologically",
    "radiologically", "or", "and", "evidence", "screening", "signs", "presence",
];

const CONDITION_REJECT_PREFIXES: &[&str] = &[
    "at least", "at most", "no ", "the exception", "exception", "the following", "following",
    "informed consent", "consent", "written", "their", "his ", "her ", "this", "these",
    "respect", "regard", "ability", "the ability", "capacity", "access", "life expectancy",
    "adequate", "sufficient", "normal", "good", "measurable", "evaluable", "ecog",
    "karnofsky", "performance status",
];

const CONDITION_GENERIC: &[&str] = &[
    "disease", "diseases", "condition", "conditions", "illness", "disorder", "disorders",
    "symptoms", "treatment", "therapy",
];

/// Numbered disease names; any other digit in a capture marks a score,
/// stage range or threshold rather than a condition
static NUMBERED_CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\btype\s+[12]\b|\bcovid-19\b|\bhiv-[12]\b").unwrap()
});

static DIGIT_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:\.\d+)?\s*(?:years?|months?|weeks?|days?|mg|%|x)\b|[<>=≥≤%]").unwrap()
});

fn match_conditions(s: &Sentence) -> Result<Vec<Draft>, MatchError> {
    let operator = match s.rule_type {
        RuleType::Inclusion => ConceptOp::In,
        RuleType::Exclusion => ConceptOp::NotIn,
    };

    let mut seen: Vec<String> = Vec::new();
    let mut drafts = Vec::new();

    for (pattern, certainty) in CONDITION_PATTERNS.iter() {
        for caps in pattern.captures_iter(&s.lower) {
            let Some(condition) = clean_condition(&caps[1]) else {
                continue;
            };
            if seen.contains(&condition) {
                continue;
            }
            seen.push(condition.clone());
            drafts.push(Draft::new(
                Constraint::Condition(ConceptRule {
                    operator,
                    value: condition,
                    time_window: None,
                }),
                *certainty,
            ));
        }
    }

    Ok(drafts)
}

fn clean_condition(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let start = words.iter().position(|w| !CONDITION_NOISE.contains(w))?;
    let condition = words[start..].join(" ");
    let condition = condition.trim_matches(|c: char| c == '-' || c == '\'').trim();

    if condition.len() < 3
        || condition.len() > 60
        || condition.starts_with(|c: char| c.is_ascii_digit())
        || CONDITION_GENERIC.contains(&condition)
        || CONDITION_REJECT_PREFIXES
            .iter()
            .any(|prefix| condition.starts_with(prefix))
        || DIGIT_UNIT.is_match(condition)
        || NUMBERED_CONDITION
            .replace_all(condition, "")
            .chars()
            .any(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some(condition.to_string())
}

// ============================================================================
// Durations
// ============================================================================

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfor\s+(?:at\s+least|a\s+minimum\s+of|more\s+than|over|≥|>=)\s+(\d+(?:\.\d+)?)\s*(days?|weeks?|months?|years?)\b").unwrap()
});

fn match_duration(s: &Sentence) -> Result<Vec<Draft>, MatchError> {
    let mut drafts = Vec::new();
    for caps in DURATION.captures_iter(&s.lower) {
        drafts.push(Draft::new(
            Constraint::Other(OtherRule {
                operator: OtherOp::Gte,
                value: Some(RuleValue::Number(parse_number(&caps[1], "duration")?)),
                unit: Some(plural_unit(&caps[2])),
            }),
            Certainty::Medium,
        ));
    }
    Ok(drafts)
}

fn plural_unit(unit: &str) -> String {
    if unit.ends_with('s') {
        unit.to_string()
    } else {
        format!("{}s", unit)
    }
}

// ============================================================================
// Common exclusions
// ============================================================================

struct CommonExclusion {
    keywords: &'static [&'static str],
    field: Field,
    operator: ConceptOp,
    value: &'static str,
}

const COMMON_EXCLUSIONS: &[CommonExclusion] = &[
    CommonExclusion {
        keywords: &["pregnan"],
        field: Field::Condition,
        operator: ConceptOp::NotIn,
        value: "pregnancy",
    },
    CommonExclusion {
        keywords: &["breastfeed", "breast-feed", "breast feed", "lactat", "nursing mother"],
        field: Field::Condition,
        operator: ConceptOp::NotIn,
        value: "breastfeeding",
    },
    CommonExclusion {
        keywords: &["active infection", "uncontrolled infection"],
        field: Field::Condition,
        operator: ConceptOp::NotIn,
        value: "active infection",
    },
    CommonExclusion {
        keywords: &["surgery", "surgical procedure"],
        field: Field::Procedure,
        operator: ConceptOp::NoHistory,
        value: "surgery",
    },
    CommonExclusion {
        keywords: &[
            "prior treatment",
            "previous treatment",
            "prior therapy",
            "previous therapy",
            "previously treated",
        ],
        field: Field::History,
        operator: ConceptOp::NoHistory,
        value: "prior treatment",
    },
];

static TIME_WINDOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:within(?:\s+the)?(?:\s+(?:last|past|previous|prior))?|in\s+the\s+(?:last|past|previous|prior))\s+(\d+)\s*(days?|weeks?|months?|years?)\b").unwrap()
});

fn match_common_exclusions(s: &Sentence) -> Result<Vec<Draft>, MatchError> {
    let window = TIME_WINDOW.captures(&s.lower).map(|caps| {
        let count = &caps[1];
        let unit = if count == "1" {
            caps[2].trim_end_matches('s').to_string()
        } else {
            plural_unit(&caps[2])
        };
        format!("{} {}", count, unit)
    });

    let drafts = COMMON_EXCLUSIONS
        .iter()
        .filter(|entry| entry.keywords.iter().any(|kw| s.lower.contains(kw)))
        .filter_map(|entry| {
            let rule = ConceptRule {
                operator: if window.is_some() {
                    ConceptOp::WithinLast
                } else {
                    entry.operator
                },
                value: entry.value.to_string(),
                time_window: window.clone(),
            };
            concept_constraint(entry.field, rule).map(|c| Draft::new(c, Certainty::Medium))
        })
        .collect();

    Ok(drafts)
}

/// Wrap a concept rule in the constraint variant for a list-valued field
pub fn concept_constraint(field: Field, rule: ConceptRule) -> Option<Constraint> {
    match field {
        Field::Condition => Some(Constraint::Condition(rule)),
        Field::Medication => Some(Constraint::Medication(rule)),
        Field::Procedure => Some(Constraint::Procedure(rule)),
        Field::History => Some(Constraint::History(rule)),
        Field::Age | Field::Sex | Field::Lab | Field::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drafts(text: &str, rule_type: RuleType) -> Vec<Draft> {
        extract_sentence(text, rule_type).unwrap()
    }

    fn age_bounds(drafts: &[Draft]) -> Vec<(Comparator, f64)> {
        drafts
            .iter()
            .filter_map(|d| match &d.constraint {
                Constraint::Age(rule) => Some((rule.operator, rule.value)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_age_minimum() {
        let found = drafts("Adults aged 18 years or older.", RuleType::Inclusion);
        assert_eq!(age_bounds(&found), vec![(Comparator::Gte, 18.0)]);
    }

    #[test]
    fn test_age_range() {
        let found = drafts("Men and women aged 18-65 years.", RuleType::Inclusion);
        assert_eq!(
            age_bounds(&found),
            vec![(Comparator::Gte, 18.0), (Comparator::Lte, 65.0)]
        );
    }

    #[test]
    fn test_age_symbol_form() {
        let found = drafts("Age ≥ 21 at screening.", RuleType::Inclusion);
        assert_eq!(age_bounds(&found), vec![(Comparator::Gte, 21.0)]);
        // "age" marker must not double as a lab
        assert!(!found.iter().any(|d| d.constraint.field() == Field::Lab));
    }

    #[test]
    fn test_age_in_exclusion_is_inverted() {
        let found = drafts("Age over 75 years.", RuleType::Exclusion);
        assert_eq!(age_bounds(&found), vec![(Comparator::Lte, 75.0)]);
    }

    #[test]
    fn test_inclusive_exclusion_bounds_are_not_inverted() {
        for sentence in ["Age >= 75 years.", "75 years or older.", "Age of at least 75."] {
            let found = drafts(sentence, RuleType::Exclusion);
            assert!(age_bounds(&found).is_empty(), "{}", sentence);
            assert!(found.iter().any(|d| matches!(
                &d.constraint,
                Constraint::Other(OtherRule { operator: OtherOp::Exists, value: Some(RuleValue::Text(_)), .. })
            ) && d.certainty == Certainty::Low));
        }

        let strict = drafts("Age > 75 years.", RuleType::Exclusion);
        assert_eq!(age_bounds(&strict), vec![(Comparator::Lte, 75.0)]);
    }

    #[test]
    fn test_inclusive_exclusion_lab_bounds_are_not_inverted() {
        for sentence in ["HbA1c >= 10%.", "ECOG = 3.", "Platelets <= 50."] {
            let found = drafts(sentence, RuleType::Exclusion);
            assert!(
                !found.iter().any(|d| d.constraint.field() == Field::Lab),
                "{}",
                sentence
            );
            assert!(found
                .iter()
                .any(|d| d.constraint.field() == Field::Other && d.certainty == Certainty::Low));
        }

        // Inclusion keeps the comparator as written
        let found = drafts("ECOG = 1.", RuleType::Inclusion);
        assert!(found.iter().any(|d| matches!(
            &d.constraint,
            Constraint::Lab(LabRule { operator: Comparator::Eq, .. })
        )));
    }

    #[test]
    fn test_duration_is_not_an_age() {
        let found = drafts("Diabetes for at least 2 years.", RuleType::Inclusion);
        assert!(age_bounds(&found).is_empty());
        assert!(found.iter().any(|d| matches!(
            &d.constraint,
            Constraint::Other(OtherRule { operator: OtherOp::Gte, unit: Some(u), .. }) if u == "years"
        )));
    }

    #[test]
    fn test_numbers_without_age_keyword_are_ignored() {
        let found = drafts("Platelets 100 to 400.", RuleType::Inclusion);
        assert!(age_bounds(&found).is_empty());
    }

    #[test]
    fn test_implausible_age_fails_sentence() {
        let result = extract_sentence("Aged 500 years or older.", RuleType::Inclusion);
        assert!(matches!(result, Err(MatchError::Implausible { .. })));
    }

    #[test]
    fn test_sex_markers() {
        let female = drafts("Postmenopausal women.", RuleType::Inclusion);
        assert!(female.iter().any(|d| matches!(
            &d.constraint,
            Constraint::Sex(SexRule { value: SexValue::Female, .. })
        )));

        let all = drafts("Open to all sexes.", RuleType::Inclusion);
        assert!(all.iter().any(|d| matches!(
            &d.constraint,
            Constraint::Sex(SexRule { value: SexValue::All, .. })
        )));

        // "female" must not trigger the male marker
        let only_female = drafts("Female participants.", RuleType::Inclusion);
        assert!(!only_female.iter().any(|d| matches!(
            &d.constraint,
            Constraint::Sex(SexRule { value: SexValue::All | SexValue::Male, .. })
        )));
    }

    #[test]
    fn test_sex_ignored_in_exclusions() {
        let found = drafts("Pregnant women.", RuleType::Exclusion);
        assert!(!found.iter().any(|d| d.constraint.field() == Field::Sex));
    }

    #[test]
    fn test_lab_threshold() {
        let found = drafts("Patients with HbA1c >= 7.5% at screening.", RuleType::Inclusion);
        let lab = found
            .iter()
            .find_map(|d| match &d.constraint {
                Constraint::Lab(rule) => Some(rule.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(lab.analyte, "HbA1c");
        assert_eq!(lab.operator, Comparator::Gte);
        assert_eq!(lab.value, 7.5);
        assert_eq!(lab.unit.as_deref(), Some("%"));
    }

    #[test]
    fn test_lab_threshold_in_exclusion_is_inverted() {
        let found = drafts("eGFR < 30 mL/min/1.73 m2.", RuleType::Exclusion);
        let lab = found
            .iter()
            .find_map(|d| match &d.constraint {
                Constraint::Lab(rule) => Some(rule.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(lab.analyte, "eGFR");
        assert_eq!(lab.operator, Comparator::Gte);
        assert_eq!(lab.value, 30.0);
    }

    #[test]
    fn test_condition_patterns() {
        let found = drafts(
            "Adults with a confirmed diagnosis of type 2 diabetes.",
            RuleType::Inclusion,
        );
        let values: Vec<String> = found
            .iter()
            .filter_map(|d| match &d.constraint {
                Constraint::Condition(rule) => Some(rule.value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec!["type 2 diabetes"]);
    }

    #[test]
    fn test_condition_in_exclusion_is_not_in() {
        let found = drafts("Patients with heart failure.", RuleType::Exclusion);
        assert!(found.iter().any(|d| matches!(
            &d.constraint,
            Constraint::Condition(ConceptRule { operator: ConceptOp::NotIn, value, .. })
                if value == "heart failure"
        )));
    }

    #[test]
    fn test_functional_status_is_not_a_condition() {
        for sentence in [
            "Patients with adequate organ function.",
            "Patients with ECOG performance status 0-1.",
            "Patients with measurable disease.",
            "Subjects with stage 2-3 lesions.",
        ] {
            let found = drafts(sentence, RuleType::Inclusion);
            assert!(
                !found.iter().any(|d| d.constraint.field() == Field::Condition),
                "{}",
                sentence
            );
        }

        let rules = parse_criteria_v1("Inclusion Criteria:\n- Patients with adequate organ function.");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].field(), Field::Other);
        assert_eq!(rules[0].certainty, Certainty::Low);
    }

    #[test]
    fn test_numbered_disease_names_survive() {
        let found = drafts("Adults with type 1 diabetes.", RuleType::Inclusion);
        assert!(found.iter().any(|d| matches!(
            &d.constraint,
            Constraint::Condition(ConceptRule { value, .. }) if value == "type 1 diabetes"
        )));
    }

    #[test]
    fn test_common_exclusions() {
        let found = drafts("Pregnant or breastfeeding.", RuleType::Exclusion);
        let values: Vec<(Field, ConceptOp, String)> = found
            .iter()
            .filter_map(|d| match &d.constraint {
                Constraint::Condition(rule) => {
                    Some((Field::Condition, rule.operator, rule.value.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                (Field::Condition, ConceptOp::NotIn, "pregnancy".to_string()),
                (Field::Condition, ConceptOp::NotIn, "breastfeeding".to_string()),
            ]
        );
    }

    #[test]
    fn test_time_window_upgrades_to_within_last() {
        let found = drafts("Major surgery within the last 6 months.", RuleType::Exclusion);
        let rule = found
            .iter()
            .find_map(|d| match &d.constraint {
                Constraint::Procedure(rule) => Some(rule.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(rule.operator, ConceptOp::WithinLast);
        assert_eq!(rule.time_window.as_deref(), Some("6 months"));
        assert_eq!(rule.value, "surgery");
    }

    #[test]
    fn test_common_exclusions_only_for_exclusion_sentences() {
        let found = drafts("Prior surgery is allowed.", RuleType::Inclusion);
        assert!(!found
            .iter()
            .any(|d| d.constraint.field() == Field::Procedure));
    }

    #[test]
    fn test_placeholder_for_unmatched_inclusion() {
        let rules = parse_criteria_v1("Inclusion Criteria:\n- Able to provide informed consent");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].field(), Field::Other);
        assert_eq!(rules[0].certainty, Certainty::Low);
        assert_eq!(rules[0].evidence_text, "Able to provide informed consent");
    }

    #[test]
    fn test_unmatched_exclusion_is_dropped() {
        let rules = parse_criteria_v1("Exclusion Criteria:\n- Unable to comply");
        assert!(rules.is_empty());
    }

    #[test]
    fn test_failed_sentence_is_counted_and_isolated() {
        let text = "Inclusion Criteria:\n- Aged 500 years or older.\n- Women aged 18 years or older.";
        let extraction = extract_rules_v1(text);
        assert_eq!(extraction.failed_sentences, 1);
        // Failed inclusion sentence still surfaces as a placeholder
        assert_eq!(extraction.rules[0].field(), Field::Other);
        assert!(extraction.rules.iter().any(|r| r.field() == Field::Age));
    }

    #[test]
    fn test_rule_ids_are_unique() {
        let text = "Inclusion Criteria:\n- Men and women aged 18-65 years.\n- With asthma.\nExclusion Criteria:\n- Pregnant or breastfeeding.";
        let rules = parse_criteria_v1(text);
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(rules[0].id, "inc_01_age");
    }

    #[test]
    fn test_source_span_points_at_sentence() {
        let text = "Inclusion Criteria:\n- Adults aged 18 years or older.";
        let rules = parse_criteria_v1(text);
        let span = rules[0].source_span.unwrap();
        let slice: String = text.chars().skip(span.start).take(span.end - span.start).collect();
        assert_eq!(slice, "Adults aged 18 years or older.");
    }
}
