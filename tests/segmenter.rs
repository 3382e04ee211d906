//! Segmenter Integration Tests
//!
//! Tests for heading detection, bullet stripping and sentence splitting.

use trialmatch::criteria::preprocess;

#[test]
fn test_registry_style_text() {
    let text = "Inclusion Criteria:\n- Adults aged 18 years or older.\n\nExclusion Criteria:\n1. Pregnant or breastfeeding.";
    let segmented = preprocess(Some(text));

    assert_eq!(
        segmented.inclusion_sentences,
        vec!["Adults aged 18 years or older."]
    );
    assert_eq!(
        segmented.exclusion_sentences,
        vec!["Pregnant or breastfeeding."]
    );
}

#[test]
fn test_total_over_odd_inputs() {
    for input in [
        None,
        Some(""),
        Some("\n\n\n"),
        Some("Inclusion Criteria:"),
        Some("Exclusion:\n-\n*\n1."),
        Some("......"),
        Some("Ünïcödé ≥ 18 ∞. Ωmega!"),
    ] {
        // Must not panic
        let _ = preprocess(input);
    }

    let headings_only = preprocess(Some("Inclusion Criteria:\nExclusion Criteria:"));
    assert!(headings_only.is_empty());
    assert!(headings_only.has_headings);
}

#[test]
fn test_multiple_sentences_per_bullet() {
    let text = "Inclusion Criteria:\n* Age 18-75. Diagnosed with COPD! Able to walk?\nExclusion Criteria:\n* Smokers";
    let segmented = preprocess(Some(text));

    assert_eq!(
        segmented.inclusion_sentences,
        vec!["Age 18-75.", "Diagnosed with COPD!", "Able to walk?"]
    );
    assert_eq!(segmented.exclusion_sentences, vec!["Smokers"]);
}

#[test]
fn test_sections_can_repeat() {
    let text = "Inclusion Criteria:\n- A\nExclusion Criteria:\n- B\nInclusion Criteria:\n- C";
    let segmented = preprocess(Some(text));

    assert_eq!(segmented.inclusion_sentences, vec!["A", "C"]);
    assert_eq!(segmented.exclusion_sentences, vec!["B"]);
}

#[test]
fn test_heading_with_trailing_text() {
    let segmented = preprocess(Some("Exclusion Criteria: prior stroke"));
    assert_eq!(segmented.exclusion_sentences, vec!["prior stroke"]);
    assert!(segmented.inclusion_sentences.is_empty());
}
