//! Evidence grounding for extracted rules.
//!
//! A rule is grounded when its `evidence_text` can be found in the trial's
//! eligibility text. Exact byte matches produce a span; otherwise a
//! case- and whitespace-insensitive search decides whether the evidence is
//! present at all. Evidence that cannot be located is a hallucination.

use sha2::{Digest, Sha256};

use crate::domain::SourceSpan;

/// Result of locating evidence in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Character span of the first exact match, if any
    pub span: Option<SourceSpan>,
    /// Number of exact matches
    pub exact_matches: usize,
    /// Found after lowercasing and collapsing whitespace
    pub normalized: bool,
}

impl Located {
    pub fn is_grounded(&self) -> bool {
        self.exact_matches > 0 || self.normalized
    }
}

/// Find all exact matches of needle bytes in haystack bytes
///
/// Returns all (start, end) byte offset pairs where the needle appears.
pub fn find_exact_matches(haystack: &[u8], needle: &[u8]) -> Vec<(usize, usize)> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(i, _)| (i, i + needle.len()))
        .collect()
}

/// Lowercase and collapse runs of whitespace to a single space
pub fn normalize_for_match(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Locate evidence text inside the source text
pub fn locate_evidence(source: &str, evidence: &str) -> Located {
    let evidence = evidence.trim();
    let matches = find_exact_matches(source.as_bytes(), evidence.as_bytes());

    let span = matches.first().map(|&(start, end)| SourceSpan {
        start: byte_to_char_offset(source, start),
        end: byte_to_char_offset(source, end),
    });

    let normalized = if matches.is_empty() {
        let needle = normalize_for_match(evidence);
        !needle.is_empty() && normalize_for_match(source).contains(&needle)
    } else {
        false
    };

    Located {
        span,
        exact_matches: matches.len(),
        normalized,
    }
}

/// Case/whitespace-insensitive containment check
pub fn is_grounded(source: &str, evidence: &str) -> bool {
    locate_evidence(source, evidence).is_grounded()
}

/// Convert a byte offset into a character offset
pub fn byte_to_char_offset(text: &str, byte_offset: usize) -> usize {
    let mut offset = byte_offset.min(text.len());
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    text[..offset].chars().count()
}

/// SHA256 of the text, formatted as "sha256:<hex>"
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
