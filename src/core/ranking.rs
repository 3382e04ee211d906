//! Ranking of match results across trials.

use std::cmp::Ordering;

use tracing::{info, instrument};

use super::summary::match_trial;
use crate::domain::{MatchResult, PatientProfile, TrialRecord};

/// Evaluate every trial and return the best `top_k` results
#[instrument(skip(patient, trials), fields(trials = trials.len()))]
pub fn rank_matches(
    patient: &PatientProfile,
    trials: &[TrialRecord],
    top_k: usize,
) -> Vec<MatchResult> {
    let mut results: Vec<MatchResult> = trials
        .iter()
        .map(|trial| match_trial(patient, trial))
        .collect();

    sort_results(&mut results);
    results.truncate(top_k);

    info!(returned = results.len(), "Ranked trial matches");
    results
}

/// Order by (score, certainty, fetched_at) descending; undated records last
pub fn sort_results(results: &mut [MatchResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.certainty.total_cmp(&a.certainty))
            .then_with(|| match (a.fetched_at, b.fetched_at) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trial(id: &str, conditions: &[&str]) -> TrialRecord {
        let mut t = TrialRecord::new(id);
        t.conditions = conditions.iter().map(|c| c.to_string()).collect();
        t
    }

    #[test]
    fn test_orders_by_score_then_recency() {
        let patient = PatientProfile {
            age: Some(40.0),
            sex: Some("female".into()),
            conditions: Some(vec!["asthma".into()]),
            ..Default::default()
        };

        let mut old = trial("NCT_OLD", &["asthma"]);
        old.fetched_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut new = trial("NCT_NEW", &["asthma"]);
        new.fetched_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let undated = trial("NCT_UNDATED", &["asthma"]);
        let miss = trial("NCT_MISS", &["melanoma"]);

        let ranked = rank_matches(&patient, &[miss, undated, old, new], 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.nct_id.as_str()).collect();
        assert_eq!(ids, vec!["NCT_NEW", "NCT_OLD", "NCT_UNDATED", "NCT_MISS"]);
    }

    #[test]
    fn test_truncates_to_top_k() {
        let trials: Vec<TrialRecord> = (0..5).map(|i| trial(&format!("NCT{}", i), &[])).collect();
        let ranked = rank_matches(&PatientProfile::default(), &trials, 2);
        assert_eq!(ranked.len(), 2);
        assert!(rank_matches(&PatientProfile::default(), &trials, 0).is_empty());
    }
}
