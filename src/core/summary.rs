//! Match summarizer: score, certainty and tier for one evaluation.

use tracing::debug;

use super::evaluator::{evaluate_trial, TrialEvaluation};
use crate::domain::{
    Checklist, DowngradeReason, EvaluationPath, Field, MatchResult, MatchSummary, PatientProfile,
    RuleType, Tier, TrialRecord, Verdict,
};

const PASS_WEIGHT: f64 = 1.0;
const UNKNOWN_WEIGHT: f64 = 0.3;
const FAIL_WEIGHT: f64 = -2.0;
const HARD_FAIL_PENALTY: f64 = -100.0;

/// Fewest evaluated rules an ELIGIBLE result may rest on
pub const MIN_RULES_FOR_ELIGIBLE: usize = 8;
/// Fewest passing non-demographic rules for ELIGIBLE on the parsed path
pub const MIN_CLINICAL_PASSES: usize = 4;

/// Score, certainty and summary for a checklist
pub fn summarize(evaluation: &TrialEvaluation) -> (f64, f64, MatchSummary) {
    let checklist = &evaluation.checklist;
    let pass_count = checklist.count(Verdict::Pass);
    let fail_count = checklist.count(Verdict::Fail);
    let unknown_count = checklist.count(Verdict::Unknown);
    let missing_count = evaluation.missing_info.len();
    let total_rules = checklist.len();

    let mut score = pass_count as f64 * PASS_WEIGHT
        + unknown_count as f64 * UNKNOWN_WEIGHT
        + fail_count as f64 * FAIL_WEIGHT;
    if checklist.iter().any(|v| v.is_hard_fail()) {
        score += HARD_FAIL_PENALTY;
    }

    let certainty = if total_rules == 0 {
        0.0
    } else {
        pass_count as f64 / total_rules as f64
    };

    let base = if fail_count > 0 {
        Tier::Ineligible
    } else if unknown_count > 0 || missing_count > 0 {
        Tier::Potential
    } else {
        Tier::Eligible
    };

    let downgrade_reasons = if base == Tier::Eligible {
        downgrades(checklist, evaluation.path)
    } else {
        Vec::new()
    };
    let tier = if downgrade_reasons.is_empty() {
        base
    } else {
        Tier::Potential
    };

    debug!(score, certainty, ?tier, "Summarized evaluation");

    (
        score,
        certainty,
        MatchSummary {
            tier,
            pass_count,
            fail_count,
            unknown_count,
            missing_count,
            total_rules,
            downgrade_reasons,
        },
    )
}

/// Reasons a clean pass is not strong enough for ELIGIBLE
fn downgrades(checklist: &Checklist, path: EvaluationPath) -> Vec<DowngradeReason> {
    let mut reasons = Vec::new();

    if checklist.len() < MIN_RULES_FOR_ELIGIBLE {
        reasons.push(DowngradeReason::InsufficientRuleVolume);
    }

    match path {
        EvaluationPath::Legacy => reasons.push(DowngradeReason::LegacyPathCap),
        EvaluationPath::Parsed => {
            let passed: Vec<Field> = checklist
                .iter()
                .filter(|v| v.verdict == Verdict::Pass)
                .filter_map(|v| v.field())
                .collect();

            let condition_confirmed = checklist.inclusion.iter().any(|v| {
                v.verdict == Verdict::Pass
                    && v.rule_meta.rule_type == RuleType::Inclusion
                    && v.field() == Some(Field::Condition)
            });
            if !condition_confirmed {
                reasons.push(DowngradeReason::ConditionNotConfirmed);
            }

            let clinical = passed.iter().filter(|f| !f.is_demographic()).count();
            if clinical < MIN_CLINICAL_PASSES {
                reasons.push(DowngradeReason::InsufficientClinicalEvidence);
            }

            if !passed.iter().any(|f| f.is_strong_evidence()) {
                reasons.push(DowngradeReason::NoStrongEvidence);
            }
        }
    }

    reasons
}

/// Evaluate and summarize one trial for one patient
pub fn match_trial(patient: &PatientProfile, trial: &TrialRecord) -> MatchResult {
    let evaluation = evaluate_trial(patient, trial);
    let (score, certainty, match_summary) = summarize(&evaluation);

    MatchResult {
        nct_id: trial.nct_id.clone(),
        title: trial.title.clone(),
        checklist: evaluation.checklist,
        missing_info: evaluation.missing_info,
        score,
        certainty,
        match_summary,
        evaluation_path: evaluation.path,
        fetched_at: trial.fetched_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RuleMeta, RuleVerdict};

    fn verdict(rule_type: RuleType, field: &str, verdict: Verdict) -> RuleVerdict {
        RuleVerdict {
            rule_id: format!("{}_{}", rule_type.id_prefix(), field),
            verdict,
            evidence: String::new(),
            rule_meta: RuleMeta {
                rule_type,
                field: field.to_string(),
                operator: "=".to_string(),
                value: serde_json::Value::Null,
                unit: None,
                time_window: None,
                certainty: None,
                injected: false,
            },
            evaluation_meta: None,
        }
    }

    fn evaluation(verdicts: Vec<RuleVerdict>, path: EvaluationPath) -> TrialEvaluation {
        let mut checklist = Checklist::default();
        for v in verdicts {
            match v.rule_meta.rule_type {
                RuleType::Inclusion => checklist.inclusion.push(v),
                RuleType::Exclusion => checklist.exclusion.push(v),
            }
        }
        TrialEvaluation {
            checklist,
            missing_info: Vec::new(),
            path,
        }
    }

    #[test]
    fn test_score_weights() {
        let eval = evaluation(
            vec![
                verdict(RuleType::Inclusion, "condition", Verdict::Pass),
                verdict(RuleType::Inclusion, "lab", Verdict::Unknown),
                verdict(RuleType::Exclusion, "condition", Verdict::Fail),
            ],
            EvaluationPath::Parsed,
        );
        let (score, certainty, summary) = summarize(&eval);
        assert!((score - (1.0 + 0.3 - 2.0)).abs() < 1e-9);
        assert!((certainty - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.tier, Tier::Ineligible);
    }

    #[test]
    fn test_hard_fail_penalty() {
        let eval = evaluation(
            vec![verdict(RuleType::Exclusion, "age", Verdict::Fail)],
            EvaluationPath::Legacy,
        );
        let (score, _, _) = summarize(&eval);
        assert!((score - (-102.0)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_checklist() {
        let (score, certainty, summary) = summarize(&evaluation(vec![], EvaluationPath::Parsed));
        assert_eq!(score, 0.0);
        assert_eq!(certainty, 0.0);
        assert_eq!(summary.tier, Tier::Potential);
        assert!(summary
            .downgrade_reasons
            .contains(&DowngradeReason::InsufficientRuleVolume));
    }

    #[test]
    fn test_clean_parsed_pass_is_eligible() {
        let mut verdicts = vec![
            verdict(RuleType::Inclusion, "condition", Verdict::Pass),
            verdict(RuleType::Inclusion, "age", Verdict::Pass),
            verdict(RuleType::Inclusion, "sex", Verdict::Pass),
            verdict(RuleType::Inclusion, "lab", Verdict::Pass),
            verdict(RuleType::Inclusion, "medication", Verdict::Pass),
            verdict(RuleType::Exclusion, "condition", Verdict::Pass),
            verdict(RuleType::Exclusion, "history", Verdict::Pass),
        ];
        let (_, _, summary) = summarize(&evaluation(verdicts.clone(), EvaluationPath::Parsed));
        assert_eq!(summary.tier, Tier::Potential);
        assert_eq!(
            summary.downgrade_reasons,
            vec![DowngradeReason::InsufficientRuleVolume]
        );

        verdicts.push(verdict(RuleType::Exclusion, "procedure", Verdict::Pass));
        let (_, certainty, summary) = summarize(&evaluation(verdicts, EvaluationPath::Parsed));
        assert_eq!(summary.tier, Tier::Eligible);
        assert_eq!(certainty, 1.0);
    }

    #[test]
    fn test_demographic_only_pass_is_downgraded() {
        let mut verdicts = vec![verdict(RuleType::Inclusion, "condition", Verdict::Pass)];
        for _ in 0..7 {
            verdicts.push(verdict(RuleType::Inclusion, "age", Verdict::Pass));
        }
        let (_, _, summary) = summarize(&evaluation(verdicts, EvaluationPath::Parsed));
        assert_eq!(summary.tier, Tier::Potential);
        assert!(summary
            .downgrade_reasons
            .contains(&DowngradeReason::InsufficientClinicalEvidence));
        assert!(summary
            .downgrade_reasons
            .contains(&DowngradeReason::NoStrongEvidence));
    }

    #[test]
    fn test_legacy_path_is_capped() {
        let verdicts = (0..8)
            .map(|_| verdict(RuleType::Inclusion, "condition", Verdict::Pass))
            .collect();
        let (_, _, summary) = summarize(&evaluation(verdicts, EvaluationPath::Legacy));
        assert_eq!(summary.tier, Tier::Potential);
        assert_eq!(summary.downgrade_reasons, vec![DowngradeReason::LegacyPathCap]);
    }
}
