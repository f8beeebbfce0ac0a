//! Decision Engine: blends rule and ML subscores by tier, applies flag
//! bumps and tier multipliers, and maps the final score to a level/action.

use crate::models::{Action, Level, Severity, Subscores, Tier};
use crate::rules::{RuleCode, RulesOutcome};

const LEVEL_THRESHOLDS: [f64; 3] = [0.30, 0.60, 0.80];

/// Tier-dependent blend weights (rule, ml). This specification's
/// authoritative resolution of an otherwise ambiguous source: BRONZE is
/// rule-dominant, GOLD leans on the model.
fn blend_weights(tier: Tier) -> (f64, f64) {
    match tier {
        Tier::Bronze => (0.6, 0.4),
        Tier::Silver => (0.5, 0.5),
        Tier::Gold => (0.4, 0.6),
    }
}

fn tier_multiplier(tier: Tier) -> f64 {
    match tier {
        Tier::Bronze => 1.05,
        Tier::Silver => 1.0,
        Tier::Gold => 0.9,
    }
}

pub struct DecisionOutcome {
    pub final_score: f64,
    pub level: Level,
    pub action: Action,
    pub subscores: Subscores,
    pub factors: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn combine(
        &self,
        tier: Tier,
        rules: &RulesOutcome,
        ml_score: f64,
    ) -> DecisionOutcome {
        if rules.hard_block {
            return DecisionOutcome {
                final_score: 1.0,
                level: Level::VeryHigh,
                action: Action::Block,
                subscores: subscores_for(rules, ml_score),
                factors: ordered_factors(rules),
                recommendations: recommendations_for(rules, Action::Block),
            };
        }

        let (rule_weight, ml_weight) = blend_weights(tier);
        let mut score = rule_weight * rules.rule_score + ml_weight * ml_score;

        if rules.flags.contains(&RuleCode::ImpossibleTravel.as_str().to_string()) {
            score += 0.30;
        }
        if rules.flags.contains(&RuleCode::VelocitySpike.as_str().to_string()) {
            score += 0.15;
        }
        if rules.flags.contains(&RuleCode::DeviceChange.as_str().to_string()) {
            score += 0.10;
        }

        score *= tier_multiplier(tier);
        let final_score = score.clamp(0.0, 1.0);

        let level = level_for(final_score);
        let action = if rules.flags.contains(&RuleCode::ImpossibleTravel.as_str().to_string()) {
            Action::Block
        } else {
            action_for(level)
        };

        DecisionOutcome {
            final_score,
            level,
            action,
            subscores: subscores_for(rules, ml_score),
            factors: ordered_factors(rules),
            recommendations: recommendations_for(rules, action),
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

const BEHAVIOR_CODES: [RuleCode; 2] = [RuleCode::VelocitySpike, RuleCode::HighFailedTxn];
const AMOUNT_CODES: [RuleCode; 2] = [RuleCode::AmountAnomaly, RuleCode::NewReceiverHighAmount];
const RECEIVER_CODES: [RuleCode; 4] = [
    RuleCode::Blacklisted,
    RuleCode::DeviceChange,
    RuleCode::ImpossibleTravel,
    RuleCode::SuspiciousTravel,
];

/// Sums the score of every triggered rule tagged to a dimension, clamped to
/// [0, 1] independently per dimension rather than all three echoing the
/// aggregate rule score.
fn dimension_subscore(rules: &RulesOutcome, codes: &[RuleCode]) -> f64 {
    rules
        .results
        .iter()
        .filter(|r| r.triggered && codes.contains(&r.code))
        .map(|r| r.score)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

fn subscores_for(rules: &RulesOutcome, ml_score: f64) -> Subscores {
    Subscores {
        behavior: dimension_subscore(rules, &BEHAVIOR_CODES),
        amount: dimension_subscore(rules, &AMOUNT_CODES),
        receiver: dimension_subscore(rules, &RECEIVER_CODES),
        ml: ml_score,
    }
}

fn level_for(score: f64) -> Level {
    if score < LEVEL_THRESHOLDS[0] {
        Level::Low
    } else if score < LEVEL_THRESHOLDS[1] {
        Level::Moderate
    } else if score < LEVEL_THRESHOLDS[2] {
        Level::High
    } else {
        Level::VeryHigh
    }
}

fn action_for(level: Level) -> Action {
    match level {
        Level::Low => Action::Allow,
        Level::Moderate => Action::Warn,
        Level::High => Action::OtpRequired,
        Level::VeryHigh => Action::Block,
    }
}

/// Severity-then-catalog order, capped at 5.
fn ordered_factors(rules: &RulesOutcome) -> Vec<String> {
    let mut triggered: Vec<&crate::rules::RuleResult> =
        rules.results.iter().filter(|r| r.triggered).collect();
    triggered.sort_by_key(|r| std::cmp::Reverse(severity_rank(r.severity)));
    triggered
        .into_iter()
        .take(5)
        .map(|r| r.message.clone())
        .collect()
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 3,
        Severity::High => 2,
        Severity::Medium => 1,
        Severity::Low => 0,
    }
}

fn recommendations_for(rules: &RulesOutcome, action: Action) -> Vec<String> {
    let mut recs = Vec::new();
    match action {
        Action::Block => recs.push("Do not process this transaction".to_string()),
        Action::OtpRequired => recs.push("Require OTP confirmation before proceeding".to_string()),
        Action::Warn => recs.push("Surface a warning to the payer before confirming".to_string()),
        Action::Allow => {}
    }
    if rules.flags.iter().any(|f| f == RuleCode::DeviceChange.as_str()) {
        recs.push("Consider device re-verification".to_string());
    }
    recs.truncate(5);
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleResult;

    fn empty_rules_outcome() -> RulesOutcome {
        RulesOutcome {
            results: vec![],
            rule_score: 0.0,
            flags: vec![],
            hard_block: false,
        }
    }

    #[test]
    fn test_low_allow() {
        let engine = DecisionEngine::new();
        let outcome = engine.combine(Tier::Gold, &empty_rules_outcome(), 0.0);
        assert_eq!(outcome.level, Level::Low);
        assert_eq!(outcome.action, Action::Allow);
        assert!(outcome.final_score < 1e-9);
    }

    #[test]
    fn test_hard_block_forces_very_high_block() {
        let engine = DecisionEngine::new();
        let rules = RulesOutcome {
            results: vec![RuleResult {
                code: RuleCode::Blacklisted,
                triggered: true,
                severity: Severity::Critical,
                score: 1.0,
                message: "Receiver on fraud blacklist".to_string(),
            }],
            rule_score: 1.0,
            flags: vec!["BLACKLISTED".to_string()],
            hard_block: true,
        };
        let outcome = engine.combine(Tier::Bronze, &rules, 0.3);
        assert_eq!(outcome.final_score, 1.0);
        assert_eq!(outcome.level, Level::VeryHigh);
        assert_eq!(outcome.action, Action::Block);
    }

    #[test]
    fn test_moderate_silver_blend() {
        let engine = DecisionEngine::new();
        let rules = RulesOutcome {
            results: vec![],
            rule_score: 0.55,
            flags: vec![
                "NEW_RECEIVER_HIGH_AMOUNT".to_string(),
                "AMOUNT_ANOMALY".to_string(),
            ],
            hard_block: false,
        };
        let outcome = engine.combine(Tier::Silver, &rules, 0.5);
        assert!((outcome.final_score - 0.525).abs() < 1e-9);
        assert_eq!(outcome.level, Level::Moderate);
        assert_eq!(outcome.action, Action::Warn);
    }

    #[test]
    fn test_level_boundaries_half_open() {
        assert_eq!(level_for(0.30), Level::Moderate);
        assert_eq!(level_for(0.2999), Level::Low);
        assert_eq!(level_for(0.60), Level::High);
        assert_eq!(level_for(0.80), Level::VeryHigh);
    }

    #[test]
    fn test_gold_allow_despite_novelty() {
        // GOLD blend is ml-leaning (0.4 rule / 0.6 ml) per the authoritative
        // tier-dependent table; 0.6 * 0.15 ml score * 0.9 tier multiplier.
        let engine = DecisionEngine::new();
        let rules = RulesOutcome {
            results: vec![],
            rule_score: 0.0,
            flags: vec![],
            hard_block: false,
        };
        let outcome = engine.combine(Tier::Gold, &rules, 0.15);
        assert!((outcome.final_score - 0.081).abs() < 1e-9);
        assert_eq!(outcome.level, Level::Low);
        assert_eq!(outcome.action, Action::Allow);
    }
}
