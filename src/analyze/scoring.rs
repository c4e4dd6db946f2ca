//! Confidence scoring of a rule against a message and the actor who sent it.
//!
//! score = clamp(scale * blend + offset, 0, 1), where
//!
//! blend = w_keyword  * (1 - 1/(matches+1))
//!       + w_role     * role_bias           (min over known roles, 1 when none)
//!       + w_messages * 1/(1 + ln(1 + total_messages))
//!       + w_join     * join_recency        (exp decay, floored)
//!
//! A rule with zero matches scores exactly 0 regardless of the actor.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::rules::CompiledRule;
use super::text::NormalizedMessage;
use super::weights::ScoringWeights;

/// Actor-derived inputs of the blend.
#[derive(Clone, Copy, Debug)]
pub struct ActorSignals<'a> {
    pub roles: &'a BTreeSet<String>,
    pub total_messages: u64,
    pub minutes_since_join: f32,
}

impl<'a> ActorSignals<'a> {
    pub fn new(
        roles: &'a BTreeSet<String>,
        total_messages: u64,
        joined_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let secs = now.signed_duration_since(joined_at).num_seconds().max(0);
        Self {
            roles,
            total_messages,
            minutes_since_join: secs as f32 / 60.0,
        }
    }
}

/// Saturating keyword curve: 0 → 0, 1 → 0.5, 3 → 0.75, → 1.
pub fn keyword_score(matches: usize) -> f32 {
    1.0 - 1.0 / (matches as f32 + 1.0)
}

/// Lowest configured bias among the actor's roles; unflagged actors get 1.
pub fn role_bias(roles: &BTreeSet<String>, w: &ScoringWeights) -> f32 {
    roles
        .iter()
        .filter_map(|r| w.role_biases.get(&r.to_lowercase()))
        .copied()
        .reduce(f32::min)
        .unwrap_or(1.0)
}

/// Decays logarithmically with the actor's message history.
pub fn message_factor(total_messages: u64) -> f32 {
    1.0 / (1.0 + (1.0 + total_messages as f32).ln())
}

pub fn join_recency(minutes_since_join: f32, w: &ScoringWeights) -> f32 {
    if minutes_since_join >= w.join_grace_minutes {
        return w.join_floor;
    }
    (-minutes_since_join / w.join_decay_minutes)
        .exp()
        .max(w.join_floor)
}

/// Weighted blend rescaled into [0,1].
pub fn blend(keyword: f32, actor: &ActorSignals<'_>, w: &ScoringWeights) -> f32 {
    let raw = w.w_keyword * keyword
        + w.w_role * role_bias(actor.roles, w)
        + w.w_messages * message_factor(actor.total_messages)
        + w.w_join * join_recency(actor.minutes_since_join, w);
    (raw * w.scale + w.offset).clamp(0.0, 1.0)
}

/// Score one rule. Exactly 0 means "never reply with this rule".
pub fn score(
    rule: &CompiledRule,
    msg: &NormalizedMessage,
    actor: &ActorSignals<'_>,
    w: &ScoringWeights,
) -> f32 {
    let matches = rule.match_count(msg);
    if matches == 0 {
        return 0.0;
    }
    blend(keyword_score(matches), actor, w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::rules::RuleSet;

    fn roles(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn newcomer(r: &BTreeSet<String>) -> ActorSignals<'_> {
        ActorSignals {
            roles: r,
            total_messages: 2,
            minutes_since_join: 1.0,
        }
    }

    #[test]
    fn keyword_curve_is_monotonic_and_saturating() {
        assert_eq!(keyword_score(0), 0.0);
        let mut prev = 0.0;
        for n in 1..50 {
            let s = keyword_score(n);
            assert!(s >= prev);
            assert!(s < 1.0);
            prev = s;
        }
    }

    #[test]
    fn no_matches_scores_exactly_zero() {
        let rules = RuleSet::builtin();
        let w = ScoringWeights::default();
        let r = roles(&[]);
        let msg = NormalizedMessage::new("good morning everyone");
        for rule in rules.iter() {
            assert_eq!(score(rule, &msg, &newcomer(&r), &w), 0.0);
        }
    }

    #[test]
    fn exclusion_dominates_strong_match() {
        let rules = RuleSet::builtin();
        let w = ScoringWeights::default();
        let r = roles(&[]);
        let msg = NormalizedMessage::new("where can i find the wdl download but for 1.20");
        let rule = rules.get("wdl-help").unwrap();
        assert_eq!(score(rule, &msg, &newcomer(&r), &w), 0.0);
    }

    #[test]
    fn newcomers_outscore_veterans() {
        let w = ScoringWeights::default();
        let none = roles(&["none"]);
        let fresh = newcomer(&none);
        let veteran = ActorSignals {
            roles: &none,
            total_messages: 5_000,
            minutes_since_join: 60.0 * 24.0 * 365.0,
        };
        assert!(blend(0.5, &fresh, &w) > blend(0.5, &veteran, &w));
    }

    #[test]
    fn role_bias_uses_lowest_known_role() {
        let w = ScoringWeights::default();
        assert_eq!(role_bias(&roles(&["none"]), &w), 1.0);
        assert!((role_bias(&roles(&["NFT"]), &w) - 0.2).abs() < 1e-6);
        assert_eq!(role_bias(&roles(&["nft", "trusted user"]), &w), 0.0);
    }

    #[test]
    fn join_recency_floors_after_grace() {
        let w = ScoringWeights::default();
        assert!(join_recency(0.0, &w) > 0.99);
        assert_eq!(join_recency(w.join_grace_minutes + 1.0, &w), w.join_floor);
        assert!(join_recency(w.join_grace_minutes - 1.0, &w) >= w.join_floor);
    }

    #[test]
    fn output_is_clamped() {
        let mut w = ScoringWeights::default();
        w.scale = 10.0;
        let r = roles(&[]);
        assert_eq!(blend(1.0, &newcomer(&r), &w), 1.0);
        w.scale = 1.0;
        w.offset = -5.0;
        assert_eq!(blend(1.0, &newcomer(&r), &w), 0.0);
    }

    #[test]
    fn default_curve_keeps_match_counts_apart_for_newcomers() {
        let w = ScoringWeights::default();
        let r = roles(&["none"]);
        let scores: Vec<f32> = (1..=8)
            .map(|m| blend(keyword_score(m), &newcomer(&r), &w))
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[1] > pair[0], "{scores:?}");
        }
        assert!(scores[7] < 1.0, "{scores:?}");
    }
}
