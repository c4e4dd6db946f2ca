// src/analyze/mod.rs
//! Message analysis: rule matching, confidence scoring, abuse classification.

pub mod antispam;
pub mod rules;
pub mod scoring;
pub mod text;
pub mod weights;

pub use crate::analyze::antispam::{AbuseDetector, Observation};
pub use crate::analyze::rules::{CompiledRule, ResponseRule, RuleSet, TemplateVariant};
pub use crate::analyze::scoring::{score, ActorSignals};
pub use crate::analyze::text::NormalizedMessage;
pub use crate::analyze::weights::{HotReloadWeights, ScoringWeights};

/// A rule that passed its acceptance threshold, with its score.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'r> {
    pub rule: &'r CompiledRule,
    pub score: f32,
}

/// Pick the reply rule for a message.
///
/// Only rules scoring above zero and above their own acceptance threshold
/// qualify. The strictly highest score wins; on an exact tie the rule that
/// comes first keeps its place.
pub fn select_best<'r, I>(
    rules: I,
    msg: &NormalizedMessage,
    actor: &ActorSignals<'_>,
    weights: &ScoringWeights,
) -> Option<Candidate<'r>>
where
    I: IntoIterator<Item = &'r CompiledRule>,
{
    let mut best: Option<Candidate<'r>> = None;
    for rule in rules {
        let s = score(rule, msg, actor, weights);
        if s <= 0.0 || s <= rule.rule.acceptance_threshold {
            continue;
        }
        if best.map_or(true, |b| s > b.score) {
            best = Some(Candidate { rule, score: s });
        }
    }
    best
}
