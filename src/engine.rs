//! # Moderation Engine
//! Maps inbound events to [`Outcome`]s. No I/O: all decisions are made
//! in memory against the [`StateStore`].
//!
//! Per message, under one state lock:
//! 1) abuse detection (counts the message, may short-circuit to enforcement),
//! 2) help replies: rate-limit gate, then best-scoring rule,
//! 3) cooldown-gated replies: same gate, plus each rule's own cooldown.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::analyze::{
    select_best, AbuseDetector, ActorSignals, CompiledRule, HotReloadWeights, NormalizedMessage,
    RuleSet, ScoringWeights,
};
use crate::config::BotConfig;
use crate::decision::{
    anon_id, sanitize_for_audit, Enforcement, EnforcementDecision, EnforcementKind, Outcome,
    Reply, SlowDownNotice,
};
use crate::error::ConfigError;
use crate::events::{ActorJoined, ActorLeft, InboundEvent, InboundMessage};
use crate::rate_limit::{DenyReason, Gate, RateLimiter};
use crate::state::{ActorProfile, Snapshot, StateStore};

const ENFORCEMENT_REASON: &str = "Bot detected violation of rules";

pub struct ModerationEngine {
    store: Arc<StateStore>,
    rules: RuleSet,
    weights: HotReloadWeights,
    abuse: AbuseDetector,
    limiter: RateLimiter,
    allowed_channels: Vec<String>,
    archive_channel: String,
    enforcement_kind: EnforcementKind,
    purge_secs: i64,
    prune_after: Duration,
}

impl ModerationEngine {
    pub fn new(cfg: &BotConfig, rules: RuleSet, store: Arc<StateStore>) -> Self {
        let weights = HotReloadWeights::new(cfg.scoring.clone(), cfg.weights_path.as_deref());
        Self {
            store,
            rules,
            weights,
            abuse: AbuseDetector::new(&cfg.abuse),
            limiter: RateLimiter::new(&cfg.limits, &cfg.channels, &cfg.roles),
            allowed_channels: cfg.channels.allowed.clone(),
            archive_channel: cfg.channels.archive.clone(),
            enforcement_kind: cfg.abuse.action,
            purge_secs: cfg.abuse.purge_secs,
            prune_after: Duration::seconds(cfg.persistence.prune_after_secs),
        }
    }

    /// Build from configuration, loading the rule table it points at.
    pub fn from_config(cfg: &BotConfig, store: Arc<StateStore>) -> Result<Self, ConfigError> {
        let rules = cfg.load_rules()?;
        Ok(Self::new(cfg, rules, store))
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn handle_event(&self, event: &InboundEvent) -> Option<Outcome> {
        match event {
            InboundEvent::Message(msg) => Some(self.handle_message(msg)),
            InboundEvent::Joined(ev) => {
                self.handle_joined(ev);
                None
            }
            InboundEvent::Left(ev) => {
                self.handle_left(ev);
                None
            }
        }
    }

    pub fn handle_message(&self, msg: &InboundMessage) -> Outcome {
        if msg.is_bot {
            return Outcome::default();
        }
        counter!("messages_observed_total").increment(1);

        let weights = self.weights.current();
        let normalized = NormalizedMessage::new(&msg.text);

        self.store
            .update(|state| self.decide(state, msg, &normalized, &weights))
    }

    fn decide(
        &self,
        state: &mut Snapshot,
        msg: &InboundMessage,
        normalized: &NormalizedMessage,
        weights: &ScoringWeights,
    ) -> Outcome {
        let now = msg.timestamp;
        let mut out = Outcome::default();

        let observation = self.abuse.observe(state, msg);
        if observation.decision == EnforcementDecision::Enforce {
            counter!("enforcements_total").increment(1);
            out.enforcement = Some(self.enforcement_for(msg, observation.recent));
            return out;
        }

        let (total, joined_at) = state
            .actors
            .get(&msg.actor_id)
            .map(|p| (p.total_message_count, p.joined_at))
            .unwrap_or((1, now));
        let signals = ActorSignals::new(&msg.roles, total, joined_at, now);

        let help: Vec<&CompiledRule> = self.rules.iter().filter(|r| !r.is_cooldown_gated()).collect();
        if let Some(rule_pass) = self.gated_pass(state, msg, &help, &mut out) {
            if let Some(best) = select_best(rule_pass, normalized, &signals, weights) {
                self.limiter.record_response(state, &msg.actor_id);
                out.reply = Some(self.reply_for(best.rule, best.score, msg));
            }
        }

        let gated: Vec<&CompiledRule> = self.rules.iter().filter(|r| r.is_cooldown_gated()).collect();
        if let Some(rule_pass) = self.gated_pass(state, msg, &gated, &mut out) {
            let ready: Vec<&CompiledRule> = rule_pass
                .into_iter()
                .filter(|r| {
                    let cooldown = Duration::seconds(r.rule.cooldown_secs.unwrap_or(0));
                    self.limiter.cooldown_ready(state, r.id(), cooldown, now)
                })
                .collect();
            if let Some(best) = select_best(ready, normalized, &signals, weights) {
                self.limiter.record_response(state, &msg.actor_id);
                self.limiter.mark_sent(state, best.rule.id(), now);
                out.easter_egg = Some(self.reply_for(best.rule, best.score, msg));
            }
        }

        out
    }

    /// Run the rate-limit gate for one group of rules and return the rules
    /// allowed to answer in this channel, or `None` when the gate denies.
    fn gated_pass<'r>(
        &self,
        state: &mut Snapshot,
        msg: &InboundMessage,
        rules: &[&'r CompiledRule],
        out: &mut Outcome,
    ) -> Option<Vec<&'r CompiledRule>> {
        if rules.is_empty() {
            return None;
        }
        let restricted = rules.iter().all(|r| r.rule.channel_restricted);
        let gate = self.limiter.check(
            state,
            &msg.actor_id,
            &msg.roles,
            &msg.channel_id,
            restricted,
            msg.timestamp,
        );
        match gate {
            Gate::Allow => {
                let channel_ok = self.allowed_channels.iter().any(|c| c == &msg.channel_id);
                Some(
                    rules
                        .iter()
                        .copied()
                        .filter(|r| channel_ok || !r.rule.channel_restricted)
                        .collect(),
                )
            }
            Gate::Deny(DenyReason::ActorCap { notice: true }) => {
                info!(target: "engine", actor = %msg.actor_id, "sending slow-down notice");
                out.slow_down = Some(SlowDownNotice::new(&msg.actor_id, &msg.channel_id));
                None
            }
            Gate::Deny(reason) => {
                debug!(target: "engine", actor = %msg.actor_id, reason = reason.as_str(), "reply gate denied");
                None
            }
        }
    }

    fn reply_for(&self, rule: &CompiledRule, confidence: f32, msg: &InboundMessage) -> Reply {
        counter!("replies_total", "rule" => rule.id().to_string()).increment(1);
        info!(
            target: "engine",
            rule = rule.id(),
            confidence,
            actor = %msg.actor_id,
            msg_id = %anon_id(&msg.text),
            "reply selected"
        );
        Reply {
            rule_id: rule.id().to_string(),
            channel_id: msg.channel_id.clone(),
            text: rule.render_with(&mut rand::rng(), &msg.actor_id, &self.archive_channel),
            confidence,
        }
    }

    fn enforcement_for(&self, msg: &InboundMessage, recent: usize) -> Enforcement {
        Enforcement {
            actor_id: msg.actor_id.clone(),
            actor_name: msg.display_name.clone(),
            channel_id: msg.channel_id.clone(),
            kind: self.enforcement_kind,
            purge_secs: self.purge_secs,
            reason: ENFORCEMENT_REASON.to_string(),
            sanitized_message: sanitize_for_audit(&msg.text),
            suspicious_events: recent,
        }
    }

    /// Create (or refresh) the profile of a joining actor.
    pub fn handle_joined(&self, ev: &ActorJoined) {
        self.store.update(|state| {
            let profile = state
                .actors
                .entry(ev.actor_id.clone())
                .or_insert_with(|| {
                    ActorProfile::new(&ev.actor_id, &ev.display_name, ev.roles.clone(), ev.joined_at)
                });
            profile.name = ev.display_name.clone();
            profile.roles = ev.roles.clone();
            profile.joined_at = ev.joined_at;
        });
        debug!(target: "engine", actor = %ev.actor_id, "actor joined");
    }

    /// Forget a departed actor. Returns whether a profile existed.
    pub fn handle_left(&self, ev: &ActorLeft) -> bool {
        let removed = self
            .store
            .update(|state| state.actors.remove(&ev.actor_id).is_some());
        debug!(target: "engine", actor = %ev.actor_id, removed, "actor left");
        removed
    }

    /// Drop profiles that never posted and are older than the prune age.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let prune_after = self.prune_after;
        let (pruned, remaining) = self.store.update(|state| {
            let before = state.actors.len();
            state.actors.retain(|_, p| {
                p.total_message_count > 0 || now.signed_duration_since(p.joined_at) < prune_after
            });
            (before - state.actors.len(), state.actors.len())
        });
        crate::metrics::set_tracked_actors(remaining);
        if pruned > 0 {
            info!(target: "engine", pruned, "pruned idle actor profiles");
        }
        pruned
    }

    /// Periodically prune idle profiles.
    pub fn spawn_prune_task(self: Arc<Self>, period: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.prune_idle(Utc::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn engine() -> ModerationEngine {
        let cfg = BotConfig::default();
        ModerationEngine::new(&cfg, RuleSet::builtin(), Arc::new(StateStore::default()))
    }

    fn msg(actor: &str, channel: &str, text: &str, at: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            actor_id: actor.into(),
            display_name: format!("user{actor}"),
            roles: BTreeSet::new(),
            channel_id: channel.into(),
            text: text.into(),
            timestamp: at,
            is_bot: false,
        }
    }

    const HELP: &str = "1092283954805084200";

    #[test]
    fn bot_messages_are_ignored() {
        let e = engine();
        let mut m = msg("1", HELP, "where is the wdl", t(0));
        m.is_bot = true;
        assert!(e.handle_message(&m).is_empty());
        assert!(e.store().read(|s| s.actors.is_empty()));
    }

    #[test]
    fn paper_reply_has_its_own_cooldown_and_any_channel() {
        let e = engine();
        let out = e.handle_message(&msg("1", "random-channel", "paper moment", t(0)));
        assert_eq!(out.easter_egg.as_ref().map(|r| r.rule_id.as_str()), Some("paper"));
        assert!(out.reply.is_none());

        let again = e.handle_message(&msg("2", "random-channel", "paper again", t(30)));
        assert!(again.easter_egg.is_none());

        let later = e.handle_message(&msg("2", "random-channel", "paper again", t(61)));
        assert!(later.easter_egg.is_some());
    }

    #[test]
    fn help_rules_stay_in_help_channels() {
        let e = engine();
        let out = e.handle_message(&msg("1", "random-channel", "where is the wdl", t(0)));
        assert!(out.reply.is_none());
        let out = e.handle_message(&msg("1", HELP, "where is the wdl", t(1)));
        assert_eq!(out.reply.unwrap().rule_id, "wdl-help");
    }

    #[test]
    fn prune_keeps_posters_and_recent_joiners() {
        let e = engine();
        e.handle_joined(&ActorJoined {
            actor_id: "old".into(),
            display_name: "o".into(),
            roles: BTreeSet::new(),
            joined_at: t(0),
        });
        e.handle_joined(&ActorJoined {
            actor_id: "new".into(),
            display_name: "n".into(),
            roles: BTreeSet::new(),
            joined_at: t(8 * 24 * 3600),
        });
        e.handle_message(&msg("talker", HELP, "hi", t(0)));

        let pruned = e.prune_idle(t(8 * 24 * 3600 + 1));
        assert_eq!(pruned, 1);
        e.store().read(|s| {
            assert!(!s.actors.contains_key("old"));
            assert!(s.actors.contains_key("new"));
            assert!(s.actors.contains_key("talker"));
        });
    }

    #[test]
    fn leaving_removes_profile() {
        let e = engine();
        e.handle_message(&msg("1", HELP, "hello", t(0)));
        assert!(e.handle_left(&ActorLeft { actor_id: "1".into() }));
        assert!(!e.handle_left(&ActorLeft { actor_id: "1".into() }));
    }
}
