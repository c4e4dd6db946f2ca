// src/rate_limit.rs
//! Reply budgets: a global hourly cap, a per-actor hourly cap, channel and
//! role gates, and last-sent cooldowns for individual rules.
//!
//! All counters live in the [`Snapshot`]; the limiter only holds limits.
//! Checks run in a fixed order and the first failing one wins:
//! global cap, actor cap, channel, exempt role.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::{ChannelConfig, LimitsConfig, RoleConfig};
use crate::state::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// `first_transition` is true only for the denial that flipped `cap_reached`.
    GlobalCap { first_transition: bool },
    /// `notice` is true when a slow-down notice must be sent to the actor.
    ActorCap { notice: bool },
    Channel,
    ExemptRole,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::GlobalCap { .. } => "global_cap",
            DenyReason::ActorCap { .. } => "actor_cap",
            DenyReason::Channel => "channel",
            DenyReason::ExemptRole => "exempt_role",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    Deny(DenyReason),
}

impl Gate {
    pub fn is_allowed(self) -> bool {
        matches!(self, Gate::Allow)
    }
}

/// UTC hour index used to detect rollover.
pub fn hour_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(3600)
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    hourly_cap: u32,
    per_actor_cap: u32,
    allowed_channels: BTreeSet<String>,
    exempt_roles: BTreeSet<String>,
}

impl RateLimiter {
    pub fn new(limits: &LimitsConfig, channels: &ChannelConfig, roles: &RoleConfig) -> Self {
        Self {
            hourly_cap: limits.hourly_reply_cap,
            per_actor_cap: limits.per_actor_reply_cap,
            allowed_channels: channels.allowed.iter().cloned().collect(),
            exempt_roles: roles.exempt.iter().map(|r| r.to_lowercase()).collect(),
        }
    }

    /// Reset all hourly counters when the wall-clock hour moved forward.
    /// Returns true if a reset happened; repeated calls within an hour are no-ops,
    /// and a late event stamped in an earlier hour never moves the bucket back.
    pub fn roll_hour(&self, state: &mut Snapshot, now: DateTime<Utc>) -> bool {
        let bucket = hour_bucket(now);
        if bucket <= state.cooldown.hour_bucket {
            return false;
        }
        let cd = &mut state.cooldown;
        cd.hour_bucket = bucket;
        cd.replies_this_hour = 0;
        cd.cap_reached = false;
        state.reply_budgets.clear();
        debug!(target: "ratelimit", bucket, "hourly reply budgets reset");
        true
    }

    /// Decide whether the bot may answer `actor` in `channel`.
    ///
    /// Side effects are part of the contract: the global cap transition is
    /// recorded once, and the first denial at the actor cap charges the
    /// slow-down notice to the actor's budget.
    pub fn check(
        &self,
        state: &mut Snapshot,
        actor: &str,
        roles: &BTreeSet<String>,
        channel: &str,
        channel_restricted: bool,
        now: DateTime<Utc>,
    ) -> Gate {
        self.roll_hour(state, now);

        if state.cooldown.replies_this_hour >= self.hourly_cap {
            let first_transition = !state.cooldown.cap_reached;
            if first_transition {
                state.cooldown.cap_reached = true;
                info!(
                    target: "ratelimit",
                    count = state.cooldown.replies_this_hour,
                    cap = self.hourly_cap,
                    "hourly reply cap reached"
                );
            }
            return self.deny(DenyReason::GlobalCap { first_transition });
        }

        let used = state.reply_count(actor);
        if used >= self.per_actor_cap {
            let notice = used == self.per_actor_cap;
            if notice {
                *state.reply_budgets.entry(actor.to_string()).or_insert(0) += 1;
            }
            debug!(target: "ratelimit", replies = used, notice, "actor reply cap reached");
            return self.deny(DenyReason::ActorCap { notice });
        }

        if channel_restricted && !self.allowed_channels.contains(channel) {
            return self.deny(DenyReason::Channel);
        }

        if roles
            .iter()
            .any(|r| self.exempt_roles.contains(&r.to_lowercase()))
        {
            return self.deny(DenyReason::ExemptRole);
        }

        Gate::Allow
    }

    pub fn can_respond(
        &self,
        state: &mut Snapshot,
        actor: &str,
        roles: &BTreeSet<String>,
        channel: &str,
        channel_restricted: bool,
        now: DateTime<Utc>,
    ) -> bool {
        self.check(state, actor, roles, channel, channel_restricted, now)
            .is_allowed()
    }

    /// Charge one sent reply to the global and the actor budget.
    pub fn record_response(&self, state: &mut Snapshot, actor: &str) {
        state.cooldown.replies_this_hour += 1;
        *state.reply_budgets.entry(actor.to_string()).or_insert(0) += 1;
    }

    /// True when `rule_id` was never sent or its cooldown has elapsed.
    pub fn cooldown_ready(
        &self,
        state: &Snapshot,
        rule_id: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match state.cooldown.last_sent.get(rule_id) {
            None => true,
            Some(&last) => now.signed_duration_since(last) >= cooldown,
        }
    }

    pub fn mark_sent(&self, state: &mut Snapshot, rule_id: &str, now: DateTime<Utc>) {
        state.cooldown.last_sent.insert(rule_id.to_string(), now);
    }

    fn deny(&self, reason: DenyReason) -> Gate {
        counter!("rate_limited_total", "reason" => reason.as_str()).increment(1);
        Gate::Deny(reason)
    }
}
