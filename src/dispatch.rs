// src/dispatch.rs
//! Carries out an [`Outcome`] through the chat platform.
//!
//! Delivery failures are logged and swallowed: replies are never retried,
//! and a ban the platform cannot perform falls back to a kick.

use async_trait::async_trait;
use metrics::counter;
use tracing::{error, info, warn};

use crate::decision::{Enforcement, EnforcementKind, Outcome, Reply};
use crate::error::DeliveryError;

/// Audit posts longer than this are skipped (platform message size limit).
pub const AUDIT_CHAR_LIMIT: usize = 1900;

/// What the engine needs from the chat platform.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError>;

    /// Ban and delete the actor's messages from the last `purge_secs`.
    async fn ban(&self, actor_id: &str, purge_secs: i64, reason: &str) -> Result<(), DeliveryError>;

    async fn kick(&self, actor_id: &str, reason: &str) -> Result<(), DeliveryError>;

    /// Post to the moderators' log channel.
    async fn audit(&self, text: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// How the actor was actually removed, if at all.
    pub enforced_with: Option<EnforcementKind>,
}

pub async fn dispatch<P>(platform: &P, outcome: &Outcome) -> DispatchReport
where
    P: Platform + ?Sized,
{
    let mut report = DispatchReport::default();

    if let Some(enf) = &outcome.enforcement {
        report.enforced_with = enforce(platform, enf).await;
        if report.enforced_with.is_some() {
            report.delivered += 1;
            announce(platform, enf).await;
        } else {
            report.failed += 1;
        }
    }

    if let Some(notice) = &outcome.slow_down {
        track(
            &mut report,
            "slow_down",
            platform.send_message(&notice.channel_id, &notice.text).await,
        );
    }
    for reply in [&outcome.reply, &outcome.easter_egg].into_iter().flatten() {
        send_reply(platform, reply, &mut report).await;
    }

    report
}

async fn send_reply<P: Platform + ?Sized>(platform: &P, reply: &Reply, report: &mut DispatchReport) {
    let res = platform.send_message(&reply.channel_id, &reply.text).await;
    track(report, &reply.rule_id, res);
}

fn track(report: &mut DispatchReport, what: &str, res: Result<(), DeliveryError>) {
    match res {
        Ok(()) => report.delivered += 1,
        Err(e) => {
            report.failed += 1;
            counter!("delivery_failures_total").increment(1);
            warn!(target: "dispatch", what, error = %e, "delivery failed, not retrying");
        }
    }
}

async fn enforce<P: Platform + ?Sized>(platform: &P, enf: &Enforcement) -> Option<EnforcementKind> {
    if enf.kind == EnforcementKind::Ban {
        match platform.ban(&enf.actor_id, enf.purge_secs, &enf.reason).await {
            Ok(()) => {
                info!(target: "dispatch", actor = %enf.actor_id, "banned actor");
                return Some(EnforcementKind::Ban);
            }
            Err(DeliveryError::BanUnavailable(reason)) => {
                warn!(target: "dispatch", actor = %enf.actor_id, %reason, "ban unavailable, falling back to kick");
            }
            Err(e) => {
                counter!("delivery_failures_total").increment(1);
                error!(target: "dispatch", actor = %enf.actor_id, error = %e, "ban failed");
                return None;
            }
        }
    }

    match platform.kick(&enf.actor_id, &enf.reason).await {
        Ok(()) => {
            info!(target: "dispatch", actor = %enf.actor_id, "kicked actor");
            Some(EnforcementKind::Kick)
        }
        Err(e) => {
            counter!("delivery_failures_total").increment(1);
            error!(target: "dispatch", actor = %enf.actor_id, error = %e, "kick failed");
            None
        }
    }
}

/// Public notice in the channel plus an audit copy of the offending message.
async fn announce<P: Platform + ?Sized>(platform: &P, enf: &Enforcement) {
    let notice = format!(
        "Removed user: {}. Looks like they won't be spamming any longer.",
        enf.actor_name
    );
    if let Err(e) = platform.send_message(&enf.channel_id, &notice).await {
        warn!(target: "dispatch", error = %e, "enforcement notice failed");
    }

    if enf.sanitized_message.chars().count() >= AUDIT_CHAR_LIMIT {
        warn!(target: "dispatch", actor = %enf.actor_id, "offending message too long for audit post");
        return;
    }
    let audit = format!(
        "**Deleted Message:**\n- Removed User: *{}*\n- Channel: <#{}>\n- Message: \"{}\"",
        enf.actor_name, enf.channel_id, enf.sanitized_message
    );
    if let Err(e) = platform.audit(&audit).await {
        warn!(target: "dispatch", error = %e, "audit post failed");
    }
}
