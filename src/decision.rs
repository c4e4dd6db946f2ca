//! # Decisions
//! What the engine asks the platform collaborator to do for one event.
//! Pure data; delivering it is the dispatcher's job.

use serde::{Deserialize, Serialize};

/// How an abusive actor is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementKind {
    /// Ban and purge recent messages.
    #[default]
    Ban,
    /// Remove from the server without banning.
    Kick,
}

/// Verdict of the abuse detector for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementDecision {
    None,
    Enforce,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enforcement {
    pub actor_id: String,
    pub actor_name: String,
    pub channel_id: String,
    pub kind: EnforcementKind,
    pub purge_secs: i64,
    pub reason: String,
    /// Triggering message with mass pings defused, safe to post to an audit channel.
    pub sanitized_message: String,
    pub suspicious_events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub rule_id: String,
    pub channel_id: String,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowDownNotice {
    pub actor_id: String,
    pub channel_id: String,
    pub text: String,
}

impl SlowDownNotice {
    pub fn new(actor_id: &str, channel_id: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            channel_id: channel_id.to_string(),
            text: format!("Hey <@{actor_id}>, please relax your use of my features."),
        }
    }
}

/// Everything to do in response to one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforcement: Option<Enforcement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
    /// Reply from a cooldown-gated rule, decided independently of `reply`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub easter_egg: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_down: Option<SlowDownNotice>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.enforcement.is_none()
            && self.reply.is_none()
            && self.easter_egg.is_none()
            && self.slow_down.is_none()
    }
}

/// Wrap mass pings in backticks so quoting the message cannot ping anyone.
pub fn sanitize_for_audit(text: &str) -> String {
    text.replace("@everyone", "`@everyone`")
        .replace("@here", "`@here`")
}

/// Short, stable, non-reversible id for a message text. Logs carry this, never the raw text.
pub fn anon_id(text: &str) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_defuses_mass_pings() {
        assert_eq!(
            sanitize_for_audit("@everyone free nitro @here"),
            "`@everyone` free nitro `@here`"
        );
    }

    #[test]
    fn anon_id_is_short_and_stable() {
        let a = anon_id("hello");
        assert_eq!(a.len(), 12);
        assert_eq!(a, anon_id("hello"));
        assert_ne!(a, anon_id("hello!"));
    }

    #[test]
    fn enforcement_kind_parses_lowercase() {
        let k: EnforcementKind = serde_json::from_str("\"kick\"").unwrap();
        assert_eq!(k, EnforcementKind::Kick);
    }
}
