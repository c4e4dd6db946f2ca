//! Scam-burst detection over a per-channel sliding window.
//!
//! A message is *suspicious* when it carries a link AND one of the configured
//! scam keywords (mass pings, platform impersonation, free-stuff bait). Either
//! signal alone is normal chat.
//!
//! Per observed message:
//! 1. ensure the actor record and count the message,
//! 2. trim every channel window of the actor (stale events decay even when
//!    the actor only sends harmless messages),
//! 3. record the event if suspicious,
//! 4. enforce when the message was suspicious and the fresh count across all
//!    channels reached the threshold.
//!
//! Only a suspicious message can trigger enforcement, so ordinary chat right
//! after a burst does not re-trigger.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::AbuseConfig;
use crate::decision::{anon_id, EnforcementDecision};
use crate::events::InboundMessage;
use crate::state::{ActorProfile, Snapshot};

/// URL-like tokens: explicit schemes, `www.` hosts, or bare `name.tld` hosts.
static RE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\bhttps?://[^\s<>]+|\bwww\.[^\s<>]+|\b[a-z0-9][a-z0-9-]*(?:\.[a-z0-9][a-z0-9-]*)*\.(?:com|net|org|gg|io|co|ru|xyz|me|ly|link|app|gift|shop|site|info|biz|tk|cc)\b)",
    )
    .expect("link regex")
});

pub fn contains_link(text: &str) -> bool {
    RE_LINK.is_match(text)
}

/// Result of observing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub decision: EnforcementDecision,
    pub suspicious: bool,
    /// Fresh suspicious events across all channels after this message.
    pub recent: usize,
}

#[derive(Debug, Clone)]
pub struct AbuseDetector {
    window: Duration,
    threshold: usize,
    bucket_capacity: usize,
    keywords: Vec<String>,
}

impl AbuseDetector {
    pub fn new(cfg: &AbuseConfig) -> Self {
        Self {
            window: Duration::seconds(cfg.window_secs.max(1)),
            threshold: cfg.threshold.max(1),
            bucket_capacity: cfg.bucket_capacity.max(cfg.threshold).max(1),
            keywords: cfg
                .suspicious_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn has_suspicious_keyword(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }

    /// Link and scam keyword together.
    pub fn is_suspicious(&self, text: &str) -> bool {
        contains_link(text) && self.has_suspicious_keyword(text)
    }

    /// Observe a message against the shared state.
    pub fn observe(&self, state: &mut Snapshot, msg: &InboundMessage) -> Observation {
        let profile = state.ensure_actor(&msg.actor_id, &msg.display_name, &msg.roles, msg.timestamp);
        self.observe_profile(profile, &msg.channel_id, &msg.text, msg.timestamp)
    }

    /// Same as [`observe`](Self::observe) for a record the caller already holds.
    pub fn observe_profile(
        &self,
        profile: &mut ActorProfile,
        channel: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Observation {
        profile.total_message_count += 1;

        let suspicious = self.is_suspicious(text);
        profile.decay_suspicious(now, self.window);
        if suspicious {
            profile
                .suspicious
                .entry(channel.to_string())
                .or_default()
                .push(now, self.bucket_capacity);
        }

        let recent = profile.recent_suspicious_count(now, self.window);
        let decision = if suspicious && recent >= self.threshold {
            warn!(
                target: "abuse",
                actor = %profile.id,
                channel,
                recent,
                threshold = self.threshold,
                msg_id = %anon_id(text),
                "suspicious burst, enforcement warranted"
            );
            EnforcementDecision::Enforce
        } else {
            if suspicious {
                debug!(target: "abuse", actor = %profile.id, channel, recent, "suspicious message recorded");
            }
            EnforcementDecision::None
        };

        Observation {
            decision,
            suspicious,
            recent,
        }
    }
}
