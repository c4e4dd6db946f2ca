// src/events.rs
//! Records delivered by the chat-platform collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type ActorId = String;
pub type ChannelId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub actor_id: ActorId,
    pub display_name: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    pub channel_id: ChannelId,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Messages authored by bots are ignored entirely.
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorJoined {
    pub actor_id: ActorId,
    pub display_name: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default = "Utc::now")]
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorLeft {
    pub actor_id: ActorId,
}

/// One line of the inbound event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Message(InboundMessage),
    Joined(ActorJoined),
    Left(ActorLeft),
}
