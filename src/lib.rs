// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod decision;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod rate_limit;
pub mod state;
pub mod window;

// Rule matching, scoring and abuse detection
pub mod analyze;

// ---- Re-exports for stable public API ----
pub use crate::config::BotConfig;
pub use crate::decision::{Enforcement, EnforcementKind, Outcome, Reply, SlowDownNotice};
pub use crate::dispatch::{dispatch, Platform};
pub use crate::engine::ModerationEngine;
pub use crate::events::{ActorJoined, ActorLeft, InboundEvent, InboundMessage};
pub use crate::state::{LoadSource, StatePaths, StateStore};
