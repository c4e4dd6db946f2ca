// src/config/mod.rs
//! Bot configuration (TOML).
//!
//! Lookup order:
//! 1) `$BOT_CONFIG_PATH` (must exist)
//! 2) `config/bot.toml`
//! 3) built-in defaults
//!
//! Every field has a default, so a config file only needs the values it changes.
//! Anything malformed is a [`ConfigError`] and the bot refuses to start.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::info;

use crate::analyze::rules::RuleSet;
use crate::analyze::weights::ScoringWeights;
use crate::decision::EnforcementKind;
use crate::error::ConfigError;
use crate::state::StatePaths;

pub const DEFAULT_CONFIG_PATH: &str = "config/bot.toml";
pub const ENV_CONFIG_PATH: &str = "BOT_CONFIG_PATH";

fn default_hourly_reply_cap() -> u32 {
    10
}
fn default_per_actor_reply_cap() -> u32 {
    3
}
fn default_window_secs() -> i64 {
    20
}
fn default_threshold() -> usize {
    4
}
fn default_bucket_capacity() -> usize {
    32
}
fn default_purge_secs() -> i64 {
    7 * 24 * 3600
}
fn default_suspicious_keywords() -> Vec<String> {
    [
        "@everyone", "@here", "steam", "discord", "discord nitro", "free nitro", "free gift",
        "free giveaway", "free money", "hack", "bitcoin", "crypto",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_allowed_channels() -> Vec<String> {
    [
        "1092283954805084200",
        "930033193170661436",
        "930027805398429739",
        "930037624893231114",
        "1094609234978668765",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_archive_channel() -> String {
    "1019870085617291305".to_string()
}
fn default_exempt_roles() -> Vec<String> {
    ["fungus enthusiast", "trusted user", "nft", "hamper", "carter", "demoman"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_primary_path() -> PathBuf {
    PathBuf::from("state/bot_state.json")
}
fn default_backup_path() -> PathBuf {
    PathBuf::from("state/backup/bot_state.json")
}
fn default_save_interval_secs() -> u64 {
    5 * 60
}
fn default_backup_interval_secs() -> u64 {
    60 * 60
}
fn default_prune_interval_secs() -> u64 {
    60 * 60
}
fn default_prune_after_secs() -> i64 {
    7 * 24 * 3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_hourly_reply_cap")]
    pub hourly_reply_cap: u32,
    #[serde(default = "default_per_actor_reply_cap")]
    pub per_actor_reply_cap: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hourly_reply_cap: default_hourly_reply_cap(),
            per_actor_reply_cap: default_per_actor_reply_cap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbuseConfig {
    /// Suspicious events older than this stop counting.
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
    /// Fresh suspicious events needed to enforce.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Max timestamps kept per (actor, channel).
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: usize,
    #[serde(default = "default_suspicious_keywords")]
    pub suspicious_keywords: Vec<String>,
    #[serde(default)]
    pub action: EnforcementKind,
    /// How much message history a ban deletes.
    #[serde(default = "default_purge_secs")]
    pub purge_secs: i64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            threshold: default_threshold(),
            bucket_capacity: default_bucket_capacity(),
            suspicious_keywords: default_suspicious_keywords(),
            action: EnforcementKind::default(),
            purge_secs: default_purge_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Channels where channel-restricted rules may answer.
    #[serde(default = "default_allowed_channels")]
    pub allowed: Vec<String>,
    /// Channel referenced by `$archiveChannel$`.
    #[serde(default = "default_archive_channel")]
    pub archive: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_channels(),
            archive: default_archive_channel(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    /// Holders of these roles never get automated replies.
    #[serde(default = "default_exempt_roles")]
    pub exempt: Vec<String>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            exempt: default_exempt_roles(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_primary_path")]
    pub primary: PathBuf,
    #[serde(default = "default_backup_path")]
    pub backup: PathBuf,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    /// Profiles with no messages are pruned once they are older than this.
    #[serde(default = "default_prune_after_secs")]
    pub prune_after_secs: i64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_path(),
            backup: default_backup_path(),
            save_interval_secs: default_save_interval_secs(),
            backup_interval_secs: default_backup_interval_secs(),
            prune_interval_secs: default_prune_interval_secs(),
            prune_after_secs: default_prune_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub abuse: AbuseConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub roles: RoleConfig,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// JSON rule table; the built-in rules are used when unset.
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
    /// JSON file overriding `[scoring]`, reloaded when it changes.
    #[serde(default)]
    pub weights_path: Option<PathBuf>,
}

impl BotConfig {
    /// Load from an explicit TOML file and validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Load using `$BOT_CONFIG_PATH`, then `config/bot.toml`, then defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            return Self::load_from(Path::new(&p));
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(default_path);
        }
        info!(target: "config", "no config file found, using built-in defaults");
        let cfg = Self::default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let cfg: BotConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if self.limits.hourly_reply_cap == 0 {
            return Err(invalid("limits.hourly_reply_cap", "must be at least 1"));
        }
        if self.limits.per_actor_reply_cap == 0 {
            return Err(invalid("limits.per_actor_reply_cap", "must be at least 1"));
        }
        if self.abuse.window_secs <= 0 {
            return Err(invalid("abuse.window_secs", "must be positive"));
        }
        if self.abuse.threshold == 0 {
            return Err(invalid("abuse.threshold", "must be at least 1"));
        }
        if self.abuse.bucket_capacity < self.abuse.threshold {
            return Err(invalid(
                "abuse.bucket_capacity",
                "must be at least abuse.threshold",
            ));
        }
        if self.abuse.suspicious_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(invalid("abuse.suspicious_keywords", "must not be empty"));
        }
        if self.abuse.purge_secs < 0 {
            return Err(invalid("abuse.purge_secs", "must not be negative"));
        }
        if self.channels.archive.trim().is_empty() {
            return Err(invalid("channels.archive", "must not be empty"));
        }
        let p = &self.persistence;
        if p.save_interval_secs == 0 || p.backup_interval_secs == 0 || p.prune_interval_secs == 0 {
            return Err(invalid("persistence", "intervals must be positive"));
        }
        if p.primary == p.backup {
            return Err(invalid(
                "persistence.backup",
                "must differ from persistence.primary",
            ));
        }
        self.scoring.validate()
    }

    pub fn state_paths(&self) -> StatePaths {
        StatePaths {
            primary: self.persistence.primary.clone(),
            backup: self.persistence.backup.clone(),
        }
    }

    pub fn load_rules(&self) -> Result<RuleSet, ConfigError> {
        match &self.rules_path {
            Some(path) => {
                let rules = RuleSet::load(path)?;
                info!(target: "config", path = %path.display(), rules = rules.len(), "loaded rules");
                Ok(rules)
            }
            None => Ok(RuleSet::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = BotConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.limits.hourly_reply_cap, 10);
        assert_eq!(cfg.abuse.threshold, 4);
        assert_eq!(cfg.abuse.action, EnforcementKind::Ban);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = BotConfig::from_toml_str(
            r#"
            [limits]
            per_actor_reply_cap = 5

            [scoring]
            scale = 2.0
            "#,
            Path::new("inline"),
        )
        .unwrap();
        assert_eq!(cfg.limits.per_actor_reply_cap, 5);
        assert_eq!(cfg.limits.hourly_reply_cap, 10);
        assert!((cfg.scoring.scale - 2.0).abs() < f32::EPSILON);
        assert!((cfg.scoring.w_keyword - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_bad_values() {
        let err = BotConfig::from_toml_str("[abuse]\nthreshold = 0\n", Path::new("inline"));
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));

        let err = BotConfig::from_toml_str("[limits\n", Path::new("inline"));
        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }
}
