//! Tunable constants of the confidence blend, with optional hot reload.
//!
//! The `[scoring]` table of `bot.toml` provides the startup values. When a
//! `weights_path` is configured, `current()` re-reads that JSON file whenever
//! its mtime changes, so the curve can be recalibrated without a restart.
//!
//! JSON shape (every field optional):
//! {
//!   "w_keyword": 0.5, "w_role": 0.2, "w_messages": 0.15, "w_join": 0.15,
//!   "scale": 1.2, "offset": -0.1,
//!   "join_decay_minutes": 1440.0, "join_grace_minutes": 10080.0, "join_floor": 0.05,
//!   "role_biases": { "nft": 0.2 }
//! }

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};
use tracing::{info, warn};

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Weight of the saturating keyword score. Dominant term.
    pub w_keyword: f32,
    pub w_role: f32,
    pub w_messages: f32,
    pub w_join: f32,
    /// Affine rescale applied to the blend before clamping to [0,1].
    pub scale: f32,
    pub offset: f32,
    /// Time constant of the join-recency decay.
    pub join_decay_minutes: f32,
    /// Past this age the join term is pinned to `join_floor`.
    pub join_grace_minutes: f32,
    pub join_floor: f32,
    /// Bias per role label in [0,1]; 0 means "never needs help". Unknown roles count as 1.
    pub role_biases: BTreeMap<String, f32>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        let role_biases = [
            ("nft", 0.2),
            ("fungus enthusiast", 0.0),
            ("trusted user", 0.0),
            ("hamper", 0.0),
            ("carter", 0.0),
            ("demoman", 0.0),
        ]
        .into_iter()
        .map(|(r, b)| (r.to_string(), b))
        .collect();

        Self {
            w_keyword: 0.5,
            w_role: 0.2,
            w_messages: 0.15,
            w_join: 0.15,
            scale: 1.2,
            offset: -0.1,
            join_decay_minutes: 24.0 * 60.0,
            join_grace_minutes: 7.0 * 24.0 * 60.0,
            join_floor: 0.05,
            role_biases,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("scoring.w_keyword", self.w_keyword),
            ("scoring.w_role", self.w_role),
            ("scoring.w_messages", self.w_messages),
            ("scoring.w_join", self.w_join),
            ("scoring.join_grace_minutes", self.join_grace_minutes),
        ];
        for (key, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(key, format!("must be a finite value >= 0, got {v}")));
            }
        }
        if !self.scale.is_finite() || !self.offset.is_finite() {
            return Err(invalid("scoring.scale", "scale and offset must be finite".into()));
        }
        if !self.join_decay_minutes.is_finite() || self.join_decay_minutes <= 0.0 {
            return Err(invalid(
                "scoring.join_decay_minutes",
                format!("must be > 0, got {}", self.join_decay_minutes),
            ));
        }
        if !(0.0..=1.0).contains(&self.join_floor) {
            return Err(invalid(
                "scoring.join_floor",
                format!("must be within [0,1], got {}", self.join_floor),
            ));
        }
        for (role, bias) in &self.role_biases {
            if !(0.0..=1.0).contains(bias) {
                return Err(invalid(
                    &format!("scoring.role_biases.{role}"),
                    format!("must be within [0,1], got {bias}"),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}

/// Hot-reload wrapper: reloads when the weights file mtime changes.
#[derive(Debug)]
pub struct HotReloadWeights {
    path: Option<PathBuf>,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    weights: Arc<ScoringWeights>,
    last_modified: Option<SystemTime>,
}

impl HotReloadWeights {
    /// Start from `initial` and follow `path` if given.
    pub fn new(initial: ScoringWeights, path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            inner: RwLock::new(State {
                weights: Arc::new(initial),
                last_modified: None,
            }),
        }
    }

    /// Get the latest weights, reloading if the file changed.
    ///
    /// A file that fails to parse or validate is ignored and the previous
    /// weights stay in effect.
    pub fn current(&self) -> Arc<ScoringWeights> {
        let Some(path) = self.path.as_deref() else {
            return self.read_weights();
        };

        let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => return self.read_weights(),
        };

        let needs_reload = match self.inner.read() {
            Ok(guard) => guard.last_modified != Some(mtime),
            Err(poisoned) => poisoned.into_inner().last_modified != Some(mtime),
        };
        if !needs_reload {
            return self.read_weights();
        }

        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Double-check in case another caller reloaded first.
        if guard.last_modified != Some(mtime) {
            guard.last_modified = Some(mtime);
            match load_weights_file(path) {
                Ok(w) => match w.validate() {
                    Ok(()) => {
                        info!(target: "scoring", path = %path.display(), "reloaded scoring weights");
                        guard.weights = Arc::new(w);
                    }
                    Err(e) => warn!(target: "scoring", error = %e, "ignoring invalid weights file"),
                },
                Err(e) => warn!(target: "scoring", error = %e, "ignoring unreadable weights file"),
            }
        }
        Arc::clone(&guard.weights)
    }

    fn read_weights(&self) -> Arc<ScoringWeights> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard.weights),
            Err(poisoned) => Arc::clone(&poisoned.into_inner().weights),
        }
    }
}

/// Load weights directly (no caching). Public for tests/tools.
pub fn load_weights_file(path: &Path) -> io::Result<ScoringWeights> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, thread, time::Duration};

    #[test]
    fn defaults_are_valid_and_keyword_dominates() {
        let w = ScoringWeights::default();
        w.validate().unwrap();
        let total = w.w_keyword + w.w_role + w.w_messages + w.w_join;
        assert!((total - 1.0).abs() < 1e-6);
        assert!(w.w_keyword >= 0.5 * total);
    }

    #[test]
    fn rejects_out_of_range_bias() {
        let mut w = ScoringWeights::default();
        w.role_biases.insert("weird".into(), 1.5);
        assert!(matches!(
            w.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn loads_and_hot_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"scale":2.0,"offset":-0.5}}"#).unwrap();
            f.sync_all().unwrap();
        }

        let hot = HotReloadWeights::new(ScoringWeights::default(), Some(&path));
        let w1 = hot.current();
        assert!((w1.scale - 2.0).abs() < f32::EPSILON);
        assert!((w1.offset + 0.5).abs() < f32::EPSILON);
        // Missing fields fall back to defaults.
        assert!((w1.w_keyword - 0.5).abs() < f32::EPSILON);

        // Ensure a different mtime (coarse filesystem granularity).
        thread::sleep(Duration::from_millis(1100));

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"join_floor":7.0}}"#).unwrap();
            f.sync_all().unwrap();
        }

        // Invalid file keeps the previous weights.
        let w2 = hot.current();
        assert!((w2.scale - 2.0).abs() < f32::EPSILON);
    }
}
