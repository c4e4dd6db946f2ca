//! Response rules: trigger phrases mapped to canned replies.
//!
//! Rules are loaded once at startup from a JSON file (or the built-in table)
//! and never change afterwards. Shape:
//!
//! ```json
//! { "rules": [ {
//!     "id": "wdl-help",
//!     "keywords":   ["where", "wdl", "the tree farm"],
//!     "essential":  [],
//!     "exclusions": ["but", "simple"],
//!     "template":   "Hey $author$, please see $archiveChannel$ ...",
//!     "acceptance_threshold": 0.0,
//!     "channel_restricted": true,
//!     "cooldown_secs": null,
//!     "variants": [ { "template": "...", "one_in": 10 } ]
//! } ] }
//! ```
//!
//! Every rule answers the same question, `match_count(message)`, whether it
//! is driven by a keyword list, by essential words, or both.
//! Rules with `cooldown_secs` form the cooldown-gated category: they are
//! evaluated separately and rate limited by last-sent time.
//! `variants` are alternative templates, each picked with probability
//! `1/one_in` (checked in order) instead of the main template.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path};

use crate::analyze::text::{phrase_tokens, NormalizedMessage};
use crate::error::ConfigError;

pub const AUTHOR_PLACEHOLDER: &str = "$author$";
pub const ARCHIVE_PLACEHOLDER: &str = "$archiveChannel$";

fn default_true() -> bool {
    true
}

/// Rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRule {
    pub id: String,
    /// Trigger words or phrases; each one present adds 1 to the match count.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// All-or-nothing gate. When all are present they add to the match count.
    #[serde(default)]
    pub essential: Vec<String>,
    /// Any of these present vetoes the rule.
    #[serde(default)]
    pub exclusions: Vec<String>,
    pub template: String,
    /// A score must be strictly above this to be considered.
    #[serde(default)]
    pub acceptance_threshold: f32,
    /// Only answer in the configured help channels.
    #[serde(default = "default_true")]
    pub channel_restricted: bool,
    #[serde(default)]
    pub cooldown_secs: Option<i64>,
    #[serde(default)]
    pub variants: Vec<TemplateVariant>,
}

/// Occasional alternative reply text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVariant {
    pub template: String,
    pub one_in: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<ResponseRule>,
}

/// A validated rule with its phrases pre-tokenized.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ResponseRule,
    keywords: Vec<Vec<String>>,
    essential: Vec<Vec<String>>,
    exclusions: Vec<Vec<String>>,
}

impl CompiledRule {
    fn compile(rule: ResponseRule) -> Result<Self, ConfigError> {
        let bad = |message: &str| ConfigError::InvalidRule {
            rule: rule.id.clone(),
            message: message.to_string(),
        };

        if rule.id.trim().is_empty() {
            return Err(bad("id must not be empty"));
        }
        if rule.template.trim().is_empty() {
            return Err(bad("template must not be empty"));
        }
        if rule.keywords.is_empty() && rule.essential.is_empty() {
            return Err(bad("needs at least one keyword or essential word"));
        }
        if !(0.0..=1.0).contains(&rule.acceptance_threshold) {
            return Err(bad("acceptance_threshold must be within [0,1]"));
        }
        if matches!(rule.cooldown_secs, Some(s) if s <= 0) {
            return Err(bad("cooldown_secs must be positive"));
        }
        if rule
            .variants
            .iter()
            .any(|v| v.one_in == 0 || v.template.trim().is_empty())
        {
            return Err(bad("variants need a template and one_in >= 1"));
        }

        let keywords = tokenize_all(&rule.keywords);
        if keywords.iter().any(Vec::is_empty) {
            return Err(bad("keyword reduces to nothing after normalization"));
        }
        let essential = tokenize_all(&rule.essential);
        if essential.iter().any(Vec::is_empty) {
            return Err(bad("essential word reduces to nothing after normalization"));
        }
        // Exclusions that normalize away (e.g. a bare quote) can never match.
        let exclusions = tokenize_all(&rule.exclusions)
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            rule,
            keywords,
            essential,
            exclusions,
        })
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn is_cooldown_gated(&self) -> bool {
        self.rule.cooldown_secs.is_some()
    }

    /// Matched keywords plus essential words, or 0 when an essential word is
    /// missing or any exclusion is present.
    pub fn match_count(&self, msg: &NormalizedMessage) -> usize {
        let mut count = self
            .keywords
            .iter()
            .filter(|k| msg.contains_phrase(k))
            .count();

        if !self.essential.is_empty() {
            if self.essential.iter().all(|e| msg.contains_phrase(e)) {
                count += self.essential.len();
            } else {
                return 0;
            }
        }

        if self.exclusions.iter().any(|x| msg.contains_phrase(x)) {
            return 0;
        }
        count
    }

    /// Main template, or a variant when its `1/one_in` draw comes up.
    pub fn choose_template<R: Rng>(&self, rng: &mut R) -> &str {
        self.rule
            .variants
            .iter()
            .find(|v| rng.random_ratio(1, v.one_in))
            .map_or(self.rule.template.as_str(), |v| v.template.as_str())
    }

    /// Fill in the actor mention and archive-channel reference of the main template.
    pub fn render(&self, actor_id: &str, archive_channel: &str) -> String {
        fill(&self.rule.template, actor_id, archive_channel)
    }

    /// Like [`render`](Self::render) but may pick a variant.
    pub fn render_with<R: Rng>(&self, rng: &mut R, actor_id: &str, archive_channel: &str) -> String {
        fill(self.choose_template(rng), actor_id, archive_channel)
    }
}

fn fill(template: &str, actor_id: &str, archive_channel: &str) -> String {
    template
        .replace(AUTHOR_PLACEHOLDER, &format!("<@{actor_id}>"))
        .replace(ARCHIVE_PLACEHOLDER, &format!("<#{archive_channel}>"))
}

fn tokenize_all(phrases: &[String]) -> Vec<Vec<String>> {
    phrases.iter().map(|p| phrase_tokens(p)).collect()
}

/// Immutable, ordered rule table. Order is the tie-break order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn from_rules(rules: Vec<ResponseRule>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if !seen.insert(rule.id.clone()) {
                return Err(ConfigError::InvalidRule {
                    rule: rule.id,
                    message: "duplicate rule id".into(),
                });
            }
            compiled.push(CompiledRule::compile(rule)?);
        }
        Ok(Self { rules: compiled })
    }

    /// Load from a JSON rules file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: RuleFile = serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if file.rules.is_empty() {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                message: "rules file defines no rules".into(),
            });
        }
        Self::from_rules(file.rules)
    }

    /// Rules for the download archive server this bot was written for.
    pub fn builtin() -> Self {
        // The built-in table is covered by tests; it cannot fail validation.
        Self::from_rules(builtin_rules()).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id() == id)
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn builtin_rules() -> Vec<ResponseRule> {
    let exclusions = words(&[
        "but", "than", "11", "12", "type", "sss", "simple", "\"", "farms", "13000", "13,000",
    ]);

    vec![
        // Narrower rules first: an equal score goes to the earlier rule.
        ResponseRule {
            id: "specify-farm".into(),
            keywords: words(&[
                "the tree farm",
                "the wood farm",
                "the machine",
                "the nether tree farm",
                "problem tree farm",
            ]),
            essential: vec![],
            exclusions: exclusions.clone(),
            template: format!(
                "Hey {AUTHOR_PLACEHOLDER}, this server has many different tree farm designs by many different people.\n\nPlease include the name of the farm you need help with."
            ),
            acceptance_threshold: 0.0,
            channel_restricted: true,
            cooldown_secs: None,
            variants: vec![],
        },
        ResponseRule {
            id: "wdl-help".into(),
            keywords: words(&[
                "can", "find", "i", "where", "farm", "download", "schematic", "litematic",
                "world", "wdl", "are", "rapid", "12", "11", "twelve", "have", "fungus",
                "anybody", "got", "that", "wheres", "link", "tree", "design",
            ]),
            essential: vec![],
            exclusions,
            template: format!(
                "Hey {AUTHOR_PLACEHOLDER}, please see {ARCHIVE_PLACEHOLDER} for all world downloads and schematics."
            ),
            acceptance_threshold: 0.0,
            channel_restricted: true,
            cooldown_secs: None,
            variants: vec![],
        },
        ResponseRule {
            id: "paper".into(),
            keywords: vec![],
            essential: words(&["paper"]),
            exclusions: vec![],
            template: "[paper lol](<https://youtube.com/watch?v=XjjXYrMK4qw&t=1128s>)".into(),
            acceptance_threshold: 0.0,
            channel_restricted: false,
            cooldown_secs: Some(60),
            variants: vec![TemplateVariant {
                template: "[paper lol](<https://youtube.com/watch?v=XjjXYrMK4qw&t=14s>)".into(),
                one_in: 10,
            }],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str) -> ResponseRule {
        ResponseRule {
            id: id.into(),
            keywords: words(&["farm"]),
            essential: vec![],
            exclusions: vec![],
            template: "hi $author$".into(),
            acceptance_threshold: 0.0,
            channel_restricted: true,
            cooldown_secs: None,
            variants: vec![],
        }
    }

    #[test]
    fn builtin_table_is_valid() {
        let rules = RuleSet::from_rules(builtin_rules()).unwrap();
        assert_eq!(rules.len(), 3);
        assert!(rules.get("paper").unwrap().is_cooldown_gated());
        assert!(!rules.get("wdl-help").unwrap().is_cooldown_gated());
    }

    #[test]
    fn essential_words_are_all_or_nothing() {
        let mut r = rule("ess");
        r.keywords = words(&["farm"]);
        r.essential = words(&["paper", "mill"]);
        let set = RuleSet::from_rules(vec![r]).unwrap();
        let c = set.get("ess").unwrap();

        assert_eq!(c.match_count(&NormalizedMessage::new("paper farm")), 0);
        assert_eq!(c.match_count(&NormalizedMessage::new("paper mill farm")), 3);
        assert_eq!(c.match_count(&NormalizedMessage::new("paper mill")), 2);
    }

    #[test]
    fn exclusion_vetoes_any_match() {
        let set = RuleSet::builtin();
        let c = set.get("wdl-help").unwrap();
        let msg = NormalizedMessage::new("where can i find the simple tree farm download");
        assert_eq!(c.match_count(&msg), 0);
    }

    #[test]
    fn renders_placeholders() {
        let set = RuleSet::builtin();
        let text = set.get("wdl-help").unwrap().render("42", "777");
        assert_eq!(
            text,
            "Hey <@42>, please see <#777> for all world downloads and schematics."
        );
    }

    #[test]
    fn paper_link_variant_is_rare() {
        use rand::{rngs::StdRng, SeedableRng};

        let set = RuleSet::builtin();
        let paper = set.get("paper").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let rare = (0..2000)
            .filter(|_| paper.render_with(&mut rng, "1", "2").contains("t=14s"))
            .count();
        assert!((100..=300).contains(&rare), "rare variant picked {rare} times");
        assert!(paper.render("1", "2").contains("t=1128s"));
    }

    #[test]
    fn variant_with_one_in_one_always_wins_and_zero_is_rejected() {
        use rand::{rngs::StdRng, SeedableRng};

        let mut r = rule("v");
        r.variants = vec![TemplateVariant {
            template: "always $author$".into(),
            one_in: 1,
        }];
        let set = RuleSet::from_rules(vec![r.clone()]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(set.get("v").unwrap().render_with(&mut rng, "5", "6"), "always <@5>");

        r.variants[0].one_in = 0;
        assert!(RuleSet::from_rules(vec![r]).is_err());
    }

    #[test]
    fn rejects_duplicates_and_empty_rules() {
        let dup = RuleSet::from_rules(vec![rule("a"), rule("a")]);
        assert!(matches!(dup, Err(ConfigError::InvalidRule { .. })));

        let mut empty = rule("b");
        empty.keywords.clear();
        assert!(RuleSet::from_rules(vec![empty]).is_err());

        let mut quote_only = rule("c");
        quote_only.keywords = words(&["\""]);
        assert!(RuleSet::from_rules(vec![quote_only]).is_err());
    }

    #[test]
    fn loads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        fs::write(
            &path,
            r#"{"rules":[{"id":"x","keywords":["wdl"],"template":"see $archiveChannel$","future_field":1}]}"#,
        )
        .unwrap();
        let set = RuleSet::load(&path).unwrap();
        assert!(set.get("x").unwrap().rule.channel_restricted);

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(RuleSet::load(&path), Err(ConfigError::Parse { .. })));
    }
}
