use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::rules::default_rules;

const PATTERN_SIZE_LIMIT: usize = 1 << 20;
// Passes over the whole rule set before masking gives up on settling.
const MAX_PASSES: usize = 16;

fn enabled_by_default() -> bool {
    true
}

/// A named pattern/replacement pair with the compliance standards it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingRule {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub compliance: BTreeSet<String>,
}

impl MaskingRule {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            replacement: replacement.into(),
            description: String::new(),
            enabled: true,
            compliance: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_compliance(mut self, standard: impl Into<String>) -> Self {
        self.compliance.insert(standard.into());
        self
    }
}

struct CompiledRule {
    rule: MaskingRule,
    regex: Option<Regex>,
    failure_reported: AtomicBool,
}

impl CompiledRule {
    fn compile(rule: MaskingRule) -> Self {
        let compiled = Self {
            regex: None,
            failure_reported: AtomicBool::new(false),
            rule,
        };
        match RegexBuilder::new(&compiled.rule.pattern)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
        {
            Ok(regex) => Self { regex: Some(regex), ..compiled },
            Err(err) => {
                compiled.report_failure(&err.to_string());
                compiled
            }
        }
    }

    // The flag is set before logging so a masked log line about this rule
    // cannot report it a second time.
    fn report_failure(&self, reason: &str) {
        if !self.failure_reported.swap(true, Ordering::Relaxed) {
            tracing::warn!(rule = %self.rule.name, reason, "masking rule disabled after failure");
        }
    }

    /// The substituted text, or `None` when the rule left `text` untouched.
    fn apply(&self, text: &str) -> Option<String> {
        if !self.rule.enabled {
            return None;
        }
        let regex = self.regex.as_ref()?;
        let replaced = panic::catch_unwind(AssertUnwindSafe(|| {
            match regex.replace_all(text, self.rule.replacement.as_str()) {
                std::borrow::Cow::Borrowed(_) => None,
                std::borrow::Cow::Owned(owned) => Some(owned),
            }
        }));
        match replaced {
            Ok(masked) => masked.filter(|masked| masked != text),
            Err(_) => {
                self.report_failure("substitution panicked");
                None
            }
        }
    }
}

/// Ordered rule set applied to log payloads before they leave the process.
///
/// Rules run in registration order, each against the output of the previous
/// one. Passes over the rule set repeat until the text stops changing, which
/// keeps masking idempotent. A rule that cannot be compiled or that fails
/// while substituting is reported once and skipped; masking itself never
/// fails.
pub struct MaskingEngine {
    rules: Vec<CompiledRule>,
    enabled: bool,
}

impl std::fmt::Debug for MaskingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskingEngine")
            .field("rules", &self.rules.iter().map(|r| r.rule.name.as_str()).collect::<Vec<_>>())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Default for MaskingEngine {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl MaskingEngine {
    #[must_use]
    pub fn new(rules: Vec<MaskingRule>) -> Self {
        Self {
            rules: rules.into_iter().map(CompiledRule::compile).collect(),
            enabled: true,
        }
    }

    /// An engine that passes every payload through untouched.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            rules: Vec::new(),
            enabled: false,
        }
    }

    /// Builds an engine from a JSON array of rules.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoggerError::InvalidRuleSet`] when the document is not
    /// a list of rules. Individual patterns that fail to compile are not an
    /// error; they are reported and skipped.
    pub fn from_json(document: &str) -> Result<Self> {
        let rules: Vec<MaskingRule> = serde_json::from_str(document)?;
        Ok(Self::new(rules))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rules(&self) -> impl Iterator<Item = &MaskingRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// Adds a rule, replacing an existing rule of the same name in place.
    pub fn add_rule(&mut self, rule: MaskingRule) {
        let compiled = CompiledRule::compile(rule);
        match self.position(&compiled.rule.name) {
            Some(index) => {
                if let Some(slot) = self.rules.get_mut(index) {
                    *slot = compiled;
                }
            }
            None => self.rules.push(compiled),
        }
    }

    pub fn remove_rule(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.rules.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn enable_rule(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_rule(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|compiled| compiled.rule.name == name) {
            Some(compiled) => {
                compiled.rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.rules.iter().position(|compiled| compiled.rule.name == name)
    }

    pub fn mask_text(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        let mut current = text.to_string();
        for _ in 0..MAX_PASSES {
            let mut changed = false;
            for compiled in &self.rules {
                if let Some(masked) = compiled.apply(&current) {
                    current = masked;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        current
    }

    /// Masks a string value; any other value is returned unchanged.
    pub fn mask_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.mask_text(text)),
            other => other.clone(),
        }
    }

    /// Masks every string in a JSON value. Keys are kept as they are.
    ///
    /// With `deep` set, nested objects and arrays are walked recursively;
    /// otherwise only the top level of a container is masked.
    pub fn mask_structured(&self, value: &Value, deep: bool) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.mask_map(map, deep)),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.mask_nested(item, deep)).collect()),
            other => self.mask_value(other),
        }
    }

    pub fn mask_map(&self, map: &Map<String, Value>, deep: bool) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| (key.clone(), self.mask_nested(value, deep)))
            .collect()
    }

    fn mask_nested(&self, value: &Value, deep: bool) -> Value {
        match value {
            Value::Object(_) | Value::Array(_) if deep => self.mask_structured(value, deep),
            other => self.mask_value(other),
        }
    }

    /// Names of the rules tagged with the given compliance standard.
    pub fn compliance_rules(&self, standard: &str) -> Vec<&str> {
        self.rules()
            .filter(|rule| rule.compliance.contains(standard))
            .map(|rule| rule.name.as_str())
            .collect()
    }

    /// Reports, per standard, whether none of its enabled rules match `text`.
    pub fn validate_compliance(&self, text: &str, standards: &[&str]) -> BTreeMap<String, bool> {
        standards
            .iter()
            .map(|standard| {
                let violated = self.rules.iter().any(|compiled| {
                    compiled.rule.enabled
                        && compiled.rule.compliance.contains(*standard)
                        && compiled.regex.as_ref().is_some_and(|regex| regex.is_match(text))
                });
                ((*standard).to_string(), !violated)
            })
            .collect()
    }
}

/// Short salted digest for correlating a sensitive value without exposing it.
pub fn hash_identifier(value: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.update(salt.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(12);
    digest
}
