use std::{
    collections::HashSet,
    time::{SystemTime, UNIX_EPOCH},
};

use regex::Regex;

use crate::rules::{compiler, normalize::RawRules};

/// A keyword with its lowercase form computed once at load time.
#[derive(Clone, Debug)]
pub struct Keyword {
    pub text: String,
    lower: String,
}

impl Keyword {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let lower = text.to_lowercase();
        Self { text, lower }
    }

    /// Substring test against text that is already lowercased.
    pub fn is_in(&self, lowered_text: &str) -> bool {
        !self.lower.is_empty() && lowered_text.contains(&self.lower)
    }
}

#[derive(Clone, Debug)]
pub struct AlertPattern {
    pub source: String,
    regex: Regex,
}

impl AlertPattern {
    pub(crate) fn new(source: String, regex: Regex) -> Self {
        Self { source, regex }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// A regex the compiler refused, kept for operator diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedPattern {
    pub pattern: String,
    pub reason: String,
}

/// Last-modified token of the rule source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceVersion(pub u128);

impl SourceVersion {
    /// Version of the built-in fallback snapshot (source absent or unreadable).
    pub const MISSING: SourceVersion = SourceVersion(0);

    pub fn from_modified(t: SystemTime) -> Self {
        let nanos = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        SourceVersion(nanos.max(1))
    }
}

/// Immutable, fully compiled rule set. Replaced wholesale on reload.
#[derive(Clone, Debug)]
pub struct RuleSnapshot {
    pub monitor_keywords: Vec<Keyword>,
    pub alert_keywords: Vec<Keyword>,
    pub alert_patterns: Vec<AlertPattern>,
    pub skipped_patterns: Vec<SkippedPattern>,
    pub channel_allowlist: HashSet<String>,
    pub log_all_messages: bool,
    pub ai_trigger_enabled: bool,
    /// Lowercased trigger identities.
    pub ai_trigger_identities: Vec<String>,
    pub alert_target: String,
    pub owner_user_id: Option<String>,
    pub source_version: SourceVersion,
}

impl RuleSnapshot {
    /// Build a snapshot from normalized fields.
    ///
    /// `fallback_owner` is used only when the rules carry no `user_id`.
    pub fn build(raw: RawRules, version: SourceVersion, fallback_owner: Option<&str>) -> Self {
        let compiled = compiler::compile(&raw.keywords, &raw.alert_keywords, &raw.alert_regex);

        let owner_user_id = raw
            .user_id
            .or_else(|| fallback_owner.map(|s| s.to_string()))
            .filter(|s| !s.trim().is_empty());

        Self {
            monitor_keywords: compiled.monitor_keywords,
            alert_keywords: compiled.alert_keywords,
            alert_patterns: compiled.alert_patterns,
            skipped_patterns: compiled.skipped_patterns,
            channel_allowlist: raw.channels.into_iter().collect(),
            log_all_messages: raw.log_all_messages,
            ai_trigger_enabled: raw.ai_trigger_enabled,
            ai_trigger_identities: raw
                .ai_trigger_users
                .into_iter()
                .map(|u| u.to_lowercase())
                .collect(),
            alert_target: raw.alert_target,
            owner_user_id,
            source_version: version,
        }
    }

    /// Safe defaults used when the rule source is absent or unreadable:
    /// record everything, alert on nothing.
    pub fn fallback(fallback_owner: Option<&str>) -> Self {
        let raw = RawRules {
            log_all_messages: true,
            ..RawRules::default()
        };
        Self::build(raw, SourceVersion::MISSING, fallback_owner)
    }

    pub fn allows_channel(&self, channel_id: &str) -> bool {
        self.channel_allowlist.is_empty() || self.channel_allowlist.contains(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_records_everything() {
        let s = RuleSnapshot::fallback(None);
        assert!(s.log_all_messages);
        assert!(s.monitor_keywords.is_empty());
        assert!(s.alert_patterns.is_empty());
        assert!(s.allows_channel("-100123"));
        assert_eq!(s.source_version, SourceVersion::MISSING);
    }

    #[test]
    fn rules_user_id_wins_over_fallback_owner() {
        let raw = RawRules {
            user_id: Some("from-rules".to_string()),
            ..RawRules::default()
        };
        let s = RuleSnapshot::build(raw, SourceVersion(5), Some("from-env"));
        assert_eq!(s.owner_user_id.as_deref(), Some("from-rules"));

        let s = RuleSnapshot::build(RawRules::default(), SourceVersion(5), Some("from-env"));
        assert_eq!(s.owner_user_id.as_deref(), Some("from-env"));
    }

    #[test]
    fn allowlist_filters_channels() {
        let raw = RawRules {
            channels: vec!["-1001".to_string()],
            ..RawRules::default()
        };
        let s = RuleSnapshot::build(raw, SourceVersion(1), None);
        assert!(s.allows_channel("-1001"));
        assert!(!s.allows_channel("-1002"));
    }

    #[test]
    fn modified_time_never_maps_to_missing() {
        assert_ne!(SourceVersion::from_modified(UNIX_EPOCH), SourceVersion::MISSING);
    }
}
