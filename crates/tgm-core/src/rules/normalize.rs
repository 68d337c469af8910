//! Coerces the loosely-typed rule JSON into one canonical shape.
//!
//! List fields accept a JSON array, a newline/comma separated string, or a
//! scalar. Everything becomes a trimmed `Vec<String>` before compilation.

use serde_json::Value;

use crate::{errors::Error, Result};

/// Rule fields after defaults and normalization, before compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRules {
    pub keywords: Vec<String>,
    pub alert_keywords: Vec<String>,
    pub alert_regex: Vec<String>,
    pub channels: Vec<String>,
    pub alert_target: String,
    pub log_all_messages: bool,
    pub ai_trigger_enabled: bool,
    pub ai_trigger_users: Vec<String>,
    pub user_id: Option<String>,
}

impl Default for RawRules {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            alert_keywords: Vec::new(),
            alert_regex: Vec::new(),
            channels: Vec::new(),
            alert_target: "me".to_string(),
            log_all_messages: false,
            ai_trigger_enabled: false,
            ai_trigger_users: Vec::new(),
            user_id: None,
        }
    }
}

impl RawRules {
    pub fn parse(contents: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(contents)?;
        Self::from_json(&root)
    }

    pub fn from_json(root: &Value) -> Result<Self> {
        if root.is_null() {
            return Ok(Self::default());
        }
        let Some(obj) = root.as_object() else {
            return Err(Error::Config(
                "rule source must be a JSON object".to_string(),
            ));
        };

        let defaults = Self::default();
        let ai = obj.get("ai_analysis");
        // Alert patterns are not split on commas: `a{1,3}` is one regex.
        let alert_regex = match obj.get("alert_regex") {
            Some(Value::String(s)) => split_lines(s),
            other => string_list(other),
        };

        Ok(Self {
            keywords: string_list(obj.get("keywords")),
            alert_keywords: string_list(obj.get("alert_keywords")),
            alert_regex,
            channels: string_list(obj.get("channels")),
            alert_target: scalar_string(obj.get("alert_target")).unwrap_or(defaults.alert_target),
            log_all_messages: flag(obj.get("log_all_messages"), defaults.log_all_messages),
            ai_trigger_enabled: flag(
                ai.and_then(|a| a.get("ai_trigger_enabled")),
                defaults.ai_trigger_enabled,
            ),
            ai_trigger_users: string_list(ai.and_then(|a| a.get("ai_trigger_users"))),
            user_id: scalar_string(obj.get("user_id")),
        })
    }
}

/// Array, separated string, or scalar -> trimmed non-empty strings.
pub fn string_list(v: Option<&Value>) -> Vec<String> {
    let out: Vec<String> = match v {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(|x| scalar_string(Some(x))).collect(),
        Some(Value::String(s)) => s.split(['\n', ',']).map(|p| p.to_string()).collect(),
        Some(Value::Number(n)) => vec![n.to_string()],
        Some(Value::Bool(b)) => vec![b.to_string()],
        Some(Value::Object(_)) => Vec::new(),
    };
    out.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_lines(s: &str) -> Vec<String> {
    s.lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn scalar_string(v: Option<&Value>) -> Option<String> {
    let s = match v? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn flag(v: Option<&Value>, default: bool) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
        Some(Value::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_fields_accept_every_shape() {
        assert_eq!(
            string_list(Some(&json!([" a ", "", 42, null, true]))),
            vec!["a", "42", "true"]
        );
        assert_eq!(
            string_list(Some(&json!("alice\n @bob ,carol,,"))),
            vec!["alice", "@bob", "carol"]
        );
        assert_eq!(string_list(Some(&json!(-100123))), vec!["-100123"]);
        assert!(string_list(Some(&Value::Null)).is_empty());
        assert!(string_list(None).is_empty());
        assert!(string_list(Some(&json!({"x": 1}))).is_empty());
    }

    #[test]
    fn missing_keys_take_defaults() {
        let raw = RawRules::parse(r#"{"keywords": ["btc"]}"#).unwrap();
        assert_eq!(raw.keywords, vec!["btc"]);
        assert_eq!(raw.alert_target, "me");
        assert!(!raw.log_all_messages);
        assert!(!raw.ai_trigger_enabled);
        assert!(raw.user_id.is_none());
    }

    #[test]
    fn nested_ai_section_and_string_users() {
        let raw = RawRules::parse(
            r#"{
              "telegram": {"api_id": 1, "api_hash": "h"},
              "log_all_messages": "yes",
              "ai_analysis": {"ai_trigger_enabled": true, "ai_trigger_users": "@boss\n12345"},
              "user_id": 777
            }"#,
        )
        .unwrap();
        assert!(raw.log_all_messages);
        assert!(raw.ai_trigger_enabled);
        assert_eq!(raw.ai_trigger_users, vec!["@boss", "12345"]);
        assert_eq!(raw.user_id.as_deref(), Some("777"));
    }

    #[test]
    fn regex_string_is_split_by_line_only() {
        let raw = RawRules::parse(r#"{"alert_regex": "a{1,3}\nb+"}"#).unwrap();
        assert_eq!(raw.alert_regex, vec!["a{1,3}", "b+"]);
    }

    #[test]
    fn non_object_root_is_a_config_error() {
        assert!(matches!(RawRules::parse("[1,2]"), Err(Error::Config(_))));
        assert!(matches!(RawRules::parse("{oops"), Err(Error::Json(_))));
    }
}
