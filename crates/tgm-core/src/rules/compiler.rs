use regex::RegexBuilder;

use crate::rules::snapshot::{AlertPattern, Keyword, SkippedPattern};

#[derive(Clone, Debug, Default)]
pub struct CompiledRules {
    pub monitor_keywords: Vec<Keyword>,
    pub alert_keywords: Vec<Keyword>,
    pub alert_patterns: Vec<AlertPattern>,
    pub skipped_patterns: Vec<SkippedPattern>,
}

/// Lower keywords once and compile each alert regex independently.
///
/// A pattern that fails to compile is recorded in `skipped_patterns` and left
/// out; it never aborts the rest of the load.
pub fn compile(
    raw_keywords: &[String],
    raw_alert_keywords: &[String],
    raw_regex_patterns: &[String],
) -> CompiledRules {
    let mut out = CompiledRules {
        monitor_keywords: raw_keywords.iter().map(Keyword::new).collect(),
        alert_keywords: raw_alert_keywords.iter().map(Keyword::new).collect(),
        ..CompiledRules::default()
    };

    for pattern in raw_regex_patterns {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => out
                .alert_patterns
                .push(AlertPattern::new(pattern.clone(), regex)),
            Err(e) => out.skipped_patterns.push(SkippedPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            }),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bad_pattern_is_skipped_not_fatal() {
        let c = compile(&[], &[], &strings(&["(", "ok.*"]));
        assert_eq!(c.alert_patterns.len(), 1);
        assert_eq!(c.alert_patterns[0].source, "ok.*");
        assert_eq!(c.skipped_patterns.len(), 1);
        assert_eq!(c.skipped_patterns[0].pattern, "(");
    }

    #[test]
    fn patterns_are_case_insensitive() {
        let c = compile(&[], &[], &strings(&[r"wire\s+transfer"]));
        assert!(c.alert_patterns[0].is_match("Please WIRE   Transfer now"));
    }

    #[test]
    fn keywords_keep_declared_text() {
        let c = compile(&strings(&["Invoice"]), &strings(&["SELL"]), &[]);
        assert_eq!(c.monitor_keywords[0].text, "Invoice");
        assert!(c.monitor_keywords[0].is_in("an invoice arrived"));
        assert!(c.alert_keywords[0].is_in("sell now"));
    }
}
