use crate::backend::AiAnalysisResponse;

/// Plain-text AI summary sent back to the triggering sender.
pub fn format_ai_summary(result: &AiAnalysisResponse) -> String {
    let a = &result.analysis;
    let sentiment = a.sentiment.as_deref().unwrap_or("unknown");
    let score = a.sentiment_score.unwrap_or(0.0);
    let risk = a.risk_level.as_deref().unwrap_or("unknown");
    let summary = a
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(none)");
    let keywords = if a.keywords.is_empty() {
        "(none)".to_string()
    } else {
        a.keywords.join(", ")
    };

    format!(
        "🤖 AI analysis\n\n\
         📊 Messages analyzed: {}\n\n\
         Sentiment: {sentiment} (score={score})\n\n\
         Risk level: {risk}\n\n\
         Summary:\n{summary}\n\n\
         Keywords: {keywords}",
        result.message_count
    )
}

/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out = s.chars().take(keep).collect::<String>();
    out.push_str("...");
    out
}
