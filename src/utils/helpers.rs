/// Removes a surrounding Markdown code fence (```lang ... ```) if the whole text is fenced.
///
/// Generated artifacts are often wrapped in a fence even when the prompt asks for raw code.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => return String::new(),
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}

/// Finds the first JSON object in a generation response.
///
/// Looks inside a ```json fence first, then falls back to the outermost `{ ... }` span.
pub fn extract_json_block(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

/// Shortens `text` to `max` characters for log lines and observer activity.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_removed() {
        assert_eq!(strip_code_fences("```html\n<p>hi</p>\n```"), "<p>hi</p>");
        assert_eq!(strip_code_fences("  body { color: red; } "), "body { color: red; }");
        assert_eq!(strip_code_fences("```css\nbody {}"), "body {}");
    }

    #[test]
    fn json_is_found_in_fences_or_prose() {
        let fenced = "Here you go:\n```json\n{\"requires_fix\": false}\n```\nThanks";
        assert_eq!(extract_json_block(fenced).unwrap(), "{\"requires_fix\": false}");
        let prose = "Verdict: {\"requires_fix\": true, \"feedback\": \"x\"} done";
        assert_eq!(
            extract_json_block(prose).unwrap(),
            "{\"requires_fix\": true, \"feedback\": \"x\"}"
        );
        assert!(extract_json_block("no json here").is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("short", 10), "short");
    }
}
