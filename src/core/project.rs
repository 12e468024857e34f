const DEFAULT_PROJECT_NAME: &str = "sim_project";
const MAX_PROJECT_NAME_LEN: usize = 40;
const PROJECT_NAME_WORDS: usize = 5;

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Cleans a free-form name so it can be used as a path component.
///
/// Backslashes become forward slashes, characters from `<>:"|?*` are dropped, runs of
/// whitespace become `_`, and leading/trailing `_` or `/` are stripped. An empty result is
/// replaced with `sanitized_empty_name`.
pub fn sanitize_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                cleaned.push('_');
            }
            in_whitespace = true;
            continue;
        }
        if FORBIDDEN_CHARS.contains(&c) {
            continue;
        }
        in_whitespace = false;
        cleaned.push(if c == '\\' { '/' } else { c });
    }
    let name = cleaned.trim_matches(|c| c == '_' || c == '/');
    if name.is_empty() {
        "sanitized_empty_name".to_string()
    } else {
        name.to_string()
    }
}

/// Derives the project directory name from the user's request.
///
/// # Arguments
/// * `request` - The raw request text
///
/// # Returns
/// * `String` - The first five words of the sanitized request, capped at 40 characters,
///   or `sim_project` when nothing usable remains
pub fn project_name(request: &str) -> String {
    let cleaned = sanitize_name(&request.replace('/', " ").replace('.', " "));
    if cleaned == "sanitized_empty_name" {
        return DEFAULT_PROJECT_NAME.to_string();
    }
    let words: Vec<&str> = cleaned
        .split('_')
        .filter(|w| !w.is_empty())
        .take(PROJECT_NAME_WORDS)
        .collect();
    let joined: String = words.join("_").chars().take(MAX_PROJECT_NAME_LEN).collect();
    let joined = joined.trim_matches('_').to_string();
    if joined.is_empty() {
        DEFAULT_PROJECT_NAME.to_string()
    } else {
        joined
    }
}
