//! Best-effort recovery of a JSON object embedded in free-form model output.
//!
//! Models asked for "JSON only" still wrap answers in prose or markdown fences.
//! The recovery steps are bounded and tried in order: direct parse, fenced
//! block, balanced-brace scan from each `{`, then progressively shorter
//! candidates ending at an earlier `}`. Anything else is a hard failure.

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

/// Upper bound on start positions tried by the brace scan.
const MAX_CANDIDATE_STARTS: usize = 32;

pub fn extract_json_object(text: &str) -> Result<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("response is empty"));
    }

    if let Some(object) = parse_object(trimmed) {
        return Ok(object);
    }

    if let Some(fenced) = fenced_block(trimmed)
        && let Some(object) = parse_object(fenced)
    {
        return Ok(object);
    }

    let starts = trimmed
        .char_indices()
        .filter(|(_, ch)| *ch == '{')
        .map(|(idx, _)| idx)
        .take(MAX_CANDIDATE_STARTS);
    for start in starts {
        let tail = &trimmed[start..];
        if let Some(end) = balanced_end(tail)
            && let Some(object) = parse_object(&tail[..end])
        {
            return Ok(object);
        }
        if let Some(object) = shrink_to_object(tail) {
            return Ok(object);
        }
    }

    Err(anyhow!("no JSON object found in response"))
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n').map(|idx| idx + 1).unwrap_or(0);
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Byte offset just past the `}` that closes the object opening at `text[0]`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn shrink_to_object(tail: &str) -> Option<Map<String, Value>> {
    let mut end = tail.len();
    while let Some(close) = tail[..end].rfind('}') {
        if let Some(object) = parse_object(&tail[..=close]) {
            return Some(object);
        }
        end = close;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let object = extract_json_object(r#"{"x": 50, "y": 20}"#).expect("object");
        assert_eq!(object["x"], 50);
    }

    #[test]
    fn finds_object_wrapped_in_prose() {
        let text = "Sure! Here is the placement:\n{\"x\": 40, \"y\": 25, \"suggestedColor\": \"white\"}\nLet me know if you need more.";
        let object = extract_json_object(text).expect("object");
        assert_eq!(object["suggestedColor"], "white");
    }

    #[test]
    fn reads_markdown_fence() {
        let text = "```json\n{\"luminosity\": 12}\n```";
        let object = extract_json_object(text).expect("object");
        assert_eq!(object["luminosity"], 12);
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let text = r#"note {"reason": "text } here", "x": 10} trailing }"#;
        let object = extract_json_object(text).expect("object");
        assert_eq!(object["x"], 10);
        assert_eq!(object["reason"], "text } here");
    }

    #[test]
    fn skips_non_json_braces_before_the_object() {
        let text = "{placeholder} then {\"y\": 30}";
        let object = extract_json_object(text).expect("object");
        assert_eq!(object["y"], 30);
    }

    #[test]
    fn fails_without_object() {
        assert!(extract_json_object("I cannot analyze this image.").is_err());
        assert!(extract_json_object("   ").is_err());
        assert!(extract_json_object("[1, 2, 3]").is_err());
        assert!(extract_json_object("{\"x\": 1").is_err());
    }
}
