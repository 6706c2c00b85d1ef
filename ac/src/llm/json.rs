//! Lenient JSON extraction from LLM replies
//!
//! Model output is rarely pure JSON: it arrives wrapped in prose, code
//! fences, or with trailing commentary. The extractor scans for the first
//! balanced `{...}` substring (string- and escape-aware) and parses it.
//! Callers apply their documented fallback when extraction fails.

use serde_json::Value;

/// Extract and parse the first balanced JSON object in the text
///
/// Returns `None` when no balanced substring parses as a JSON object.
pub fn extract_first_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(rel_start) = text[search_from..].find('{') {
        let start = search_from + rel_start;

        if let Some(end) = find_balanced_end(bytes, start) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }

        search_from = start + 1;
    }

    None
}

/// Find the index of the brace closing the object opened at `start`
fn find_balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_object() {
        let value = extract_first_json(r#"{"project_name": "string_utils"}"#).unwrap();
        assert_eq!(value["project_name"], "string_utils");
    }

    #[test]
    fn test_extract_from_surrounding_prose() {
        let text = "Here is the configuration you asked for:\n{\"main_file\": \"a.py\"}\nLet me know!";
        let value = extract_first_json(text).unwrap();
        assert_eq!(value["main_file"], "a.py");
    }

    #[test]
    fn test_extract_nested_object() {
        let text = r#"answer: {"next_speaker": {"reason": "writer is ready", "answer": "writer"}}"#;
        let value = extract_first_json(text).unwrap();
        assert_eq!(value["next_speaker"]["answer"], "writer");
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"{"content": "use {braces} freely }{", "ok": true}"#;
        let value = extract_first_json(text).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let text = r#"{"message": "she said \"hi\" {"}"#;
        let value = extract_first_json(text).unwrap();
        assert_eq!(value["message"], "she said \"hi\" {");
    }

    #[test]
    fn test_skips_unparseable_prefix() {
        let text = r#"{not json} but then {"valid": 1}"#;
        let value = extract_first_json(text).unwrap();
        assert_eq!(value["valid"], 1);
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_first_json("no braces here").is_none());
        assert!(extract_first_json("unbalanced { brace").is_none());
        assert!(extract_first_json("").is_none());
    }
}
