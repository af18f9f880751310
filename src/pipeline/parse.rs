//! Result assembly: model text → the five result fields.
//!
//! Consolidated replies are supposed to be a bare JSON object but routinely
//! arrive wrapped in prose or a ` ```json ` fence. [`extract_json_object`]
//! finds the first balanced top-level `{...}` (string- and escape-aware, so a
//! `}` inside a value does not end the object) and [`parse_consolidated`]
//! maps it onto [`ConsolidatedFields`].
//!
//! Staged replies are plain text; [`clean_text`] applies the same cheap,
//! deterministic cleanup to them and to every parsed JSON field.

use crate::error::ParseError;
use crate::output::Stage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// The five fields of a consolidated reply, already cleaned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidatedFields {
    pub caption: String,
    pub summary: String,
    pub objects: String,
    pub mood: String,
    pub story: String,
}

impl ConsolidatedFields {
    pub fn get(&self, stage: Stage) -> &str {
        match stage {
            Stage::Caption => &self.caption,
            Stage::Summary => &self.summary,
            Stage::Objects => &self.objects,
            Stage::Mood => &self.mood,
            Stage::Story => &self.story,
        }
    }
}

/// The first balanced top-level JSON object in `text`.
///
/// When the braces never balance (truncated reply) the span from the first
/// `{` to the last `}` is returned instead, so `serde_json` can report a
/// precise error. `None` means `text` contains no `{` at all.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a consolidated reply into its five fields.
///
/// Falls back to the whole text when no `{` is present. String fields are
/// used as-is, arrays become `- item` lines and other scalars are
/// stringified. A missing or `null` field is an error.
pub fn parse_consolidated(text: &str) -> Result<ConsolidatedFields, ParseError> {
    let candidate = extract_json_object(text).unwrap_or_else(|| text.trim());
    if candidate.is_empty() {
        return Err(ParseError::NoJsonObject);
    }

    let value: Value = serde_json::from_str(candidate).map_err(|e| ParseError::InvalidJson {
        detail: e.to_string(),
    })?;
    let Value::Object(map) = value else {
        return Err(ParseError::NoJsonObject);
    };

    Ok(ConsolidatedFields {
        caption: field_text(&map, Stage::Caption)?,
        summary: field_text(&map, Stage::Summary)?,
        objects: field_text(&map, Stage::Objects)?,
        mood: field_text(&map, Stage::Mood)?,
        story: field_text(&map, Stage::Story)?,
    })
}

fn field_text(map: &Map<String, Value>, stage: Stage) -> Result<String, ParseError> {
    let field = stage.field_name();
    let text = match map.get(field) {
        None | Some(Value::Null) => return Err(ParseError::MissingField { field }),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => bullet_list(items),
        Some(other) => other.to_string(),
    };
    Ok(clean_text(&text))
}

fn bullet_list(items: &[Value]) -> String {
    items
        .iter()
        .map(|item| {
            let s = match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            if s.starts_with("- ") {
                s
            } else {
                format!("- {s}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Text cleanup ─────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*?)\n?```$").unwrap());

/// Trim, normalise line endings, strip an outer code fence and invisible
/// Unicode.
pub fn clean_text(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = s.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    );
    let trimmed = s.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FENCED: &str = "Here is the result:\n```json\n{\"caption\":\"a cat\",\"summary\":\"...\",\"objects\":\"- cat\",\"mood\":\"calm\",\"story\":\"...\"}\n```";

    #[test]
    fn fenced_reply_with_prose_parses() {
        let f = parse_consolidated(FENCED).unwrap();
        assert_eq!(f.caption, "a cat");
        assert_eq!(f.summary, "...");
        assert_eq!(f.objects, "- cat");
        assert_eq!(f.mood, "calm");
        assert_eq!(f.story, "...");
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let text = r#"{"caption":"a {weird} \"sign\"","summary":"s","objects":"o","mood":"m","story":"}"} trailing {junk}"#;
        let obj = extract_json_object(text).unwrap();
        assert!(obj.ends_with(r#""story":"}"}"#));
        let f = parse_consolidated(text).unwrap();
        assert_eq!(f.caption, r#"a {weird} "sign""#);
        assert_eq!(f.story, "}");
    }

    #[test]
    fn first_object_wins() {
        let text = r#"{"a":1} and then {"b":2}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a":1}"#));
    }

    #[test]
    fn no_braces_means_whole_text_is_tried() {
        assert_eq!(extract_json_object("plain prose"), None);
        assert!(matches!(
            parse_consolidated("plain prose"),
            Err(ParseError::InvalidJson { .. })
        ));
        assert_eq!(parse_consolidated("   "), Err(ParseError::NoJsonObject));
    }

    #[test]
    fn truncated_object_is_invalid_json() {
        let err = parse_consolidated(r#"{"caption": "a cat", "summary": {"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson { .. }), "got {err:?}");
    }

    #[test]
    fn missing_field_is_named() {
        let err =
            parse_consolidated(r#"{"caption":"c","summary":"s","objects":"o","mood":"m"}"#)
                .unwrap_err();
        assert_eq!(err, ParseError::MissingField { field: "story" });
    }

    #[test]
    fn array_and_scalar_fields_are_rendered() {
        let f = parse_consolidated(
            r#"{"caption":"c","summary":"s","objects":["cat","- sofa",3],"mood":true,"story":"x"}"#,
        )
        .unwrap();
        assert_eq!(f.objects, "- cat\n- sofa\n- 3");
        assert_eq!(f.mood, "true");
        assert_eq!(f.get(Stage::Objects), f.objects);
    }

    #[test]
    fn clean_text_strips_fences_and_invisibles() {
        assert_eq!(clean_text("```markdown\nHello\u{200B}\r\nWorld\n```"), "Hello\nWorld");
        assert_eq!(clean_text("  plain  \n"), "plain");
        assert_eq!(clean_text("inline ``` fence stays"), "inline ``` fence stays");
    }
}
