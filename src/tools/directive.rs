//! Tool directive grammar, version 1
//!
//! ```text
//! directive := "TOOL:" name ":" ws? object
//! name      := [A-Za-z0-9_-]+
//! object    := "{" ... "}"     brace-balanced, JSON string literals honoured
//! ws        := (" " | "\t")*
//! ```
//!
//! Directives may appear anywhere in a reply, any number of times. Matches are
//! found left to right and never overlap. A `TOOL:` that is not followed by a
//! name, a colon and an opening brace is ordinary text. An object whose braces
//! never close runs to the end of the reply and is reported as a parse error.
//!
//! Parsing needs only the reply text and a predicate telling which tool names
//! are registered. Parse-error reasons are fixed phrases; decoder detail is
//! logged only.

use serde_json::Value;
use std::ops::Range;
use tracing::warn;

const INVALID_JSON: &str = "arguments are not valid JSON";
const UNTERMINATED: &str = "unterminated argument object";

pub const GRAMMAR_VERSION: u32 = 1;
pub const DIRECTIVE_PREFIX: &str = "TOOL:";

/// Outcome of parsing one directive occurrence
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveParse {
    Ok { name: String, args: Value },
    ParseError { name: String, raw: String, reason: String },
    UnknownTool { name: String, args: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// Byte range of the whole directive in the reply
    pub span: Range<usize>,
    /// Zero-based occurrence index within the reply
    pub index: usize,
    pub parse: DirectiveParse,
}

impl Directive {
    pub fn name(&self) -> &str {
        match &self.parse {
            DirectiveParse::Ok { name, .. }
            | DirectiveParse::ParseError { name, .. }
            | DirectiveParse::UnknownTool { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub visible_text: String,
    pub directives: Vec<Directive>,
}

impl ParsedReply {
    pub fn has_directives(&self) -> bool {
        !self.directives.is_empty()
    }
}

struct RawDirective {
    span: Range<usize>,
    name: String,
    body: std::result::Result<Value, (String, String)>,
}

/// Parse a model reply into visible text plus directives, in order of appearance.
pub fn parse_reply<F>(raw_text: &str, is_registered: F) -> ParsedReply
where
    F: Fn(&str) -> bool,
{
    let raw = scan(raw_text);
    let spans: Vec<Range<usize>> = raw.iter().map(|d| d.span.clone()).collect();

    let directives = raw
        .into_iter()
        .enumerate()
        .map(|(index, d)| {
            let parse = match d.body {
                Err((raw, reason)) => DirectiveParse::ParseError {
                    name: d.name,
                    raw,
                    reason,
                },
                Ok(args) if is_registered(&d.name) => DirectiveParse::Ok { name: d.name, args },
                Ok(args) => DirectiveParse::UnknownTool { name: d.name, args },
            };
            Directive {
                span: d.span,
                index,
                parse,
            }
        })
        .collect();

    let mut visible_text = strip_directives(raw_text, &spans);

    // Removing a directive can butt two fragments together into a new one;
    // those are stripped too but never dispatched.
    loop {
        let leftover: Vec<Range<usize>> = scan(&visible_text).into_iter().map(|d| d.span).collect();
        if leftover.is_empty() {
            break;
        }
        visible_text = strip_directives(&visible_text, &leftover);
    }

    ParsedReply {
        visible_text,
        directives,
    }
}

/// Remove the given (sorted, non-overlapping) byte ranges and trim the result.
pub fn strip_directives(text: &str, spans: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for span in spans {
        if span.start > cursor {
            out.push_str(&text[cursor..span.start]);
        }
        cursor = cursor.max(span.end);
    }
    if cursor < text.len() {
        out.push_str(&text[cursor..]);
    }

    out.trim().to_string()
}

fn scan(text: &str) -> Vec<RawDirective> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(DIRECTIVE_PREFIX) {
        let start = cursor + offset;
        match match_at(text, start) {
            Some(directive) => {
                cursor = directive.span.end;
                found.push(directive);
            }
            None => cursor = start + DIRECTIVE_PREFIX.len(),
        }
        if cursor >= text.len() {
            break;
        }
    }

    found
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

// All delimiters are ASCII, so every index computed here is a char boundary.
fn match_at(text: &str, start: usize) -> Option<RawDirective> {
    let bytes = text.as_bytes();
    let name_start = start + DIRECTIVE_PREFIX.len();

    let mut i = name_start;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    if i == name_start || bytes.get(i) != Some(&b':') {
        return None;
    }
    let name = text[name_start..i].to_string();

    i += 1;
    while matches!(bytes.get(i), Some(b' ') | Some(b'\t')) {
        i += 1;
    }
    if bytes.get(i) != Some(&b'{') {
        return None;
    }
    let body_start = i;

    let (end, body) = match balanced_object_end(bytes, body_start) {
        Some(end) => {
            let raw = &text[body_start..end];
            let body = match serde_json::from_str::<Value>(raw) {
                Ok(value) => Ok(value),
                Err(e) => {
                    warn!(tool_name = %name, error = %e, "Directive arguments are not valid JSON");
                    Err((raw.to_string(), INVALID_JSON.to_string()))
                }
            };
            (end, body)
        }
        None => (
            text.len(),
            Err((
                text[body_start..].to_string(),
                UNTERMINATED.to_string(),
            )),
        ),
    };

    Some(RawDirective {
        span: start..end,
        name,
        body,
    })
}

/// Index one past the brace closing the object opened at `open`.
fn balanced_object_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
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
    use serde_json::json;

    fn known(name: &str) -> bool {
        matches!(name, "getBalance" | "addExpense" | "searchCandidates")
    }

    #[test]
    fn test_single_directive() {
        let parsed = parse_reply("Sure! TOOL:getBalance:{}", known);
        assert_eq!(parsed.visible_text, "Sure!");
        assert_eq!(parsed.directives.len(), 1);
        assert_eq!(
            parsed.directives[0].parse,
            DirectiveParse::Ok {
                name: "getBalance".into(),
                args: json!({})
            }
        );
        assert_eq!(parsed.directives[0].span, 6..24);
    }

    #[test]
    fn test_malformed_directive_consumes_rest() {
        let parsed = parse_reply("TOOL:addExpense:{bad json", known);
        assert_eq!(parsed.visible_text, "");
        assert_eq!(parsed.directives.len(), 1);
        match &parsed.directives[0].parse {
            DirectiveParse::ParseError { name, raw, reason } => {
                assert_eq!(name, "addExpense");
                assert_eq!(raw, "{bad json");
                assert!(reason.contains("unterminated"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_balanced_but_invalid_json() {
        let parsed = parse_reply("ok TOOL:addExpense:{amount: 5} done", known);
        assert_eq!(parsed.visible_text, "ok  done");
        match &parsed.directives[0].parse {
            DirectiveParse::ParseError { raw, reason, .. } => {
                assert_eq!(raw, "{amount: 5}");
                assert_eq!(reason, "arguments are not valid JSON");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_directives_in_order() {
        let text = "Logging it. TOOL:addExpense:{\"amount\": 12.5, \"category\": \"food\"}\nThen: TOOL:getBalance:{} TOOL:launchRocket:{\"to\":\"moon\"}";
        let parsed = parse_reply(text, known);

        let names: Vec<&str> = parsed.directives.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["addExpense", "getBalance", "launchRocket"]);
        assert_eq!(parsed.directives.iter().map(|d| d.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(matches!(
            parsed.directives[2].parse,
            DirectiveParse::UnknownTool { .. }
        ));
        assert_eq!(parsed.visible_text, "Logging it. \nThen:");
    }

    #[test]
    fn test_braces_inside_strings() {
        let parsed = parse_reply(r#"TOOL:addExpense:{"description": "a } and \" {"} tail"#, known);
        assert_eq!(parsed.visible_text, "tail");
        match &parsed.directives[0].parse {
            DirectiveParse::Ok { args, .. } => assert_eq!(args["description"], "a } and \" {"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nested_arguments() {
        let parsed = parse_reply(
            r#"TOOL:searchCandidates:{"filters": {"skills": ["rust"]}, "limit": 3}"#,
            known,
        );
        match &parsed.directives[0].parse {
            DirectiveParse::Ok { args, .. } => assert_eq!(args["filters"]["skills"][0], "rust"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_whitespace_before_object_allowed() {
        let parsed = parse_reply("TOOL:getBalance: {}", known);
        assert_eq!(parsed.directives.len(), 1);
        assert_eq!(parsed.visible_text, "");
    }

    #[test]
    fn test_prefix_without_directive_is_text() {
        for text in ["TOOL:", "TOOL:name", "TOOL::{}", "TOOL:getBalance:[1]", "see TOOL: docs"] {
            let parsed = parse_reply(text, known);
            assert!(parsed.directives.is_empty(), "{}", text);
            assert_eq!(parsed.visible_text, text.trim());
        }
    }

    #[test]
    fn test_no_directives_keeps_text() {
        let parsed = parse_reply("  Your balance is fine.  ", known);
        assert!(!parsed.has_directives());
        assert_eq!(parsed.visible_text, "Your balance is fine.");
    }

    #[test]
    fn test_stripping_is_lossless_for_other_characters() {
        let cases = [
            "héllo TOOL:getBalance:{} wörld",
            "a TOOL:x:{\"k\":\"TOOL:y:{}\"} b TOOL:z:{} c",
            "TOOL:a:{}TOOL:b:{}",
            "no directives at all",
            "emoji 🎉 TOOL:getBalance:{\"n\":1} 🎉",
        ];

        for text in cases {
            let parsed = parse_reply(text, known);
            assert!(!parsed.visible_text.contains("TOOL:getBalance:{"));
            assert!(scan(&parsed.visible_text).is_empty(), "{}", text);

            let mut expected = String::new();
            let mut cursor = 0;
            for d in &parsed.directives {
                expected.push_str(&text[cursor..d.span.start]);
                cursor = d.span.end;
            }
            expected.push_str(&text[cursor..]);
            assert_eq!(parsed.visible_text, expected.trim(), "{}", text);
        }
    }

    #[test]
    fn test_directive_inside_arguments_is_not_rescanned() {
        let parsed = parse_reply(r#"TOOL:addExpense:{"note":"TOOL:getBalance:{}"}"#, known);
        assert_eq!(parsed.directives.len(), 1);
        assert_eq!(parsed.directives[0].name(), "addExpense");
    }

    #[test]
    fn test_fragments_joined_by_removal_are_stripped() {
        let parsed = parse_reply("TOTOOL:a:{}OL:getBalance:{}", known);
        assert_eq!(parsed.directives.len(), 1);
        assert_eq!(parsed.visible_text, "");
    }
}
