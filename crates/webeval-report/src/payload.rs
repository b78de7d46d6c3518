//! Agent result payloads and defensive parsing of the raw form.
//!
//! External agent backends hand back their history as a printed object
//! graph, not JSON. The only stable landmark in that text is the
//! `all_results=[...]` list, so extraction walks it with a quote-aware
//! bracket scan rather than trusting the exact print format.

use webeval_agent::AgentRunResult;

use crate::error::ParseError;

/// Agent outcome handed to the formatter.
#[derive(Debug, Clone)]
pub enum AgentResultPayload {
    /// Result produced by the in-process runner.
    Structured(AgentRunResult),
    /// Printed result text from an external agent backend.
    Raw(String),
}

impl From<AgentRunResult> for AgentResultPayload {
    fn from(result: AgentRunResult) -> Self {
        AgentResultPayload::Structured(result)
    }
}

/// One entry recovered from a raw `all_results=[...]` list.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ParsedStep {
    pub text: Option<String>,
    pub error: Option<String>,
    pub is_done: bool,
    pub success: Option<bool>,
}

const MARKER: &str = "all_results=[";
const ITEM: &str = "ActionResult(";

/// Pull the step entries out of a raw payload.
///
/// Unknown fields and unexpected value forms inside an item are skipped,
/// not rejected; only a missing marker or an unterminated list fails.
pub(crate) fn parse_all_results(payload: &str) -> Result<Vec<ParsedStep>, ParseError> {
    let start = payload.find(MARKER).ok_or(ParseError::MissingMarker)?;
    let body = list_body(&payload[start + MARKER.len()..])?;

    let mut steps = Vec::new();
    let mut rest = body;
    while let Some(pos) = rest.find(ITEM) {
        let after = &rest[pos + ITEM.len()..];
        let (item, consumed) = paren_body(after);
        steps.push(parse_item(item));
        rest = &after[consumed..];
    }
    Ok(steps)
}

fn parse_item(item: &str) -> ParsedStep {
    ParsedStep {
        text: string_field(item, "extracted_content="),
        error: string_field(item, "error="),
        is_done: bool_field(item, "is_done=").unwrap_or(false),
        success: bool_field(item, "success="),
    }
}

/// Slice of `s` up to the `]` matching an already-consumed `[`.
///
/// Brackets inside quoted strings do not count; backslash escapes the
/// next character inside a quote.
fn list_body(s: &str) -> Result<&str, ParseError> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&s[..i]);
                }
            }
            _ => {}
        }
    }
    Err(ParseError::UnterminatedList)
}

/// Slice of `s` up to the `)` matching an already-consumed `(`, plus the
/// byte length consumed including that paren. An unterminated item takes
/// the rest of the input.
fn paren_body(s: &str) -> (&str, usize) {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return (&s[..i], i + 1);
                }
            }
            _ => {}
        }
    }
    (s, s.len())
}

/// Find `key` in `item` outside any quoted string and return the text
/// after it. Step narration routinely contains `error=`-like fragments,
/// so a plain substring search would grab the wrong position.
fn find_field<'a>(item: &'a str, key: &str) -> Option<&'a str> {
    let bytes = item.as_bytes();
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            _ => {
                if item.is_char_boundary(i) && item[i..].starts_with(key) {
                    return Some(&item[i + key.len()..]);
                }
            }
        }
        i += 1;
    }
    None
}

fn bool_field(item: &str, key: &str) -> Option<bool> {
    let rest = find_field(item, key)?;
    if rest.starts_with("True") {
        Some(true)
    } else if rest.starts_with("False") {
        Some(false)
    } else {
        None
    }
}

/// Extract a quoted string value; `None` for `None` and anything else
/// unquoted.
fn string_field(item: &str, key: &str) -> Option<String> {
    let rest = find_field(item, key)?;
    let mut chars = rest.chars();
    let quote = chars.next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let mut value = String::new();
    let mut escaped = false;
    for c in chars {
        if escaped {
            value.push(unescape(c));
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some(value);
        } else {
            value.push(c);
        }
    }
    // Unterminated value, keep what was read
    Some(value)
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_items() {
        let raw = "AgentHistoryList(all_results=[\
            ActionResult(is_done=False, success=None, extracted_content='Clicked [submit]', error=None, include_in_memory=True), \
            ActionResult(is_done=True, success=True, extracted_content='Form saved', error=None, include_in_memory=False)\
            ], all_model_outputs=[])";
        let steps = parse_all_results(raw).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].text.as_deref(), Some("Clicked [submit]"));
        assert!(!steps[0].is_done);
        assert_eq!(steps[0].success, None);
        assert_eq!(steps[0].error, None);
        assert!(steps[1].is_done);
        assert_eq!(steps[1].success, Some(true));
        assert_eq!(steps[1].text.as_deref(), Some("Form saved"));
    }

    #[test]
    fn test_parse_escaped_quote_and_error_field() {
        let raw = r"all_results=[ActionResult(is_done=True, success=False, extracted_content='it\'s broken', error='timeout waiting for selector')]";
        let steps = parse_all_results(raw).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].text.as_deref(), Some("it's broken"));
        assert_eq!(steps[0].error.as_deref(), Some("timeout waiting for selector"));
        assert_eq!(steps[0].success, Some(false));
    }

    #[test]
    fn test_parse_field_name_inside_narration() {
        // "error=" in the quoted narration must not shadow the real field
        let raw = "all_results=[ActionResult(is_done=False, success=None, extracted_content='page shows error=500 banner', error=None)]";
        let steps = parse_all_results(raw).unwrap();
        assert_eq!(
            steps[0].text.as_deref(),
            Some("page shows error=500 banner")
        );
        assert_eq!(steps[0].error, None);
    }

    #[test]
    fn test_parse_missing_marker() {
        assert_eq!(
            parse_all_results("AgentHistoryList(history=[])"),
            Err(ParseError::MissingMarker)
        );
    }

    #[test]
    fn test_parse_unterminated_list() {
        assert_eq!(
            parse_all_results("all_results=[ActionResult(is_done=False"),
            Err(ParseError::UnterminatedList)
        );
    }

    #[test]
    fn test_parse_empty_list() {
        let steps = parse_all_results("all_results=[]").unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn test_parse_escaped_newline() {
        let raw = r"all_results=[ActionResult(is_done=True, success=True, extracted_content='line one\nline two', error=None)]";
        let steps = parse_all_results(raw).unwrap();
        assert_eq!(steps[0].text.as_deref(), Some("line one\nline two"));
    }
}
