//! Recovering structured data from model text.
//!
//! Models asked for JSON still wrap it in prose or code fences now and then.
//! Extraction runs an ordered list of candidate strategies, takes the first
//! one that yields text, and parses that. A failed parse is reported with the
//! exact candidate text and is never replaced by an empty or default value.

use crate::error::ExtractError;
use crate::shape::{ShapeDescriptor, ShapeKind};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

type Strategy = fn(&str, ShapeKind) -> Option<&str>;

const STRATEGIES: [(&str, Strategy); 3] = [
    ("fenced_block", fenced_strategy),
    ("bracket_span", bracket_span),
    ("raw_text", raw_strategy),
];

const FENCE: &str = "```";

/// Inner content of the first triple-backtick block.
///
/// An optional language tag is skipped, whether it sits alone on the
/// opening line or is followed by content on the same line. Returns `None`
/// when there is no closed, non-empty block.
#[must_use]
pub fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find(FENCE)?;
    let after_open = &text[open + FENCE.len()..];

    let body = match after_open.split_once('\n') {
        Some((first_line, rest)) if is_fence_tag(first_line) => rest,
        _ => strip_inline_tag(after_open),
    };

    let close = body.find(FENCE)?;
    let inner = body[..close].trim();
    (!inner.is_empty()).then_some(inner)
}

fn is_fence_tag(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
}

fn strip_inline_tag(text: &str) -> &str {
    match text.split_once(char::is_whitespace) {
        Some((tag, rest)) if !tag.is_empty() && is_fence_tag(tag) => rest,
        _ => text,
    }
}

/// Outermost bracketed span: first opening delimiter to last closing one.
///
/// An array span is tried first when `prefer` is [`ShapeKind::Array`], an
/// object span when it is [`ShapeKind::Object`]; otherwise whichever opening
/// delimiter comes first in the text wins.
#[must_use]
pub fn bracket_span(text: &str, prefer: ShapeKind) -> Option<&str> {
    const OBJECT: (char, char) = ('{', '}');
    const ARRAY: (char, char) = ('[', ']');

    let order = match prefer {
        ShapeKind::Array => [ARRAY, OBJECT],
        ShapeKind::Object => [OBJECT, ARRAY],
        ShapeKind::Other => match (text.find('{'), text.find('[')) {
            (Some(brace), Some(bracket)) if bracket < brace => [ARRAY, OBJECT],
            (None, Some(_)) => [ARRAY, OBJECT],
            _ => [OBJECT, ARRAY],
        },
    };

    order
        .into_iter()
        .find_map(|(open, close)| span_between(text, open, close))
}

fn span_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..end + close.len_utf8()])
}

/// The whole text, trimmed.
#[must_use]
pub fn raw_text(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn fenced_strategy(text: &str, _: ShapeKind) -> Option<&str> {
    fenced_block(text)
}

fn raw_strategy(text: &str, _: ShapeKind) -> Option<&str> {
    raw_text(text)
}

/// Picks the text that will be parsed.
///
/// # Errors
///
/// Returns `EmptyResponse` when the input is blank.
pub fn candidate<'a>(raw: &'a str, hint: Option<&ShapeDescriptor>) -> Result<&'a str, ExtractError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::EmptyResponse);
    }

    let prefer = hint.map_or(ShapeKind::Other, ShapeDescriptor::kind);
    for (name, strategy) in STRATEGIES {
        if let Some(found) = strategy(trimmed, prefer) {
            debug!(strategy = name, "extraction candidate selected");
            return Ok(found);
        }
    }

    Ok(trimmed)
}

/// Parses structured data out of model text.
///
/// # Errors
///
/// - `EmptyResponse` for blank input
/// - `MalformedJson` when the chosen candidate does not parse
/// - `ShapeMismatch` when the hint asks for an array or object and the text
///   holds the other kind
pub fn extract(raw: &str, hint: Option<&ShapeDescriptor>) -> Result<JsonValue, ExtractError> {
    extract_with_candidate(raw, hint).map(|(_, value)| value)
}

/// Like [`extract`], then deserializes into `T`.
///
/// # Errors
///
/// As [`extract`]; a value that does not fit `T` is reported as
/// `MalformedJson` carrying the candidate text.
pub fn extract_typed<T>(raw: &str, hint: Option<&ShapeDescriptor>) -> Result<T, ExtractError>
where
    T: DeserializeOwned,
{
    let (candidate, value) = extract_with_candidate(raw, hint)?;
    serde_json::from_value(value).map_err(|e| ExtractError::MalformedJson {
        raw: candidate.to_string(),
        reason: e.to_string(),
    })
}

fn extract_with_candidate<'a>(
    raw: &'a str,
    hint: Option<&ShapeDescriptor>,
) -> Result<(&'a str, JsonValue), ExtractError> {
    let candidate = candidate(raw, hint)?;
    let value: JsonValue =
        serde_json::from_str(candidate).map_err(|e| ExtractError::MalformedJson {
            raw: candidate.to_string(),
            reason: e.to_string(),
        })?;

    let expected = hint.map_or(ShapeKind::Other, ShapeDescriptor::kind);
    let conforms = match expected {
        ShapeKind::Array => value.is_array(),
        ShapeKind::Object => value.is_object(),
        ShapeKind::Other => true,
    };
    if !conforms {
        return Err(ExtractError::ShapeMismatch {
            expected: expected.as_str(),
            raw: candidate.to_string(),
        });
    }

    Ok((candidate, value))
}
