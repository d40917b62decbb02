//! Minimal shadow document handling.
//!
//! Shadow documents are only ever inspected for a single key and only ever
//! produced for a single reported value, so there is no JSON tree here. Values
//! are found by scanning for the literal `"<key>":` inside the `"desired"`
//! object. Escaped quotes, nested objects before the key, and non-scalar
//! values are not handled.

use crate::error::Error;
use core::fmt::{self, Write};
use heapless::String;
use serde::Deserialize;

/// Capacity of a document built by [`reported_document`].
pub const SHADOW_UPDATE_MAX_SIZE: usize = 256;

/// Longest rejection message kept by [`Rejection`].
pub const REJECTION_MESSAGE_MAX_LEN: usize = 64;

/// Returns the value of `key` inside the `"desired"` object of `document`.
///
/// Quoted values are returned without their quotes; numbers and booleans are
/// returned as their literal text.
///
/// ```rust
/// use libshadow::network::application::shadow::document::desired_value;
///
/// let doc = r#"{"state":{"desired":{"temp":72,"mode":"eco"}}}"#;
/// assert_eq!(desired_value(doc, "temp"), Ok("72"));
/// assert_eq!(desired_value(doc, "mode"), Ok("eco"));
/// ```
pub fn desired_value<'a>(document: &'a str, key: &str) -> Result<&'a str, Error> {
    let desired = object_after(document, "\"desired\"").ok_or(Error::NotFound)?;
    let value = value_after_key(desired, key).ok_or(Error::NotFound)?;
    scalar(value).ok_or(Error::NotFound)
}

/// Finds `label`, then the `{...}` object that follows its colon.
fn object_after<'a>(document: &'a str, label: &str) -> Option<&'a str> {
    let start = document.find(label)? + label.len();
    let rest = document[start..].trim_start().strip_prefix(':')?.trim_start();
    if !rest.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut previous = 0u8;
    for (i, &byte) in rest.as_bytes().iter().enumerate() {
        match byte {
            b'"' if previous != b'\\' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..=i]);
                }
            }
            _ => {}
        }
        previous = byte;
    }
    None
}

/// Returns the text right after `"key":` (whitespace trimmed).
fn value_after_key<'a>(object: &'a str, key: &str) -> Option<&'a str> {
    if key.is_empty() {
        return None;
    }
    for (index, _) in object.match_indices(key) {
        let before = object[..index].as_bytes().last();
        let after = &object[index + key.len()..];
        if before != Some(&b'"') {
            continue;
        }
        let Some(after) = after.strip_prefix('"') else {
            continue;
        };
        if let Some(value) = after.trim_start().strip_prefix(':') {
            return Some(value.trim_start());
        }
    }
    None
}

/// Extracts a quoted string's contents or a bare token.
fn scalar(value: &str) -> Option<&str> {
    if let Some(quoted) = value.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some(&quoted[..end]);
    }
    if value.starts_with(['{', '[']) {
        return None;
    }
    let end = value
        .find(|c: char| c == ',' || c == '}' || c == ']' || c.is_whitespace())
        .unwrap_or(value.len());
    match &value[..end] {
        "" => None,
        token => Some(token),
    }
}

/// A scalar reported to the shadow.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ReportedValue<'a> {
    /// Written quoted, without escaping.
    Str(&'a str),
    /// Written as a bare number.
    Int(i64),
    /// Written as `true` / `false`.
    Bool(bool),
}

impl<'a> From<&'a str> for ReportedValue<'a> {
    fn from(value: &'a str) -> Self {
        ReportedValue::Str(value)
    }
}

impl From<i32> for ReportedValue<'_> {
    fn from(value: i32) -> Self {
        ReportedValue::Int(value as i64)
    }
}

impl From<i64> for ReportedValue<'_> {
    fn from(value: i64) -> Self {
        ReportedValue::Int(value)
    }
}

impl From<bool> for ReportedValue<'_> {
    fn from(value: bool) -> Self {
        ReportedValue::Bool(value)
    }
}

impl fmt::Display for ReportedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedValue::Str(s) => write!(f, "\"{}\"", s),
            ReportedValue::Int(n) => write!(f, "{}", n),
            ReportedValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Builds `{"state":{"reported":{"<key>":<value>}}}`.
///
/// Neither `key` nor a string value is escaped; both must already be JSON
/// safe.
pub fn reported_document(
    key: &str,
    value: ReportedValue<'_>,
) -> Result<String<SHADOW_UPDATE_MAX_SIZE>, Error> {
    let mut document = String::new();
    write!(
        document,
        "{{\"state\":{{\"reported\":{{\"{}\":{}}}}}}}",
        key, value
    )
    .map_err(|_| Error::BufferTooSmall)?;
    Ok(document)
}

/// The shadow service's explanation for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rejection {
    /// HTTP-style error code, 0 if the payload could not be decoded.
    pub code: u16,
    /// Error message, empty if missing or too long to keep.
    pub message: String<REJECTION_MESSAGE_MAX_LEN>,
}

#[derive(Deserialize)]
struct RejectedBody<'a> {
    code: u16,
    #[serde(borrow, default)]
    message: &'a str,
}

impl Rejection {
    /// Decodes a rejected-topic payload such as
    /// `{"code":404,"message":"No shadow exists with name: 'pump-7'"}`.
    pub fn parse(payload: &[u8]) -> Self {
        match serde_json_core::from_slice::<RejectedBody<'_>>(payload) {
            Ok((body, _)) => Self {
                code: body.code,
                message: String::try_from(body.message).unwrap_or_default(),
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{"state":{"desired":{"temp":72,"mode":"eco","on":true},"reported":{"temp":68}},"metadata":{"desired":{"temp":{"timestamp":1}}},"version":12}"#;

    #[test]
    fn extracts_numbers_strings_and_booleans() {
        assert_eq!(desired_value(DOC, "temp"), Ok("72"));
        assert_eq!(desired_value(DOC, "mode"), Ok("eco"));
        assert_eq!(desired_value(DOC, "on"), Ok("true"));
    }

    #[test]
    fn only_looks_inside_desired() {
        // "version" exists, but not under desired
        assert_eq!(desired_value(DOC, "version"), Err(Error::NotFound));
        let reported_only = r#"{"state":{"reported":{"temp":68}}}"#;
        assert_eq!(desired_value(reported_only, "temp"), Err(Error::NotFound));
    }

    #[test]
    fn key_text_inside_a_value_is_not_a_key() {
        let doc = r#"{"state":{"desired":{"mode":"temp","temp":"21"}}}"#;
        assert_eq!(desired_value(doc, "temp"), Ok("21"));
        assert_eq!(desired_value(doc, "tem"), Err(Error::NotFound));
    }

    #[test]
    fn tolerates_whitespace() {
        let doc = "{ \"state\" : { \"desired\" : { \"temp\" : 72 } } }";
        assert_eq!(desired_value(doc, "temp"), Ok("72"));
    }

    #[test]
    fn unterminated_or_missing_document() {
        assert_eq!(desired_value("", "temp"), Err(Error::NotFound));
        assert_eq!(
            desired_value(r#"{"state":{"desired":{"temp":72"#, "temp"),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn reported_documents() {
        assert_eq!(
            reported_document("temp", 72i32.into()).unwrap().as_str(),
            r#"{"state":{"reported":{"temp":72}}}"#
        );
        assert_eq!(
            reported_document("status", "ok".into()).unwrap().as_str(),
            r#"{"state":{"reported":{"status":"ok"}}}"#
        );
        assert_eq!(
            reported_document("online", false.into()).unwrap().as_str(),
            r#"{"state":{"reported":{"online":false}}}"#
        );
        assert_eq!(
            reported_document("uptime", (-5i64).into()).unwrap().as_str(),
            r#"{"state":{"reported":{"uptime":-5}}}"#
        );
    }

    #[test]
    fn reported_document_overflow() {
        let long = "v".repeat(SHADOW_UPDATE_MAX_SIZE);
        assert_eq!(
            reported_document("k", long.as_str().into()),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn parses_rejections() {
        let rejection =
            Rejection::parse(br#"{"code":404,"message":"No shadow exists","clientToken":"t"}"#);
        assert_eq!(rejection.code, 404);
        assert_eq!(rejection.message.as_str(), "No shadow exists");

        let no_message = Rejection::parse(br#"{"code":400}"#);
        assert_eq!(no_message.code, 400);
        assert!(no_message.message.is_empty());

        assert_eq!(Rejection::parse(b"garbage"), Rejection::default());
    }
}
