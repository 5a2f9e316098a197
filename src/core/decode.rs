use std::collections::HashMap;

use bytes::Bytes;

use crate::proto::frame::Reply;

/// Decoding applied to bulk payloads after a batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Bulk payloads stay as raw byte slices.
    #[default]
    None,
    /// Bulk payloads decode to text; payloads that are not valid UTF-8 stay
    /// raw bytes, so every payload remains byte-recoverable.
    Str,
    /// Strict UTF-8, then JSON for documents and numbers; raw bytes when the
    /// payload is not valid UTF-8.
    Auto,
}

/// A decoded reply value.
///
/// This is what awaiting a batch yields: integers and status strings pass
/// through untouched, bulk payloads appear as [`Value::Bytes`] or whatever
/// the active [`DecodeMode`] turned them into, hash-shaped replies fold into
/// [`Value::Map`], and server errors embed as [`Value::Error`] so the rest
/// of a pipelined batch stays readable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// RESP nil (absent bulk or absent array).
    Nil,
    /// A raw bulk payload.
    Bytes(Bytes),
    /// Text (status reply, or a decoded bulk payload).
    Str(String),
    /// An integer reply, or a JSON integer from `auto` decoding.
    Int(i64),
    /// A JSON float from `auto` decoding, or a shaped float reply.
    Float(f64),
    /// A boolean-shaped reply, or the collapsed transaction result.
    Bool(bool),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A hash-shaped reply folded into a mapping.
    Map(HashMap<String, Value>),
    /// A server error embedded as data.
    Error(String),
}

impl Value {
    /// Extracts the text, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extracts the raw bytes, if this is a bytes value.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Extracts the integer, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Extracts the element list, if this is a list value.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Extracts the mapping, if this is a map value.
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true for [`Value::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// Converts a wire reply into a value without touching bulk payloads.
pub(crate) fn reply_to_value(reply: Reply) -> Value {
    match reply {
        Reply::Simple(s) => Value::Str(s),
        Reply::Error(e) => Value::Error(e),
        Reply::Int(n) => Value::Int(n),
        Reply::Bulk(Some(b)) => Value::Bytes(b),
        Reply::Bulk(None) => Value::Nil,
        Reply::Array(None) => Value::Nil,
        Reply::Array(Some(items)) => {
            Value::List(items.into_iter().map(reply_to_value).collect())
        }
    }
}

/// Folds an alternating key/value reply list into a mapping.
///
/// Keys are always decoded to text (lossily); values stay raw for the
/// decoding pass to handle.
pub(crate) fn fold_hash(items: Vec<Reply>) -> Value {
    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        let key = match key {
            Reply::Bulk(Some(b)) => decode_lossy(&b),
            Reply::Simple(s) => s,
            other => decode_lossy(format!("{:?}", other).as_bytes()),
        };
        map.insert(key, reply_to_value(value));
    }
    Value::Map(map)
}

/// Decodes a reply list of keys into a list of strings.
pub(crate) fn fold_keys(items: Vec<Reply>) -> Value {
    Value::List(
        items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(Some(b)) => Value::Str(decode_lossy(&b)),
                Reply::Simple(s) => Value::Str(s),
                other => reply_to_value(other),
            })
            .collect(),
    )
}

/// Applies the decoding mode to every bulk payload in a value tree.
///
/// Map keys are already text and stay untouched; integers and status
/// strings are never rewritten.
pub(crate) fn apply_mode(value: Value, mode: DecodeMode) -> Value {
    if mode == DecodeMode::None {
        return value;
    }
    match value {
        Value::Bytes(b) => match mode {
            DecodeMode::Str => decode_str(b),
            DecodeMode::Auto => decode_auto(b),
            DecodeMode::None => Value::Bytes(b),
        },
        Value::List(items) => {
            Value::List(items.into_iter().map(|v| apply_mode(v, mode)).collect())
        }
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, apply_mode(v, mode)))
                .collect(),
        ),
        other => other,
    }
}

/// `str` decoding of one bulk payload.
///
/// Strict UTF-8; payloads that are not valid UTF-8 are returned as their
/// raw bytes, so nothing is lost to substitution.
fn decode_str(bytes: Bytes) -> Value {
    match std::str::from_utf8(&bytes) {
        Ok(text) => Value::Str(text.to_string()),
        Err(_) => Value::Bytes(bytes),
    }
}

/// Decodes names that must become text (mapping keys, channel names).
///
/// ASCII and valid multi-byte sequences decode identically to strict UTF-8;
/// each malformed byte is substituted with one replacement character, so
/// the output keeps the one-to-one structure of the input. Payloads never
/// go through this; they keep their bytes instead.
pub(crate) fn decode_lossy(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                out.push_str(s);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let bad = e.error_len().unwrap_or(rest.len());
                for _ in 0..bad {
                    out.push(char::REPLACEMENT_CHARACTER);
                }
                bytes = &rest[bad..];
            }
        }
    }
}

/// `auto` decoding of one bulk payload.
///
/// Strict UTF-8 first; invalid input stays bytes. Valid text is parsed as
/// JSON only when it starts a document (`{` or `[`) or matches the strict
/// number grammar, which keeps arbitrary short strings from being
/// misclassified. Everything else is returned as the string.
fn decode_auto(bytes: Bytes) -> Value {
    let text = match std::str::from_utf8(&bytes) {
        Ok(text) => text,
        Err(_) => return Value::Bytes(bytes),
    };
    let candidate = matches!(text.as_bytes().first(), Some(b'{') | Some(b'['))
        || is_strict_number(text);
    if candidate {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text) {
            return json_to_value(parsed);
        }
    }
    Value::Str(text.to_string())
}

/// Matches the JSON number grammar: `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`.
fn is_strict_number(s: &str) -> bool {
    let mut rest = s.strip_prefix('-').unwrap_or(s).as_bytes();
    // Integer part: a single zero, or a non-zero digit run.
    match rest.first() {
        Some(b'0') => rest = &rest[1..],
        Some(b'1'..=b'9') => {
            let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
            rest = &rest[digits..];
        }
        _ => return false,
    }
    if let Some(b'.') = rest.first() {
        let digits = rest[1..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return false;
        }
        rest = &rest[1 + digits..];
    }
    if let Some(b'e') | Some(b'E') = rest.first() {
        rest = &rest[1..];
        if let Some(b'+') | Some(b'-') = rest.first() {
            rest = &rest[1..];
        }
        let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
    }
    rest.is_empty()
}

/// Lowers a parsed JSON document into native values.
fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_mode_decodes_valid_utf8() {
        assert_eq!(
            decode_str(Bytes::from_static(b"plain text")),
            Value::Str("plain text".to_string())
        );
        assert_eq!(
            decode_str(Bytes::copy_from_slice("päivää".as_bytes())),
            Value::Str("päivää".to_string())
        );
    }

    #[test]
    fn test_str_mode_invalid_utf8_stays_bytes() {
        // No substitution: the payload keeps its bytes.
        let payload = Bytes::from_static(b"\xff\x00\xff");
        assert_eq!(decode_str(payload.clone()), Value::Bytes(payload));
    }

    #[test]
    fn test_lossy_name_ascii_identity() {
        assert_eq!(decode_lossy(b"plain text"), "plain text");
    }

    #[test]
    fn test_lossy_name_one_substitution_per_bad_byte() {
        let decoded = decode_lossy(b"\xff\x00\xff");
        assert_eq!(decoded.chars().count(), 3);
        let chars: Vec<char> = decoded.chars().collect();
        assert_eq!(chars[0], char::REPLACEMENT_CHARACTER);
        assert_eq!(chars[1], '\0');
        assert_eq!(chars[2], char::REPLACEMENT_CHARACTER);
    }

    #[test]
    fn test_lossy_name_keeps_valid_multibyte() {
        assert_eq!(decode_lossy("päivää".as_bytes()), "päivää");
    }

    #[test]
    fn test_lossy_name_truncated_sequence_at_end() {
        // A dangling lead byte counts as one malformed byte.
        let decoded = decode_lossy(b"ok\xe2");
        assert_eq!(decoded.chars().count(), 3);
    }

    #[test]
    fn test_auto_invalid_utf8_stays_bytes() {
        let payload = Bytes::from_static(b"\x80");
        assert_eq!(decode_auto(payload.clone()), Value::Bytes(payload));
    }

    #[test]
    fn test_auto_plain_string() {
        assert_eq!(
            decode_auto(Bytes::from_static(b"text")),
            Value::Str("text".to_string())
        );
    }

    #[test]
    fn test_auto_number() {
        assert_eq!(decode_auto(Bytes::from_static(b"10")), Value::Int(10));
        assert_eq!(decode_auto(Bytes::from_static(b"1.23")), Value::Float(1.23));
        assert_eq!(decode_auto(Bytes::from_static(b"-4e2")), Value::Float(-400.0));
    }

    #[test]
    fn test_auto_number_grammar_is_strict() {
        // Leading zeros, bare dots and trailing garbage are not numbers.
        assert_eq!(
            decode_auto(Bytes::from_static(b"007")),
            Value::Str("007".to_string())
        );
        assert_eq!(
            decode_auto(Bytes::from_static(b"1.")),
            Value::Str("1.".to_string())
        );
        assert_eq!(
            decode_auto(Bytes::from_static(b"10 apples")),
            Value::Str("10 apples".to_string())
        );
        assert_eq!(
            decode_auto(Bytes::from_static(b"true")),
            Value::Str("true".to_string())
        );
    }

    #[test]
    fn test_auto_json_document() {
        let value = decode_auto(Bytes::from_static(br#"{"foo":123,"bar":[1,2,3]}"#));
        let map = value.as_map().expect("expected a map");
        assert_eq!(map["foo"], Value::Int(123));
        assert_eq!(
            map["bar"],
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_auto_malformed_document_stays_string() {
        assert_eq!(
            decode_auto(Bytes::from_static(b"{not json")),
            Value::Str("{not json".to_string())
        );
    }

    #[test]
    fn test_apply_mode_skips_map_keys_and_integers() {
        let mut map = HashMap::new();
        map.insert("field".to_string(), Value::Bytes(Bytes::from_static(b"10")));
        let value = Value::List(vec![Value::Int(10), Value::Map(map)]);
        let decoded = apply_mode(value, DecodeMode::Auto);
        match decoded {
            Value::List(items) => {
                assert_eq!(items[0], Value::Int(10));
                let map = items[1].as_map().unwrap();
                assert_eq!(map["field"], Value::Int(10));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fold_hash_decodes_keys_only() {
        let items = vec![
            Reply::Bulk(Some(Bytes::from_static(b"field1"))),
            Reply::Bulk(Some(Bytes::from_static(b"\xff\x00\xff"))),
        ];
        let value = fold_hash(items);
        let map = value.as_map().unwrap();
        assert_eq!(
            map["field1"],
            Value::Bytes(Bytes::from_static(b"\xff\x00\xff"))
        );
    }

    #[test]
    fn test_fold_keys() {
        let items = vec![
            Reply::Bulk(Some(Bytes::from_static(b"a"))),
            Reply::Bulk(Some(Bytes::from_static(b"b"))),
        ];
        assert_eq!(
            fold_keys(items),
            Value::List(vec![
                Value::Str("a".to_string()),
                Value::Str("b".to_string())
            ])
        );
    }
}
