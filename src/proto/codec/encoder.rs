use bytes::{BufMut, Bytes, BytesMut};

use crate::proto::error::{Error, Result};

/// A heterogeneous command argument.
///
/// Every variant coerces to exactly one RESP bulk string: text as UTF-8,
/// integers as decimal, floats as their shortest round-trip decimal,
/// booleans as `true`/`false`, and JSON mappings or sequences in compact
/// form. Raw bytes pass through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Raw bytes, passed through unchanged.
    Bytes(Bytes),
    /// Text, encoded as UTF-8.
    Str(String),
    /// Signed integer, encoded as decimal ASCII.
    Int(i64),
    /// Floating point, encoded as the shortest round-trip decimal.
    Float(f64),
    /// Boolean, encoded as `true` or `false`.
    Bool(bool),
    /// A JSON mapping or sequence, encoded in compact form.
    Json(serde_json::Value),
}

impl Arg {
    /// Coerces this argument into the bytes of one bulk string.
    pub fn coerce(&self) -> Result<Bytes> {
        match self {
            Arg::Bytes(b) => Ok(b.clone()),
            Arg::Str(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Arg::Int(n) => Ok(Bytes::from(n.to_string())),
            Arg::Float(f) => Ok(Bytes::from(f.to_string())),
            Arg::Bool(b) => Ok(Bytes::from_static(if *b { b"true" } else { b"false" })),
            Arg::Json(v) => serde_json::to_vec(v).map(Bytes::from).map_err(|e| Error::Encode {
                message: e.to_string(),
            }),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Arg::Bytes(b)
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Int(n)
    }
}

impl From<f64> for Arg {
    fn from(f: f64) -> Self {
        Arg::Float(f)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

impl From<serde_json::Value> for Arg {
    fn from(v: serde_json::Value) -> Self {
        Arg::Json(v)
    }
}

/// A command ready for the wire: a non-empty sequence of coerced arguments.
#[derive(Debug, Clone)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Builds a command from its name and arguments, coercing each argument
    /// into one bulk string.
    pub fn new<I>(name: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arg>,
    {
        let mut coerced = vec![Bytes::copy_from_slice(name.as_bytes())];
        for arg in args {
            coerced.push(arg.coerce()?);
        }
        Ok(Self { args: coerced })
    }

    /// The command name (the first argument).
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Appends the RESP frame for this command to `buf`.
    ///
    /// The frame is `*<n>\r\n` followed by one `$<len>\r\n<bytes>\r\n` bulk
    /// per argument.
    pub fn write_frame(&self, buf: &mut BytesMut) {
        buf.put_u8(b'*');
        buf.extend_from_slice(self.args.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        for arg in &self.args {
            buf.put_u8(b'$');
            buf.extend_from_slice(arg.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(arg);
            buf.extend_from_slice(b"\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(cmd: &Command) -> Bytes {
        let mut buf = BytesMut::new();
        cmd.write_frame(&mut buf);
        buf.freeze()
    }

    #[test]
    fn test_encode_get() {
        let cmd = Command::new("GET", [Arg::from("key")]).unwrap();
        assert_eq!(frame(&cmd).as_ref(), b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn test_encode_binary_argument() {
        let cmd = Command::new("SET", [Arg::from("k"), Arg::from(&b"\xff\x00\xff"[..])]).unwrap();
        assert_eq!(
            frame(&cmd).as_ref(),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$3\r\n\xff\x00\xff\r\n"
        );
    }

    #[test]
    fn test_coerce_int() {
        assert_eq!(Arg::Int(-42).coerce().unwrap().as_ref(), b"-42");
    }

    #[test]
    fn test_coerce_float_shortest_roundtrip() {
        assert_eq!(Arg::Float(1.23).coerce().unwrap().as_ref(), b"1.23");
        assert_eq!(Arg::Float(10.0).coerce().unwrap().as_ref(), b"10");
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(Arg::Bool(true).coerce().unwrap().as_ref(), b"true");
        assert_eq!(Arg::Bool(false).coerce().unwrap().as_ref(), b"false");
    }

    #[test]
    fn test_coerce_mapping_compact_json() {
        let arg = Arg::from(json!({"foo": 123, "bar": [1, 2, 3]}));
        let encoded = arg.coerce().unwrap();
        // Compact form, no spaces.
        let parsed: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(parsed, json!({"foo": 123, "bar": [1, 2, 3]}));
        assert!(!encoded.as_ref().contains(&b' '));
    }

    #[test]
    fn test_coerce_sequence_json() {
        let arg = Arg::from(json!([1, "two", 3.0]));
        assert_eq!(arg.coerce().unwrap().as_ref(), br#"[1,"two",3.0]"#);
    }

    #[test]
    fn test_empty_argument() {
        let cmd = Command::new("ECHO", [Arg::from("")]).unwrap();
        assert_eq!(frame(&cmd).as_ref(), b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n");
    }
}
