use bytes::Bytes;

/// A single RESP reply frame.
///
/// Covers the five RESP v2 frame types:
/// - Simple: status replies like `+OK`
/// - Error: error replies from the server (`-ERR ...`)
/// - Int: numeric replies (`:1000`)
/// - Bulk: binary-safe payloads, `None` for the RESP nil bulk (`$-1`)
/// - Array: nested frames, `None` for the RESP nil array (`*-1`)
///
/// The nil bulk and nil array are kept distinct from their empty
/// counterparts; `EXEC` relies on the difference to signal an aborted
/// transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Simple string (`+OK`).
    Simple(String),
    /// Error (`-ERR`).
    Error(String),
    /// Integer (`:1000`).
    Int(i64),
    /// Bulk string (`$6\r\nfoobar`), `None` when nil.
    Bulk(Option<Bytes>),
    /// Array (`*2\r\n...`), `None` when nil.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Extracts the bulk payload, if this is a non-nil bulk string.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Reply::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Extracts the element list, if this is a non-nil array.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Extracts the integer, if this is an integer reply.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns true for the nil bulk and nil array frames.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array(None))
    }

    /// Returns true if this frame matches the given simple-string status.
    pub fn is_status(&self, status: &str) -> bool {
        matches!(self, Reply::Simple(s) if s == status)
    }
}
