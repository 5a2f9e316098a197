use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::{Error, Result};
use crate::proto::frame::Reply;

/// Server-side default cap on a single bulk payload.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// A streaming RESP decoder that turns bytes into [`Reply`] frames.
///
/// Call [`append`](Decoder::append) when data arrives from the socket, then
/// [`decode`](Decoder::decode) to parse frames. `Ok(None)` means the buffer
/// holds an incomplete frame; the buffered bytes stay put so the next append
/// can complete it. Nothing is consumed until a whole frame (including all
/// nested elements) has been parsed.
///
/// # Example
///
/// ```
/// use redpipe::proto::codec::Decoder;
/// use redpipe::proto::frame::Reply;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// let reply = decoder.decode().unwrap().unwrap();
/// assert_eq!(reply, Reply::Simple("OK".to_string()));
/// ```
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Appends raw bytes received from the network.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns true when no unparsed bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Attempts to decode one frame from the buffer.
    ///
    /// Returns `Ok(Some(reply))` for a complete frame, `Ok(None)` when more
    /// data is needed, and `Err(..)` for malformed framing. After an error
    /// the stream is out of sync and the connection must not be reused.
    pub fn decode(&mut self) -> Result<Option<Reply>> {
        match parse(&self.buf)? {
            Some((reply, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}

/// Parses one frame starting at `buf[0]`, without consuming.
///
/// Returns the frame and the number of bytes it occupied.
fn parse(buf: &[u8]) -> Result<Option<(Reply, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    match buf[0] {
        b'+' => Ok(parse_line(buf)?
            .map(|(line, used)| (Reply::Simple(String::from_utf8_lossy(line).into_owned()), used))),
        b'-' => Ok(parse_line(buf)?
            .map(|(line, used)| (Reply::Error(String::from_utf8_lossy(line).into_owned()), used))),
        b':' => match parse_line(buf)? {
            Some((line, used)) => Ok(Some((Reply::Int(parse_int(line)?), used))),
            None => Ok(None),
        },
        b'$' => parse_bulk(buf),
        b'*' => parse_array(buf),
        other => Err(Error::protocol(format!(
            "stream out of sync (frame begins with {:?})",
            other as char
        ))),
    }
}

/// Finds the CRLF terminating the header line at `buf[0]`.
///
/// Returns the line content (without the type byte) and the total bytes the
/// line occupies, or `None` when the CRLF has not arrived yet.
fn parse_line(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    for i in 1..buf.len() {
        if buf[i] == b'\n' {
            if buf[i - 1] != b'\r' {
                return Err(Error::protocol("bare LF in frame header"));
            }
            return Ok(Some((&buf[1..i - 1], i + 1)));
        }
    }
    Ok(None)
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::protocol(format!("invalid integer {:?}", String::from_utf8_lossy(line))))
}

fn parse_bulk(buf: &[u8]) -> Result<Option<(Reply, usize)>> {
    let (line, header) = match parse_line(buf)? {
        Some(found) => found,
        None => return Ok(None),
    };
    let len = parse_int(line)?;
    if len == -1 {
        return Ok(Some((Reply::Bulk(None), header)));
    }
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(Error::protocol(format!("bulk length {} out of bounds", len)));
    }
    let len = len as usize;
    let total = header + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[header + len..total] != b"\r\n" {
        return Err(Error::protocol("missing CRLF after bulk payload"));
    }
    let data = Bytes::copy_from_slice(&buf[header..header + len]);
    Ok(Some((Reply::Bulk(Some(data)), total)))
}

fn parse_array(buf: &[u8]) -> Result<Option<(Reply, usize)>> {
    let (line, header) = match parse_line(buf)? {
        Some(found) => found,
        None => return Ok(None),
    };
    let count = parse_int(line)?;
    if count == -1 {
        return Ok(Some((Reply::Array(None), header)));
    }
    if count < 0 {
        return Err(Error::protocol(format!("array count {} out of bounds", count)));
    }
    let mut items = Vec::with_capacity(count.min(1024) as usize);
    let mut used = header;
    for _ in 0..count {
        match parse(&buf[used..])? {
            Some((item, item_used)) => {
                items.push(item);
                used += item_used;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((Reply::Array(Some(items)), used)))
}
