use std::collections::{HashSet, VecDeque};
use std::future::{Future, IntoFuture};
use std::pin::Pin;

use crate::core::config::ConnectInfo;
use crate::core::connection::Connection;
use crate::core::decode::{apply_mode, decode_lossy, reply_to_value, DecodeMode, Value};
use crate::proto::codec::{Arg, Command};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Reply;

/// One received publish/subscribe message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The message payload alone (the default).
    Payload(Value),
    /// The originating channel and the payload, when
    /// [`with_channel`](PubSub::with_channel) is set.
    Channel(String, Value),
}

/// A publish/subscribe receiver.
///
/// The receiver owns a dedicated connection for its whole lifetime; once the
/// first subscription is sent the connection is in subscription mode and is
/// never returned to the pool. Subscription acknowledgements are consumed
/// internally; each receive yields the next `message`/`pmessage` payload in
/// server delivery order.
///
/// Unlike the database facade, decoding modifiers persist across receives.
///
/// ```no_run
/// # async fn example() -> redpipe::Result<()> {
/// let pool = redpipe::Pool::new("redis://localhost/")?;
/// let mut pubsub = pool.pubsub(["events"]);
/// pubsub.strdecode().with_channel();
/// loop {
///     let msg = pubsub.next().await?;
///     println!("{:?}", msg);
/// }
/// # }
/// ```
pub struct PubSub {
    info: ConnectInfo,
    conn: Option<Connection>,
    subscribed: HashSet<String>,
    psubscribed: HashSet<String>,
    pending_sub: Vec<Arg>,
    pending_psub: Vec<Arg>,
    buffered: VecDeque<Reply>,
    with_channel: bool,
    mode: DecodeMode,
}

impl PubSub {
    pub(crate) fn new(info: ConnectInfo) -> Self {
        Self {
            info,
            conn: None,
            subscribed: HashSet::new(),
            psubscribed: HashSet::new(),
            pending_sub: Vec::new(),
            pending_psub: Vec::new(),
            buffered: VecDeque::new(),
            with_channel: false,
            mode: DecodeMode::None,
        }
    }

    /// Subscribes to channels. Takes effect on the next receive.
    pub fn subscribe<I, A>(&mut self, channels: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.pending_sub
            .extend(channels.into_iter().map(Into::into));
        self
    }

    /// Subscribes to channel patterns. Takes effect on the next receive.
    pub fn psubscribe<I, A>(&mut self, patterns: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.pending_psub
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Yields `(channel, payload)` pairs instead of plain payloads.
    pub fn with_channel(&mut self) -> &mut Self {
        self.with_channel = true;
        self
    }

    /// Decodes payloads to text (bytes when not valid UTF-8). Persists
    /// across receives.
    pub fn strdecode(&mut self) -> &mut Self {
        self.mode = DecodeMode::Str;
        self
    }

    /// Decodes payloads to text, JSON documents and numbers. Persists
    /// across receives.
    pub fn autodecode(&mut self) -> &mut Self {
        self.mode = DecodeMode::Auto;
        self
    }

    /// Alias for [`autodecode`](PubSub::autodecode).
    pub fn fulldecode(&mut self) -> &mut Self {
        self.autodecode()
    }

    /// Receives the next message, connecting and flushing pending
    /// subscriptions first if needed.
    pub async fn next(&mut self) -> Result<Message> {
        self.connect().await?;
        loop {
            let reply = match self.buffered.pop_front() {
                Some(reply) => reply,
                None => match self.conn.as_mut() {
                    Some(conn) => conn.read_reply().await?,
                    None => return Err(Error::protocol("receiver is closed")),
                },
            };
            if let Some(message) = self.handle_frame(reply)? {
                return Ok(message);
            }
        }
    }

    /// Connects and subscribes any requested channels.
    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.conn = Some(self.info.dial().await?);
        }
        if self.pending_sub.is_empty() && self.pending_psub.is_empty() {
            return Ok(());
        }
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(Error::protocol("receiver is closed")),
        };

        let mut expected = self.pending_sub.len() + self.pending_psub.len();
        if !self.pending_sub.is_empty() {
            let args = self.pending_sub.drain(..);
            conn.send_control(&Command::new("SUBSCRIBE", args)?).await?;
        }
        if !self.pending_psub.is_empty() {
            let args = self.pending_psub.drain(..);
            conn.send_control(&Command::new("PSUBSCRIBE", args)?).await?;
        }
        conn.enter_subscription();

        // Consume one acknowledgement per requested channel; messages that
        // arrive interleaved are kept for the receive loop.
        while expected > 0 {
            let reply = conn.read_reply().await?;
            match classify(&reply)? {
                Frame::Ack { kind, channel, count } => {
                    match kind {
                        AckKind::Subscribe => {
                            self.subscribed.insert(channel);
                        }
                        AckKind::Psubscribe => {
                            self.psubscribed.insert(channel);
                        }
                        AckKind::Unsubscribe => {
                            self.subscribed.remove(&channel);
                        }
                        AckKind::Punsubscribe => {
                            self.psubscribed.remove(&channel);
                        }
                    }
                    let tracked = (self.subscribed.len() + self.psubscribed.len()) as i64;
                    if count != tracked {
                        conn.mark_broken();
                        return Err(Error::protocol(format!(
                            "channel tracking out of sync ({} tracked, server says {})",
                            tracked, count
                        )));
                    }
                    expected -= 1;
                }
                Frame::Message { .. } => self.buffered.push_back(reply),
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, reply: Reply) -> Result<Option<Message>> {
        match classify(&reply)? {
            Frame::Message { channel, payload } => {
                let payload = apply_mode(reply_to_value(payload), self.mode);
                if self.with_channel {
                    Ok(Some(Message::Channel(channel, payload)))
                } else {
                    Ok(Some(Message::Payload(payload)))
                }
            }
            Frame::Ack { kind, channel, .. } => {
                match kind {
                    AckKind::Subscribe => {
                        self.subscribed.insert(channel);
                    }
                    AckKind::Psubscribe => {
                        self.psubscribed.insert(channel);
                    }
                    AckKind::Unsubscribe => {
                        self.subscribed.remove(&channel);
                    }
                    AckKind::Punsubscribe => {
                        self.psubscribed.remove(&channel);
                    }
                }
                Ok(None)
            }
        }
    }

    /// Unsubscribes from everything and closes the socket.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            if !self.subscribed.is_empty() {
                conn.send_control(&Command::new("UNSUBSCRIBE", Vec::<Arg>::new())?)
                    .await?;
            }
            if !self.psubscribed.is_empty() {
                conn.send_control(&Command::new("PUNSUBSCRIBE", Vec::<Arg>::new())?)
                    .await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("subscribed", &self.subscribed)
            .field("psubscribed", &self.psubscribed)
            .field("with_channel", &self.with_channel)
            .finish()
    }
}

impl<'a> IntoFuture for &'a mut PubSub {
    type Output = Result<Message>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Message>> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.next())
    }
}

enum AckKind {
    Subscribe,
    Psubscribe,
    Unsubscribe,
    Punsubscribe,
}

enum Frame {
    Ack {
        kind: AckKind,
        channel: String,
        count: i64,
    },
    Message {
        channel: String,
        payload: Reply,
    },
}

/// Sorts one pushed frame into a subscription acknowledgement or a message.
///
/// Direct messages are `["message", channel, payload]`; pattern matches are
/// `["pmessage", pattern, channel, payload]`.
fn classify(reply: &Reply) -> Result<Frame> {
    let items = reply
        .as_array()
        .filter(|items| (3..=4).contains(&items.len()))
        .ok_or_else(|| {
            Error::protocol(format!("unexpected frame in subscription mode: {:?}", reply))
        })?;

    let kind = items[0]
        .as_bulk()
        .map(|b| b.as_ref().to_vec())
        .unwrap_or_default();
    match kind.as_slice() {
        b"message" if items.len() == 3 => Ok(Frame::Message {
            channel: bulk_text(&items[1]),
            payload: items[2].clone(),
        }),
        b"pmessage" if items.len() == 4 => Ok(Frame::Message {
            channel: bulk_text(&items[2]),
            payload: items[3].clone(),
        }),
        b"subscribe" | b"psubscribe" | b"unsubscribe" | b"punsubscribe" if items.len() == 3 => {
            let count = items[2].as_int().ok_or_else(|| {
                Error::protocol("subscription acknowledgement without a count")
            })?;
            let kind = match kind.as_slice() {
                b"subscribe" => AckKind::Subscribe,
                b"psubscribe" => AckKind::Psubscribe,
                b"unsubscribe" => AckKind::Unsubscribe,
                _ => AckKind::Punsubscribe,
            };
            Ok(Frame::Ack {
                kind,
                channel: bulk_text(&items[1]),
                count,
            })
        }
        _ => Err(Error::protocol(format!(
            "unexpected frame in subscription mode: {:?}",
            reply
        ))),
    }
}

fn bulk_text(reply: &Reply) -> String {
    match reply {
        Reply::Bulk(Some(b)) => decode_lossy(b),
        Reply::Simple(s) => s.clone(),
        other => format!("{:?}", other),
    }
}
