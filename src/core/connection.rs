use std::fmt;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::warn;

use crate::proto::codec::{Command, Decoder};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Reply;

/// The transport under a connection.
pub(crate) enum Stream {
    /// Plain TCP.
    Tcp(TcpStream),
    /// Unix-domain socket.
    #[cfg(unix)]
    Unix(UnixStream),
    /// TLS over TCP.
    #[cfg(feature = "tls")]
    TlsTcp(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// TLS over a Unix-domain socket.
    #[cfg(all(feature = "tls", unix))]
    TlsUnix(Box<tokio_rustls::client::TlsStream<UnixStream>>),
}

impl Stream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf).await,
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf).await,
            #[cfg(feature = "tls")]
            Stream::TlsTcp(s) => s.read(buf).await,
            #[cfg(all(feature = "tls", unix))]
            Stream::TlsUnix(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.write_all(data).await,
            #[cfg(unix)]
            Stream::Unix(s) => s.write_all(data).await,
            #[cfg(feature = "tls")]
            Stream::TlsTcp(s) => s.write_all(data).await,
            #[cfg(all(feature = "tls", unix))]
            Stream::TlsUnix(s) => s.write_all(data).await,
        }
    }
}

/// A pipelined connection to a Redis server.
///
/// Commands are appended to a write buffer with [`enqueue`](Connection::enqueue)
/// and sent together by [`batch`](Connection::batch), which then reads one
/// reply per in-flight command, in order. The `clean` bit starts true and is
/// cleared by any IO or protocol failure and by entering subscription mode;
/// only a clean, fully drained connection may go back to the pool.
pub(crate) struct Connection {
    stream: Stream,
    decoder: Decoder,
    outbuf: BytesMut,
    in_flight: usize,
    clean: bool,
    subscribed: bool,
}

impl Connection {
    pub(crate) fn new(stream: Stream) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            outbuf: BytesMut::new(),
            in_flight: 0,
            clean: true,
            subscribed: false,
        }
    }

    /// Appends one command frame to the write buffer.
    ///
    /// Nothing is sent until the next flush. Not available once the
    /// connection has entered subscription mode.
    pub(crate) fn enqueue(&mut self, command: &Command) -> Result<()> {
        if self.subscribed {
            return Err(Error::invalid(
                "cannot queue commands on a subscribed connection",
            ));
        }
        command.write_frame(&mut self.outbuf);
        self.in_flight += 1;
        Ok(())
    }

    /// Writes the accumulated command frames to the socket.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.outbuf.is_empty() {
            return Ok(());
        }
        let data = self.outbuf.split();
        if let Err(e) = self.stream.write_all(&data).await {
            self.clean = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Reads the next reply frame, suspending until it is complete.
    pub(crate) async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            match self.decoder.decode() {
                Ok(Some(reply)) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    return Ok(reply);
                }
                Ok(None) => {}
                Err(e) => {
                    self.clean = false;
                    warn!(error = %e, "reply stream out of sync");
                    return Err(e);
                }
            }

            let mut buf = [0u8; 4096];
            let n = match self.stream.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.clean = false;
                    return Err(e.into());
                }
            };
            if n == 0 {
                self.clean = false;
                return Err(Error::protocol("connection closed by server"));
            }
            self.decoder.append(&buf[..n]);
        }
    }

    /// Flushes all queued commands and drains their replies in send order.
    ///
    /// On failure the connection is broken: unread replies are discarded and
    /// the connection will not be pooled again.
    pub(crate) async fn batch(&mut self) -> Result<Vec<Reply>> {
        self.flush().await?;
        let mut replies = Vec::with_capacity(self.in_flight);
        while self.in_flight > 0 {
            replies.push(self.read_reply().await?);
        }
        Ok(replies)
    }

    /// Sends one command immediately, bypassing reply accounting.
    ///
    /// Used for subscription-mode control commands, whose acknowledgements
    /// arrive as pushed frames rather than ordinary replies.
    pub(crate) async fn send_control(&mut self, command: &Command) -> Result<()> {
        let mut buf = BytesMut::new();
        command.write_frame(&mut buf);
        if let Err(e) = self.stream.write_all(&buf).await {
            self.clean = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Switches to one-way subscription mode. Permanently clears `clean`.
    pub(crate) fn enter_subscription(&mut self) {
        self.subscribed = true;
        self.clean = false;
    }

    /// Marks the connection as unusable for pooling.
    pub(crate) fn mark_broken(&mut self) {
        self.clean = false;
    }

    /// True when the connection can safely serve another owner: clean, not
    /// subscribed, nothing queued, nothing in flight, and no stray inbound
    /// bytes buffered.
    pub(crate) fn is_poolable(&self) -> bool {
        self.clean
            && !self.subscribed
            && self.in_flight == 0
            && self.outbuf.is_empty()
            && self.decoder.is_empty()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("in_flight", &self.in_flight)
            .field("clean", &self.clean)
            .field("subscribed", &self.subscribed)
            .finish()
    }
}
