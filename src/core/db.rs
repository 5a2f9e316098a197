use std::future::{Future, IntoFuture};
use std::pin::Pin;

use crate::core::decode::{apply_mode, fold_hash, fold_keys, reply_to_value, DecodeMode, Value};
use crate::core::pool::{Pool, PooledConn};
use crate::proto::codec::{Arg, Command};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Reply;

/// Per-command reply handling.
///
/// Commands not covered by [`handler_for`] produce their reply unchanged.
#[derive(Debug, Clone)]
enum Handler {
    /// The reply is user-visible output.
    Output,
    /// The reply must be the given status and produces no output.
    Expect(&'static str),
    /// Alternating key/value list folded into a mapping.
    Map,
    /// List of keys, decoded to text.
    Keys,
    /// Integer reply presented as a boolean.
    Bool,
    /// Millisecond integer presented as seconds.
    Seconds,
    /// EXEC: nil means the transaction was discarded.
    Exec(Vec<(String, Handler)>),
}

fn handler_for(name: &str) -> Handler {
    match name {
        "SET" | "MSET" | "WATCH" | "UNWATCH" | "MULTI" | "DISCARD" | "FLUSHALL" | "FLUSHDB"
        | "LSET" | "LTRIM" | "RENAME" | "SELECT" => Handler::Expect("OK"),
        "PING" => Handler::Expect("PONG"),
        "HGETALL" => Handler::Map,
        "KEYS" | "HKEYS" => Handler::Keys,
        "HEXISTS" | "HSETNX" | "SISMEMBER" | "EXPIRE" | "PEXPIRE" | "PERSIST" => Handler::Bool,
        "PTTL" => Handler::Seconds,
        _ => Handler::Output,
    }
}

/// Transaction state of the facade.
#[derive(Debug)]
enum TxState {
    Idle,
    /// WATCH sent, MULTI not yet started.
    Watch,
    /// Inside MULTI; the real handlers accumulate for EXEC.
    Multi(Vec<(String, Handler)>),
}

struct Queued {
    name: String,
    args: Vec<Arg>,
    handler: Handler,
}

/// A database facade: a chainable command buffer over a pooled connection.
///
/// Commands queue up without touching the network; running the facade
/// acquires a connection (lazily, on the first run), flushes the whole
/// batch in one write, reads the replies in order, applies the active
/// decoding mode, and hands the connection back to the pool when it is safe
/// to share.
///
/// A single visible reply is returned as a scalar [`Value`]; several become
/// a [`Value::List`]. Commands with a fixed acknowledgement (`SET`, `PING`,
/// `MULTI`, ...) produce no entry. The decoding mode and the
/// `prevent_pooling` flag reset after every successful run.
///
/// The facade is awaitable directly:
///
/// ```no_run
/// # async fn example() -> redpipe::Result<()> {
/// let pool = redpipe::Pool::new("redis://localhost/")?;
/// let mut db = pool.db();
/// let value = db.get("key").strdecode().await?;
/// # Ok(())
/// # }
/// ```
pub struct Db {
    pool: Pool,
    conn: Option<PooledConn>,
    queued: Vec<Queued>,
    mode: DecodeMode,
    prevent_pooling: bool,
    /// Set when a run pinned the connection because pooling was opted out;
    /// such a connection is dropped, not pooled, if the facade goes away.
    withheld: bool,
    tx: TxState,
    pending_error: Option<Error>,
}

impl Db {
    pub(crate) fn new(pool: Pool) -> Self {
        Self {
            pool,
            conn: None,
            queued: Vec::new(),
            mode: DecodeMode::None,
            prevent_pooling: false,
            withheld: false,
            tx: TxState::Idle,
            pending_error: None,
        }
    }

    /// Queues one command by name.
    ///
    /// The transaction control names (`WATCH`, `UNWATCH`, `MULTI`, `EXEC`,
    /// `DISCARD`) are recognised here and routed through the transaction
    /// state machine. API misuse (for example `EXEC` without `MULTI`) and
    /// argument coercion failures surface on the next run, before anything
    /// is written to the connection.
    pub fn command<I, A>(&mut self, name: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args: Vec<Arg> = args.into_iter().map(Into::into).collect();
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "WATCH" => self.queue_watch(args),
            "UNWATCH" => self.unwatch(),
            "MULTI" => self.multi(),
            "EXEC" => self.exec(),
            "DISCARD" => self.discard(),
            _ => self.queue(upper, args),
        }
    }

    /// Keeps bulk replies as raw bytes (the default).
    pub fn rawdecode(&mut self) -> &mut Self {
        self.mode = DecodeMode::None;
        self
    }

    /// Decodes bulk replies to text for this batch; payloads that are not
    /// valid UTF-8 stay bytes.
    pub fn strdecode(&mut self) -> &mut Self {
        self.mode = DecodeMode::Str;
        self
    }

    /// Decodes bulk replies to text, JSON documents and numbers for this
    /// batch; payloads that are not valid UTF-8 stay bytes.
    pub fn autodecode(&mut self) -> &mut Self {
        self.mode = DecodeMode::Auto;
        self
    }

    /// Alias for [`autodecode`](Db::autodecode).
    pub fn fulldecode(&mut self) -> &mut Self {
        self.autodecode()
    }

    /// Keeps the connection out of the pool after the next run.
    pub fn prevent_pooling(&mut self) -> &mut Self {
        self.prevent_pooling = true;
        self
    }

    // Transactions

    /// Marks keys to be watched for conditional execution of a transaction.
    pub fn watch<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let keys: Vec<Arg> = keys.into_iter().map(Into::into).collect();
        self.queue_watch(keys)
    }

    fn queue_watch(&mut self, keys: Vec<Arg>) -> &mut Self {
        if keys.is_empty() {
            return self.defer(Error::invalid("WATCH requires at least one key"));
        }
        if matches!(self.tx, TxState::Multi(_)) {
            return self.defer(Error::invalid("WATCH inside MULTI is not allowed"));
        }
        self.tx = TxState::Watch;
        self.queued.push(Queued {
            name: "WATCH".to_string(),
            args: keys,
            handler: Handler::Expect("OK"),
        });
        self
    }

    /// Forgets all watched keys.
    pub fn unwatch(&mut self) -> &mut Self {
        if matches!(self.tx, TxState::Multi(_)) {
            return self.defer(Error::invalid("UNWATCH inside MULTI is not allowed"));
        }
        self.tx = TxState::Idle;
        self.queued.push(Queued {
            name: "UNWATCH".to_string(),
            args: Vec::new(),
            handler: Handler::Expect("OK"),
        });
        self
    }

    /// Starts a transaction block; subsequent commands queue on the server
    /// until [`exec`](Db::exec).
    pub fn multi(&mut self) -> &mut Self {
        if matches!(self.tx, TxState::Multi(_)) {
            return self.defer(Error::invalid("MULTI calls can not be nested"));
        }
        self.queued.push(Queued {
            name: "MULTI".to_string(),
            args: Vec::new(),
            handler: Handler::Expect("OK"),
        });
        self.tx = TxState::Multi(Vec::new());
        self
    }

    /// Executes the queued transaction.
    ///
    /// The result is `false` when a watched key changed and the transaction
    /// was discarded, `true` when every queued command completed silently,
    /// and otherwise the list of per-command results with server errors
    /// embedded in place.
    pub fn exec(&mut self) -> &mut Self {
        match std::mem::replace(&mut self.tx, TxState::Idle) {
            TxState::Multi(handlers) => {
                self.queued.push(Queued {
                    name: "EXEC".to_string(),
                    args: Vec::new(),
                    handler: Handler::Exec(handlers),
                });
                self
            }
            other => {
                self.tx = other;
                self.defer(Error::invalid("EXEC without MULTI"))
            }
        }
    }

    /// Flushes the queued transaction and restores the connection state.
    pub fn discard(&mut self) -> &mut Self {
        if !matches!(self.tx, TxState::Multi(_)) {
            return self.defer(Error::invalid("DISCARD without MULTI"));
        }
        self.tx = TxState::Idle;
        self.queued.push(Queued {
            name: "DISCARD".to_string(),
            args: Vec::new(),
            handler: Handler::Expect("OK"),
        });
        self
    }

    // Command helpers. Anything not covered goes through `command`.

    /// GET: the value of a key, or nil.
    pub fn get(&mut self, key: impl Into<Arg>) -> &mut Self {
        self.queue("GET".to_string(), vec![key.into()])
    }

    /// SET: store a value under a key. Produces no output.
    pub fn set(&mut self, key: impl Into<Arg>, value: impl Into<Arg>) -> &mut Self {
        self.queue("SET".to_string(), vec![key.into(), value.into()])
    }

    /// DEL: remove keys, returning how many existed.
    pub fn del<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args = keys.into_iter().map(Into::into).collect();
        self.queue("DEL".to_string(), args)
    }

    /// INCR: increment the integer stored at a key.
    pub fn incr(&mut self, key: impl Into<Arg>) -> &mut Self {
        self.queue("INCR".to_string(), vec![key.into()])
    }

    /// KEYS: all key names matching a pattern, decoded to text.
    pub fn keys(&mut self, pattern: impl Into<Arg>) -> &mut Self {
        self.queue("KEYS".to_string(), vec![pattern.into()])
    }

    /// PING: check the connection. Produces no output.
    pub fn ping(&mut self) -> &mut Self {
        self.queue("PING".to_string(), Vec::new())
    }

    /// PUBLISH: post a message to a channel, returning the receiver count.
    pub fn publish(&mut self, channel: impl Into<Arg>, message: impl Into<Arg>) -> &mut Self {
        self.queue("PUBLISH".to_string(), vec![channel.into(), message.into()])
    }

    /// HSET: set hash fields from key/value pairs, flattened into
    /// alternating arguments.
    pub fn hset<K, I, F, V>(&mut self, key: K, fields: I) -> &mut Self
    where
        K: Into<Arg>,
        I: IntoIterator<Item = (F, V)>,
        F: Into<Arg>,
        V: Into<Arg>,
    {
        let mut args = vec![key.into()];
        for (field, value) in fields {
            args.push(field.into());
            args.push(value.into());
        }
        self.queue("HSET".to_string(), args)
    }

    /// HGET: one hash field value, or nil.
    pub fn hget(&mut self, key: impl Into<Arg>, field: impl Into<Arg>) -> &mut Self {
        self.queue("HGET".to_string(), vec![key.into(), field.into()])
    }

    /// HGETALL: all fields of a hash, folded into a mapping with text keys.
    pub fn hgetall(&mut self, key: impl Into<Arg>) -> &mut Self {
        self.queue("HGETALL".to_string(), vec![key.into()])
    }

    /// HDEL: remove hash fields, returning how many were removed.
    pub fn hdel<K, I, A>(&mut self, key: K, fields: I) -> &mut Self
    where
        K: Into<Arg>,
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let mut args = vec![key.into()];
        args.extend(fields.into_iter().map(Into::into));
        self.queue("HDEL".to_string(), args)
    }

    /// PEXPIRE: set a key expiration in seconds (millisecond precision).
    pub fn expire(&mut self, key: impl Into<Arg>, seconds: f64) -> &mut Self {
        let millis = (seconds * 1000.0).round() as i64;
        self.queue("PEXPIRE".to_string(), vec![key.into(), Arg::Int(millis)])
    }

    /// PTTL: remaining time to live of a key in seconds (float).
    pub fn ttl(&mut self, key: impl Into<Arg>) -> &mut Self {
        self.queue("PTTL".to_string(), vec![key.into()])
    }

    fn queue(&mut self, name: String, args: Vec<Arg>) -> &mut Self {
        let handler = handler_for(&name);
        if let TxState::Multi(handlers) = &mut self.tx {
            handlers.push((name.clone(), handler));
            self.queued.push(Queued {
                name,
                args,
                handler: Handler::Expect("QUEUED"),
            });
        } else {
            self.queued.push(Queued {
                name,
                args,
                handler,
            });
        }
        self
    }

    fn defer(&mut self, error: Error) -> &mut Self {
        if self.pending_error.is_none() {
            self.pending_error = Some(error);
        }
        self
    }

    /// Runs the queued batch and returns its result.
    ///
    /// The connection goes back to the pool on the first run that drains the
    /// batch with no transaction open and `prevent_pooling` unset;
    /// otherwise it stays pinned to this facade for the next run.
    pub async fn run(&mut self) -> Result<Value> {
        if let Some(error) = self.pending_error.take() {
            self.queued.clear();
            self.tx = TxState::Idle;
            return Err(error);
        }
        if self.queued.is_empty() {
            return Ok(Value::Nil);
        }

        // Coerce all arguments up front; a failure leaves the connection
        // untouched.
        let queued = std::mem::take(&mut self.queued);
        let mut commands = Vec::with_capacity(queued.len());
        let mut handlers = Vec::with_capacity(queued.len());
        for q in queued {
            match Command::new(&q.name, q.args) {
                Ok(command) => {
                    commands.push(command);
                    handlers.push((q.name, q.handler));
                }
                Err(error) => {
                    self.tx = TxState::Idle;
                    return Err(error);
                }
            }
        }

        let mut guard = match self.conn.take() {
            Some(guard) => guard,
            None => self.pool.acquire().await?,
        };

        for command in &commands {
            if let Err(error) = guard.conn_mut().enqueue(command) {
                self.reset_after_failure();
                return Err(error);
            }
        }
        let replies = match guard.conn_mut().batch().await {
            Ok(replies) => replies,
            Err(error) => {
                // Broken connection: dropping the guard closes the socket
                // and frees the pool slot.
                drop(guard);
                self.reset_after_failure();
                return Err(error);
            }
        };

        let values = match handle_replies(handlers, replies, false) {
            Ok(values) => values,
            Err(error) => {
                guard.conn_mut().mark_broken();
                drop(guard);
                self.reset_after_failure();
                return Err(error);
            }
        };

        let mut decoded: Vec<Value> = values
            .into_iter()
            .map(|value| apply_mode(value, self.mode))
            .collect();
        let result = if decoded.len() == 1 {
            decoded.pop().unwrap_or(Value::Nil)
        } else {
            Value::List(decoded)
        };

        if matches!(self.tx, TxState::Idle) && !self.prevent_pooling {
            drop(guard);
            self.withheld = false;
        } else {
            if self.prevent_pooling {
                self.withheld = true;
            }
            self.conn = Some(guard);
        }
        self.mode = DecodeMode::None;
        self.prevent_pooling = false;
        Ok(result)
    }

    fn reset_after_failure(&mut self) {
        self.tx = TxState::Idle;
        self.mode = DecodeMode::None;
        self.prevent_pooling = false;
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Some(mut guard) = self.conn.take() {
            // A pinned connection with an open transaction (or an explicit
            // pooling opt-out) must not be shared.
            if !matches!(self.tx, TxState::Idle) || self.prevent_pooling || self.withheld {
                guard.conn_mut().mark_broken();
            }
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("queued", &self.queued.len())
            .field("mode", &self.mode)
            .field("pinned", &self.conn.is_some())
            .finish()
    }
}

impl<'a> IntoFuture for &'a mut Db {
    type Output = Result<Value>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

/// Applies handlers to raw replies, producing the user-visible values.
///
/// With `embedded` set (inside an EXEC result) acknowledgement failures are
/// embedded as error values instead of failing the batch, since the server
/// ran the surrounding transaction regardless.
fn handle_replies(
    handlers: Vec<(String, Handler)>,
    replies: Vec<Reply>,
    embedded: bool,
) -> Result<Vec<Value>> {
    if handlers.len() != replies.len() {
        return Err(Error::protocol(format!(
            "expected {} replies, got {}",
            handlers.len(),
            replies.len()
        )));
    }
    let mut out = Vec::new();
    for ((name, handler), reply) in handlers.into_iter().zip(replies) {
        match handler {
            Handler::Output => out.push(reply_to_value(reply)),
            Handler::Expect(status) => {
                if reply.is_status(status) {
                    continue;
                }
                match reply {
                    Reply::Error(message) if embedded => out.push(Value::Error(message)),
                    Reply::Error(message) => {
                        if name == "MULTI" {
                            return Err(Error::protocol(format!("MULTI rejected: {}", message)));
                        }
                        return Err(Error::Server { message });
                    }
                    other => {
                        return Err(Error::protocol(format!(
                            "{} expected +{}, got {:?}",
                            name, status, other
                        )));
                    }
                }
            }
            Handler::Map => match reply {
                Reply::Array(Some(items)) => out.push(fold_hash(items)),
                Reply::Error(message) => out.push(Value::Error(message)),
                other => {
                    return Err(Error::protocol(format!(
                        "{} expected an array reply, got {:?}",
                        name, other
                    )));
                }
            },
            Handler::Keys => match reply {
                Reply::Array(Some(items)) => out.push(fold_keys(items)),
                Reply::Error(message) => out.push(Value::Error(message)),
                other => {
                    return Err(Error::protocol(format!(
                        "{} expected an array reply, got {:?}",
                        name, other
                    )));
                }
            },
            Handler::Bool => match reply {
                Reply::Int(n) => out.push(Value::Bool(n != 0)),
                Reply::Error(message) => out.push(Value::Error(message)),
                other => {
                    return Err(Error::protocol(format!(
                        "{} expected an integer reply, got {:?}",
                        name, other
                    )));
                }
            },
            Handler::Seconds => match reply {
                Reply::Int(millis) => out.push(Value::Float(millis as f64 * 0.001)),
                Reply::Error(message) => out.push(Value::Error(message)),
                other => {
                    return Err(Error::protocol(format!(
                        "{} expected an integer reply, got {:?}",
                        name, other
                    )));
                }
            },
            Handler::Exec(inner) => match reply {
                Reply::Array(None) => out.push(Value::Bool(false)),
                Reply::Array(Some(items)) => {
                    let values = handle_replies(inner, items, true)?;
                    if values.is_empty() {
                        out.push(Value::Bool(true));
                    } else {
                        out.push(Value::List(values));
                    }
                }
                Reply::Error(message) => return Err(Error::Server { message }),
                other => {
                    return Err(Error::protocol(format!(
                        "EXEC expected an array reply, got {:?}",
                        other
                    )));
                }
            },
        }
    }
    Ok(out)
}
