use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::trace;

use crate::core::config::ConnectInfo;
use crate::core::connection::Connection;
use crate::core::db::Db;
use crate::core::pubsub::PubSub;
use crate::proto::codec::Arg;
use crate::proto::error::{Error, Result};

/// Default upper bound on live connections per pool.
const DEFAULT_MAX_SIZE: usize = 16;

/// A pool of pipelined connections to one Redis server.
///
/// The pool is created from a connection URL and hands out [`Db`] facades;
/// connections are dialed lazily, reused LIFO, and bounded by the pool
/// size. Cloning the handle is cheap and shares the same pool.
///
/// # Example
///
/// ```no_run
/// use redpipe::Pool;
///
/// # async fn example() -> redpipe::Result<()> {
/// let pool = Pool::new("redis://localhost/")?;
/// let mut db = pool.db();
/// let greeting = db.set("hello", "world").get("hello").strdecode().run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    info: ConnectInfo,
    state: Mutex<PoolState>,
    semaphore: Arc<Semaphore>,
}

struct PoolState {
    idle: Vec<Connection>,
    closed: bool,
}

impl Pool {
    /// Creates a pool with the default size limit.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_size(url, DEFAULT_MAX_SIZE)
    }

    /// Creates a pool bounded to at most `max_size` live connections.
    pub fn with_size(url: &str, max_size: usize) -> Result<Self> {
        let info = ConnectInfo::from_url(url)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                info,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    closed: false,
                }),
                semaphore: Arc::new(Semaphore::new(max_size)),
            }),
        })
    }

    /// Returns a database facade backed by this pool.
    ///
    /// The facade acquires a connection lazily on its first run and returns
    /// it when the batch drains cleanly.
    pub fn db(&self) -> Db {
        Db::new(self.clone())
    }

    /// Creates a publish/subscribe receiver, optionally pre-subscribed to
    /// the given channels.
    ///
    /// The receiver dials a dedicated connection on first use; subscription
    /// connections are never returned to the pool.
    pub fn pubsub<I, A>(&self, channels: I) -> PubSub
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let mut pubsub = PubSub::new(self.inner.info.clone());
        pubsub.subscribe(channels);
        pubsub
    }

    /// Closes the pool: idle sockets are dropped and later acquires fail
    /// with [`Error::PoolClosed`].
    pub fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        drop(idle);
        self.inner.semaphore.close();
    }

    /// Takes an idle connection or dials a new one, suspending while the
    /// pool is at its size limit.
    pub(crate) async fn acquire(&self) -> Result<PooledConn> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        let idle = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return Err(Error::PoolClosed);
            }
            state.idle.pop()
        };

        let conn = match idle {
            Some(conn) => {
                trace!("reusing idle connection");
                conn
            }
            None => self.inner.info.dial().await?,
        };

        Ok(PooledConn {
            conn: Some(conn),
            _permit: permit,
            pool: Arc::clone(&self.inner),
        })
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .idle
            .len()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Pool")
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// RAII guard for a pooled connection.
///
/// Dropping the guard returns the connection to the idle list when it is
/// still poolable, and otherwise closes the socket; the pool slot is freed
/// either way.
pub(crate) struct PooledConn {
    conn: Option<Connection>,
    _permit: tokio::sync::OwnedSemaphorePermit,
    pool: Arc<PoolInner>,
}

impl PooledConn {
    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        // The option is only emptied by Drop.
        self.conn.as_mut().expect("connection exists")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if conn.is_poolable() {
            let mut state = self.pool.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.closed {
                trace!("returning connection to pool");
                state.idle.push(conn);
                return;
            }
        }
        trace!("dropping connection");
        // The socket closes here; the permit drop frees the slot.
    }
}
