//! # Redpipe
//!
//! Pipelined async Redis client with connection pooling, MULTI/EXEC
//! transactions and Pub/Sub, speaking RESP v2 over TCP, TLS or Unix-domain
//! sockets.
//!
//! ## Features
//!
//! - `tls` (default) - TLS support via rustls
//!
//! ## Example
//!
//! ```no_run
//! use redpipe::Pool;
//!
//! #[tokio::main]
//! async fn main() -> redpipe::Result<()> {
//!     let pool = Pool::new("redis://localhost/")?;
//!     let mut db = pool.db();
//!     db.set("greeting", "hello").await?;
//!     let value = db.get("greeting").strdecode().await?;
//!     assert_eq!(value.as_str(), Some("hello"));
//!     Ok(())
//! }
//! ```
//!
//! Commands buffer on the facade and are pipelined in one write when it is
//! awaited; replies come back in command order. Decoding modifiers
//! (`strdecode`, `autodecode`) apply to the current batch and reset
//! afterwards.

#![warn(missing_docs)]

pub(crate) mod core;
pub mod proto;

pub use crate::core::{Db, DecodeMode, Message, Pool, PubSub, Value};
pub use crate::proto::codec::Arg;
pub use crate::proto::error::{Error, Result};
pub use crate::proto::frame::Reply;
