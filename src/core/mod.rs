//! Client layer: pooled pipelined connections and the high-level API.
//!
//! ## Modules
//!
//! - [`config`] - Connection URL parsing and dialing
//! - [`connection`] - Single pipelined connection management
//! - [`pool`] - Bounded connection pool
//! - [`decode`] - Output decoding modes
//! - [`db`] - Chainable database facade and transactions
//! - [`pubsub`] - Publish/subscribe receiver

pub(crate) mod config;
/// Low-level connection management.
pub(crate) mod connection;
/// Output decoding modes and decoded values.
pub mod decode;
/// The chainable database facade.
pub mod db;
/// Bounded connection pool.
pub mod pool;
/// Publish/subscribe receiver.
pub mod pubsub;

cfg_if::cfg_if! {
    if #[cfg(feature = "tls")] {
        mod tls;
    }
}

pub use decode::{DecodeMode, Value};
pub use db::Db;
pub use pool::Pool;
pub use pubsub::{Message, PubSub};
