//! RESP encoder and decoder.
//!
//! Coercion of heterogeneous argument values into bulk strings, command
//! framing, and the streaming reply parser.
//!
//! # Modules
//!
//! - [`encoder`] - Argument coercion and command framing
//! - [`decoder`] - Streaming reply decoder

pub mod decoder;
pub mod encoder;

pub use decoder::Decoder;
pub use encoder::{Arg, Command};
