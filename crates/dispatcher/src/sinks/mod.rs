//! Sink implementations
//!
//! Contains CacheWriter, CommandProcessor, and StreamWriter.

mod cache;
mod command;
mod stream;

pub use self::cache::CacheWriter;
pub use self::command::CommandProcessor;
pub use self::stream::{encode, StreamWriter};
