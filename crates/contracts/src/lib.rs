//! # Contracts
//!
//! Frozen interface contracts shared by every crate: messages and batches,
//! the connector lifecycle trait, external store traits, configuration and
//! the error taxonomy.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Ordering Model
//! - A batch is ordered; interpolation resolves fields by message index
//! - Writers return a batch of the same length as their input

mod config;
mod error;
mod message;
mod sink;
mod store;

pub use config::*;
pub use error::*;
pub use message::{Batch, Message};
pub use sink::*;
pub use store::*;
