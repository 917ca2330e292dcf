//! # Interpolation
//!
//! Dynamic field resolution.
//!
//! Responsibilities:
//! - Compile `${! ... }` string templates (`InterpolatedField`)
//! - Compile `root = <expr>` mappings (`ArgsMapping`)
//! - Resolve both against a message index within a batch, read-only
//!
//! # Example
//!
//! ```
//! use contracts::{Batch, Message};
//! use interpolation::InterpolatedField;
//!
//! let key = InterpolatedField::compile(r#"${!json("id")}"#).unwrap();
//! let batch = Batch::new(vec![Message::new(r#"{"id":"x1"}"#)]);
//! assert_eq!(key.resolve_string(0, &batch), "x1");
//! ```

mod expr;
mod field;
mod mapping;

pub use field::{InterpolatedField, Resolved};
pub use mapping::ArgsMapping;
