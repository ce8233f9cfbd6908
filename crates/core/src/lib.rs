//! Kestrel Core - Core types shared by the Kestrel rule engine crates.
//!
//! This crate provides the foundational types that flow between the matching
//! network and accumulate nodes:
//!
//! - `Value` / `DataType`: field values and their runtime type tags
//! - `Fact` / `Tuple`: matched facts and left-side fact chains
//! - `Binding`: opaque positional references to fact fields
//! - `SourcePattern`: the sub-pattern supplying matches to an accumulate
//! - `Environment`: session state forwarded to aggregate functions
//! - `Error`: error kinds for wiring and evaluation
//!
//! # Example
//!
//! ```rust
//! use kestrel_core::{Binding, Fact, Tuple, Value};
//! use std::sync::Arc;
//!
//! let order = Arc::new(Fact::new(1, vec![Value::from("o-1"), Value::Int64(40)]));
//! let tuple = Tuple::new().extend(order);
//!
//! let amount = Binding::new("$amount", 0, 1);
//! assert_eq!(amount.resolve(&tuple), Value::Int64(40));
//! ```

#![no_std]

extern crate alloc;

mod binding;
mod env;
mod error;
mod fact;
pub mod pattern;
mod types;
mod value;

pub use binding::Binding;
pub use env::Environment;
pub use error::{Error, Result};
pub use fact::{next_fact_handle, Fact, FactHandle, Tuple};
pub use pattern::{GroupKind, SourcePattern};
pub use types::DataType;
pub use value::Value;
