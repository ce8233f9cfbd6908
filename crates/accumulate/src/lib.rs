//! Kestrel Accumulate - multi-function accumulate nodes for the Kestrel rule engine.
//!
//! An accumulate node reduces the matches of a source pattern, per group, to
//! aggregate values. This crate composes N aggregate functions into a single
//! vector-valued aggregate evaluated over one pass of the matches.
//!
//! # Core Concepts
//!
//! - `AggregateFunction`: the typed incremental state machine of one aggregate
//! - `Accumulator`: its object-safe form, held by composition slots
//! - `MultiAccumulate`: N functions over the same source pattern and group
//! - `SpecArena` / `WireSlot`: late wiring of slot functions, propagated to clones
//! - `AccumulateMemory`: per-node group table with reverse-or-recompute retraction
//! - `codec`: durable bytes for a spec; compiled slots come back unwired
//!
//! # Built-in Functions
//!
//! `Count`, `Sum`, `Average`, `Min`, `Max` and `CollectList`, all reversible
//! and relocatable. User-defined aggregates are built from `FunctionN` pieces
//! with `CompiledAccumulator`.
//!
//! # Example
//!
//! ```ignore
//! use kestrel_accumulate::{AccumulateMemory, Count, MultiAccumulate, Sum};
//! use kestrel_core::{Binding, Environment, Fact, SourcePattern, Tuple, Value};
//! use std::sync::Arc;
//!
//! let x = Binding::field("$x", 0);
//! let spec = MultiAccumulate::builder()
//!     .source(SourcePattern::pattern("Item", vec![x.clone()]))
//!     .function(Arc::new(Count))
//!     .function(Arc::new(Sum::new(x)))
//!     .build()
//!     .unwrap();
//!
//! let env = Environment::new();
//! let group = Tuple::new();
//! let mut memory = AccumulateMemory::new(&spec).unwrap();
//! memory.insert(&spec, &group, Arc::new(Fact::new(1, vec![Value::Int64(3)])), &env).unwrap();
//! let result = memory.insert(&spec, &group, Arc::new(Fact::new(2, vec![Value::Int64(5)])), &env).unwrap();
//! assert_eq!(result, vec![Value::Int64(2), Value::Int64(8)]);
//! ```

#![no_std]

extern crate alloc;

pub mod arena;
pub mod builtin;
pub mod codec;
pub mod compiled;
pub mod context;
pub mod descriptor;
pub mod function;
pub mod function_n;
pub mod guard;
pub mod memory;
pub mod multi;

pub use arena::{SpecArena, SpecId, WirePolicy, WireSlot};
pub use builtin::{Average, CollectList, Count, Max, Min, Sum};
pub use codec::{persist, restore};
pub use compiled::CompiledAccumulator;
pub use context::{CompositeToken, FunctionContexts, SlotContext, SlotToken, WorkingMemoryContexts};
pub use descriptor::AccumulatorDescriptor;
pub use function::{
    Accumulator, AggregateFunction, BindingCache, EvalScope, FunctionIdentity, SharedAccumulator,
};
pub use function_n::{Fingerprint, FunctionN, NativeFn};
pub use guard::GuardedAccumulator;
pub use memory::{group_key, AccumulateMemory, GroupKey, RetractOutcome};
pub use multi::{MultiAccumulate, MultiAccumulateBuilder, Slot};
