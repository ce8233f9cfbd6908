//! Facts and tuples flowing through the matching network.
//!
//! A `Fact` is an inserted object's field values plus the handle working
//! memory assigned to it. A `Tuple` is the ordered chain of facts matched on
//! the left side of a node; for an accumulate it identifies the group owner.

use crate::value::Value;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an inserted fact.
pub type FactHandle = u64;

static NEXT_FACT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Gets the next unique fact handle.
pub fn next_fact_handle() -> FactHandle {
    NEXT_FACT_HANDLE.fetch_add(1, Ordering::SeqCst)
}

/// An immutable fact as seen by aggregate functions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fact {
    handle: FactHandle,
    values: Vec<Value>,
}

impl Fact {
    /// Creates a fact with the given handle and field values.
    pub fn new(handle: FactHandle, values: Vec<Value>) -> Self {
        Self { handle, values }
    }

    /// Creates a fact with an automatically assigned handle.
    pub fn create(values: Vec<Value>) -> Self {
        Self::new(next_fact_handle(), values)
    }

    /// Returns the fact handle.
    #[inline]
    pub fn handle(&self) -> FactHandle {
        self.handle
    }

    /// Returns the field values.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value at the given field position.
    #[inline]
    pub fn get(&self, field: usize) -> Option<&Value> {
        self.values.get(field)
    }

    /// Returns the number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the fact carries no fields.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered chain of facts matched upstream of a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Tuple {
    facts: Vec<Arc<Fact>>,
}

impl Tuple {
    /// Creates an empty tuple.
    pub fn new() -> Self {
        Self { facts: Vec::new() }
    }

    /// Creates a tuple from the given facts.
    pub fn from_facts(facts: Vec<Arc<Fact>>) -> Self {
        Self { facts }
    }

    /// Returns a new tuple extended with `fact`.
    pub fn extend(&self, fact: Arc<Fact>) -> Self {
        let mut facts = self.facts.clone();
        facts.push(fact);
        Self { facts }
    }

    /// Returns the fact at `offset`.
    pub fn get(&self, offset: usize) -> Option<&Fact> {
        self.facts.get(offset).map(|f| f.as_ref())
    }

    /// Returns the number of facts in the tuple.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the tuple holds no facts.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterates the facts in tuple order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter().map(|f| f.as_ref())
    }
}
