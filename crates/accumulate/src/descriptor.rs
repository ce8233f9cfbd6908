//! Relocatable descriptions of built-in aggregate functions.

use crate::builtin::{Average, CollectList, Count, Max, Min, Sum};
use crate::function::SharedAccumulator;
use alloc::sync::Arc;
use core::fmt;
use kestrel_core::Binding;

/// Everything needed to rebuild a built-in function after restore.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccumulatorDescriptor {
    Count,
    Sum(Binding),
    Average(Binding),
    Min(Binding),
    Max(Binding),
    CollectList(Binding),
}

impl AccumulatorDescriptor {
    /// Builds a fresh function from this description.
    pub fn instantiate(&self) -> SharedAccumulator {
        match self {
            AccumulatorDescriptor::Count => Arc::new(Count),
            AccumulatorDescriptor::Sum(b) => Arc::new(Sum::new(b.clone())),
            AccumulatorDescriptor::Average(b) => Arc::new(Average::new(b.clone())),
            AccumulatorDescriptor::Min(b) => Arc::new(Min::new(b.clone())),
            AccumulatorDescriptor::Max(b) => Arc::new(Max::new(b.clone())),
            AccumulatorDescriptor::CollectList(b) => Arc::new(CollectList::new(b.clone())),
        }
    }

    /// The field binding the function reads, if any.
    pub fn binding(&self) -> Option<&Binding> {
        match self {
            AccumulatorDescriptor::Count => None,
            AccumulatorDescriptor::Sum(b)
            | AccumulatorDescriptor::Average(b)
            | AccumulatorDescriptor::Min(b)
            | AccumulatorDescriptor::Max(b)
            | AccumulatorDescriptor::CollectList(b) => Some(b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccumulatorDescriptor::Count => "count",
            AccumulatorDescriptor::Sum(_) => "sum",
            AccumulatorDescriptor::Average(_) => "average",
            AccumulatorDescriptor::Min(_) => "min",
            AccumulatorDescriptor::Max(_) => "max",
            AccumulatorDescriptor::CollectList(_) => "collectList",
        }
    }
}

impl fmt::Display for AccumulatorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.binding() {
            Some(b) => write!(f, "{}({})", self.name(), b.identifier()),
            None => write!(f, "{}()", self.name()),
        }
    }
}
