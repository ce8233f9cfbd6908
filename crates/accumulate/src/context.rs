//! Slot-indexed contexts and match tokens.
//!
//! Each aggregate function defines its own per-group context, per-node
//! working-memory context and match token types. The composite stores them
//! type-erased and every access is a checked downcast, so a context or token
//! handed to a function that did not create it surfaces as
//! `Error::ContextMismatch` instead of undefined behaviour.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::{type_name, Any};
use core::fmt;
use kestrel_core::{Error, Result};

/// One function's context, erased to a checked box.
pub struct SlotContext(Box<dyn Any + Send>);

impl SlotContext {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Result<&T> {
        self.0.downcast_ref::<T>().ok_or(Error::ContextMismatch {
            expected: type_name::<T>(),
        })
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Result<&mut T> {
        self.0.downcast_mut::<T>().ok_or(Error::ContextMismatch {
            expected: type_name::<T>(),
        })
    }
}

impl fmt::Debug for SlotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SlotContext(..)")
    }
}

/// The match result one function returned from `accumulate`.
///
/// It must be handed back unchanged to `try_reverse` for the same match.
pub struct SlotToken(Box<dyn Any + Send>);

impl SlotToken {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Result<&T> {
        self.0.downcast_ref::<T>().ok_or(Error::ContextMismatch {
            expected: type_name::<T>(),
        })
    }
}

impl fmt::Debug for SlotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SlotToken(..)")
    }
}

macro_rules! slot_sequence {
    ($(#[$meta:meta])* $name:ident, $item:ty) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name(Vec<$item>);

        impl $name {
            pub(crate) fn from_vec(items: Vec<$item>) -> Self {
                Self(items)
            }

            /// Number of slots.
            #[inline]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn get(&self, slot: usize) -> Option<&$item> {
                self.0.get(slot)
            }

            pub fn iter(&self) -> impl Iterator<Item = &$item> {
                self.0.iter()
            }
        }
    };
}

slot_sequence!(
    /// Per-group contexts, one per composition slot.
    FunctionContexts,
    SlotContext
);

slot_sequence!(
    /// Per-node working-memory contexts, one per composition slot.
    WorkingMemoryContexts,
    SlotContext
);

slot_sequence!(
    /// The composite match result: each slot's token in slot order.
    CompositeToken,
    SlotToken
);

impl FunctionContexts {
    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut SlotContext> {
        self.0.get_mut(slot)
    }
}

impl WorkingMemoryContexts {
    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut SlotContext> {
        self.0.get_mut(slot)
    }
}
