//! The aggregate function capability.
//!
//! `AggregateFunction` is the typed state machine one aggregate implements:
//! create contexts, initialize per group, consume a match, undo a match,
//! project the current value. `Accumulator` is its object-safe erased form,
//! blanket-implemented for every `AggregateFunction`, which is what
//! composition slots hold.

use crate::context::{SlotContext, SlotToken};
use crate::descriptor::AccumulatorDescriptor;
use crate::function_n::Fingerprint;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use hashbrown::HashMap;
use kestrel_core::{Binding, Environment, Fact, Result, SourcePattern, Tuple, Value};

/// Shared handle to a wired function. Clones of a spec share these.
pub type SharedAccumulator = Arc<dyn Accumulator>;

/// Arguments every function call receives besides its contexts.
#[derive(Clone, Copy, Debug)]
pub struct EvalScope<'a> {
    /// The left tuple owning the group.
    pub group: &'a Tuple,
    /// Required bindings, forwarded positionally.
    pub bindings: &'a [Binding],
    pub env: &'a Environment,
}

impl<'a> EvalScope<'a> {
    pub fn new(group: &'a Tuple, bindings: &'a [Binding], env: &'a Environment) -> Self {
        Self {
            group,
            bindings,
            env,
        }
    }
}

/// Bindings declared inside the source pattern, by identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingCache {
    by_name: HashMap<String, Binding>,
}

impl BindingCache {
    pub fn from_pattern(source: &SourcePattern) -> Self {
        let by_name = source
            .inner_declarations()
            .into_iter()
            .map(|b| (String::from(b.identifier()), b.clone()))
            .collect();
        Self { by_name }
    }

    pub fn get(&self, identifier: &str) -> Option<&Binding> {
        self.by_name.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Identity used for structural equality of composition slots.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FunctionIdentity {
    /// A relocatable built-in, equal to any other built-in with the same descriptor.
    Descriptor(AccumulatorDescriptor),
    /// A generated function identified by its source fingerprint.
    Fingerprint(Fingerprint),
    /// An opaque instance, equal only to itself.
    Instance(usize),
}

/// One aggregate's incremental state machine.
///
/// `try_reverse` is only ever called when `supports_reverse` returns true;
/// functions that cannot undo a match force the caller into full
/// recomputation of the group. Functions read facts and bindings but never
/// mutate them.
pub trait AggregateFunction: fmt::Debug + Send + Sync + 'static {
    /// Per-group state.
    type Context: Send + 'static;
    /// Per-node state, shared by every group of the node.
    type WorkingMemory: Send + 'static;
    /// Value returned by `accumulate` and handed back to `try_reverse`.
    type Token: Send + 'static;

    fn create_context(&self) -> Self::Context;

    fn create_working_memory_context(&self) -> Self::WorkingMemory;

    fn init(
        &self,
        wm: &mut Self::WorkingMemory,
        ctx: &mut Self::Context,
        scope: &EvalScope<'_>,
    ) -> Result<()>;

    fn accumulate(
        &self,
        wm: &mut Self::WorkingMemory,
        ctx: &mut Self::Context,
        fact: &Fact,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<Self::Token>;

    /// Undoes a prior `accumulate`. Returns false when the match cannot be
    /// taken back incrementally.
    fn try_reverse(
        &self,
        wm: &mut Self::WorkingMemory,
        ctx: &mut Self::Context,
        fact: &Fact,
        prior: &Self::Token,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<bool>;

    /// Projects the current value. Must not change any state.
    fn get_result(
        &self,
        wm: &Self::WorkingMemory,
        ctx: &Self::Context,
        scope: &EvalScope<'_>,
    ) -> Result<Value>;

    fn supports_reverse(&self) -> bool {
        true
    }

    fn identity(&self) -> FunctionIdentity;

    /// Relocatable functions describe themselves so they can be persisted.
    /// Compiled functions return None and are re-wired after restore.
    fn descriptor(&self) -> Option<AccumulatorDescriptor> {
        None
    }

    /// Returns a copy reading `to` wherever this function reads `from`.
    fn rebind(&self, _from: &Binding, _to: &Binding) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }
}

/// Object-safe form of [`AggregateFunction`] with erased contexts and tokens.
pub trait Accumulator: fmt::Debug + Send + Sync {
    fn create_context(&self) -> SlotContext;

    fn create_working_memory_context(&self) -> SlotContext;

    fn init(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        scope: &EvalScope<'_>,
    ) -> Result<()>;

    fn accumulate(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        fact: &Fact,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<SlotToken>;

    fn try_reverse(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        fact: &Fact,
        prior: &SlotToken,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<bool>;

    fn get_result(
        &self,
        wm: &SlotContext,
        ctx: &SlotContext,
        scope: &EvalScope<'_>,
    ) -> Result<Value>;

    fn supports_reverse(&self) -> bool;

    fn identity(&self) -> FunctionIdentity;

    fn descriptor(&self) -> Option<AccumulatorDescriptor>;

    fn rebind(&self, from: &Binding, to: &Binding) -> Option<SharedAccumulator>;

    /// True if this slot holds compiled code that cannot be persisted.
    fn is_compiled(&self) -> bool {
        self.descriptor().is_none()
    }

    /// True for the protective proxy installed under a sandboxed wire policy.
    fn is_guarded(&self) -> bool {
        false
    }
}

impl<F: AggregateFunction> Accumulator for F {
    fn create_context(&self) -> SlotContext {
        SlotContext::new(AggregateFunction::create_context(self))
    }

    fn create_working_memory_context(&self) -> SlotContext {
        SlotContext::new(AggregateFunction::create_working_memory_context(self))
    }

    fn init(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        scope: &EvalScope<'_>,
    ) -> Result<()> {
        let wm = wm.downcast_mut::<F::WorkingMemory>()?;
        let ctx = ctx.downcast_mut::<F::Context>()?;
        AggregateFunction::init(self, wm, ctx, scope)
    }

    fn accumulate(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        fact: &Fact,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<SlotToken> {
        let wm = wm.downcast_mut::<F::WorkingMemory>()?;
        let ctx = ctx.downcast_mut::<F::Context>()?;
        AggregateFunction::accumulate(self, wm, ctx, fact, cache, scope).map(SlotToken::new)
    }

    fn try_reverse(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        fact: &Fact,
        prior: &SlotToken,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<bool> {
        let prior = prior.downcast_ref::<F::Token>()?;
        let wm = wm.downcast_mut::<F::WorkingMemory>()?;
        let ctx = ctx.downcast_mut::<F::Context>()?;
        AggregateFunction::try_reverse(self, wm, ctx, fact, prior, cache, scope)
    }

    fn get_result(
        &self,
        wm: &SlotContext,
        ctx: &SlotContext,
        scope: &EvalScope<'_>,
    ) -> Result<Value> {
        let wm = wm.downcast_ref::<F::WorkingMemory>()?;
        let ctx = ctx.downcast_ref::<F::Context>()?;
        AggregateFunction::get_result(self, wm, ctx, scope)
    }

    fn supports_reverse(&self) -> bool {
        AggregateFunction::supports_reverse(self)
    }

    fn identity(&self) -> FunctionIdentity {
        AggregateFunction::identity(self)
    }

    fn descriptor(&self) -> Option<AccumulatorDescriptor> {
        AggregateFunction::descriptor(self)
    }

    fn rebind(&self, from: &Binding, to: &Binding) -> Option<SharedAccumulator> {
        AggregateFunction::rebind(self, from, to).map(|f| Arc::new(f) as SharedAccumulator)
    }
}
