//! Multi-function accumulate: N aggregate functions over the same group.
//!
//! A `MultiAccumulate` composes its slots into one vector-valued aggregate.
//! Every operation walks the slots in order, 0..N.
//!
//! Failures abort the walk at the failing slot. Slots before it have already
//! applied their side effects and are NOT rolled back, for both `accumulate`
//! and `try_reverse`; after a failed call the group's composed state is an
//! undefined mix and the caller should recompute the group from scratch.
//! The same holds when `try_reverse` returns false.

use crate::context::{CompositeToken, FunctionContexts, SlotContext, WorkingMemoryContexts};
use crate::function::{Accumulator, BindingCache, EvalScope, FunctionIdentity, SharedAccumulator};
use alloc::vec::Vec;
use core::hash::{Hash, Hasher};
use kestrel_core::{Binding, Environment, Error, Fact, Result, SourcePattern, Tuple, Value};
use tracing::{trace, warn};

/// One composition slot.
#[derive(Clone, Debug)]
pub enum Slot {
    Wired(SharedAccumulator),
    /// Awaiting a function through a `WireSlot`.
    Unwired,
}

impl Slot {
    pub fn function(&self) -> Option<&SharedAccumulator> {
        match self {
            Slot::Wired(f) => Some(f),
            Slot::Unwired => None,
        }
    }

    pub fn is_wired(&self) -> bool {
        matches!(self, Slot::Wired(_))
    }

    fn identity(&self) -> Option<FunctionIdentity> {
        self.function().map(|f| f.identity())
    }
}

impl From<SharedAccumulator> for Slot {
    fn from(f: SharedAccumulator) -> Self {
        Slot::Wired(f)
    }
}

/// An accumulate over a source pattern with N composed functions.
#[derive(Debug)]
pub struct MultiAccumulate {
    source: SourcePattern,
    required: Vec<Binding>,
    slots: Vec<Slot>,
    cache: BindingCache,
    reversible: bool,
}

impl MultiAccumulate {
    /// Creates a composition; returns None when `slots` is empty.
    pub fn new(source: SourcePattern, required: Vec<Binding>, slots: Vec<Slot>) -> Option<Self> {
        if slots.is_empty() {
            return None;
        }
        let cache = BindingCache::from_pattern(&source);
        let mut spec = Self {
            source,
            required,
            slots,
            cache,
            reversible: false,
        };
        spec.refresh_reversible();
        Some(spec)
    }

    pub fn builder() -> MultiAccumulateBuilder {
        MultiAccumulateBuilder::new()
    }

    /// Number of composed functions.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a composition has at least one slot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn is_multi_function(&self) -> bool {
        true
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn source(&self) -> &SourcePattern {
        &self.source
    }

    pub fn required_bindings(&self) -> &[Binding] {
        &self.required
    }

    pub fn binding_cache(&self) -> &BindingCache {
        &self.cache
    }

    /// Indices of slots still awaiting a function.
    pub fn unwired_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_wired())
            .map(|(i, _)| i)
    }

    pub fn is_fully_wired(&self) -> bool {
        self.slots.iter().all(Slot::is_wired)
    }

    /// True iff every composed function supports reverse.
    ///
    /// Fixed for a given wiring; an unwired slot counts as not reversible.
    #[inline]
    pub fn supports_reverse(&self) -> bool {
        self.reversible
    }

    fn refresh_reversible(&mut self) {
        self.reversible = self
            .slots
            .iter()
            .all(|s| s.function().is_some_and(|f| f.supports_reverse()));
    }

    pub(crate) fn set_slot(&mut self, index: usize, function: SharedAccumulator) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Slot::Wired(function);
            self.refresh_reversible();
        }
    }

    fn function(&self, slot: usize) -> Result<&SharedAccumulator> {
        self.slots
            .get(slot)
            .and_then(Slot::function)
            .ok_or(Error::Unwired { slot })
    }

    fn check_arity(&self, len: usize) -> Result<()> {
        if len == self.slots.len() {
            Ok(())
        } else {
            Err(Error::ContextMismatch {
                expected: "one context per composition slot",
            })
        }
    }

    fn scope<'a>(&'a self, group: &'a Tuple, env: &'a Environment) -> EvalScope<'a> {
        EvalScope::new(group, &self.required, env)
    }

    /// Builds one per-group context per slot, in slot order.
    pub fn create_function_contexts(&self) -> Result<FunctionContexts> {
        let contexts = (0..self.slots.len())
            .map(|i| self.function(i).map(|f| f.create_context()))
            .collect::<Result<Vec<_>>>()?;
        Ok(FunctionContexts::from_vec(contexts))
    }

    /// Builds one per-node working-memory context per slot, in slot order.
    pub fn create_working_memory_contexts(&self) -> Result<WorkingMemoryContexts> {
        let contexts = (0..self.slots.len())
            .map(|i| self.function(i).map(|f| f.create_working_memory_context()))
            .collect::<Result<Vec<_>>>()?;
        Ok(WorkingMemoryContexts::from_vec(contexts))
    }

    /// Initializes a group's contexts.
    pub fn init(
        &self,
        wm: &mut WorkingMemoryContexts,
        ctx: &mut FunctionContexts,
        group: &Tuple,
        env: &Environment,
    ) -> Result<()> {
        self.check_arity(wm.len())?;
        self.check_arity(ctx.len())?;
        let scope = self.scope(group, env);
        for i in 0..self.slots.len() {
            let (wm_i, ctx_i) = slot_pair(wm, ctx, i)?;
            self.function(i)?
                .init(wm_i, ctx_i, &scope)
                .map_err(|e| e.in_slot(i))?;
        }
        trace!(slots = self.slots.len(), "initialized group contexts");
        Ok(())
    }

    /// Feeds one match to every slot and returns the composite token.
    pub fn accumulate(
        &self,
        wm: &mut WorkingMemoryContexts,
        ctx: &mut FunctionContexts,
        group: &Tuple,
        fact: &Fact,
        env: &Environment,
    ) -> Result<CompositeToken> {
        self.check_arity(wm.len())?;
        self.check_arity(ctx.len())?;
        let scope = self.scope(group, env);
        let mut tokens = Vec::with_capacity(self.slots.len());
        for i in 0..self.slots.len() {
            let (wm_i, ctx_i) = slot_pair(wm, ctx, i)?;
            let result = self
                .function(i)
                .and_then(|f| f.accumulate(wm_i, ctx_i, fact, &self.cache, &scope));
            match result {
                Ok(token) => tokens.push(token),
                Err(e) => {
                    if i > 0 {
                        warn!(
                            slot = i,
                            fact = fact.handle(),
                            "accumulate failed after earlier slots applied"
                        );
                    }
                    return Err(e.in_slot(i));
                }
            }
        }
        Ok(CompositeToken::from_vec(tokens))
    }

    /// Takes back one match using the token its `accumulate` returned.
    ///
    /// Returns false without touching any slot when the spec does not
    /// support reverse. Otherwise returns false at the first slot that
    /// refuses; earlier slots stay reversed and the caller must recompute
    /// the group.
    pub fn try_reverse(
        &self,
        wm: &mut WorkingMemoryContexts,
        ctx: &mut FunctionContexts,
        group: &Tuple,
        fact: &Fact,
        token: &CompositeToken,
        env: &Environment,
    ) -> Result<bool> {
        self.check_arity(wm.len())?;
        self.check_arity(ctx.len())?;
        self.check_arity(token.len())?;
        if !self.reversible {
            trace!(fact = fact.handle(), "spec does not support reverse");
            return Ok(false);
        }
        let scope = self.scope(group, env);
        for i in 0..self.slots.len() {
            let (wm_i, ctx_i) = slot_pair(wm, ctx, i)?;
            let prior = token.get(i).ok_or(Error::ContextMismatch {
                expected: "one token per composition slot",
            })?;
            let reversed = self
                .function(i)
                .and_then(|f| f.try_reverse(wm_i, ctx_i, fact, prior, &self.cache, &scope))
                .map_err(|e| {
                    if i > 0 {
                        warn!(slot = i, fact = fact.handle(), "reverse failed after earlier slots reversed");
                    }
                    e.in_slot(i)
                })?;
            if !reversed {
                trace!(slot = i, fact = fact.handle(), "slot refused reverse");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Projects the current value of every slot. Side-effect free.
    pub fn get_result(
        &self,
        wm: &WorkingMemoryContexts,
        ctx: &FunctionContexts,
        group: &Tuple,
        env: &Environment,
    ) -> Result<Vec<Value>> {
        self.check_arity(wm.len())?;
        self.check_arity(ctx.len())?;
        let scope = self.scope(group, env);
        (0..self.slots.len())
            .map(|i| {
                let missing = Error::ContextMismatch {
                    expected: "one context per composition slot",
                };
                let wm_i = wm.get(i).ok_or_else(|| missing.clone())?;
                let ctx_i = ctx.get(i).ok_or(missing)?;
                self.function(i)
                    .and_then(|f| f.get_result(wm_i, ctx_i, &scope))
                    .map_err(|e| e.in_slot(i))
            })
            .collect()
    }

    /// Entry point of the single-function group-by accumulate. Never valid here.
    pub fn accumulate_grouped(
        &self,
        _wm: &mut WorkingMemoryContexts,
        _group_key: &Value,
        _fact: &Fact,
        _env: &Environment,
    ) -> Result<CompositeToken> {
        Err(Error::unsupported(
            "accumulate_grouped is only available on group-by accumulates",
        ))
    }

    /// Replaces `from` with `to` in the required bindings and in every
    /// function that reads it.
    pub fn replace_declaration(&mut self, from: &Binding, to: &Binding) {
        for binding in self.required.iter_mut().filter(|b| *b == from) {
            *binding = to.clone();
        }
        for slot in &mut self.slots {
            if let Some(rebound) = slot.function().and_then(|f| f.rebind(from, to)) {
                *slot = Slot::Wired(rebound);
            }
        }
        self.refresh_reversible();
    }
}

fn slot_pair<'a>(
    wm: &'a mut WorkingMemoryContexts,
    ctx: &'a mut FunctionContexts,
    slot: usize,
) -> Result<(&'a mut SlotContext, &'a mut SlotContext)> {
    let missing = || Error::ContextMismatch {
        expected: "one context per composition slot",
    };
    let wm = wm.slot_mut(slot).ok_or_else(missing)?;
    let ctx = ctx.slot_mut(slot).ok_or_else(missing)?;
    Ok((wm, ctx))
}

impl Clone for MultiAccumulate {
    /// Copies the slot array (sharing the functions) and the source pattern.
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone_only_group(),
            required: self.required.clone(),
            slots: self.slots.clone(),
            cache: self.cache.clone(),
            reversible: self.reversible,
        }
    }
}

impl PartialEq for MultiAccumulate {
    fn eq(&self, other: &Self) -> bool {
        self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(&other.slots)
                .all(|(a, b)| a.identity() == b.identity())
            && self.required == other.required
            && self.source == other.source
    }
}

impl Eq for MultiAccumulate {}

impl Hash for MultiAccumulate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slots.len().hash(state);
        for slot in &self.slots {
            slot.identity().hash(state);
        }
        self.required.hash(state);
        self.source.hash(state);
    }
}

/// Builder for [`MultiAccumulate`].
#[derive(Debug, Default)]
pub struct MultiAccumulateBuilder {
    source: Option<SourcePattern>,
    required: Vec<Binding>,
    slots: Vec<Slot>,
}

impl MultiAccumulateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: SourcePattern) -> Self {
        self.source = Some(source);
        self
    }

    pub fn require(mut self, binding: Binding) -> Self {
        self.required.push(binding);
        self
    }

    /// Appends a slot holding `function`.
    pub fn function(mut self, function: SharedAccumulator) -> Self {
        self.slots.push(Slot::Wired(function));
        self
    }

    /// Appends a slot to be wired later.
    pub fn deferred(mut self) -> Self {
        self.slots.push(Slot::Unwired);
        self
    }

    /// Returns None when no source pattern or no slot was given.
    pub fn build(self) -> Option<MultiAccumulate> {
        MultiAccumulate::new(self.source?, self.required, self.slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{Count, Max, Sum};
    use crate::compiled::CompiledAccumulator;
    use crate::function_n::FunctionN;
    use crate::guard::GuardedAccumulator;
    use alloc::sync::Arc;
    use alloc::vec;

    fn source() -> SourcePattern {
        SourcePattern::pattern("Item", vec![Binding::field("$x", 0)])
    }

    fn x() -> Binding {
        Binding::field("$x", 0)
    }

    fn count_sum() -> MultiAccumulate {
        MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .function(Arc::new(Sum::new(x())))
            .build()
            .unwrap()
    }

    fn item(handle: u64, x: i64) -> Fact {
        Fact::new(handle, vec![Value::Int64(x)])
    }

    fn irreversible() -> SharedAccumulator {
        Arc::new(CompiledAccumulator::new(
            FunctionN::direct(|_| Ok(Value::Int64(0))),
            FunctionN::direct(|args| Ok(args[0].clone())),
            FunctionN::direct(|args| Ok(args[0].clone())),
        ))
    }

    fn failing_accumulate() -> SharedAccumulator {
        Arc::new(CompiledAccumulator::new(
            FunctionN::direct(|_| Ok(Value::Int64(0))),
            FunctionN::direct(|_| Err(Error::evaluation("cannot add"))),
            FunctionN::direct(|args| Ok(args[0].clone())),
        ))
    }

    #[test]
    fn test_count_sum_scenario() {
        let spec = count_sum();
        let group = Tuple::new();
        let env = Environment::new();
        let mut wm = spec.create_working_memory_contexts().unwrap();
        let mut ctx = spec.create_function_contexts().unwrap();
        spec.init(&mut wm, &mut ctx, &group, &env).unwrap();

        let a = item(1, 3);
        let b = item(2, 5);
        let token_a = spec.accumulate(&mut wm, &mut ctx, &group, &a, &env).unwrap();
        spec.accumulate(&mut wm, &mut ctx, &group, &b, &env).unwrap();
        assert_eq!(
            spec.get_result(&wm, &ctx, &group, &env).unwrap(),
            vec![Value::Int64(2), Value::Int64(8)]
        );

        assert!(spec.try_reverse(&mut wm, &mut ctx, &group, &a, &token_a, &env).unwrap());
        assert_eq!(
            spec.get_result(&wm, &ctx, &group, &env).unwrap(),
            vec![Value::Int64(1), Value::Int64(5)]
        );
    }

    #[test]
    fn test_get_result_is_idempotent() {
        let spec = count_sum();
        let group = Tuple::new();
        let env = Environment::new();
        let mut wm = spec.create_working_memory_contexts().unwrap();
        let mut ctx = spec.create_function_contexts().unwrap();
        spec.init(&mut wm, &mut ctx, &group, &env).unwrap();
        spec.accumulate(&mut wm, &mut ctx, &group, &item(1, 4), &env).unwrap();

        let first = spec.get_result(&wm, &ctx, &group, &env).unwrap();
        let second = spec.get_result(&wm, &ctx, &group, &env).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_contexts_sized_to_slots() {
        let spec = count_sum();
        assert_eq!(spec.create_function_contexts().unwrap().len(), 2);
        assert_eq!(spec.create_working_memory_contexts().unwrap().len(), 2);
    }

    #[test]
    fn test_supports_reverse_requires_all() {
        assert!(count_sum().supports_reverse());
        let mixed = MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .function(irreversible())
            .build()
            .unwrap();
        assert!(!mixed.supports_reverse());
    }

    #[test]
    fn test_try_reverse_untouched_when_unsupported() {
        let spec = MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .function(GuardedAccumulator::wrap(irreversible()))
            .build()
            .unwrap();
        assert!(!spec.supports_reverse());
        let group = Tuple::new();
        let env = Environment::new();
        let mut wm = spec.create_working_memory_contexts().unwrap();
        let mut ctx = spec.create_function_contexts().unwrap();
        spec.init(&mut wm, &mut ctx, &group, &env).unwrap();

        let a = item(1, 4);
        let token = spec.accumulate(&mut wm, &mut ctx, &group, &a, &env).unwrap();
        let reversed = spec.try_reverse(&mut wm, &mut ctx, &group, &a, &token, &env);
        assert_eq!(reversed, Ok(false));
        assert_eq!(ctx.get(0).unwrap().downcast_ref::<i64>(), Ok(&1));
        assert_eq!(
            spec.get_result(&wm, &ctx, &group, &env).unwrap()[0],
            Value::Int64(1)
        );
    }

    #[test]
    fn test_accumulate_failure_leaves_earlier_slots_applied() {
        let spec = MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .function(failing_accumulate())
            .build()
            .unwrap();
        let group = Tuple::new();
        let env = Environment::new();
        let mut wm = spec.create_working_memory_contexts().unwrap();
        let mut ctx = spec.create_function_contexts().unwrap();
        spec.init(&mut wm, &mut ctx, &group, &env).unwrap();

        let err = spec
            .accumulate(&mut wm, &mut ctx, &group, &item(1, 1), &env)
            .unwrap_err();
        assert!(matches!(err, Error::Evaluation { slot: Some(1), .. }));
        // slot 0 already counted the match
        assert_eq!(
            ctx.get(0).unwrap().downcast_ref::<i64>(),
            Ok(&1)
        );
    }

    #[test]
    fn test_try_reverse_stops_at_first_refusal() {
        let spec = MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .function(Arc::new(Max::new(x())))
            .build()
            .unwrap();
        let group = Tuple::new();
        let env = Environment::new();
        let mut wm = spec.create_working_memory_contexts().unwrap();
        let mut first = spec.create_function_contexts().unwrap();
        let mut second = spec.create_function_contexts().unwrap();
        spec.init(&mut wm, &mut first, &group, &env).unwrap();
        spec.init(&mut wm, &mut second, &group, &env).unwrap();

        let a = item(1, 7);
        let token = spec.accumulate(&mut wm, &mut first, &group, &a, &env).unwrap();
        spec.accumulate(&mut wm, &mut second, &group, &item(2, 2), &env).unwrap();

        // max of the second group never saw 7; count already gave one back
        let reversed = spec.try_reverse(&mut wm, &mut second, &group, &a, &token, &env);
        assert_eq!(reversed, Ok(false));
        assert_eq!(second.get(0).unwrap().downcast_ref::<i64>(), Ok(&0));
    }

    #[test]
    fn test_unwired_slot() {
        let spec = MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .deferred()
            .build()
            .unwrap();
        assert!(!spec.is_fully_wired());
        assert!(!spec.supports_reverse());
        assert_eq!(spec.unwired_slots().collect::<Vec<_>>(), vec![1]);
        assert_eq!(
            spec.create_function_contexts().unwrap_err(),
            Error::Unwired { slot: 1 }
        );
    }

    #[test]
    fn test_accumulate_grouped_unsupported() {
        let spec = count_sum();
        let mut wm = spec.create_working_memory_contexts().unwrap();
        let err = spec
            .accumulate_grouped(&mut wm, &Value::Null, &item(1, 1), &Environment::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedCapability { .. }));
        assert!(spec.is_multi_function());
    }

    #[test]
    fn test_arity_mismatch() {
        let spec = count_sum();
        let single = MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .build()
            .unwrap();
        let mut wm = single.create_working_memory_contexts().unwrap();
        let mut ctx = spec.create_function_contexts().unwrap();
        let err = spec
            .init(&mut wm, &mut ctx, &Tuple::new(), &Environment::new())
            .unwrap_err();
        assert!(matches!(err, Error::ContextMismatch { .. }));
    }

    #[test]
    fn test_structural_equality() {
        let a = count_sum();
        let b = count_sum();
        assert_eq!(a, b);
        assert_eq!(a, a.clone());

        let other = MultiAccumulate::builder()
            .source(source())
            .function(Arc::new(Count))
            .function(Arc::new(Max::new(x())))
            .build()
            .unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_replace_declaration() {
        let mut spec = MultiAccumulate::builder()
            .source(source())
            .require(x())
            .function(Arc::new(Count))
            .function(Arc::new(Sum::new(x())))
            .build()
            .unwrap();
        let y = Binding::field("$y", 1);
        spec.replace_declaration(&x(), &y);
        assert_eq!(spec.required_bindings(), &[y.clone()]);
        assert_eq!(
            spec.slots()[1].function().and_then(|f| f.descriptor()),
            Some(crate::AccumulatorDescriptor::Sum(y))
        );
    }

    #[test]
    fn test_builder_requires_slots_and_source() {
        assert!(MultiAccumulate::builder().source(source()).build().is_none());
        assert!(MultiAccumulate::builder()
            .function(Arc::new(Count))
            .build()
            .is_none());
    }
}
