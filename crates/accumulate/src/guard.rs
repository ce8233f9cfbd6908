//! Protective proxy installed when wiring under a sandboxed policy.

use crate::context::{SlotContext, SlotToken};
use crate::descriptor::AccumulatorDescriptor;
use crate::function::{Accumulator, BindingCache, EvalScope, FunctionIdentity, SharedAccumulator};
use alloc::format;
use alloc::sync::Arc;
use kestrel_core::{Binding, Error, Fact, Result, Value};

/// Delegates to the wrapped function while enforcing the capability contract.
///
/// Reversal of a function that declares no reverse support is refused rather
/// than forwarded, and failures raised inside the wrapped function are tagged
/// as coming from sandboxed code.
#[derive(Debug)]
pub struct GuardedAccumulator {
    inner: SharedAccumulator,
}

impl GuardedAccumulator {
    /// Wraps `inner`, leaving already guarded functions as they are.
    pub fn wrap(inner: SharedAccumulator) -> SharedAccumulator {
        if inner.is_guarded() {
            inner
        } else {
            Arc::new(GuardedAccumulator { inner })
        }
    }

    pub fn inner(&self) -> &SharedAccumulator {
        &self.inner
    }
}

fn tag(err: Error) -> Error {
    match err {
        Error::Evaluation { slot, message } => Error::Evaluation {
            slot,
            message: format!("sandboxed: {message}"),
        },
        other => other,
    }
}

impl Accumulator for GuardedAccumulator {
    fn create_context(&self) -> SlotContext {
        self.inner.create_context()
    }

    fn create_working_memory_context(&self) -> SlotContext {
        self.inner.create_working_memory_context()
    }

    fn init(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        scope: &EvalScope<'_>,
    ) -> Result<()> {
        self.inner.init(wm, ctx, scope).map_err(tag)
    }

    fn accumulate(
        &self,
        wm: &mut SlotContext,
        ctx: &mut SlotContext,
        fact: &Fact,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<SlotToken> {
        self.inner.accumulate(wm, ctx, fact, cache, scope).map_err(tag)
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
        if !self.inner.supports_reverse() {
            return Err(Error::unsupported("try_reverse on a function without reverse support"));
        }
        self.inner
            .try_reverse(wm, ctx, fact, prior, cache, scope)
            .map_err(tag)
    }

    fn get_result(
        &self,
        wm: &SlotContext,
        ctx: &SlotContext,
        scope: &EvalScope<'_>,
    ) -> Result<Value> {
        self.inner.get_result(wm, ctx, scope).map_err(tag)
    }

    fn supports_reverse(&self) -> bool {
        self.inner.supports_reverse()
    }

    fn identity(&self) -> FunctionIdentity {
        self.inner.identity()
    }

    fn descriptor(&self) -> Option<AccumulatorDescriptor> {
        self.inner.descriptor()
    }

    fn rebind(&self, from: &Binding, to: &Binding) -> Option<SharedAccumulator> {
        self.inner.rebind(from, to).map(GuardedAccumulator::wrap)
    }

    fn is_guarded(&self) -> bool {
        true
    }
}
