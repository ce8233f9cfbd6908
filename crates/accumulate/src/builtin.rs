//! Built-in incremental aggregate functions.
//!
//! Every built-in is an exact inverse on retraction:
//! - COUNT/SUM/AVERAGE: running totals, O(1) per match
//! - MIN/MAX: ordered multiset (BTreeMap), O(log n) per match
//! - COLLECT_LIST: insertion-ordered values, reversal removes one occurrence
//!
//! Tokens carry the value a match contributed, so reversal subtracts exactly
//! what was added even if the binding would now resolve differently.

use crate::descriptor::AccumulatorDescriptor;
use crate::function::{AggregateFunction, BindingCache, EvalScope, FunctionIdentity};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kestrel_core::{Binding, DataType, Error, Fact, Result, Value};

/// COUNT: number of matches in the group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Count;

impl AggregateFunction for Count {
    type Context = i64;
    type WorkingMemory = ();
    type Token = ();

    fn create_context(&self) -> i64 {
        0
    }

    fn create_working_memory_context(&self) {}

    fn init(&self, _wm: &mut (), ctx: &mut i64, _scope: &EvalScope<'_>) -> Result<()> {
        *ctx = 0;
        Ok(())
    }

    fn accumulate(
        &self,
        _wm: &mut (),
        ctx: &mut i64,
        _fact: &Fact,
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<()> {
        *ctx += 1;
        Ok(())
    }

    fn try_reverse(
        &self,
        _wm: &mut (),
        ctx: &mut i64,
        _fact: &Fact,
        _prior: &(),
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<bool> {
        if *ctx == 0 {
            return Ok(false);
        }
        *ctx -= 1;
        Ok(true)
    }

    fn get_result(&self, _wm: &(), ctx: &i64, _scope: &EvalScope<'_>) -> Result<Value> {
        Ok(Value::Int64(*ctx))
    }

    fn identity(&self) -> FunctionIdentity {
        FunctionIdentity::Descriptor(AccumulatorDescriptor::Count)
    }

    fn descriptor(&self) -> Option<AccumulatorDescriptor> {
        Some(AccumulatorDescriptor::Count)
    }
}

/// Running numeric total that stays exact while every input is an integer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumericTotal {
    int_sum: i64,
    float_sum: f64,
    float_inputs: usize,
}

impl NumericTotal {
    /// Adds (`sign = 1`) or removes (`sign = -1`) one contribution.
    fn apply(&mut self, value: &Value, sign: i64) -> Result<()> {
        match value {
            Value::Null => Ok(()),
            Value::Int64(v) => {
                self.int_sum = v
                    .checked_mul(sign)
                    .and_then(|d| self.int_sum.checked_add(d))
                    .ok_or_else(|| Error::evaluation("integer overflow in running sum"))?;
                Ok(())
            }
            Value::Float64(v) => {
                self.float_sum += *v * sign as f64;
                if sign > 0 {
                    self.float_inputs += 1;
                } else {
                    self.float_inputs = self.float_inputs.saturating_sub(1);
                }
                Ok(())
            }
            other => Err(Error::type_mismatch(
                DataType::Float64,
                other.data_type().unwrap_or(DataType::Float64),
            )),
        }
    }

    fn value(&self) -> Value {
        if self.float_inputs == 0 {
            Value::Int64(self.int_sum)
        } else {
            Value::Float64(self.int_sum as f64 + self.float_sum)
        }
    }

    fn as_f64(&self) -> f64 {
        self.int_sum as f64 + self.float_sum
    }
}

/// SUM over a numeric field. Null fields contribute nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sum {
    field: Binding,
}

impl Sum {
    pub fn new(field: Binding) -> Self {
        Self { field }
    }
}

impl AggregateFunction for Sum {
    type Context = NumericTotal;
    type WorkingMemory = ();
    type Token = Value;

    fn create_context(&self) -> NumericTotal {
        NumericTotal::default()
    }

    fn create_working_memory_context(&self) {}

    fn init(&self, _wm: &mut (), ctx: &mut NumericTotal, _scope: &EvalScope<'_>) -> Result<()> {
        *ctx = NumericTotal::default();
        Ok(())
    }

    fn accumulate(
        &self,
        _wm: &mut (),
        ctx: &mut NumericTotal,
        fact: &Fact,
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<Value> {
        let value = self.field.resolve_fact(fact);
        ctx.apply(&value, 1)?;
        Ok(value)
    }

    fn try_reverse(
        &self,
        _wm: &mut (),
        ctx: &mut NumericTotal,
        _fact: &Fact,
        prior: &Value,
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<bool> {
        ctx.apply(prior, -1)?;
        Ok(true)
    }

    fn get_result(&self, _wm: &(), ctx: &NumericTotal, _scope: &EvalScope<'_>) -> Result<Value> {
        Ok(ctx.value())
    }

    fn identity(&self) -> FunctionIdentity {
        FunctionIdentity::Descriptor(AccumulatorDescriptor::Sum(self.field.clone()))
    }

    fn descriptor(&self) -> Option<AccumulatorDescriptor> {
        Some(AccumulatorDescriptor::Sum(self.field.clone()))
    }

    fn rebind(&self, from: &Binding, to: &Binding) -> Option<Self> {
        (self.field == *from).then(|| Sum::new(to.clone()))
    }
}

/// State for [`Average`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AverageState {
    total: NumericTotal,
    count: i64,
}

/// AVERAGE over a numeric field; Null when no non-null value was seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Average {
    field: Binding,
}

impl Average {
    pub fn new(field: Binding) -> Self {
        Self { field }
    }
}

impl AggregateFunction for Average {
    type Context = AverageState;
    type WorkingMemory = ();
    type Token = Value;

    fn create_context(&self) -> AverageState {
        AverageState::default()
    }

    fn create_working_memory_context(&self) {}

    fn init(&self, _wm: &mut (), ctx: &mut AverageState, _scope: &EvalScope<'_>) -> Result<()> {
        *ctx = AverageState::default();
        Ok(())
    }

    fn accumulate(
        &self,
        _wm: &mut (),
        ctx: &mut AverageState,
        fact: &Fact,
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<Value> {
        let value = self.field.resolve_fact(fact);
        ctx.total.apply(&value, 1)?;
        if !value.is_null() {
            ctx.count += 1;
        }
        Ok(value)
    }

    fn try_reverse(
        &self,
        _wm: &mut (),
        ctx: &mut AverageState,
        _fact: &Fact,
        prior: &Value,
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<bool> {
        if prior.is_null() {
            return Ok(true);
        }
        if ctx.count == 0 {
            return Ok(false);
        }
        ctx.total.apply(prior, -1)?;
        ctx.count -= 1;
        Ok(true)
    }

    fn get_result(&self, _wm: &(), ctx: &AverageState, _scope: &EvalScope<'_>) -> Result<Value> {
        if ctx.count == 0 {
            Ok(Value::Null)
        } else {
            Ok(Value::Float64(ctx.total.as_f64() / ctx.count as f64))
        }
    }

    fn identity(&self) -> FunctionIdentity {
        FunctionIdentity::Descriptor(AccumulatorDescriptor::Average(self.field.clone()))
    }

    fn descriptor(&self) -> Option<AccumulatorDescriptor> {
        Some(AccumulatorDescriptor::Average(self.field.clone()))
    }

    fn rebind(&self, from: &Binding, to: &Binding) -> Option<Self> {
        (self.field == *from).then(|| Average::new(to.clone()))
    }
}

/// Ordered multiset of values: value -> multiplicity.
pub type ValueMultiset = BTreeMap<Value, usize>;

fn multiset_insert(values: &mut ValueMultiset, value: &Value) {
    if !value.is_null() {
        *values.entry(value.clone()).or_insert(0) += 1;
    }
}

/// Removes one occurrence; false if the value was never counted.
fn multiset_remove(values: &mut ValueMultiset, value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    match values.get_mut(value) {
        Some(n) if *n > 1 => {
            *n -= 1;
            true
        }
        Some(_) => {
            values.remove(value);
            true
        }
        None => false,
    }
}

macro_rules! extremum_function {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $pick:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            field: Binding,
        }

        impl $name {
            pub fn new(field: Binding) -> Self {
                Self { field }
            }
        }

        impl AggregateFunction for $name {
            type Context = ValueMultiset;
            type WorkingMemory = ();
            type Token = Value;

            fn create_context(&self) -> ValueMultiset {
                ValueMultiset::new()
            }

            fn create_working_memory_context(&self) {}

            fn init(
                &self,
                _wm: &mut (),
                ctx: &mut ValueMultiset,
                _scope: &EvalScope<'_>,
            ) -> Result<()> {
                ctx.clear();
                Ok(())
            }

            fn accumulate(
                &self,
                _wm: &mut (),
                ctx: &mut ValueMultiset,
                fact: &Fact,
                _cache: &BindingCache,
                _scope: &EvalScope<'_>,
            ) -> Result<Value> {
                let value = self.field.resolve_fact(fact);
                multiset_insert(ctx, &value);
                Ok(value)
            }

            fn try_reverse(
                &self,
                _wm: &mut (),
                ctx: &mut ValueMultiset,
                _fact: &Fact,
                prior: &Value,
                _cache: &BindingCache,
                _scope: &EvalScope<'_>,
            ) -> Result<bool> {
                Ok(multiset_remove(ctx, prior))
            }

            fn get_result(
                &self,
                _wm: &(),
                ctx: &ValueMultiset,
                _scope: &EvalScope<'_>,
            ) -> Result<Value> {
                Ok(ctx.keys().$pick().cloned().unwrap_or(Value::Null))
            }

            fn identity(&self) -> FunctionIdentity {
                FunctionIdentity::Descriptor(AccumulatorDescriptor::$variant(self.field.clone()))
            }

            fn descriptor(&self) -> Option<AccumulatorDescriptor> {
                Some(AccumulatorDescriptor::$variant(self.field.clone()))
            }

            fn rebind(&self, from: &Binding, to: &Binding) -> Option<Self> {
                (self.field == *from).then(|| $name::new(to.clone()))
            }
        }
    };
}

extremum_function!(
    /// MIN over a field; Null for an empty group.
    Min,
    Min,
    next
);

extremum_function!(
    /// MAX over a field; Null for an empty group.
    Max,
    Max,
    next_back
);

/// COLLECT_LIST: the field values of every match, in insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectList {
    field: Binding,
}

impl CollectList {
    pub fn new(field: Binding) -> Self {
        Self { field }
    }
}

impl AggregateFunction for CollectList {
    type Context = Vec<Value>;
    type WorkingMemory = ();
    type Token = Value;

    fn create_context(&self) -> Vec<Value> {
        Vec::new()
    }

    fn create_working_memory_context(&self) {}

    fn init(&self, _wm: &mut (), ctx: &mut Vec<Value>, _scope: &EvalScope<'_>) -> Result<()> {
        ctx.clear();
        Ok(())
    }

    fn accumulate(
        &self,
        _wm: &mut (),
        ctx: &mut Vec<Value>,
        fact: &Fact,
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<Value> {
        let value = self.field.resolve_fact(fact);
        ctx.push(value.clone());
        Ok(value)
    }

    fn try_reverse(
        &self,
        _wm: &mut (),
        ctx: &mut Vec<Value>,
        _fact: &Fact,
        prior: &Value,
        _cache: &BindingCache,
        _scope: &EvalScope<'_>,
    ) -> Result<bool> {
        match ctx.iter().position(|v| v == prior) {
            Some(pos) => {
                ctx.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_result(&self, _wm: &(), ctx: &Vec<Value>, _scope: &EvalScope<'_>) -> Result<Value> {
        Ok(Value::List(ctx.clone()))
    }

    fn identity(&self) -> FunctionIdentity {
        FunctionIdentity::Descriptor(AccumulatorDescriptor::CollectList(self.field.clone()))
    }

    fn descriptor(&self) -> Option<AccumulatorDescriptor> {
        Some(AccumulatorDescriptor::CollectList(self.field.clone()))
    }

    fn rebind(&self, from: &Binding, to: &Binding) -> Option<Self> {
        (self.field == *from).then(|| CollectList::new(to.clone()))
    }
}
