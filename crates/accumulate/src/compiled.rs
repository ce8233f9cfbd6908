//! User-defined aggregates assembled from generated `FunctionN` pieces.
//!
//! The state is a single `Value` threaded through the pieces:
//! - `init(required binding values...) -> state`
//! - `action(state, inputs..., globals...) -> state`
//! - `reverse(state, inputs..., globals...) -> state` (optional)
//! - `result(state) -> value`
//!
//! Inputs are the values of the named inner bindings read from the matched
//! fact; the token records them so reversal replays exactly what was applied.
//! Compiled functions are not relocatable and come back unwired after restore.

use crate::function::{AggregateFunction, BindingCache, EvalScope, FunctionIdentity};
use crate::function_n::{Fingerprint, FunctionN};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use kestrel_core::{Error, Fact, Result, Value};

#[derive(Clone, Debug)]
pub struct CompiledAccumulator {
    params: Vec<String>,
    globals: Vec<String>,
    init: FunctionN,
    action: FunctionN,
    reverse: Option<FunctionN>,
    result: FunctionN,
}

impl CompiledAccumulator {
    pub fn new(init: FunctionN, action: FunctionN, result: FunctionN) -> Self {
        Self {
            params: Vec::new(),
            globals: Vec::new(),
            init,
            action,
            reverse: None,
            result,
        }
    }

    /// Names of the inner bindings fed to `action`/`reverse`, in order.
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Names of environment globals appended to `action`/`reverse` arguments.
    pub fn with_globals<I, S>(mut self, globals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.globals = globals.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reverse(mut self, reverse: FunctionN) -> Self {
        self.reverse = Some(reverse);
        self
    }

    fn inputs(&self, fact: &Fact, cache: &BindingCache) -> Result<Vec<Value>> {
        self.params
            .iter()
            .map(|name| {
                cache
                    .get(name)
                    .map(|binding| binding.resolve_fact(fact))
                    .ok_or_else(|| Error::evaluation(format!("unknown inner binding {name}")))
            })
            .collect()
    }

    fn step(
        &self,
        piece: &FunctionN,
        state: &Value,
        inputs: &[Value],
        scope: &EvalScope<'_>,
    ) -> Result<Value> {
        let mut args = Vec::with_capacity(1 + inputs.len() + self.globals.len());
        args.push(state.clone());
        args.extend_from_slice(inputs);
        args.extend(self.globals.iter().map(|g| scope.env.global(g)));
        piece.apply(&args)
    }

    /// Combined fingerprint, when every piece was generated from source.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        let init = self.init.fingerprint()?;
        let action = self.action.fingerprint()?;
        let result = self.result.fingerprint()?;
        let reverse = match &self.reverse {
            Some(r) => Some(r.fingerprint()?),
            None => None,
        };

        let mut parts: Vec<&[u8]> = Vec::new();
        parts.push(init.as_bytes());
        parts.push(action.as_bytes());
        parts.push(reverse.as_ref().map_or(&[][..], |r| &r.as_bytes()[..]));
        parts.push(result.as_bytes());
        parts.extend(self.params.iter().map(|p| p.as_bytes()));
        parts.push(b"|");
        parts.extend(self.globals.iter().map(|g| g.as_bytes()));
        Some(Fingerprint::of_parts("compiled-accumulator", &parts))
    }
}

impl AggregateFunction for CompiledAccumulator {
    type Context = Value;
    type WorkingMemory = ();
    type Token = Vec<Value>;

    fn create_context(&self) -> Value {
        Value::Null
    }

    fn create_working_memory_context(&self) {}

    fn init(&self, _wm: &mut (), ctx: &mut Value, scope: &EvalScope<'_>) -> Result<()> {
        let args: Vec<Value> = scope.bindings.iter().map(|b| b.resolve(scope.group)).collect();
        *ctx = self.init.apply(&args)?;
        Ok(())
    }

    fn accumulate(
        &self,
        _wm: &mut (),
        ctx: &mut Value,
        fact: &Fact,
        cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<Vec<Value>> {
        let inputs = self.inputs(fact, cache)?;
        *ctx = self.step(&self.action, ctx, &inputs, scope)?;
        Ok(inputs)
    }

    fn try_reverse(
        &self,
        _wm: &mut (),
        ctx: &mut Value,
        _fact: &Fact,
        prior: &Vec<Value>,
        _cache: &BindingCache,
        scope: &EvalScope<'_>,
    ) -> Result<bool> {
        let Some(reverse) = &self.reverse else {
            return Ok(false);
        };
        *ctx = self.step(reverse, ctx, prior, scope)?;
        Ok(true)
    }

    fn get_result(&self, _wm: &(), ctx: &Value, _scope: &EvalScope<'_>) -> Result<Value> {
        self.result.apply(core::slice::from_ref(ctx))
    }

    fn supports_reverse(&self) -> bool {
        self.reverse.is_some()
    }

    fn identity(&self) -> FunctionIdentity {
        match self.fingerprint() {
            Some(fp) => FunctionIdentity::Fingerprint(fp),
            None => FunctionIdentity::Instance(self as *const Self as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec;
    use kestrel_core::{Binding, Environment, GroupKind, SourcePattern, Tuple};

    fn int_arg(args: &[Value], i: usize) -> i64 {
        args.get(i).and_then(Value::as_i64).unwrap_or(0)
    }

    /// sum of $qty * $price, optionally scaled by the `rate` global.
    fn revenue() -> CompiledAccumulator {
        CompiledAccumulator::new(
            FunctionN::fingerprinted("0", |_| Ok(Value::Int64(0))),
            FunctionN::fingerprinted("acc + qty * price * rate", |args| {
                Ok(Value::Int64(
                    int_arg(args, 0) + int_arg(args, 1) * int_arg(args, 2) * int_arg(args, 3),
                ))
            }),
            FunctionN::fingerprinted("acc", |args| Ok(args[0].clone())),
        )
        .with_params(["$qty", "$price"])
        .with_globals(["rate"])
        .with_reverse(FunctionN::fingerprinted(
            "acc - qty * price * rate",
            |args| {
                Ok(Value::Int64(
                    int_arg(args, 0) - int_arg(args, 1) * int_arg(args, 2) * int_arg(args, 3),
                ))
            },
        ))
    }

    fn cache() -> BindingCache {
        BindingCache::from_pattern(&SourcePattern::group(
            GroupKind::And,
            vec![SourcePattern::pattern(
                "Line",
                vec![Binding::field("$qty", 0), Binding::field("$price", 1)],
            )],
        ))
    }

    #[test]
    fn test_accumulate_and_reverse() {
        let f = revenue();
        let cache = cache();
        let tuple = Tuple::new();
        let mut env = Environment::new();
        env.set_global("rate", Value::Int64(2));
        let scope = EvalScope::new(&tuple, &[], &env);

        let mut ctx = f.create_context();
        f.init(&mut (), &mut ctx, &scope).unwrap();
        let a = Fact::new(1, vec![Value::Int64(3), Value::Int64(10)]);
        let b = Fact::new(2, vec![Value::Int64(1), Value::Int64(5)]);
        let token_a = f.accumulate(&mut (), &mut ctx, &a, &cache, &scope).unwrap();
        f.accumulate(&mut (), &mut ctx, &b, &cache, &scope).unwrap();
        assert_eq!(f.get_result(&(), &ctx, &scope), Ok(Value::Int64(70)));

        assert_eq!(f.try_reverse(&mut (), &mut ctx, &a, &token_a, &cache, &scope), Ok(true));
        assert_eq!(f.get_result(&(), &ctx, &scope), Ok(Value::Int64(10)));
    }

    #[test]
    fn test_init_reads_required_bindings() {
        let f = CompiledAccumulator::new(
            FunctionN::fingerprinted("base", |args| Ok(args[0].clone())),
            FunctionN::fingerprinted("acc", |args| Ok(args[0].clone())),
            FunctionN::fingerprinted("acc", |args| Ok(args[0].clone())),
        );
        let owner = Arc::new(Fact::new(1, vec![Value::Int64(100)]));
        let tuple = Tuple::new().extend(owner);
        let bindings = [Binding::new("$base", 0, 0)];
        let env = Environment::new();
        let scope = EvalScope::new(&tuple, &bindings, &env);

        let mut ctx = f.create_context();
        f.init(&mut (), &mut ctx, &scope).unwrap();
        assert_eq!(ctx, Value::Int64(100));
        assert!(!f.supports_reverse());
    }

    #[test]
    fn test_unknown_param_is_evaluation_failure() {
        let f = revenue().with_params(["$missing"]);
        let tuple = Tuple::new();
        let env = Environment::new();
        let scope = EvalScope::new(&tuple, &[], &env);
        let mut ctx = Value::Int64(0);
        let err = f
            .accumulate(&mut (), &mut ctx, &Fact::new(1, vec![]), &cache(), &scope)
            .unwrap_err();
        assert!(matches!(err, Error::Evaluation { .. }));
    }

    #[test]
    fn test_identity_by_fingerprint() {
        assert_eq!(revenue().identity(), revenue().identity());
        assert!(revenue().descriptor().is_none());

        let direct = CompiledAccumulator::new(
            FunctionN::direct(|_| Ok(Value::Null)),
            FunctionN::direct(|_| Ok(Value::Null)),
            FunctionN::direct(|_| Ok(Value::Null)),
        );
        assert!(direct.fingerprint().is_none());
        assert!(matches!(direct.identity(), FunctionIdentity::Instance(_)));
    }
}
