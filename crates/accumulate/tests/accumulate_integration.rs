//! Integration tests for multi-function accumulate nodes.
//!
//! Scenarios cover the full lifecycle of a spec: construction, deferred
//! wiring across clones, persistence and evaluation through group memory.

use kestrel_accumulate::{
    persist, restore, Accumulator, AccumulateMemory, AccumulatorDescriptor, Average, CollectList,
    CompiledAccumulator, Count, FunctionN, GuardedAccumulator, Max, Min, MultiAccumulate,
    RetractOutcome, SpecArena, Sum, WirePolicy,
};
use kestrel_core::{Binding, Environment, Error, Fact, GroupKind, SourcePattern, Tuple, Value};
use std::sync::Arc;

fn amount() -> Binding {
    Binding::field("$amount", 1)
}

fn order_source() -> SourcePattern {
    SourcePattern::group(
        GroupKind::And,
        vec![SourcePattern::pattern(
            "Order",
            vec![Binding::field("$id", 0), amount()],
        )],
    )
}

fn order(handle: u64, amount: i64) -> Arc<Fact> {
    Arc::new(Fact::new(
        handle,
        vec![Value::Int64(handle as i64), Value::Int64(amount)],
    ))
}

fn customer(handle: u64) -> Tuple {
    Tuple::new().extend(Arc::new(Fact::new(handle, vec![Value::from("customer")])))
}

/// Weighted total of the order amounts: acc + amount * weight.
fn weighted_total() -> CompiledAccumulator {
    CompiledAccumulator::new(
        FunctionN::fingerprinted("0", |_| Ok(Value::Int64(0))),
        FunctionN::fingerprinted("acc + amount * weight", |args| {
            let acc = args[0].as_i64().unwrap_or(0);
            let amount = args[1].as_i64().unwrap_or(0);
            let weight = args[2].as_i64().unwrap_or(1);
            Ok(Value::Int64(acc + amount * weight))
        }),
        FunctionN::fingerprinted("acc", |args| Ok(args[0].clone())),
    )
    .with_params(["$amount"])
    .with_globals(["weight"])
}

#[test]
fn test_count_sum_scenario() {
    let spec = MultiAccumulate::builder()
        .source(order_source())
        .function(Arc::new(Count))
        .function(Arc::new(Sum::new(amount())))
        .build()
        .unwrap();
    let env = Environment::new();
    let group = customer(1);
    let mut memory = AccumulateMemory::new(&spec).unwrap();

    memory.insert(&spec, &group, order(10, 3), &env).unwrap();
    let result = memory.insert(&spec, &group, order(11, 5), &env).unwrap();
    assert_eq!(result, vec![Value::Int64(2), Value::Int64(8)]);

    assert_eq!(
        memory.retract(&spec, &group, 10, &env).unwrap(),
        RetractOutcome::Reversed
    );
    assert_eq!(
        memory.result(&spec, &group, &env).unwrap(),
        Some(vec![Value::Int64(1), Value::Int64(5)])
    );
}

#[test]
fn test_composite_matches_independent_functions() {
    let functions: Vec<Arc<dyn Accumulator>> = vec![
        Arc::new(Count),
        Arc::new(Sum::new(amount())),
        Arc::new(Average::new(amount())),
        Arc::new(Min::new(amount())),
        Arc::new(Max::new(amount())),
        Arc::new(CollectList::new(amount())),
    ];
    let mut builder = MultiAccumulate::builder().source(order_source());
    for f in &functions {
        builder = builder.function(Arc::clone(f));
    }
    let composite = builder.build().unwrap();

    let env = Environment::new();
    let group = customer(1);
    let facts: Vec<_> = [4, -2, 9, 4].iter().enumerate().map(|(i, &a)| order(i as u64, a)).collect();

    let mut memory = AccumulateMemory::new(&composite).unwrap();
    let combined = facts
        .iter()
        .map(|fact| memory.insert(&composite, &group, Arc::clone(fact), &env).unwrap())
        .last()
        .unwrap();

    for (slot, f) in functions.iter().enumerate() {
        let single = MultiAccumulate::builder()
            .source(order_source())
            .function(Arc::clone(f))
            .build()
            .unwrap();
        let mut own = AccumulateMemory::new(&single).unwrap();
        let result = facts
            .iter()
            .map(|fact| own.insert(&single, &group, Arc::clone(fact), &env).unwrap())
            .last()
            .unwrap();
        assert_eq!(result, vec![combined[slot].clone()], "slot {slot}");
    }
}

#[test]
fn test_wire_propagates_to_clones() {
    let deferred = MultiAccumulate::builder()
        .source(order_source())
        .function(Arc::new(Count))
        .deferred()
        .build()
        .unwrap();
    let mut arena = SpecArena::new();
    let owner = arena.insert(deferred);
    let early = arena.clone_spec(owner).unwrap();
    let mut slot = arena.wire_slot(owner, 1).unwrap();

    slot.wire(&mut arena, Arc::new(weighted_total()), WirePolicy::OPEN);
    let late = arena.clone_spec(owner).unwrap();
    for id in [owner, early, late] {
        assert!(arena.get(id).unwrap().is_fully_wired());
    }

    // a second wire reaches the clone registered between the two calls
    slot.wire(&mut arena, Arc::new(Sum::new(amount())), WirePolicy::OPEN);
    let wired = arena.get(late).unwrap().slots()[1].function().unwrap();
    assert_eq!(wired.descriptor(), Some(AccumulatorDescriptor::Sum(amount())));
    assert_eq!(arena.get(owner), arena.get(late));
}

#[test]
fn test_sandboxed_wire_installs_guard_everywhere() {
    let deferred = MultiAccumulate::builder()
        .source(order_source())
        .deferred()
        .build()
        .unwrap();
    let mut arena = SpecArena::new();
    let owner = arena.insert(deferred);
    let clone = arena.clone_spec(owner).unwrap();
    let mut slot = arena.wire_slot(owner, 0).unwrap();
    slot.wire(&mut arena, Arc::new(weighted_total()), WirePolicy::SANDBOXED);

    let spec = arena.get(clone).unwrap();
    let f = spec.slots()[0].function().unwrap();
    assert!(f.is_guarded());
    assert!(!spec.supports_reverse());
}

#[test]
fn test_persist_restore_rewire() {
    let spec = MultiAccumulate::builder()
        .source(order_source())
        .function(Arc::new(Count))
        .function(Arc::new(weighted_total()))
        .build()
        .unwrap();
    let restored = restore(&persist(&spec).unwrap()).unwrap();
    assert_eq!(restored.unwired_slots().collect::<Vec<_>>(), vec![1]);
    assert_eq!(
        AccumulateMemory::new(&restored).unwrap_err(),
        Error::Unwired { slot: 1 }
    );

    let mut arena = SpecArena::new();
    let id = arena.insert(restored);
    let mut slot = arena.wire_slot(id, 1).unwrap();
    slot.wire(&mut arena, Arc::new(weighted_total()), WirePolicy::OPEN);
    let rewired = arena.get(id).unwrap();
    assert_eq!(rewired, &spec);

    let mut env = Environment::new();
    env.set_global("weight", Value::Int64(3));
    let group = customer(7);
    let mut memory = AccumulateMemory::new(rewired).unwrap();
    memory.insert(rewired, &group, order(1, 2), &env).unwrap();
    let result = memory.insert(rewired, &group, order(2, 5), &env).unwrap();
    assert_eq!(result, vec![Value::Int64(2), Value::Int64(21)]);
}

#[test]
fn test_equality_ignores_lineage() {
    let build = || {
        MultiAccumulate::builder()
            .source(order_source())
            .require(Binding::new("$customer", 0, 0))
            .function(Arc::new(Count))
            .function(Arc::new(weighted_total()))
            .build()
            .unwrap()
    };
    let mut arena = SpecArena::new();
    let a = arena.insert(build());
    let b = arena.insert(build());
    let a_clone = arena.clone_spec(a).unwrap();
    assert_eq!(arena.get(a), arena.get(b));
    assert_eq!(arena.get(b), arena.get(a_clone));

    let other = MultiAccumulate::builder()
        .source(order_source())
        .function(Arc::new(Count))
        .function(Arc::new(weighted_total()))
        .build()
        .unwrap();
    assert_ne!(arena.get(a), Some(&other));
}

#[test]
fn test_non_reversible_function_forces_recompute() {
    let spec = MultiAccumulate::builder()
        .source(order_source())
        .function(Arc::new(Sum::new(amount())))
        .function(Arc::new(weighted_total()))
        .build()
        .unwrap();
    assert!(!spec.supports_reverse());

    let mut env = Environment::new();
    env.set_global("weight", Value::Int64(2));
    let group = customer(1);
    let mut memory = AccumulateMemory::new(&spec).unwrap();
    for (handle, amount) in [(1, 10), (2, 20), (3, 30)] {
        memory.insert(&spec, &group, order(handle, amount), &env).unwrap();
    }
    assert_eq!(
        memory.retract(&spec, &group, 2, &env).unwrap(),
        RetractOutcome::Recomputed
    );
    assert_eq!(
        memory.result(&spec, &group, &env).unwrap(),
        Some(vec![Value::Int64(40), Value::Int64(80)])
    );
}

#[test]
fn test_guarded_slot_evaluates_like_plain() {
    let plain = MultiAccumulate::builder()
        .source(order_source())
        .function(Arc::new(Average::new(amount())))
        .build()
        .unwrap();
    let guarded = MultiAccumulate::builder()
        .source(order_source())
        .function(GuardedAccumulator::wrap(Arc::new(Average::new(amount()))))
        .build()
        .unwrap();
    assert_eq!(plain, guarded);

    let env = Environment::new();
    let group = customer(1);
    let mut a = AccumulateMemory::new(&plain).unwrap();
    let mut b = AccumulateMemory::new(&guarded).unwrap();
    for (handle, amount) in [(1, 1), (2, 2), (3, 6)] {
        let left = a.insert(&plain, &group, order(handle, amount), &env).unwrap();
        let right = b.insert(&guarded, &group, order(handle, amount), &env).unwrap();
        assert_eq!(left, right);
    }
    assert_eq!(
        b.retract(&guarded, &group, 3, &env).unwrap(),
        RetractOutcome::Reversed
    );
}

#[test]
fn test_sum_of_text_is_evaluation_failure() {
    let spec = MultiAccumulate::builder()
        .source(order_source())
        .function(Arc::new(Count))
        .function(Arc::new(Sum::new(Binding::field("$label", 0))))
        .build()
        .unwrap();
    let env = Environment::new();
    let group = customer(1);
    let mut memory = AccumulateMemory::new(&spec).unwrap();
    let text = Arc::new(Fact::new(1, vec![Value::from("not a number")]));

    let err = memory.insert(&spec, &group, text, &env).unwrap_err();
    assert!(matches!(err, Error::Evaluation { slot: Some(1), .. }));
    assert_eq!(memory.match_count(&group), 0);
    assert!(memory.is_empty());
}
