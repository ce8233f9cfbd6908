//! Per-node group memory driving a `MultiAccumulate`.
//!
//! One `AccumulateMemory` holds the node's working-memory contexts and the
//! state of every group the node has seen, keyed by the fact handles of the
//! group's left tuple. Retraction is incremental when every slot can take a
//! match back; otherwise the group is rebuilt from its remaining matches.

use crate::context::{CompositeToken, FunctionContexts, WorkingMemoryContexts};
use crate::multi::MultiAccumulate;
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use kestrel_core::{Environment, Fact, FactHandle, Result, Tuple, Value};
use tracing::{debug, trace};

/// Identifies a group: the handles of its left tuple, in order.
pub type GroupKey = Vec<FactHandle>;

/// Builds the group key for a left tuple.
pub fn group_key(group: &Tuple) -> GroupKey {
    group.iter().map(|fact| fact.handle()).collect()
}

/// What a retraction did to its group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetractOutcome {
    /// The fact was not part of the group.
    NotFound,
    /// Every slot reversed the match.
    Reversed,
    /// The group was rebuilt from its remaining matches.
    Recomputed,
    /// The last match left and the group was dropped.
    GroupRemoved,
}

#[derive(Debug)]
struct MatchEntry {
    seq: u64,
    fact: Arc<Fact>,
    token: CompositeToken,
}

#[derive(Debug)]
struct GroupState {
    tuple: Tuple,
    contexts: FunctionContexts,
    matches: HashMap<FactHandle, MatchEntry>,
}

/// Working memory of one accumulate node.
#[derive(Debug)]
pub struct AccumulateMemory {
    wm: WorkingMemoryContexts,
    groups: HashMap<GroupKey, GroupState>,
    next_seq: u64,
}

impl AccumulateMemory {
    /// Creates an empty memory for `spec`. Fails if a slot is still unwired.
    pub fn new(spec: &MultiAccumulate) -> Result<Self> {
        Ok(Self {
            wm: spec.create_working_memory_contexts()?,
            groups: HashMap::new(),
            next_seq: 0,
        })
    }

    /// Number of live groups.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of matches currently held by `group`.
    pub fn match_count(&self, group: &Tuple) -> usize {
        self.groups
            .get(&group_key(group))
            .map_or(0, |state| state.matches.len())
    }

    /// Drops every group and rebuilds the working-memory contexts.
    pub fn reset(&mut self, spec: &MultiAccumulate) -> Result<()> {
        self.wm = spec.create_working_memory_contexts()?;
        self.groups.clear();
        self.next_seq = 0;
        debug!("accumulate memory reset");
        Ok(())
    }

    /// Adds a match to its group and returns the group's new result.
    ///
    /// A fact already held by the group is ignored. When a slot fails the
    /// group is rebuilt without the failed match and the error is returned.
    pub fn insert(
        &mut self,
        spec: &MultiAccumulate,
        group: &Tuple,
        fact: Arc<Fact>,
        env: &Environment,
    ) -> Result<Vec<Value>> {
        let key = group_key(group);
        if !self.groups.contains_key(&key) {
            let mut contexts = spec.create_function_contexts()?;
            spec.init(&mut self.wm, &mut contexts, group, env)?;
            trace!(group = ?key, "group created");
            self.groups.insert(
                key.clone(),
                GroupState {
                    tuple: group.clone(),
                    contexts,
                    matches: HashMap::new(),
                },
            );
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let Some(state) = self.groups.get_mut(&key) else {
            return Ok(Vec::new());
        };
        if !state.matches.contains_key(&fact.handle()) {
            let accumulated = spec.accumulate(
                &mut self.wm,
                &mut state.contexts,
                &state.tuple,
                &fact,
                env,
            );
            match accumulated {
                Ok(token) => {
                    state.matches.insert(fact.handle(), MatchEntry { seq, fact, token });
                }
                Err(e) => {
                    debug!(group = ?key, error = %e, "accumulate failed, rebuilding group");
                    self.rebuild_or_drop(spec, &key, env);
                    return Err(e);
                }
            }
        }
        self.result_of(spec, &key, env)
    }

    /// Removes a match from its group.
    pub fn retract(
        &mut self,
        spec: &MultiAccumulate,
        group: &Tuple,
        handle: FactHandle,
        env: &Environment,
    ) -> Result<RetractOutcome> {
        let key = group_key(group);
        let Some(state) = self.groups.get_mut(&key) else {
            return Ok(RetractOutcome::NotFound);
        };
        let Some(entry) = state.matches.remove(&handle) else {
            return Ok(RetractOutcome::NotFound);
        };

        if state.matches.is_empty() {
            self.groups.remove(&key);
            trace!(group = ?key, "group removed");
            return Ok(RetractOutcome::GroupRemoved);
        }

        if spec.supports_reverse() {
            let reversed = spec.try_reverse(
                &mut self.wm,
                &mut state.contexts,
                &state.tuple,
                &entry.fact,
                &entry.token,
                env,
            );
            match reversed {
                Ok(true) => return Ok(RetractOutcome::Reversed),
                Ok(false) => debug!(group = ?key, fact = handle, "reverse refused, recomputing"),
                Err(e) => {
                    debug!(group = ?key, error = %e, "reverse failed, recomputing");
                    self.rebuild_or_drop(spec, &key, env);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.recompute(spec, &key, env) {
            debug!(group = ?key, error = %e, "group rebuild failed, dropping group");
            self.groups.remove(&key);
            return Err(e);
        }
        Ok(RetractOutcome::Recomputed)
    }

    /// The current result of `group`, or None if the group holds no match.
    pub fn result(
        &self,
        spec: &MultiAccumulate,
        group: &Tuple,
        env: &Environment,
    ) -> Result<Option<Vec<Value>>> {
        let key = group_key(group);
        if !self.groups.contains_key(&key) {
            return Ok(None);
        }
        self.result_of(spec, &key, env).map(Some)
    }

    fn result_of(
        &self,
        spec: &MultiAccumulate,
        key: &GroupKey,
        env: &Environment,
    ) -> Result<Vec<Value>> {
        match self.groups.get(key) {
            Some(state) => spec.get_result(&self.wm, &state.contexts, &state.tuple, env),
            None => Ok(Vec::new()),
        }
    }

    /// Rebuilds a group from scratch, replaying its matches in insertion order.
    fn recompute(&mut self, spec: &MultiAccumulate, key: &GroupKey, env: &Environment) -> Result<()> {
        let Some(state) = self.groups.get_mut(key) else {
            return Ok(());
        };
        let mut contexts = spec.create_function_contexts()?;
        spec.init(&mut self.wm, &mut contexts, &state.tuple, env)?;

        let mut entries: Vec<MatchEntry> = state.matches.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.seq);
        let replayed = entries.len();
        for entry in entries {
            let token = spec.accumulate(&mut self.wm, &mut contexts, &state.tuple, &entry.fact, env)?;
            state.matches.insert(
                entry.fact.handle(),
                MatchEntry {
                    token,
                    ..entry
                },
            );
        }
        state.contexts = contexts;
        debug!(group = ?key, replayed, "group recomputed");
        Ok(())
    }

    /// Recovers from a failed call; drops the group if it cannot be rebuilt.
    fn rebuild_or_drop(&mut self, spec: &MultiAccumulate, key: &GroupKey, env: &Environment) {
        if self.groups.get(key).is_some_and(|state| state.matches.is_empty()) {
            self.groups.remove(key);
            trace!(group = ?key, "group removed");
        } else if let Err(e) = self.recompute(spec, key, env) {
            debug!(group = ?key, error = %e, "group rebuild failed, dropping group");
            self.groups.remove(key);
        }
    }
}
