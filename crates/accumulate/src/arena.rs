//! Spec ownership, clone registry and slot wiring.
//!
//! Specs live in a `SpecArena` and are addressed by `SpecId`. Cloning a spec
//! registers the copy with the spec it was cloned from, so a later wire on a
//! slot of that spec reaches every copy made so far, including copies
//! created after the `WireSlot` itself. A wire through a clone's handle
//! leaves the spec it was cloned from untouched.

use crate::function::SharedAccumulator;
use crate::guard::GuardedAccumulator;
use crate::multi::MultiAccumulate;
use alloc::vec::Vec;
use hashbrown::HashMap;
use tracing::debug;

/// Handle to a spec stored in a [`SpecArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecId(u32);

impl SpecId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a function is installed into its slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WirePolicy {
    /// Wrap every wired function in a [`GuardedAccumulator`].
    pub sandboxed: bool,
}

impl WirePolicy {
    pub const OPEN: WirePolicy = WirePolicy { sandboxed: false };
    pub const SANDBOXED: WirePolicy = WirePolicy { sandboxed: true };

    fn prepare(self, function: SharedAccumulator) -> SharedAccumulator {
        if self.sandboxed {
            GuardedAccumulator::wrap(function)
        } else {
            function
        }
    }
}

/// Owns specs and tracks which specs are clones of which.
#[derive(Debug, Default)]
pub struct SpecArena {
    specs: Vec<MultiAccumulate>,
    /// Clones keyed by the spec they were copied from.
    clones: HashMap<SpecId, Vec<SpecId>>,
}

impl SpecArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an original spec.
    pub fn insert(&mut self, spec: MultiAccumulate) -> SpecId {
        let id = SpecId(self.specs.len() as u32);
        self.specs.push(spec);
        id
    }

    pub fn get(&self, id: SpecId) -> Option<&MultiAccumulate> {
        self.specs.get(id.index())
    }

    pub fn get_mut(&mut self, id: SpecId) -> Option<&mut MultiAccumulate> {
        self.specs.get_mut(id.index())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Copies a spec and registers the copy as a clone of `id`.
    ///
    /// The copy shares the wired functions and the group children of the
    /// source pattern. Returns None for an unknown id.
    pub fn clone_spec(&mut self, id: SpecId) -> Option<SpecId> {
        let copy = self.get(id)?.clone();
        let clone_id = SpecId(self.specs.len() as u32);
        self.specs.push(copy);
        self.clones.entry(id).or_default().push(clone_id);
        debug!(source = id.0, clone = clone_id.0, "registered spec clone");
        Some(clone_id)
    }

    /// Specs registered as clones of `id`, in registration order.
    pub fn clones_of(&self, id: SpecId) -> &[SpecId] {
        self.clones.get(&id).map_or(&[], Vec::as_slice)
    }

    /// A handle that wires slot `index` of `id` and its registered clones.
    pub fn wire_slot(&self, id: SpecId, index: usize) -> Option<WireSlot> {
        let spec = self.get(id)?;
        (index < spec.len()).then_some(WireSlot {
            spec: id,
            index,
            initialized: false,
        })
    }
}

/// Install point for the function of one composition slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireSlot {
    spec: SpecId,
    index: usize,
    initialized: bool,
}

impl WireSlot {
    #[inline]
    pub fn spec(&self) -> SpecId {
        self.spec
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// True once a function has been wired through this handle.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Installs `function` into the owning spec and every spec registered
    /// as its clone.
    ///
    /// Wiring again replaces the function everywhere. Returns the number of
    /// specs updated.
    pub fn wire(
        &mut self,
        arena: &mut SpecArena,
        function: SharedAccumulator,
        policy: WirePolicy,
    ) -> usize {
        let function = policy.prepare(function);
        let mut targets = Vec::with_capacity(arena.clones_of(self.spec).len() + 1);
        targets.push(self.spec);
        targets.extend_from_slice(arena.clones_of(self.spec));

        let mut updated = 0;
        for id in targets {
            if let Some(spec) = arena.get_mut(id) {
                spec.set_slot(self.index, function.clone());
                updated += 1;
            }
        }
        self.initialized = true;
        debug!(
            spec = self.spec.0,
            slot = self.index,
            updated,
            sandboxed = policy.sandboxed,
            "wired accumulate slot"
        );
        updated
    }
}
