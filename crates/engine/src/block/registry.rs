//! The block state registry.
//!
//! Registration is a one-time startup action: a [`BlockRegistryBuilder`]
//! collects states and capabilities, validates them, and freezes into an
//! immutable [`BlockRegistry`]. After `build()`, every lookup is a plain
//! array index or hash probe with no locking.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::{BlockCapabilities, BlockState, RuntimeId};

/// Errors raised while assembling a registry. These are contract violations
/// by the embedding application, surfaced at construction time rather than
/// deep inside a hot path.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("block state {0} registered twice")]
    Duplicate(String),
    #[error("no air state was registered")]
    MissingAir,
}

/// Immutable mapping between block states and dense runtime IDs, plus the
/// per-state capability tables the world consults on every operation.
pub struct BlockRegistry {
    states: Vec<BlockState>,
    caps: Vec<BlockCapabilities>,
    by_state: HashMap<BlockState, RuntimeId>,
    air: RuntimeId,
}

impl BlockRegistry {
    pub fn builder() -> BlockRegistryBuilder {
        BlockRegistryBuilder::default()
    }

    /// The cached runtime ID of the air state, used as the fast-path default
    /// throughout the engine.
    pub fn air(&self) -> RuntimeId {
        self.air
    }

    /// Resolve a runtime ID back to its state. Out-of-range IDs yield `None`,
    /// never a panic.
    pub fn resolve(&self, rid: RuntimeId) -> Option<&BlockState> {
        self.states.get(rid.0 as usize)
    }

    /// Look up the runtime ID of a state, if it was registered.
    pub fn lookup(&self, state: &BlockState) -> Option<RuntimeId> {
        self.by_state.get(state).copied()
    }

    /// The capability set of a runtime ID. Unregistered IDs behave as plain
    /// featureless solids.
    pub fn caps(&self, rid: RuntimeId) -> &BlockCapabilities {
        static PLAIN: std::sync::OnceLock<BlockCapabilities> = std::sync::OnceLock::new();
        self.caps
            .get(rid.0 as usize)
            .unwrap_or_else(|| PLAIN.get_or_init(BlockCapabilities::default))
    }

    /// Whether the ID resolves to a registered state.
    pub fn contains(&self, rid: RuntimeId) -> bool {
        (rid.0 as usize) < self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Collects registrations before freezing them into a [`BlockRegistry`].
#[derive(Default)]
pub struct BlockRegistryBuilder {
    states: Vec<BlockState>,
    caps: Vec<BlockCapabilities>,
    by_state: HashMap<BlockState, RuntimeId>,
    air: Option<RuntimeId>,
}

impl BlockRegistryBuilder {
    /// Register a block state with its capabilities, yielding its runtime ID.
    /// Registering the exact same `(name, properties)` twice is an error.
    pub fn register(
        &mut self,
        state: BlockState,
        caps: BlockCapabilities,
    ) -> Result<RuntimeId, RegistryError> {
        if self.by_state.contains_key(&state) {
            return Err(RegistryError::Duplicate(state.to_string()));
        }
        let rid = RuntimeId(self.states.len() as u32);
        if self.air.is_none() && (state.name == "air" || state.name == "minecraft:air") {
            self.air = Some(rid);
        }
        self.by_state.insert(state.clone(), rid);
        self.states.push(state);
        self.caps.push(caps);
        Ok(rid)
    }

    /// Freeze the builder. Fails if no air state was registered: the engine
    /// needs a default block to substitute on every not-found path.
    pub fn build(self) -> Result<Arc<BlockRegistry>, RegistryError> {
        let air = self.air.ok_or(RegistryError::MissingAir)?;
        Ok(Arc::new(BlockRegistry {
            states: self.states,
            caps: self.caps,
            by_state: self.by_state,
            air,
        }))
    }
}
