//! Block states, the runtime ID registry and block capability traits.
//!
//! Every distinct `(name, properties)` combination that is registered receives
//! a dense [`RuntimeId`]. The world stores runtime IDs only; names and
//! properties are resolved through the [`BlockRegistry`] when a human-readable
//! or persistent form is needed.

mod behaviour;
mod registry;

pub use behaviour::{
    BlockCapabilities, LiquidDisplacer, LiquidInfo, NeighbourUpdateTickable, RandomTickable,
    ScheduledTickable, TickableBlockEntity,
};
pub use registry::{BlockRegistry, BlockRegistryBuilder, RegistryError};

use fastnbt::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Dense index assigned to a registered block state. Runtime IDs are handed
/// out monotonically at registration time and index directly into the
/// registry's state and capability tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeId(pub u32);

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A block state property value. The registry only accepts these three types;
/// anything richer must be modelled as a block entity payload instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Str(String),
}

/// An immutable block state: a name plus an ordered property map.
///
/// Properties live in a `BTreeMap` so that iteration (and therefore hashing
/// and serialization) is deterministic regardless of insertion order: two
/// logically identical states can never produce two runtime IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockState {
    pub name: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.properties.is_empty() {
            write!(f, "[")?;
            for (i, (k, v)) in self.properties.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match v {
                    PropertyValue::Bool(b) => write!(f, "{k}={b}")?,
                    PropertyValue::Int(n) => write!(f, "{k}={n}")?,
                    PropertyValue::Str(s) => write!(f, "{k}={s}")?,
                }
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// A block as seen by world callers: a runtime ID plus, for NBT-bearing
/// blocks, the block-entity payload stored at the position it was read from.
#[derive(Debug, Clone)]
pub struct Block {
    pub rid: RuntimeId,
    pub nbt: Option<Arc<Value>>,
}

impl Block {
    pub fn new(rid: RuntimeId) -> Self {
        Self { rid, nbt: None }
    }

    pub fn with_nbt(rid: RuntimeId, nbt: Value) -> Self {
        Self {
            rid,
            nbt: Some(Arc::new(nbt)),
        }
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.rid == other.rid
    }
}

impl Eq for Block {}

/// A liquid occupying a cell: the runtime ID of its state plus its depth
/// (8 = source, lower = flowing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liquid {
    pub rid: RuntimeId,
    pub depth: u8,
}

impl Liquid {
    /// Whether this is a full-depth source block. Only sources may be carried
    /// into a displacing block on placement.
    pub fn is_source(&self) -> bool {
        self.depth == 8
    }
}
