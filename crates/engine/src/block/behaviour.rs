//! Capability traits consulted by the world core.
//!
//! The tick loop and the block/liquid operations never know about concrete
//! block types; they only check whether the state at a position carries one of
//! these capabilities and invoke it. Capabilities are attached per runtime ID
//! at registration time.

use rand::RngCore;
use std::sync::Arc;

use crate::world::{BlockPos, World};
use super::Liquid;

/// Implemented by blocks that may be ticked when randomly selected during the
/// random-tick phase (crops, saplings, ice).
pub trait RandomTickable: Send + Sync {
    fn random_tick(&self, world: &World, pos: BlockPos, rng: &mut dyn RngCore);
}

/// Implemented by blocks that react to a scheduled update placed via
/// `World::schedule_block_update` (falling blocks, spreading liquids).
pub trait ScheduledTickable: Send + Sync {
    fn scheduled_tick(&self, world: &World, pos: BlockPos, rng: &mut dyn RngCore);
}

/// Implemented by blocks that react when one of their direct neighbours
/// changes.
pub trait NeighbourUpdateTickable: Send + Sync {
    fn neighbour_update(&self, world: &World, pos: BlockPos, changed: BlockPos);
}

/// Implemented by NBT-bearing blocks whose payload must be ticked every world
/// tick while their chunk is loaded and in range (furnaces, hoppers).
pub trait TickableBlockEntity: Send + Sync {
    fn tick(&self, world: &World, pos: BlockPos, current_tick: i64);
}

/// Implemented by blocks that may share their cell with a liquid (kelp,
/// seagrass, slabs).
pub trait LiquidDisplacer: Send + Sync {
    fn can_displace(&self, liquid: Liquid) -> bool;
}

/// Static per-state liquid data. States carrying this are treated as liquids
/// by `World::liquid`/`World::set_liquid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidInfo {
    /// Depth of the liquid, 8 for a source block.
    pub depth: u8,
}

/// The full capability set attached to one registered block state.
///
/// `Default` describes an ordinary opaque solid: no capabilities, no light
/// emission, full light filtering. Air-like states must set `light_filter`
/// to 0 explicitly.
#[derive(Clone)]
pub struct BlockCapabilities {
    /// Light emitted by the block, 0-15.
    pub light_emission: u8,
    /// Light subtracted when passing through the block, 0-15.
    pub light_filter: u8,
    /// Whether the block stores a block-entity payload alongside its state.
    pub stores_nbt: bool,
    /// Whether a placed block or liquid may simply overwrite this state.
    pub replaceable: bool,
    /// Present if the state is a liquid.
    pub liquid: Option<LiquidInfo>,
    pub random_tick: Option<Arc<dyn RandomTickable>>,
    pub scheduled_tick: Option<Arc<dyn ScheduledTickable>>,
    pub neighbour_update: Option<Arc<dyn NeighbourUpdateTickable>>,
    pub block_entity_tick: Option<Arc<dyn TickableBlockEntity>>,
    pub displacer: Option<Arc<dyn LiquidDisplacer>>,
}

impl Default for BlockCapabilities {
    fn default() -> Self {
        Self {
            light_emission: 0,
            light_filter: 15,
            stores_nbt: false,
            replaceable: false,
            liquid: None,
            random_tick: None,
            scheduled_tick: None,
            neighbour_update: None,
            block_entity_tick: None,
            displacer: None,
        }
    }
}

impl BlockCapabilities {
    /// Capabilities for an air-like state: fully transparent and replaceable.
    pub fn air() -> Self {
        Self {
            light_filter: 0,
            replaceable: true,
            ..Self::default()
        }
    }

    /// Capabilities for a liquid state of the given depth.
    pub fn liquid(depth: u8) -> Self {
        Self {
            light_filter: 2,
            replaceable: true,
            liquid: Some(LiquidInfo { depth }),
            ..Self::default()
        }
    }
}
