//! The block palette this server registers at startup, together with the
//! behaviour callbacks wired into the engine's capability slots.
//!
//! Behaviours deliberately avoid holding runtime IDs of their own state; they
//! read the block back from the world and work through the registry, so one
//! callback instance serves every state it is attached to.

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, RngCore};
use tracing::debug;

use strata_engine::block::{
    Block, BlockCapabilities, BlockRegistry, BlockState, Liquid, LiquidDisplacer,
    NeighbourUpdateTickable, PropertyValue, RandomTickable, RegistryError, RuntimeId,
    ScheduledTickable,
};
use strata_engine::world::{BlockPos, World};

pub const WHEAT_MAX_GROWTH: i32 = 7;

/// Every runtime ID the server registers, plus the frozen registry itself.
pub struct Palette {
    pub registry: Arc<BlockRegistry>,
    pub air: RuntimeId,
    pub bedrock: RuntimeId,
    pub stone: RuntimeId,
    pub dirt: RuntimeId,
    pub grass: RuntimeId,
    pub sand: RuntimeId,
    pub water_source: RuntimeId,
    pub water_flowing: RuntimeId,
    pub kelp: RuntimeId,
    pub wheat: RuntimeId,
}

fn water_state(depth: i32) -> BlockState {
    BlockState::new("water").with("liquid_depth", PropertyValue::Int(depth))
}

fn wheat_state(growth: i32) -> BlockState {
    BlockState::new("wheat").with("growth", PropertyValue::Int(growth))
}

/// Sand falls when its support disappears: the neighbour update schedules a
/// check, the scheduled tick drops the column cell by cell.
struct Falling {
    air: RuntimeId,
}

impl NeighbourUpdateTickable for Falling {
    fn neighbour_update(&self, world: &World, pos: BlockPos, _changed: BlockPos) {
        if world.block(BlockPos::new(pos.x, pos.y - 1, pos.z)).rid == self.air {
            world.schedule_block_update(pos, Duration::from_millis(100));
        }
    }
}

impl ScheduledTickable for Falling {
    fn scheduled_tick(&self, world: &World, pos: BlockPos, _rng: &mut dyn RngCore) {
        let below = BlockPos::new(pos.x, pos.y - 1, pos.z);
        if below.out_of_bounds() || world.block(below).rid != self.air {
            return;
        }
        let block = world.block(pos);
        world.set_block(pos, Block::new(self.air));
        world.set_block(below, block);
        // Keep falling until something holds it up.
        world.schedule_block_update(below, Duration::from_millis(100));
    }
}

/// A source spreads one ring of flowing water into open neighbours. Flowing
/// water stays where it is; this is enough to make pools feel alive without
/// full fluid simulation.
struct WaterSpread;

impl WaterSpread {
    fn sides(pos: BlockPos) -> [BlockPos; 5] {
        [
            BlockPos::new(pos.x + 1, pos.y, pos.z),
            BlockPos::new(pos.x - 1, pos.y, pos.z),
            BlockPos::new(pos.x, pos.y, pos.z + 1),
            BlockPos::new(pos.x, pos.y, pos.z - 1),
            BlockPos::new(pos.x, pos.y - 1, pos.z),
        ]
    }
}

impl ScheduledTickable for WaterSpread {
    fn scheduled_tick(&self, world: &World, pos: BlockPos, _rng: &mut dyn RngCore) {
        let Some(liquid) = world.liquid(pos) else {
            return;
        };
        if !liquid.is_source() {
            return;
        }
        let Some(flowing) = world.registry().lookup(&water_state(4)) else {
            return;
        };
        let air = world.registry().air();
        for side in Self::sides(pos) {
            if side.out_of_bounds() {
                continue;
            }
            if world.block(side).rid == air && world.liquid(side).is_none() {
                world.set_liquid(side, Some(Liquid { rid: flowing, depth: 4 }));
            }
        }
    }
}

impl NeighbourUpdateTickable for WaterSpread {
    fn neighbour_update(&self, world: &World, pos: BlockPos, _changed: BlockPos) {
        world.schedule_block_update(pos, Duration::from_millis(250));
    }
}

/// Kelp shares its cell with any full source liquid.
struct Submersible;

impl LiquidDisplacer for Submersible {
    fn can_displace(&self, liquid: Liquid) -> bool {
        liquid.is_source()
    }
}

/// Wheat advances one growth stage on a fraction of its random ticks.
struct WheatGrowth;

impl RandomTickable for WheatGrowth {
    fn random_tick(&self, world: &World, pos: BlockPos, rng: &mut dyn RngCore) {
        if rng.gen_range(0..4) != 0 {
            return;
        }
        let rid = world.block(pos).rid;
        let Some(state) = world.registry().resolve(rid) else {
            return;
        };
        let Some(PropertyValue::Int(growth)) = state.properties.get("growth") else {
            return;
        };
        if *growth >= WHEAT_MAX_GROWTH {
            return;
        }
        if let Some(next) = world.registry().lookup(&wheat_state(growth + 1)) {
            world.set_block(pos, Block::new(next));
        }
    }
}

/// Build the full palette. Fails only on a programming error in the
/// registrations below.
pub fn build() -> Result<Palette, RegistryError> {
    let mut b = BlockRegistry::builder();

    let air = b.register(BlockState::new("air"), BlockCapabilities::air())?;
    let bedrock = b.register(BlockState::new("bedrock"), BlockCapabilities::default())?;
    let stone = b.register(BlockState::new("stone"), BlockCapabilities::default())?;
    let dirt = b.register(BlockState::new("dirt"), BlockCapabilities::default())?;
    let grass = b.register(BlockState::new("grass"), BlockCapabilities::default())?;

    let falling = Arc::new(Falling { air });
    let sand = b.register(
        BlockState::new("sand"),
        BlockCapabilities {
            neighbour_update: Some(falling.clone()),
            scheduled_tick: Some(falling),
            ..BlockCapabilities::default()
        },
    )?;

    let spread = Arc::new(WaterSpread);
    let water_source = b.register(
        water_state(8),
        BlockCapabilities {
            scheduled_tick: Some(spread.clone()),
            neighbour_update: Some(spread),
            ..BlockCapabilities::liquid(8)
        },
    )?;
    let water_flowing = b.register(water_state(4), BlockCapabilities::liquid(4))?;

    let kelp = b.register(
        BlockState::new("kelp"),
        BlockCapabilities {
            light_filter: 0,
            displacer: Some(Arc::new(Submersible)),
            ..BlockCapabilities::default()
        },
    )?;

    let growth = Arc::new(WheatGrowth);
    let mut wheat = RuntimeId(0);
    for stage in 0..=WHEAT_MAX_GROWTH {
        let rid = b.register(
            wheat_state(stage),
            BlockCapabilities {
                light_filter: 0,
                replaceable: false,
                random_tick: Some(growth.clone()),
                ..BlockCapabilities::default()
            },
        )?;
        if stage == 0 {
            wheat = rid;
        }
    }

    let registry = b.build()?;
    debug!("registered {} block states", registry.len());
    Ok(Palette {
        registry,
        air,
        bedrock,
        stone,
        dirt,
        grass,
        sand,
        water_source,
        water_flowing,
        kelp,
        wheat,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_builds() {
        let p = build().unwrap();
        assert_eq!(p.registry.air(), p.air);
        assert_eq!(p.registry.lookup(&water_state(8)), Some(p.water_source));
        assert_eq!(p.registry.lookup(&wheat_state(0)), Some(p.wheat));
        assert_eq!(
            p.registry.lookup(&wheat_state(WHEAT_MAX_GROWTH + 1)),
            None
        );
    }

    #[test]
    fn water_caps_are_liquids() {
        let p = build().unwrap();
        assert!(p.registry.caps(p.water_source).liquid.is_some());
        assert_eq!(p.registry.caps(p.water_flowing).liquid.unwrap().depth, 4);
        assert!(p.registry.caps(p.stone).liquid.is_none());
    }
}
