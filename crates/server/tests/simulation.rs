//! Behaviour scenarios run against a live ticking world: falling sand,
//! spreading water and growing wheat.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata_engine::block::{Block, PropertyValue};
use strata_engine::world::{
    BlockPos, NopProvider, Vec3, Viewer, World, WorldConfig,
};
use strata_server::blocks::{self, Palette, WHEAT_MAX_GROWTH};
use strata_server::generator::FlatGenerator;

struct Watcher;

impl Viewer for Watcher {
    fn position(&self) -> Vec3 {
        Vec3::new(8.0, 5.0, 8.0)
    }
}

fn ticking_world(palette: &Arc<Palette>) -> Arc<World> {
    let world = World::new(
        palette.registry.clone(),
        Arc::new(NopProvider),
        Arc::new(FlatGenerator::new(palette)),
        WorldConfig {
            tick_interval: Duration::from_millis(10),
            ..WorldConfig::default()
        },
    );
    world.add_viewer(Arc::new(Watcher));
    world
}

#[test]
fn sand_falls_to_the_ground() {
    let palette = Arc::new(blocks::build().unwrap());
    let world = ticking_world(&palette);

    let drop_from = BlockPos::new(8, 10, 8);
    world.place_block(drop_from, Block::new(palette.sand));
    thread::sleep(Duration::from_millis(1500));

    assert_eq!(world.block(drop_from).rid, palette.air);
    // Grass tops out at y=4, so the sand comes to rest at y=5.
    assert_eq!(world.block(BlockPos::new(8, 5, 8)).rid, palette.sand);
    world.close().unwrap();
}

#[test]
fn sand_falls_when_its_support_breaks() {
    let palette = Arc::new(blocks::build().unwrap());
    let world = ticking_world(&palette);

    // Resting on the grass layer, the sand stays put.
    let perch = BlockPos::new(8, 5, 8);
    world.place_block(perch, Block::new(palette.sand));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(world.block(perch).rid, palette.sand);

    // Breaking the grass underneath reaches the sand as a neighbour update.
    world.break_block(BlockPos::new(8, 4, 8));
    thread::sleep(Duration::from_millis(1000));

    assert_eq!(world.block(perch).rid, palette.air);
    assert_eq!(world.block(BlockPos::new(8, 4, 8)).rid, palette.sand);
    world.close().unwrap();
}

#[test]
fn water_source_spreads_a_ring() {
    let palette = Arc::new(blocks::build().unwrap());
    let world = ticking_world(&palette);

    let source = BlockPos::new(8, 10, 8);
    world.set_liquid(
        source,
        Some(strata_engine::block::Liquid {
            rid: palette.water_source,
            depth: 8,
        }),
    );
    world.schedule_block_update(source, Duration::from_millis(10));
    thread::sleep(Duration::from_millis(500));

    let side = world
        .liquid(BlockPos::new(9, 10, 8))
        .expect("water spread sideways");
    assert_eq!(side.rid, palette.water_flowing);
    assert!(!side.is_source());
    let below = world
        .liquid(BlockPos::new(8, 9, 8))
        .expect("water spread down");
    assert_eq!(below.rid, palette.water_flowing);
    // Flowing water does not spread further.
    assert_eq!(world.liquid(BlockPos::new(10, 10, 8)), None);
    world.close().unwrap();
}

#[test]
fn wheat_grows_under_random_ticks() {
    let palette = Arc::new(blocks::build().unwrap());
    let world = ticking_world(&palette);
    // Saturate sampling so growth is all but certain within the test window.
    world.set_random_tick_speed(4096);

    let crop = BlockPos::new(8, 5, 8);
    world.set_block(crop, Block::new(palette.wheat));
    thread::sleep(Duration::from_millis(2000));

    let state = palette
        .registry
        .resolve(world.block(crop).rid)
        .expect("wheat state")
        .clone();
    assert_eq!(state.name, "wheat");
    let Some(PropertyValue::Int(growth)) = state.properties.get("growth") else {
        panic!("wheat without growth property");
    };
    assert!(*growth > 0, "wheat never grew");
    assert!(*growth <= WHEAT_MAX_GROWTH);
    world.close().unwrap();
}
