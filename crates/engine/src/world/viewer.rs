//! The notification seam between the world and whatever watches it.

use std::sync::Arc;

use crate::block::Block;
use crate::chunk::Chunk;

use super::{BlockPos, ChunkPos, Entity, Vec3};

/// A one-off visual effect shown to viewers near a position.
#[derive(Debug, Clone)]
pub enum Particle {
    BlockBreak(Block),
}

/// A sound played to viewers near a position.
#[derive(Debug, Clone)]
pub enum Sound {
    BlockPlace(Block),
    BlockBreak(Block),
}

/// Something that observes part of a world, typically a connected player
/// session. All notification methods default to no-ops; `position()` is the
/// only required method and drives range checks and chunk residency.
///
/// Notifications are invoked after the world has released the chunk lock the
/// change was made under, so implementations may call back into the world.
pub trait Viewer: Send + Sync {
    fn position(&self) -> Vec3;

    /// A block changed at `pos` on the given storage layer.
    fn view_block_update(&self, _pos: BlockPos, _block: Block, _layer: u8) {}

    /// A whole chunk changed at once, after a bulk edit.
    fn view_chunk(&self, _pos: ChunkPos, _chunk: Arc<Chunk>) {}

    fn view_entity(&self, _entity: &Arc<dyn Entity>) {}
    fn hide_entity(&self, _entity: &Arc<dyn Entity>) {}

    fn view_particle(&self, _pos: Vec3, _particle: Particle) {}
    fn view_sound(&self, _pos: Vec3, _sound: Sound) {}

    fn view_time(&self, _time: i64) {}
    fn view_world_spawn(&self, _spawn: BlockPos) {}
}
