use super::ChunkPos;
use crate::chunk::Chunk;

/// Produces terrain for chunks the provider has no data for. Runs on whatever
/// thread triggered the chunk load, while that chunk's lock is held, so it
/// must not call back into the world.
pub trait Generator: Send + Sync {
    fn generate_chunk(&self, pos: ChunkPos, chunk: &mut Chunk);
}

/// The default generator: leaves every chunk empty.
#[derive(Default)]
pub struct NopGenerator;

impl Generator for NopGenerator {
    fn generate_chunk(&self, _pos: ChunkPos, _chunk: &mut Chunk) {}
}
