//! The persistence seam of a world.

use std::sync::Arc;

use fastnbt::Value;

use super::{ChunkPos, Entity, SaveableEntity, Settings};
use crate::chunk::Chunk;

/// Backs a world with durable storage. All methods take `&self`; a provider
/// is shared between the caller thread, the ticker and the janitor, and must
/// do its own internal synchronisation.
///
/// Errors returned from load methods fail the chunk being loaded; errors from
/// save methods are logged by the world and otherwise ignored, so a broken
/// disk never takes the tick loop down.
pub trait Provider: Send + Sync {
    /// World metadata as last persisted.
    fn settings(&self) -> Settings;
    fn save_settings(&self, settings: &Settings) -> anyhow::Result<()>;

    /// The chunk at `pos`, or `None` if it was never generated.
    fn load_chunk(&self, pos: ChunkPos) -> anyhow::Result<Option<Chunk>>;
    fn save_chunk(&self, pos: ChunkPos, chunk: &Chunk) -> anyhow::Result<()>;

    fn load_entities(&self, pos: ChunkPos) -> anyhow::Result<Vec<Arc<dyn Entity>>>;
    fn save_entities(&self, pos: ChunkPos, entities: &[&dyn SaveableEntity]) -> anyhow::Result<()>;

    fn load_block_nbt(&self, pos: ChunkPos) -> anyhow::Result<Vec<Value>>;
    fn save_block_nbt(&self, pos: ChunkPos, nbt: &[Value]) -> anyhow::Result<()>;

    /// Flush and release underlying resources. Called once from
    /// `World::close` after the final save pass.
    fn close(&self) -> anyhow::Result<()>;
}

/// The default provider: nothing is ever stored, every chunk loads as absent
/// so the generator runs, and settings are the defaults.
#[derive(Default)]
pub struct NopProvider;

impl Provider for NopProvider {
    fn settings(&self) -> Settings {
        Settings::default()
    }

    fn save_settings(&self, _settings: &Settings) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_chunk(&self, _pos: ChunkPos) -> anyhow::Result<Option<Chunk>> {
        Ok(None)
    }

    fn save_chunk(&self, _pos: ChunkPos, _chunk: &Chunk) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_entities(&self, _pos: ChunkPos) -> anyhow::Result<Vec<Arc<dyn Entity>>> {
        Ok(Vec::new())
    }

    fn save_entities(
        &self,
        _pos: ChunkPos,
        _entities: &[&dyn SaveableEntity],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_block_nbt(&self, _pos: ChunkPos) -> anyhow::Result<Vec<Value>> {
        Ok(Vec::new())
    }

    fn save_block_nbt(&self, _pos: ChunkPos, _nbt: &[Value]) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
