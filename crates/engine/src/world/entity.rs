//! Entities and the global entity-to-world index.
//!
//! The engine does not define concrete entity types; it tracks residency (the
//! chunk an entity currently occupies) and offers optional capabilities via
//! the accessor methods on [`Entity`]. A process-wide table maps entity IDs to
//! the world they live in, so systems holding only an ID can find the world
//! without threading a reference through.

use std::sync::{Arc, LazyLock, Weak};

use dashmap::DashMap;
use fastnbt::Value;

use super::{Aabb, Vec3, World};

/// Process-unique entity identifier, assigned by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entity that can live in a world.
///
/// The capability accessors return `None`/`{}` by default; implementations
/// override the ones they support.
pub trait Entity: Send + Sync {
    fn id(&self) -> EntityId;
    fn position(&self) -> Vec3;
    fn aabb(&self) -> Aabb;

    /// Present if the entity wants to be ticked every world tick while its
    /// chunk is loaded.
    fn as_ticker(&self) -> Option<&dyn TickerEntity> {
        None
    }

    /// Present if the entity should be persisted with its chunk.
    fn as_saveable(&self) -> Option<&dyn SaveableEntity> {
        None
    }

    /// Called when the entity is removed from a world, including when its
    /// world shuts down.
    fn close(&self) {}
}

pub trait TickerEntity: Send + Sync {
    fn tick(&self, world: &World, current_tick: i64);
}

pub trait SaveableEntity: Send + Sync {
    /// The persistent type identifier of the entity.
    fn kind(&self) -> &str;
    fn encode_nbt(&self) -> Value;
}

static ENTITY_WORLDS: LazyLock<DashMap<EntityId, Weak<World>>> = LazyLock::new(DashMap::new);

/// The world an entity currently lives in, if any. The table is maintained
/// exclusively by `World::add_entity` and `World::remove_entity`.
pub fn world_of_entity(id: EntityId) -> Option<Arc<World>> {
    ENTITY_WORLDS.get(&id).and_then(|w| w.upgrade())
}

pub(super) fn register_entity_world(id: EntityId, world: Weak<World>) -> Option<Weak<World>> {
    ENTITY_WORLDS.insert(id, world)
}

pub(super) fn unregister_entity_world(id: EntityId) {
    ENTITY_WORLDS.remove(&id);
}
