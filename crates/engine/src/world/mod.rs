//! The world: a concurrent chunk cache with a fixed-rate simulation loop.
//!
//! All state lives behind a two-level locking discipline. A coarse mutex
//! guards cache membership only (which chunk positions are loaded); each
//! loaded column then carries its own mutex guarding blocks, light, viewers
//! and resident entities. The one rule every operation follows: collect what
//! is needed under a chunk lock, release it, and only then call out into
//! viewer notifications or block behaviour, so callbacks are free to re-enter
//! the world.

mod entity;
mod generator;
mod position;
mod provider;
mod settings;
mod structure;
mod viewer;

pub use entity::{world_of_entity, Entity, EntityId, SaveableEntity, TickerEntity};
pub use generator::{Generator, NopGenerator};
pub use position::{Aabb, BlockPos, ChunkPos, Vec3};
pub use provider::{NopProvider, Provider};
pub use settings::{Difficulty, GameMode, Settings};
pub use structure::Structure;
pub use viewer::{Particle, Sound, Viewer};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use fastnbt::Value;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use thiserror::Error;
use tracing::{error, warn};

use crate::block::{Block, BlockRegistry, Liquid, RuntimeId};
use crate::chunk::{fill_light, spread_light, Chunk, MAX_Y, MIN_Y, SUB_CHUNK_COUNT};

/// Errors surfaced by world operations. Most read paths degrade to air
/// instead of returning these; they are reported where the failure happened.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("loading chunk {pos}: {source}")]
    ChunkLoad {
        pos: ChunkPos,
        #[source]
        source: anyhow::Error,
    },
}

/// Tuning knobs for a world. The defaults match a 20 Hz simulation with a
/// five-minute eviction sweep.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Distance in chunks within which random ticking happens around viewers.
    pub simulation_distance: i32,
    /// Random block samples drawn per sub-chunk per tick.
    pub random_tick_speed: u32,
    pub tick_interval: Duration,
    pub janitor_interval: Duration,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            simulation_distance: 8,
            random_tick_speed: 3,
            tick_interval: Duration::from_millis(50),
            janitor_interval: Duration::from_secs(300),
        }
    }
}

/// Everything stored for one loaded chunk position, guarded by one mutex.
pub struct ChunkColumn {
    chunk: Chunk,
    block_entities: HashMap<BlockPos, Value>,
    viewers: Vec<Arc<dyn Viewer>>,
    entities: Vec<Arc<dyn Entity>>,
}

impl ChunkColumn {
    fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            block_entities: HashMap::new(),
            viewers: Vec::new(),
            entities: Vec::new(),
        }
    }
}

type ChunkData = Arc<Mutex<ChunkColumn>>;

/// An owned guard on one chunk column. Holders must not call back into the
/// world while it is live, with the single exception of the light spreader.
type ChunkGuard = ArcMutexGuard<parking_lot::RawMutex, ChunkColumn>;

/// The chunk cache: membership map plus an explicit cache-of-one slot for the
/// most recently accessed position, which most accesses within a tick hit.
struct ChunkMap {
    map: HashMap<ChunkPos, ChunkData>,
    last: Option<(ChunkPos, ChunkData)>,
}

struct EntityRecord {
    entity: Arc<dyn Entity>,
    chunk_pos: ChunkPos,
}

struct NeighbourUpdate {
    pos: BlockPos,
    changed: BlockPos,
}

/// Pending block updates: one scheduled deadline per position plus the
/// neighbour-update backlog accumulated since the last tick.
struct UpdateQueue {
    scheduled: HashMap<BlockPos, i64>,
    neighbour: Vec<NeighbourUpdate>,
}

/// Pulls sixteen 4-bit samples out of each RNG draw, since random block
/// selection only ever needs values in 0..16.
struct Rand4 {
    x: u64,
    n: u8,
}

impl Rand4 {
    fn new() -> Self {
        Self { x: 0, n: 0 }
    }

    fn next(&mut self, rng: &mut dyn RngCore) -> u8 {
        if self.n == 0 {
            self.x = rng.next_u64();
            self.n = 16;
        }
        let v = (self.x & 0xF) as u8;
        self.x >>= 4;
        self.n -= 1;
        v
    }
}

pub struct World {
    registry: Arc<BlockRegistry>,
    myself: Weak<World>,

    set: Mutex<Settings>,
    provider: Mutex<Arc<dyn Provider>>,
    generator: Mutex<Arc<dyn Generator>>,
    read_only: AtomicBool,
    closed: AtomicBool,

    chunks: Mutex<ChunkMap>,
    entities: RwLock<HashMap<EntityId, EntityRecord>>,
    updates: Mutex<UpdateQueue>,
    viewers: Mutex<Vec<Arc<dyn Viewer>>>,

    rng: Mutex<StdRng>,
    random_tick_speed: AtomicU32,
    sim_dist_sq: i32,
    tick_interval: Duration,

    stop_tick: Sender<()>,
    done_tick: Receiver<()>,
    stop_janitor: Sender<()>,
}

impl World {
    /// Create a world and start its ticker and janitor threads. The world
    /// runs until [`World::close`] is called.
    pub fn new(
        registry: Arc<BlockRegistry>,
        provider: Arc<dyn Provider>,
        generator: Arc<dyn Generator>,
        config: WorldConfig,
    ) -> Arc<World> {
        let settings = provider.settings();
        let (stop_tick, stop_rx) = bounded::<()>(1);
        let (done_tx, done_tick) = bounded::<()>(1);
        let (stop_janitor, janitor_rx) = bounded::<()>(1);

        let world = Arc::new_cyclic(|myself| World {
            registry,
            myself: myself.clone(),
            set: Mutex::new(settings),
            provider: Mutex::new(provider),
            generator: Mutex::new(generator),
            read_only: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            chunks: Mutex::new(ChunkMap {
                map: HashMap::new(),
                last: None,
            }),
            entities: RwLock::new(HashMap::new()),
            updates: Mutex::new(UpdateQueue {
                scheduled: HashMap::new(),
                neighbour: Vec::new(),
            }),
            viewers: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            random_tick_speed: AtomicU32::new(config.random_tick_speed),
            sim_dist_sq: config.simulation_distance * config.simulation_distance,
            tick_interval: config.tick_interval,
            stop_tick,
            done_tick,
            stop_janitor,
        });

        let w = Arc::clone(&world);
        let interval = config.tick_interval;
        thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => w.tick(),
                    recv(stop_rx) -> _ => {
                        let _ = done_tx.send(());
                        return;
                    }
                }
            }
        });

        let w = Arc::clone(&world);
        let interval = config.janitor_interval;
        thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => w.evict_unused(),
                    recv(janitor_rx) -> _ => return,
                }
            }
        });

        world
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    fn air(&self) -> RuntimeId {
        self.registry.air()
    }

    // ── Chunk cache ──────────────────────────────────────────────────────

    /// The column at `pos`, locked for the caller. Loads or generates the
    /// chunk on a miss; concurrent callers for the same position block on the
    /// loader's fine lock rather than loading twice.
    fn chunk(&self, pos: ChunkPos) -> Result<ChunkGuard, WorldError> {
        loop {
            let mut chunks = self.chunks.lock();
            if let Some((p, data)) = &chunks.last {
                if *p == pos {
                    let data = Arc::clone(data);
                    drop(chunks);
                    return Ok(data.lock_arc());
                }
            }
            if let Some(data) = chunks.map.get(&pos) {
                let data = Arc::clone(data);
                chunks.last = Some((pos, Arc::clone(&data)));
                drop(chunks);
                return Ok(data.lock_arc());
            }

            // Miss. Insert the column and take its fine lock before letting
            // go of the coarse lock, so a concurrent caller finds the entry
            // and parks on the lock instead of loading the chunk again.
            let data: ChunkData = Arc::new(Mutex::new(ChunkColumn::new(Chunk::new(self.air()))));
            chunks.map.insert(pos, Arc::clone(&data));
            chunks.last = Some((pos, Arc::clone(&data)));
            let mut guard = data.lock_arc();
            drop(chunks);

            let loaded = match self.load_column(pos, &mut guard) {
                Ok(entities) => entities,
                Err(source) => {
                    drop(guard);
                    let mut chunks = self.chunks.lock();
                    chunks.map.remove(&pos);
                    chunks.last = None;
                    return Err(WorldError::ChunkLoad { pos, source });
                }
            };
            drop(guard);

            for e in loaded {
                entity::register_entity_world(e.id(), self.myself.clone());
                self.entities.write().insert(
                    e.id(),
                    EntityRecord {
                        entity: e,
                        chunk_pos: pos,
                    },
                );
            }
            self.spread_light_around(pos);
            // Go back around; the fast path picks the column up again.
        }
    }

    fn chunk_or_log(&self, pos: ChunkPos) -> Option<ChunkGuard> {
        match self.chunk(pos) {
            Ok(guard) => Some(guard),
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    /// The column at `pos` only if it is already cached. Never loads.
    fn cached(&self, pos: ChunkPos) -> Option<ChunkData> {
        self.chunks.lock().map.get(&pos).cloned()
    }

    /// Populate a freshly inserted column from the provider, or generate it,
    /// then compute its initial light. Returns the entities that were loaded
    /// with it, for registration once the column lock is released.
    fn load_column(
        &self,
        pos: ChunkPos,
        column: &mut ChunkColumn,
    ) -> anyhow::Result<Vec<Arc<dyn Entity>>> {
        let provider = Arc::clone(&self.provider.lock());
        let loaded = provider
            .load_chunk(pos)
            .with_context(|| format!("reading chunk {pos} from the provider"))?;

        let mut entities = Vec::new();
        match loaded {
            Some(chunk) => {
                column.chunk = chunk;
                entities = provider
                    .load_entities(pos)
                    .with_context(|| format!("reading entities of chunk {pos}"))?;
                column.entities = entities.clone();
                for nbt in provider
                    .load_block_nbt(pos)
                    .with_context(|| format!("reading block entities of chunk {pos}"))?
                {
                    match block_pos_of_nbt(&nbt) {
                        Some(p) => {
                            column.block_entities.insert(p, nbt);
                        }
                        None => warn!("chunk {pos}: block entity without a position, dropped"),
                    }
                }
            }
            None => {
                let generator = Arc::clone(&self.generator.lock());
                generator.generate_chunk(pos, &mut column.chunk);
            }
        }
        fill_light(&mut column.chunk, &self.registry);
        Ok(entities)
    }

    /// Let light cross the borders of every 3x3 neighbourhood around `pos`
    /// that is now fully cached. The only place in the engine allowed to hold
    /// more than one chunk lock; acquisition is in sorted position order so
    /// overlapping spreads cannot deadlock each other.
    fn spread_light_around(&self, pos: ChunkPos) {
        let mut cached: HashMap<ChunkPos, ChunkData> = HashMap::new();
        {
            let chunks = self.chunks.lock();
            for dx in -2..=2 {
                for dz in -2..=2 {
                    let p = ChunkPos::new(pos.x + dx, pos.z + dz);
                    if let Some(data) = chunks.map.get(&p) {
                        cached.insert(p, Arc::clone(data));
                    }
                }
            }
        }

        for dx in -1..=1 {
            for dz in -1..=1 {
                let centre = ChunkPos::new(pos.x + dx, pos.z + dz);
                let mut ring = Vec::with_capacity(9);
                for nx in -1..=1 {
                    for nz in -1..=1 {
                        let p = ChunkPos::new(centre.x + nx, centre.z + nz);
                        if let Some(data) = cached.get(&p) {
                            ring.push((p, Arc::clone(data)));
                        }
                    }
                }
                if ring.len() < 9 {
                    continue;
                }
                ring.sort_by_key(|(p, _)| *p);
                let mut guards: Vec<ChunkGuard> =
                    ring.iter().map(|(_, data)| data.lock_arc()).collect();
                let mut refs: Vec<&mut Chunk> =
                    guards.iter_mut().map(|g| &mut g.chunk).collect();
                spread_light(&mut refs, &self.registry);
            }
        }
    }

    // ── Blocks and liquids ───────────────────────────────────────────────

    /// The block at `pos`. Out-of-bounds positions and failed chunk loads
    /// read as air.
    pub fn block(&self, pos: BlockPos) -> Block {
        if pos.out_of_bounds() {
            return Block::new(self.air());
        }
        let Some(column) = self.chunk_or_log(pos.chunk()) else {
            return Block::new(self.air());
        };
        let (x, y, z) = pos.local();
        let rid = column.chunk.runtime_id(x, y, z, 0);
        if self.registry.caps(rid).stores_nbt {
            if let Some(nbt) = column.block_entities.get(&pos) {
                return Block::with_nbt(rid, nbt.clone());
            }
        }
        Block::new(rid)
    }

    /// Write a block at `pos` and notify the chunk's viewers. This is the
    /// low-level primitive: no neighbour updates, no liquid handling.
    pub fn set_block(&self, pos: BlockPos, block: Block) {
        if pos.out_of_bounds() {
            return;
        }
        if !self.registry.contains(block.rid) {
            error!("set_block at {pos}: runtime id {} was never registered", block.rid);
            return;
        }
        let Some(mut column) = self.chunk_or_log(pos.chunk()) else {
            return;
        };
        let (x, y, z) = pos.local();
        column.chunk.set_runtime_id(x, y, z, 0, block.rid);
        if self.registry.caps(block.rid).stores_nbt {
            match &block.nbt {
                Some(nbt) => {
                    column.block_entities.insert(pos, (**nbt).clone());
                }
                None => {
                    column.block_entities.remove(&pos);
                }
            }
        } else {
            column.block_entities.remove(&pos);
        }
        let viewers = column.viewers.clone();
        drop(column);
        for v in viewers {
            v.view_block_update(pos, block.clone(), 0);
        }
    }

    pub fn break_block(&self, pos: BlockPos) {
        self.break_block_inner(pos, true);
    }

    pub fn break_block_without_particles(&self, pos: BlockPos) {
        self.break_block_inner(pos, false);
    }

    fn break_block_inner(&self, pos: BlockPos, particles: bool) {
        if pos.out_of_bounds() {
            return;
        }
        let old = self.block(pos);
        self.set_block(pos, Block::new(self.air()));
        if particles {
            self.add_particle(pos.centre(), Particle::BlockBreak(old.clone()));
            self.play_sound(pos.centre(), Sound::BlockBreak(old));
        }
        if let Some(liquid) = self.additional_liquid(pos) {
            // The liquid that coexisted with the block takes its place.
            self.set_liquid(pos, Some(liquid));
        } else {
            self.do_block_updates_around(pos);
        }
    }

    /// Place a block, interacting with any liquid occupying the cell: a
    /// displacing block keeps a source liquid on the secondary layer, any
    /// other liquid is removed.
    pub fn place_block(&self, pos: BlockPos, block: Block) {
        if pos.out_of_bounds() {
            return;
        }
        if !self.registry.contains(block.rid) {
            error!("place_block at {pos}: runtime id {} was never registered", block.rid);
            return;
        }
        let displaced = self.liquid(pos).filter(|liq| {
            liq.is_source()
                && self
                    .registry
                    .caps(block.rid)
                    .displacer
                    .as_ref()
                    .is_some_and(|d| d.can_displace(*liq))
        });

        let Some(mut column) = self.chunk_or_log(pos.chunk()) else {
            return;
        };
        let (x, y, z) = pos.local();
        column.chunk.set_runtime_id(x, y, z, 0, block.rid);
        match displaced {
            Some(liq) => column.chunk.set_runtime_id(x, y, z, 1, liq.rid),
            None => column.chunk.set_runtime_id(x, y, z, 1, self.air()),
        }
        if !self.registry.caps(block.rid).stores_nbt {
            column.block_entities.remove(&pos);
        } else if let Some(nbt) = &block.nbt {
            column.block_entities.insert(pos, (**nbt).clone());
        }
        let viewers = column.viewers.clone();
        drop(column);

        for v in &viewers {
            v.view_block_update(pos, block.clone(), 0);
            if let Some(liq) = displaced {
                v.view_block_update(pos, Block::new(liq.rid), 1);
            }
        }
        for v in &viewers {
            v.view_sound(pos.centre(), Sound::BlockPlace(block.clone()));
        }
        self.do_block_updates_around(pos);
    }

    /// The liquid at `pos`, checking the primary layer first and the
    /// secondary layer after.
    pub fn liquid(&self, pos: BlockPos) -> Option<Liquid> {
        if pos.out_of_bounds() {
            return None;
        }
        let column = self.chunk_or_log(pos.chunk())?;
        let (x, y, z) = pos.local();
        for layer in 0..2u8 {
            let rid = column.chunk.runtime_id(x, y, z, layer);
            if let Some(info) = self.registry.caps(rid).liquid {
                return Some(Liquid { rid, depth: info.depth });
            }
        }
        None
    }

    /// The liquid on the secondary layer only, coexisting with a block on the
    /// primary layer.
    pub fn additional_liquid(&self, pos: BlockPos) -> Option<Liquid> {
        if pos.out_of_bounds() {
            return None;
        }
        let column = self.chunk_or_log(pos.chunk())?;
        let (x, y, z) = pos.local();
        let rid = column.chunk.runtime_id(x, y, z, 1);
        self.registry
            .caps(rid)
            .liquid
            .map(|info| Liquid { rid, depth: info.depth })
    }

    /// Set or clear the liquid at `pos`. `None` removes liquid from both
    /// layers. A liquid is placed on the primary layer when nothing solid
    /// occupies it, on the secondary layer when the block there accepts the
    /// liquid as a displacer, and not at all otherwise.
    pub fn set_liquid(&self, pos: BlockPos, liquid: Option<Liquid>) {
        if pos.out_of_bounds() {
            return;
        }
        let air = self.air();
        let Some(mut column) = self.chunk_or_log(pos.chunk()) else {
            return;
        };
        let (x, y, z) = pos.local();

        let mut notify: Vec<(u8, RuntimeId)> = Vec::new();
        match liquid {
            None => {
                for layer in 0..2u8 {
                    let rid = column.chunk.runtime_id(x, y, z, layer);
                    if self.registry.caps(rid).liquid.is_some() {
                        column.chunk.set_runtime_id(x, y, z, layer, air);
                        notify.push((layer, air));
                    }
                }
            }
            Some(liq) => {
                let rid0 = column.chunk.runtime_id(x, y, z, 0);
                let caps0 = self.registry.caps(rid0);
                if rid0 == air || caps0.liquid.is_some() || caps0.replaceable {
                    column.chunk.set_runtime_id(x, y, z, 0, liq.rid);
                    notify.push((0, liq.rid));
                    let rid1 = column.chunk.runtime_id(x, y, z, 1);
                    if rid1 != air {
                        column.chunk.set_runtime_id(x, y, z, 1, air);
                        notify.push((1, air));
                    }
                } else if caps0
                    .displacer
                    .as_ref()
                    .is_some_and(|d| d.can_displace(liq))
                {
                    column.chunk.set_runtime_id(x, y, z, 1, liq.rid);
                    notify.push((1, liq.rid));
                } else {
                    return;
                }
            }
        }
        let viewers = column.viewers.clone();
        drop(column);

        for (layer, rid) in notify {
            for v in &viewers {
                v.view_block_update(pos, Block::new(rid), layer);
            }
        }
        if liquid.is_none() {
            self.do_block_updates_around(pos);
        }
    }

    /// Paste a structure with its lowest corner at `origin`. Each touched
    /// chunk is locked exactly once and its viewers get a single whole-chunk
    /// notification, bypassing the per-block path entirely.
    pub fn build_structure(&self, origin: BlockPos, structure: &dyn Structure) {
        let [dx, dy, dz] = structure.dimensions();
        if dx <= 0 || dy <= 0 || dz <= 0 {
            return;
        }
        let air = self.air();
        let y0 = origin.y.max(MIN_Y);
        let y1 = (origin.y + dy - 1).min(MAX_Y);

        for cx in (origin.x >> 4)..=((origin.x + dx - 1) >> 4) {
            for cz in (origin.z >> 4)..=((origin.z + dz - 1) >> 4) {
                let cpos = ChunkPos::new(cx, cz);
                let Some(mut column) = self.chunk_or_log(cpos) else {
                    continue;
                };
                let base = cpos.block_origin(0);
                let x0 = origin.x.max(base.x);
                let x1 = (origin.x + dx - 1).min(base.x + 15);
                let z0 = origin.z.max(base.z);
                let z1 = (origin.z + dz - 1).min(base.z + 15);

                for wx in x0..=x1 {
                    for wz in z0..=z1 {
                        for wy in y0..=y1 {
                            let (block, liquid) =
                                structure.at(wx - origin.x, wy - origin.y, wz - origin.z);
                            let pos = BlockPos::new(wx, wy, wz);
                            let (lx, ly, lz) = pos.local();
                            if let Some(b) = &block {
                                column.chunk.set_runtime_id(lx, ly, lz, 0, b.rid);
                                if self.registry.caps(b.rid).stores_nbt {
                                    match &b.nbt {
                                        Some(nbt) => {
                                            column.block_entities.insert(pos, (**nbt).clone());
                                        }
                                        None => {
                                            column.block_entities.remove(&pos);
                                        }
                                    }
                                } else {
                                    column.block_entities.remove(&pos);
                                }
                            }
                            match (&block, liquid) {
                                (Some(_), Some(liq)) => {
                                    column.chunk.set_runtime_id(lx, ly, lz, 1, liq.rid)
                                }
                                (Some(_), None) => {
                                    column.chunk.set_runtime_id(lx, ly, lz, 1, air)
                                }
                                (None, Some(liq)) => {
                                    column.chunk.set_runtime_id(lx, ly, lz, 0, liq.rid)
                                }
                                (None, None) => {}
                            }
                        }
                    }
                }
                fill_light(&mut column.chunk, &self.registry);
                let snapshot = Arc::new(column.chunk.clone());
                let viewers = column.viewers.clone();
                drop(column);
                for v in viewers {
                    v.view_chunk(cpos, Arc::clone(&snapshot));
                }
            }
        }
    }

    // ── Light and terrain queries ────────────────────────────────────────

    pub fn light(&self, pos: BlockPos) -> u8 {
        if pos.out_of_bounds() {
            return 0;
        }
        let Some(column) = self.chunk_or_log(pos.chunk()) else {
            return 0;
        };
        let (x, y, z) = pos.local();
        column.chunk.block_light(x, y, z)
    }

    pub fn sky_light(&self, pos: BlockPos) -> u8 {
        if pos.y > MAX_Y {
            return 15;
        }
        if pos.y < MIN_Y {
            return 0;
        }
        let Some(column) = self.chunk_or_log(pos.chunk()) else {
            return 0;
        };
        let (x, y, z) = pos.local();
        column.chunk.sky_light(x, y, z)
    }

    /// The y of the highest non-air block in the column of (x, z), or one
    /// below the world floor if the column is empty.
    pub fn highest_block(&self, x: i32, z: i32) -> i32 {
        let Some(column) = self.chunk_or_log(ChunkPos::new(x >> 4, z >> 4)) else {
            return MIN_Y - 1;
        };
        column.chunk.highest_block((x & 0xF) as u8, (z & 0xF) as u8) as i32
    }

    pub fn highest_light_blocker(&self, x: i32, z: i32) -> i32 {
        let Some(column) = self.chunk_or_log(ChunkPos::new(x >> 4, z >> 4)) else {
            return MIN_Y - 1;
        };
        column
            .chunk
            .highest_light_blocker(&self.registry, (x & 0xF) as u8, (z & 0xF) as u8)
            as i32
    }

    // ── Block updates ────────────────────────────────────────────────────

    /// Schedule a block update at `pos` after `delay`. A position with an
    /// update already pending keeps its original deadline.
    pub fn schedule_block_update(&self, pos: BlockPos, delay: Duration) {
        if pos.out_of_bounds() {
            return;
        }
        let ticks = (delay.as_nanos() / self.tick_interval.as_nanos().max(1)).max(1) as i64;
        let deadline = self.current_tick() + ticks;
        self.updates.lock().scheduled.entry(pos).or_insert(deadline);
    }

    /// Queue a neighbour update for `pos` and its six face neighbours,
    /// executed in the next tick's scheduled phase.
    fn do_block_updates_around(&self, pos: BlockPos) {
        let mut updates = self.updates.lock();
        updates.neighbour.push(NeighbourUpdate { pos, changed: pos });
        for n in pos.neighbours() {
            updates.neighbour.push(NeighbourUpdate { pos: n, changed: pos });
        }
    }

    // ── Settings ─────────────────────────────────────────────────────────

    pub fn name(&self) -> String {
        self.set.lock().name.clone()
    }

    /// The world spawn. A spawn above the world ceiling is clamped onto the
    /// terrain surface.
    pub fn spawn(&self) -> BlockPos {
        let mut spawn = self.set.lock().spawn;
        if spawn.out_of_bounds() {
            spawn.y = self.highest_block(spawn.x, spawn.z) + 1;
        }
        spawn
    }

    pub fn set_spawn(&self, spawn: BlockPos) {
        self.set.lock().spawn = spawn;
        for v in self.viewers.lock().clone() {
            v.view_world_spawn(spawn);
        }
    }

    pub fn time(&self) -> i64 {
        self.set.lock().time
    }

    pub fn set_time(&self, time: i64) {
        self.set.lock().time = time;
        for v in self.viewers.lock().clone() {
            v.view_time(time);
        }
    }

    /// Resume the day/night cycle.
    pub fn start_time(&self) {
        self.set.lock().time_cycle = true;
    }

    /// Freeze world time at its current value.
    pub fn stop_time(&self) {
        self.set.lock().time_cycle = false;
    }

    pub fn current_tick(&self) -> i64 {
        self.set.lock().current_tick
    }

    pub fn default_game_mode(&self) -> GameMode {
        self.set.lock().default_game_mode
    }

    pub fn set_default_game_mode(&self, mode: GameMode) {
        self.set.lock().default_game_mode = mode;
    }

    pub fn difficulty(&self) -> Difficulty {
        self.set.lock().difficulty
    }

    pub fn set_difficulty(&self, difficulty: Difficulty) {
        self.set.lock().difficulty = difficulty;
    }

    pub fn set_random_tick_speed(&self, speed: u32) {
        self.random_tick_speed.store(speed, Ordering::Relaxed);
    }

    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    /// Stop persisting anything: chunk saves, entity saves and the settings
    /// write on close all become no-ops.
    pub fn set_read_only(&self) {
        self.read_only.store(true, Ordering::Relaxed);
    }

    // ── Viewers ──────────────────────────────────────────────────────────

    /// Register a world-level viewer. It immediately receives the current
    /// time and spawn; per-chunk content requires [`World::subscribe`].
    pub fn add_viewer(&self, viewer: Arc<dyn Viewer>) {
        self.viewers.lock().push(Arc::clone(&viewer));
        let (time, spawn) = {
            let set = self.set.lock();
            (set.time, set.spawn)
        };
        viewer.view_time(time);
        viewer.view_world_spawn(spawn);
    }

    pub fn remove_viewer(&self, viewer: &Arc<dyn Viewer>) {
        self.viewers.lock().retain(|v| !Arc::ptr_eq(v, viewer));
    }

    /// Subscribe a viewer to one chunk. It is shown the chunk's current
    /// entities; block updates follow as they happen.
    pub fn subscribe(&self, pos: ChunkPos, viewer: Arc<dyn Viewer>) {
        let Some(mut column) = self.chunk_or_log(pos) else {
            return;
        };
        column.viewers.push(Arc::clone(&viewer));
        let entities = column.entities.clone();
        drop(column);
        for e in entities {
            viewer.view_entity(&e);
        }
    }

    /// Remove a viewer from one chunk, hiding its entities. Never loads: a
    /// chunk that is not cached has no viewers to remove.
    pub fn unsubscribe(&self, pos: ChunkPos, viewer: &Arc<dyn Viewer>) {
        let Some(data) = self.cached(pos) else {
            return;
        };
        let mut column = data.lock();
        column.viewers.retain(|v| !Arc::ptr_eq(v, viewer));
        let entities = column.entities.clone();
        drop(column);
        for e in entities {
            viewer.hide_entity(&e);
        }
    }

    /// The viewers subscribed to the chunk containing `pos`.
    pub fn viewers(&self, pos: Vec3) -> Vec<Arc<dyn Viewer>> {
        match self.cached(pos.chunk()) {
            Some(data) => data.lock().viewers.clone(),
            None => Vec::new(),
        }
    }

    pub fn add_particle(&self, pos: Vec3, particle: Particle) {
        for v in self.viewers(pos) {
            v.view_particle(pos, particle.clone());
        }
    }

    pub fn play_sound(&self, pos: Vec3, sound: Sound) {
        for v in self.viewers(pos) {
            v.view_sound(pos, sound.clone());
        }
    }

    // ── Entities ─────────────────────────────────────────────────────────

    /// Add an entity to this world, migrating it out of any world it
    /// currently belongs to. The entity becomes resident in the chunk of its
    /// current position and is shown to that chunk's viewers.
    pub fn add_entity(&self, entity: Arc<dyn Entity>) {
        if let Some(old) = world_of_entity(entity.id()) {
            if !std::ptr::eq(Arc::as_ptr(&old), self) {
                old.remove_entity(&entity);
            }
        }
        entity::register_entity_world(entity.id(), self.myself.clone());

        let pos = entity.position().chunk();
        self.entities.write().insert(
            entity.id(),
            EntityRecord {
                entity: Arc::clone(&entity),
                chunk_pos: pos,
            },
        );
        let Some(mut column) = self.chunk_or_log(pos) else {
            return;
        };
        column.entities.push(Arc::clone(&entity));
        let viewers = column.viewers.clone();
        drop(column);
        for v in viewers {
            v.view_entity(&entity);
        }
    }

    /// Remove an entity. If the chunk it was last known in has been evicted,
    /// the entity is presumed gone with it; the removal becomes a no-op,
    /// logged so the loss is visible.
    pub fn remove_entity(&self, entity: &Arc<dyn Entity>) {
        let record = self.entities.write().remove(&entity.id());
        entity::unregister_entity_world(entity.id());
        let Some(record) = record else {
            return;
        };
        let Some(data) = self.cached(record.chunk_pos) else {
            warn!(
                "entity {} removed while its chunk {} is not cached; presumed unloaded with it",
                entity.id(),
                record.chunk_pos
            );
            return;
        };
        let mut column = data.lock();
        column.entities.retain(|e| !Arc::ptr_eq(e, entity));
        let viewers = column.viewers.clone();
        drop(column);
        for v in viewers {
            v.hide_entity(entity);
        }
    }

    /// Entities whose bounding box intersects `aabb`. Only cached chunks are
    /// scanned; unloaded regions contain no entities by definition.
    pub fn colliding_entities(&self, aabb: &Aabb) -> Vec<Arc<dyn Entity>> {
        self.scan_entities(aabb, |e| aabb.intersects(&e.aabb()))
    }

    /// Entities whose position lies inside `aabb`.
    pub fn entities_within(&self, aabb: &Aabb) -> Vec<Arc<dyn Entity>> {
        self.scan_entities(aabb, |e| aabb.contains(e.position()))
    }

    /// All entities currently resident in this world.
    pub fn entities(&self) -> Vec<Arc<dyn Entity>> {
        self.entities
            .read()
            .values()
            .map(|r| Arc::clone(&r.entity))
            .collect()
    }

    fn scan_entities(
        &self,
        aabb: &Aabb,
        keep: impl Fn(&Arc<dyn Entity>) -> bool,
    ) -> Vec<Arc<dyn Entity>> {
        // Entities may straddle a chunk border while being resident one
        // chunk over, so the search window grows by a fixed margin.
        const MARGIN: f64 = 3.0;
        let min_x = ((aabb.min.x - MARGIN) as i32) >> 4;
        let max_x = ((aabb.max.x + MARGIN) as i32) >> 4;
        let min_z = ((aabb.min.z - MARGIN) as i32) >> 4;
        let max_z = ((aabb.max.z + MARGIN) as i32) >> 4;

        let mut columns = Vec::new();
        {
            let chunks = self.chunks.lock();
            for cx in min_x..=max_x {
                for cz in min_z..=max_z {
                    if let Some(data) = chunks.map.get(&ChunkPos::new(cx, cz)) {
                        columns.push(Arc::clone(data));
                    }
                }
            }
        }
        let mut found = Vec::new();
        for data in columns {
            let column = data.lock();
            found.extend(column.entities.iter().filter(|e| keep(e)).cloned());
        }
        found
    }

    // ── Tick loop ────────────────────────────────────────────────────────

    /// One simulation step. With no viewers the world is paused: nothing
    /// advances, not even the tick counter, until someone is watching again.
    fn tick(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.viewers.lock().is_empty() {
            return;
        }
        let (current, time) = {
            let mut set = self.set.lock();
            set.current_tick += 1;
            if set.time_cycle {
                set.time += 1;
            }
            (set.current_tick, set.time)
        };
        if current % 20 == 0 {
            for v in self.viewers.lock().clone() {
                v.view_time(time);
            }
        }
        self.tick_entities(current);
        self.tick_random_blocks(current);
        self.tick_scheduled_blocks(current);
    }

    /// The chunk positions that currently have at least one subscribed
    /// viewer.
    fn viewer_chunks(&self) -> HashSet<ChunkPos> {
        let snapshot: Vec<(ChunkPos, ChunkData)> = {
            let chunks = self.chunks.lock();
            chunks
                .map
                .iter()
                .map(|(&p, d)| (p, Arc::clone(d)))
                .collect()
        };
        let mut with_viewers = HashSet::new();
        for (pos, data) in snapshot {
            if !data.lock().viewers.is_empty() {
                with_viewers.insert(pos);
            }
        }
        with_viewers
    }

    /// Recompute residency for every entity, relocating the ones that
    /// crossed a chunk border, then tick the tickable entities in watched
    /// chunks with no locks held.
    fn tick_entities(&self, current_tick: i64) {
        let mut moves: Vec<(Arc<dyn Entity>, ChunkPos, ChunkPos)> = Vec::new();
        {
            let records = self.entities.read();
            for record in records.values() {
                let now = record.entity.position().chunk();
                if now != record.chunk_pos {
                    moves.push((Arc::clone(&record.entity), record.chunk_pos, now));
                }
            }
        }

        for (entity, old, new) in moves {
            let viewers_before = match self.cached(old) {
                Some(data) => {
                    let mut column = data.lock();
                    column.entities.retain(|e| !Arc::ptr_eq(e, &entity));
                    column.viewers.clone()
                }
                None => Vec::new(),
            };
            let viewers_after = match self.chunk_or_log(new) {
                Some(mut column) => {
                    column.entities.push(Arc::clone(&entity));
                    column.viewers.clone()
                }
                None => Vec::new(),
            };
            if let Some(record) = self.entities.write().get_mut(&entity.id()) {
                record.chunk_pos = new;
            }
            // Diff the viewer sets so a boundary crossing shows and hides
            // the entity exactly once per affected viewer.
            for v in &viewers_before {
                if !viewers_after.iter().any(|w| Arc::ptr_eq(v, w)) {
                    v.hide_entity(&entity);
                }
            }
            for v in &viewers_after {
                if !viewers_before.iter().any(|w| Arc::ptr_eq(v, w)) {
                    v.view_entity(&entity);
                }
            }
        }

        let watched = self.viewer_chunks();
        let tickers: Vec<Arc<dyn Entity>> = {
            let records = self.entities.read();
            records
                .values()
                .filter(|r| watched.contains(&r.chunk_pos) && r.entity.as_ticker().is_some())
                .map(|r| Arc::clone(&r.entity))
                .collect()
        };
        for entity in tickers {
            if let Some(ticker) = entity.as_ticker() {
                ticker.tick(self, current_tick);
            }
        }
    }

    /// Draw random block samples in every chunk near a viewer and tick the
    /// blocks that want it; block entities in those chunks tick every time.
    fn tick_random_blocks(&self, current_tick: i64) {
        let speed = self.random_tick_speed.load(Ordering::Relaxed);
        let viewer_chunks: Vec<ChunkPos> = self
            .viewers
            .lock()
            .iter()
            .map(|v| v.position().chunk())
            .collect();
        if viewer_chunks.is_empty() {
            return;
        }
        let snapshot: Vec<(ChunkPos, ChunkData)> = {
            let chunks = self.chunks.lock();
            chunks
                .map
                .iter()
                .map(|(&p, d)| (p, Arc::clone(d)))
                .collect()
        };

        let mut rng = StdRng::seed_from_u64(self.rng.lock().next_u64());
        let mut r4 = Rand4::new();
        let air = self.air();
        let mut random_ticks = Vec::new();
        let mut entity_ticks = Vec::new();

        for (pos, data) in snapshot {
            let in_range = viewer_chunks.iter().any(|v| {
                let dx = v.x - pos.x;
                let dz = v.z - pos.z;
                dx * dx + dz * dz <= self.sim_dist_sq
            });
            if !in_range {
                continue;
            }
            let column = data.lock();

            for (&bpos, _) in &column.block_entities {
                let (x, y, z) = bpos.local();
                let rid = column.chunk.runtime_id(x, y, z, 0);
                if let Some(ticker) = &self.registry.caps(rid).block_entity_tick {
                    entity_ticks.push((bpos, Arc::clone(ticker)));
                }
            }

            if speed == 0 {
                continue;
            }
            for index in 0..SUB_CHUNK_COUNT {
                let Some(sub) = column.chunk.sub_chunk(index) else {
                    continue;
                };
                if sub.storages()[0].uniform(air) {
                    continue;
                }
                for _ in 0..speed {
                    let x = r4.next(&mut rng);
                    let y = r4.next(&mut rng);
                    let z = r4.next(&mut rng);
                    let rid = sub.at(x, y, z, 0, air);
                    if let Some(ticker) = &self.registry.caps(rid).random_tick {
                        let world_pos = BlockPos::new(
                            (pos.x << 4) + x as i32,
                            ((index as i32) << 4) + y as i32,
                            (pos.z << 4) + z as i32,
                        );
                        random_ticks.push((world_pos, Arc::clone(ticker)));
                    }
                }
            }
        }

        for (pos, ticker) in random_ticks {
            ticker.random_tick(self, pos, &mut rng);
        }
        for (pos, ticker) in entity_ticks {
            ticker.tick(self, pos, current_tick);
        }
    }

    /// Fire due scheduled updates and the accumulated neighbour updates.
    /// Entries are removed before their callback runs, so a callback
    /// re-scheduling its own position gets exactly one pending entry for a
    /// later tick, never a double fire in this one.
    fn tick_scheduled_blocks(&self, current_tick: i64) {
        let (due, neighbour) = {
            let mut updates = self.updates.lock();
            let due: Vec<BlockPos> = updates
                .scheduled
                .iter()
                .filter(|&(_, &deadline)| deadline <= current_tick)
                .map(|(&pos, _)| pos)
                .collect();
            for pos in &due {
                updates.scheduled.remove(pos);
            }
            (due, std::mem::take(&mut updates.neighbour))
        };

        let mut rng = StdRng::seed_from_u64(self.rng.lock().next_u64());
        for pos in due {
            let block = self.block(pos);
            if let Some(ticker) = self.registry.caps(block.rid).scheduled_tick.clone() {
                ticker.scheduled_tick(self, pos, &mut rng);
            }
            if let Some(liq) = self.additional_liquid(pos) {
                if let Some(ticker) = self.registry.caps(liq.rid).scheduled_tick.clone() {
                    ticker.scheduled_tick(self, pos, &mut rng);
                }
            }
        }
        for update in neighbour {
            let block = self.block(update.pos);
            if let Some(ticker) = self.registry.caps(block.rid).neighbour_update.clone() {
                ticker.neighbour_update(self, update.pos, update.changed);
            }
            if let Some(liq) = self.additional_liquid(update.pos) {
                if let Some(ticker) = self.registry.caps(liq.rid).neighbour_update.clone() {
                    ticker.neighbour_update(self, update.pos, update.changed);
                }
            }
        }
    }

    // ── Persistence and shutdown ─────────────────────────────────────────

    /// Evict every chunk without a single viewer, saving it on the way out.
    /// Runs from the janitor thread at a fixed interval.
    fn evict_unused(&self) {
        let victims: Vec<(ChunkPos, ChunkData)> = {
            let mut chunks = self.chunks.lock();
            let positions: Vec<ChunkPos> = chunks
                .map
                .iter()
                .filter(|(_, data)| data.lock().viewers.is_empty())
                .map(|(&pos, _)| pos)
                .collect();
            let mut out = Vec::with_capacity(positions.len());
            for pos in positions {
                if let Some(data) = chunks.map.remove(&pos) {
                    out.push((pos, data));
                }
                if chunks.last.as_ref().is_some_and(|(p, _)| *p == pos) {
                    chunks.last = None;
                }
            }
            out
        };

        for (pos, data) in victims {
            let mut column = data.lock();
            self.save_column(pos, &mut column);
            let residents = std::mem::take(&mut column.entities);
            drop(column);
            // Evicted entities leave the residency map with their chunk;
            // they come back when the provider loads the chunk again.
            let mut records = self.entities.write();
            for e in &residents {
                records.remove(&e.id());
                entity::unregister_entity_world(e.id());
            }
        }
    }

    /// Permanently disable eviction, trading memory growth for the guarantee
    /// that no chunk or resident entity is unloaded before close.
    pub fn close_chunk_cache_janitor(&self) {
        let _ = self.stop_janitor.send(());
    }

    fn save_column(&self, pos: ChunkPos, column: &mut ChunkColumn) {
        if self.read_only.load(Ordering::Relaxed) {
            return;
        }
        let provider = Arc::clone(&self.provider.lock());
        column.chunk.compact();
        if let Err(e) = provider.save_chunk(pos, &column.chunk) {
            error!("saving chunk {pos}: {e:#}");
        }
        let saveable: Vec<&dyn SaveableEntity> = column
            .entities
            .iter()
            .filter_map(|e| e.as_saveable())
            .collect();
        if let Err(e) = provider.save_entities(pos, &saveable) {
            error!("saving entities of chunk {pos}: {e:#}");
        }
        let nbt: Vec<Value> = column
            .block_entities
            .iter()
            .map(|(p, v)| nbt_with_pos(v, *p))
            .collect();
        if let Err(e) = provider.save_block_nbt(pos, &nbt) {
            error!("saving block entities of chunk {pos}: {e:#}");
        }
    }

    /// Shut the world down: stop the ticker and wait for it, stop the
    /// janitor, save every chunk and the settings, and close the provider.
    /// A hard barrier; when it returns, everything is on disk.
    pub fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.stop_tick.send(());
        let _ = self.done_tick.recv();
        let _ = self.stop_janitor.send(());

        let all: Vec<(ChunkPos, ChunkData)> = {
            let mut chunks = self.chunks.lock();
            chunks.last = None;
            chunks.map.drain().collect()
        };
        for (pos, data) in all {
            let mut column = data.lock();
            self.save_column(pos, &mut column);
            let residents = std::mem::take(&mut column.entities);
            drop(column);
            for e in residents {
                entity::unregister_entity_world(e.id());
                e.close();
            }
        }
        self.entities.write().clear();

        let provider = Arc::clone(&self.provider.lock());
        if !self.read_only.load(Ordering::Relaxed) {
            let settings = self.set.lock().clone();
            provider
                .save_settings(&settings)
                .context("saving world settings")?;
        }
        provider.close().context("closing the provider")
    }
}

fn nbt_with_pos(nbt: &Value, pos: BlockPos) -> Value {
    let mut out = nbt.clone();
    if let Value::Compound(map) = &mut out {
        map.insert("x".to_string(), Value::Int(pos.x));
        map.insert("y".to_string(), Value::Int(pos.y));
        map.insert("z".to_string(), Value::Int(pos.z));
    }
    out
}

fn block_pos_of_nbt(nbt: &Value) -> Option<BlockPos> {
    let Value::Compound(map) = nbt else {
        return None;
    };
    let coord = |key: &str| match map.get(key) {
        Some(Value::Int(v)) => Some(*v),
        _ => None,
    };
    Some(BlockPos::new(coord("x")?, coord("y")?, coord("z")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand4_uses_sixteen_samples_per_draw() {
        struct Counting(u64);
        impl RngCore for Counting {
            fn next_u32(&mut self) -> u32 {
                self.next_u64() as u32
            }
            fn next_u64(&mut self) -> u64 {
                self.0 += 1;
                0x0123_4567_89AB_CDEF
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                for b in dest {
                    *b = 0;
                }
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                self.fill_bytes(dest);
                Ok(())
            }
        }

        let mut rng = Counting(0);
        let mut r4 = Rand4::new();
        let samples: Vec<u8> = (0..16).map(|_| r4.next(&mut rng)).collect();
        assert_eq!(rng.0, 1);
        assert_eq!(samples[0], 0xF);
        assert_eq!(samples[15], 0x0);
        assert!(samples.iter().all(|&s| s < 16));

        r4.next(&mut rng);
        assert_eq!(rng.0, 2);
    }

    #[test]
    fn nbt_position_round_trip() {
        let pos = BlockPos::new(-3, 64, 17);
        let nbt = nbt_with_pos(
            &Value::Compound(
                [("id".to_string(), Value::String("chest".into()))]
                    .into_iter()
                    .collect(),
            ),
            pos,
        );
        assert_eq!(block_pos_of_nbt(&nbt), Some(pos));
        assert_eq!(block_pos_of_nbt(&Value::Int(1)), None);
    }
}
