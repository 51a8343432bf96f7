//! Chunk columns: paletted block storage, light nibbles, biomes and the
//! serialised forms used for the network and for disk persistence.
//!
//! A column is 16 vertically stacked sub-chunks of 16x16x16 blocks each.
//! Sub-chunks are created lazily; a missing sub-chunk reads as all air with
//! full sky light. The world keeps every column behind its own mutex, so the
//! types here are plain data with no interior locking.

mod decode;
mod encode;
mod light;
mod storage;

pub use decode::{decode_network, decode_serialised, read_serialised, DecodeError};
pub use encode::{encode_network, encode_serialised, SerialisedChunk, SerialisedSubChunk};
pub use light::{fill_light, spread_light};
pub use storage::PalettedStorage;

use crate::block::{BlockRegistry, RuntimeId};

/// Lowest block y coordinate in a world.
pub const MIN_Y: i32 = 0;
/// Highest block y coordinate in a world.
pub const MAX_Y: i32 = 255;
/// Sub-chunks stacked in one column.
pub const SUB_CHUNK_COUNT: usize = 16;

/// A 16x16x16 segment of a chunk column.
///
/// Layer 0 holds the regular blocks; layer 1, when present, holds liquids
/// sharing a cell with a displacing layer-0 block. Light values are nibbles,
/// two per byte, in the same cell order as block storage.
#[derive(Clone)]
pub struct SubChunk {
    storages: Vec<PalettedStorage>,
    block_light: [u8; 2048],
    sky_light: [u8; 2048],
}

#[inline]
const fn nibble_cell(x: u8, y: u8, z: u8) -> usize {
    ((x as usize) << 8) | ((z as usize) << 4) | (y as usize)
}

#[inline]
fn nibble_at(data: &[u8; 2048], cell: usize) -> u8 {
    let b = data[cell >> 1];
    if cell & 1 == 0 { b & 0xF } else { b >> 4 }
}

#[inline]
fn set_nibble(data: &mut [u8; 2048], cell: usize, v: u8) {
    let b = &mut data[cell >> 1];
    if cell & 1 == 0 {
        *b = (*b & 0xF0) | (v & 0xF);
    } else {
        *b = (*b & 0x0F) | ((v & 0xF) << 4);
    }
}

impl SubChunk {
    pub fn empty(air: RuntimeId) -> Self {
        Self {
            storages: vec![PalettedStorage::filled(air)],
            block_light: [0; 2048],
            sky_light: [0; 2048],
        }
    }

    pub(crate) fn with_storages(air: RuntimeId, mut storages: Vec<PalettedStorage>) -> Self {
        if storages.is_empty() {
            storages.push(PalettedStorage::filled(air));
        }
        Self {
            storages,
            block_light: [0; 2048],
            sky_light: [0; 2048],
        }
    }

    pub fn storages(&self) -> &[PalettedStorage] {
        &self.storages
    }

    /// The storage at `layer`, creating intermediate layers filled with air
    /// on first write.
    fn storage_mut(&mut self, layer: u8, air: RuntimeId) -> &mut PalettedStorage {
        while self.storages.len() <= layer as usize {
            self.storages.push(PalettedStorage::filled(air));
        }
        &mut self.storages[layer as usize]
    }

    pub fn at(&self, x: u8, y: u8, z: u8, layer: u8, air: RuntimeId) -> RuntimeId {
        match self.storages.get(layer as usize) {
            Some(s) => s.at(x, y, z),
            None => air,
        }
    }

    pub fn set(&mut self, x: u8, y: u8, z: u8, layer: u8, rid: RuntimeId, air: RuntimeId) {
        self.storage_mut(layer, air).set(x, y, z, rid);
    }

    /// Whether layer 0 is entirely air. Uniform-air sub-chunks are skipped by
    /// random ticking and emitted in the short network form.
    pub fn air_only(&self, air: RuntimeId) -> bool {
        self.storages[0].uniform(air)
            && self.storages.iter().skip(1).all(|s| s.uniform(air))
    }

    pub fn block_light(&self, x: u8, y: u8, z: u8) -> u8 {
        nibble_at(&self.block_light, nibble_cell(x, y, z))
    }

    pub fn set_block_light(&mut self, x: u8, y: u8, z: u8, v: u8) {
        set_nibble(&mut self.block_light, nibble_cell(x, y, z), v);
    }

    pub fn sky_light(&self, x: u8, y: u8, z: u8) -> u8 {
        nibble_at(&self.sky_light, nibble_cell(x, y, z))
    }

    pub fn set_sky_light(&mut self, x: u8, y: u8, z: u8, v: u8) {
        set_nibble(&mut self.sky_light, nibble_cell(x, y, z), v);
    }

    pub(crate) fn clear_light(&mut self) {
        self.block_light = [0; 2048];
        self.sky_light = [0; 2048];
    }

    pub fn compact(&mut self, air: RuntimeId) {
        for s in &mut self.storages {
            s.compact();
        }
        // Trailing all-air layers carry no information.
        while self.storages.len() > 1
            && self.storages.last().is_some_and(|s| s.uniform(air))
        {
            self.storages.pop();
        }
    }
}

/// One chunk column: up to 16 sub-chunks plus a 16x16 biome grid.
#[derive(Clone)]
pub struct Chunk {
    air: RuntimeId,
    sub: [Option<Box<SubChunk>>; SUB_CHUNK_COUNT],
    biomes: [u8; 256],
}

impl Chunk {
    pub fn new(air: RuntimeId) -> Self {
        Self {
            air,
            sub: Default::default(),
            biomes: [0; 256],
        }
    }

    pub(crate) fn with_sub_chunks(
        air: RuntimeId,
        sub: [Option<Box<SubChunk>>; SUB_CHUNK_COUNT],
        biomes: [u8; 256],
    ) -> Self {
        Self { air, sub, biomes }
    }

    /// The runtime ID of air in the registry this chunk was created against.
    pub fn air(&self) -> RuntimeId {
        self.air
    }

    pub fn sub_chunk(&self, index: usize) -> Option<&SubChunk> {
        self.sub.get(index).and_then(|s| s.as_deref())
    }

    pub(crate) fn sub_chunk_mut(&mut self, index: usize) -> &mut SubChunk {
        let air = self.air;
        self.sub[index].get_or_insert_with(|| Box::new(SubChunk::empty(air)))
    }

    /// The runtime ID at local (x, y, z) on the given layer. Out-of-range y
    /// reads as air.
    pub fn runtime_id(&self, x: u8, y: i16, z: u8, layer: u8) -> RuntimeId {
        if y < MIN_Y as i16 || y > MAX_Y as i16 {
            return self.air;
        }
        match &self.sub[(y >> 4) as usize] {
            Some(s) => s.at(x, (y & 0xF) as u8, z, layer, self.air),
            None => self.air,
        }
    }

    /// Store a runtime ID at local (x, y, z) on the given layer. Writes out of
    /// the vertical range are dropped.
    pub fn set_runtime_id(&mut self, x: u8, y: i16, z: u8, layer: u8, rid: RuntimeId) {
        if y < MIN_Y as i16 || y > MAX_Y as i16 {
            return;
        }
        // An absent sub-chunk reads as air on every layer.
        if rid == self.air && self.sub[(y >> 4) as usize].is_none() {
            return;
        }
        let air = self.air;
        self.sub_chunk_mut((y >> 4) as usize)
            .set(x, (y & 0xF) as u8, z, layer, rid, air);
    }

    pub fn block_light(&self, x: u8, y: i16, z: u8) -> u8 {
        if y < MIN_Y as i16 || y > MAX_Y as i16 {
            return 0;
        }
        match &self.sub[(y >> 4) as usize] {
            Some(s) => s.block_light(x, (y & 0xF) as u8, z),
            None => 0,
        }
    }

    pub fn set_block_light(&mut self, x: u8, y: i16, z: u8, v: u8) {
        if y < MIN_Y as i16 || y > MAX_Y as i16 {
            return;
        }
        self.sub_chunk_mut((y >> 4) as usize)
            .set_block_light(x, (y & 0xF) as u8, z, v);
    }

    /// Sky light at local (x, y, z). Positions above any generated sub-chunk
    /// read as full daylight.
    pub fn sky_light(&self, x: u8, y: i16, z: u8) -> u8 {
        if y > MAX_Y as i16 {
            return 15;
        }
        if y < MIN_Y as i16 {
            return 0;
        }
        match &self.sub[(y >> 4) as usize] {
            Some(s) => s.sky_light(x, (y & 0xF) as u8, z),
            None => 15,
        }
    }

    pub fn set_sky_light(&mut self, x: u8, y: i16, z: u8, v: u8) {
        if y < MIN_Y as i16 || y > MAX_Y as i16 {
            return;
        }
        self.sub_chunk_mut((y >> 4) as usize)
            .set_sky_light(x, (y & 0xF) as u8, z, v);
    }

    /// The y of the highest non-air block in the column, or `MIN_Y - 1` if the
    /// column is all air.
    pub fn highest_block(&self, x: u8, z: u8) -> i16 {
        for index in (0..SUB_CHUNK_COUNT).rev() {
            let Some(s) = &self.sub[index] else { continue };
            for local_y in (0..16u8).rev() {
                if s.at(x, local_y, z, 0, self.air) != self.air {
                    return ((index as i16) << 4) | local_y as i16;
                }
            }
        }
        (MIN_Y - 1) as i16
    }

    /// The y of the highest block filtering any light, used as the starting
    /// point for sky light propagation.
    pub fn highest_light_blocker(&self, reg: &BlockRegistry, x: u8, z: u8) -> i16 {
        for index in (0..SUB_CHUNK_COUNT).rev() {
            let Some(s) = &self.sub[index] else { continue };
            for local_y in (0..16u8).rev() {
                let rid = s.at(x, local_y, z, 0, self.air);
                if reg.caps(rid).light_filter > 0 {
                    return ((index as i16) << 4) | local_y as i16;
                }
            }
        }
        (MIN_Y - 1) as i16
    }

    pub fn biome(&self, x: u8, z: u8) -> u8 {
        self.biomes[((z as usize) << 4) | x as usize]
    }

    pub fn set_biome(&mut self, x: u8, z: u8, biome: u8) {
        self.biomes[((z as usize) << 4) | x as usize] = biome;
    }

    pub fn biomes(&self) -> &[u8; 256] {
        &self.biomes
    }

    /// Shrink every storage to its minimal form and drop all-air sub-chunks
    /// above the highest occupied one. Run before saving.
    pub fn compact(&mut self) {
        let air = self.air;
        for sub in self.sub.iter_mut().flatten() {
            sub.compact(air);
        }
        for index in (0..SUB_CHUNK_COUNT).rev() {
            match &self.sub[index] {
                Some(s) if s.air_only(air) => self.sub[index] = None,
                Some(_) => break,
                None => continue,
            }
        }
    }

    /// The number of sub-chunks up to and including the highest present one.
    pub(crate) fn highest_sub_chunk(&self) -> usize {
        (0..SUB_CHUNK_COUNT)
            .rev()
            .find(|&i| self.sub[i].is_some())
            .map_or(0, |i| i + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AIR: RuntimeId = RuntimeId(0);
    const STONE: RuntimeId = RuntimeId(1);

    #[test]
    fn missing_sub_chunk_reads_air() {
        let c = Chunk::new(AIR);
        assert_eq!(c.runtime_id(5, 100, 5, 0), AIR);
        assert_eq!(c.sky_light(5, 100, 5), 15);
        assert_eq!(c.block_light(5, 100, 5), 0);
    }

    #[test]
    fn set_and_read_across_sub_chunks() {
        let mut c = Chunk::new(AIR);
        c.set_runtime_id(1, 5, 2, 0, STONE);
        c.set_runtime_id(1, 200, 2, 0, STONE);
        assert_eq!(c.runtime_id(1, 5, 2, 0), STONE);
        assert_eq!(c.runtime_id(1, 200, 2, 0), STONE);
        assert_eq!(c.runtime_id(1, 6, 2, 0), AIR);
    }

    #[test]
    fn writing_air_does_not_materialise_sub_chunks() {
        let mut c = Chunk::new(AIR);
        c.set_runtime_id(0, 40, 0, 0, AIR);
        c.set_runtime_id(0, 40, 0, 1, AIR);
        assert!(c.sub_chunk(2).is_none());
    }

    #[test]
    fn out_of_range_y_is_ignored() {
        let mut c = Chunk::new(AIR);
        c.set_runtime_id(0, -1, 0, 0, STONE);
        c.set_runtime_id(0, 256, 0, 0, STONE);
        assert_eq!(c.runtime_id(0, -1, 0, 0), AIR);
        assert_eq!(c.runtime_id(0, 256, 0, 0), AIR);
    }

    #[test]
    fn second_layer_is_independent() {
        let mut c = Chunk::new(AIR);
        c.set_runtime_id(4, 10, 4, 0, STONE);
        c.set_runtime_id(4, 10, 4, 1, RuntimeId(2));
        assert_eq!(c.runtime_id(4, 10, 4, 0), STONE);
        assert_eq!(c.runtime_id(4, 10, 4, 1), RuntimeId(2));
    }

    #[test]
    fn highest_block() {
        let mut c = Chunk::new(AIR);
        assert_eq!(c.highest_block(3, 3), -1);
        c.set_runtime_id(3, 60, 3, 0, STONE);
        c.set_runtime_id(3, 200, 3, 0, STONE);
        assert_eq!(c.highest_block(3, 3), 200);
        assert_eq!(c.highest_block(4, 3), -1);
    }

    #[test]
    fn light_nibbles_round_trip() {
        let mut c = Chunk::new(AIR);
        c.set_block_light(7, 42, 9, 13);
        c.set_sky_light(7, 42, 9, 4);
        assert_eq!(c.block_light(7, 42, 9), 13);
        assert_eq!(c.sky_light(7, 42, 9), 4);
        // Neighbouring nibble in the same byte is untouched.
        assert_eq!(c.block_light(7, 43, 9), 0);
    }

    #[test]
    fn compact_drops_empty_top_sub_chunks() {
        let mut c = Chunk::new(AIR);
        c.set_runtime_id(0, 20, 0, 0, STONE);
        c.set_runtime_id(0, 220, 0, 0, STONE);
        c.set_runtime_id(0, 220, 0, 0, AIR);
        c.compact();
        assert_eq!(c.highest_sub_chunk(), 2);
        assert_eq!(c.runtime_id(0, 20, 0, 0), STONE);
    }
}
