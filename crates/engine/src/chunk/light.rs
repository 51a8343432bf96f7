//! Two-phase flood-fill light propagation.
//!
//! Phase one ([`fill_light`]) runs on a freshly loaded or generated chunk in
//! isolation: sky light is poured down each column and both channels are
//! flood-filled within the chunk's own bounds. Phase two ([`spread_light`])
//! runs once a chunk is surrounded on all eight sides and lets light cross
//! the chunk borders of the 3x3 neighbourhood.
//!
//! Light decays by `max(1, filter)` per step, except full-strength sky light
//! travelling straight down through unfiltered blocks, which keeps its value.

use std::collections::VecDeque;

use crate::block::BlockRegistry;

use super::Chunk;

#[derive(Clone, Copy, PartialEq)]
enum Channel {
    Block,
    Sky,
}

/// A square of `width` x `width` chunks addressed in global block coordinates
/// `0..width * 16`. Light writes into absent sub-chunks are dropped, since an
/// absent sub-chunk already reads as fully sky-lit air.
struct Area<'a> {
    chunks: Vec<&'a mut Chunk>,
    width: i32,
    height: i16,
}

impl<'a> Area<'a> {
    fn new(chunks: Vec<&'a mut Chunk>, width: i32) -> Self {
        let height = chunks
            .iter()
            .map(|c| (c.highest_sub_chunk() << 4) as i16)
            .max()
            .unwrap_or(0);
        Self { chunks, width, height }
    }

    #[inline]
    fn chunk_index(&self, x: i32, z: i32) -> usize {
        ((x >> 4) * self.width + (z >> 4)) as usize
    }

    fn in_bounds(&self, x: i32, y: i16, z: i32) -> bool {
        x >= 0 && z >= 0 && x < self.width * 16 && z < self.width * 16 && y >= 0 && y < self.height
    }

    /// The light filter at a cell, taking the stronger of both layers so a
    /// waterlogged block still dims what passes through it.
    fn filter(&self, reg: &BlockRegistry, x: i32, y: i16, z: i32) -> u8 {
        let c = &self.chunks[self.chunk_index(x, z)];
        let (lx, lz) = ((x & 0xF) as u8, (z & 0xF) as u8);
        let f0 = reg.caps(c.runtime_id(lx, y, lz, 0)).light_filter;
        let f1 = reg.caps(c.runtime_id(lx, y, lz, 1)).light_filter;
        f0.max(f1)
    }

    fn light(&self, ch: Channel, x: i32, y: i16, z: i32) -> u8 {
        let c = &self.chunks[self.chunk_index(x, z)];
        let (lx, lz) = ((x & 0xF) as u8, (z & 0xF) as u8);
        match ch {
            Channel::Block => c.block_light(lx, y, lz),
            Channel::Sky => c.sky_light(lx, y, lz),
        }
    }

    /// Store a light value, skipping cells in absent sub-chunks.
    fn set_light(&mut self, ch: Channel, x: i32, y: i16, z: i32, v: u8) {
        let index = self.chunk_index(x, z);
        let c = &mut self.chunks[index];
        if c.sub_chunk((y >> 4) as usize).is_none() {
            return;
        }
        let (lx, lz) = ((x & 0xF) as u8, (z & 0xF) as u8);
        match ch {
            Channel::Block => c.set_block_light(lx, y, lz, v),
            Channel::Sky => c.set_sky_light(lx, y, lz, v),
        }
    }

    /// Spread queued light outwards until the queue drains.
    fn propagate(
        &mut self,
        reg: &BlockRegistry,
        ch: Channel,
        mut queue: VecDeque<(i32, i16, i32)>,
    ) {
        while let Some((x, y, z)) = queue.pop_front() {
            let level = self.light(ch, x, y, z);
            if level <= 1 {
                continue;
            }
            let sides: [(i32, i16, i32); 6] = [
                (x + 1, y, z),
                (x - 1, y, z),
                (x, y + 1, z),
                (x, y - 1, z),
                (x, y, z + 1),
                (x, y, z - 1),
            ];
            for (nx, ny, nz) in sides {
                if !self.in_bounds(nx, ny, nz) {
                    continue;
                }
                let filter = self.filter(reg, nx, ny, nz);
                let falling = ch == Channel::Sky && ny == y - 1 && level == 15;
                let dec = if falling { filter } else { filter.max(1) };
                let next = level.saturating_sub(dec);
                if next > self.light(ch, nx, ny, nz) {
                    self.set_light(ch, nx, ny, nz, next);
                    queue.push_back((nx, ny, nz));
                }
            }
        }
    }
}

/// Compute both light channels of a single chunk from scratch, ignoring its
/// neighbours. Border cells may end up too dark until [`spread_light`] runs
/// over the surrounding 3x3.
pub fn fill_light(chunk: &mut Chunk, reg: &BlockRegistry) {
    for index in 0..super::SUB_CHUNK_COUNT {
        if chunk.sub_chunk(index).is_some() {
            chunk.sub_chunk_mut(index).clear_light();
        }
    }

    let mut area = Area::new(vec![chunk], 1);

    // Sky light: pour straight down each column until the first filtering
    // block, then flood-fill sideways and under overhangs.
    let mut queue = VecDeque::new();
    for x in 0..16 {
        for z in 0..16 {
            let mut level: u8 = 15;
            for y in (0..area.height).rev() {
                let filter = area.filter(reg, x, y, z);
                level = level.saturating_sub(filter);
                if level == 0 {
                    break;
                }
                area.set_light(Channel::Sky, x, y, z, level);
                queue.push_back((x, y, z));
            }
        }
    }
    area.propagate(reg, Channel::Sky, queue);

    // Block light: seed from every emitting state.
    let mut queue = VecDeque::new();
    for x in 0..16 {
        for z in 0..16 {
            for y in 0..area.height {
                let c = &area.chunks[0];
                let emission = reg
                    .caps(c.runtime_id(x as u8, y, z as u8, 0))
                    .light_emission;
                if emission > 0 {
                    area.set_light(Channel::Block, x, y, z, emission);
                    queue.push_back((x, y, z));
                }
            }
        }
    }
    area.propagate(reg, Channel::Block, queue);
}

/// Let light cross chunk borders within a 3x3 neighbourhood. `chunks` holds
/// the nine chunks in row-major order (x-major, z-minor), the centre chunk at
/// index 4. Only cells near the internal borders are re-examined; interior
/// light was already settled by [`fill_light`].
pub fn spread_light(chunks: &mut [&mut Chunk], reg: &BlockRegistry) {
    debug_assert_eq!(chunks.len(), 9);
    let mut area = Area::new(chunks.iter_mut().map(|c| &mut **c).collect(), 3);

    for ch in [Channel::Sky, Channel::Block] {
        let mut queue = VecDeque::new();
        // Seed every lit cell on both sides of the four internal border
        // planes; propagation from there reaches anything they can affect.
        for a in [15, 16, 31, 32] {
            for b in 0..48 {
                for y in 0..area.height {
                    if area.light(ch, a, y, b) > 1 {
                        queue.push_back((a, y, b));
                    }
                    if area.light(ch, b, y, a) > 1 {
                        queue.push_back((b, y, a));
                    }
                }
            }
        }
        area.propagate(reg, ch, queue);
    }
}
