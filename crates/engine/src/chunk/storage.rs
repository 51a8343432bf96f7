//! Bit-packed, palette-deduplicated block storage for one sub-chunk layer.
//!
//! A storage holds 4096 palette indices packed into `u32` words. Indices never
//! span two words; the padded sizes (3, 5, 6 bits) therefore need one extra
//! word. A palette of length 1 uses 0 bits per index and no words at all.

use super::super::block::RuntimeId;

/// The bit widths a storage may use, in ascending order. These are the only
/// sizes the wire format can express.
const PALETTE_SIZES: [u8; 9] = [0, 1, 2, 3, 4, 5, 6, 8, 16];

/// Whether a bit width leaves unusable bits at the top of each word, requiring
/// one extra word to fit all 4096 indices.
pub(crate) const fn padded(bits: u8) -> bool {
    matches!(bits, 3 | 5 | 6)
}

/// The number of `u32` words needed to hold 4096 indices of the given width.
pub(crate) const fn word_count(bits: u8) -> usize {
    if bits == 0 {
        return 0;
    }
    let per_word = 32 / bits as usize;
    let mut n = 4096 / per_word;
    if padded(bits) {
        n += 1;
    }
    n
}

/// The smallest valid bit width able to index a palette of `len` entries.
pub(crate) fn bits_for(len: usize) -> u8 {
    for &bits in &PALETTE_SIZES {
        if (1usize << bits) >= len || bits == 16 {
            return bits;
        }
    }
    16
}

/// A 16x16x16 grid of runtime IDs stored as packed palette indices.
#[derive(Clone)]
pub struct PalettedStorage {
    bits: u8,
    words: Vec<u32>,
    palette: Vec<RuntimeId>,
}

impl PalettedStorage {
    /// A storage filled uniformly with one runtime ID (usually air).
    pub fn filled(rid: RuntimeId) -> Self {
        Self {
            bits: 0,
            words: Vec::new(),
            palette: vec![rid],
        }
    }

    /// Rebuild a storage from raw decoded parts. The word vector must match
    /// the bit width; short vectors read as index 0.
    pub(crate) fn from_parts(bits: u8, words: Vec<u32>, palette: Vec<RuntimeId>) -> Self {
        Self { bits, words, palette }
    }

    pub(crate) fn bits(&self) -> u8 {
        self.bits
    }

    pub(crate) fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn palette(&self) -> &[RuntimeId] {
        &self.palette
    }

    /// Storage cell index: x and z select the column, y the row. This matches
    /// the wire layout, so encode is a straight copy of the words.
    #[inline]
    const fn cell(x: u8, y: u8, z: u8) -> usize {
        ((x as usize) << 8) | ((z as usize) << 4) | (y as usize)
    }

    #[inline]
    fn palette_index(&self, cell: usize) -> usize {
        if self.bits == 0 {
            return 0;
        }
        let per_word = 32 / self.bits as usize;
        let word = self.words[cell / per_word];
        let shift = (cell % per_word) * self.bits as usize;
        let mask = (1u32 << self.bits) - 1;
        ((word >> shift) & mask) as usize
    }

    #[inline]
    fn set_palette_index(&mut self, cell: usize, index: usize) {
        if self.bits == 0 {
            // A 0-bit storage holds index 0 in every cell already.
            debug_assert_eq!(index, 0);
            return;
        }
        let per_word = 32 / self.bits as usize;
        let shift = (cell % per_word) * self.bits as usize;
        let mask = (1u32 << self.bits) - 1;
        let word = &mut self.words[cell / per_word];
        *word = (*word & !(mask << shift)) | ((index as u32 & mask) << shift);
    }

    /// The runtime ID stored at local (x, y, z), each 0..16.
    pub fn at(&self, x: u8, y: u8, z: u8) -> RuntimeId {
        self.palette[self.palette_index(Self::cell(x, y, z))]
    }

    /// Store a runtime ID at local (x, y, z), growing the palette (and the
    /// index width) as needed.
    pub fn set(&mut self, x: u8, y: u8, z: u8, rid: RuntimeId) {
        let index = match self.palette.iter().position(|&p| p == rid) {
            Some(i) => i,
            None => {
                let i = self.palette.len();
                self.palette.push(rid);
                if bits_for(self.palette.len()) > self.bits {
                    self.grow(bits_for(self.palette.len()));
                }
                i
            }
        };
        self.set_palette_index(Self::cell(x, y, z), index);
    }

    /// Re-pack all indices at a wider bit width.
    fn grow(&mut self, bits: u8) {
        let mut wider = PalettedStorage {
            bits,
            words: vec![0u32; word_count(bits)],
            palette: std::mem::take(&mut self.palette),
        };
        for cell in 0..4096 {
            let index = self.palette_index(cell);
            wider.set_palette_index(cell, index);
        }
        *self = wider;
    }

    /// Whether every packed index points inside the palette. Storages built
    /// locally hold this by construction; decoded ones are checked before use.
    pub(crate) fn indices_in_range(&self) -> bool {
        if self.palette.is_empty() {
            return false;
        }
        if self.bits == 0 {
            return true;
        }
        (0..4096).all(|cell| self.palette_index(cell) < self.palette.len())
    }

    /// Whether every cell holds the single given runtime ID. Cheap when the
    /// palette has already been compacted; exact either way.
    pub fn uniform(&self, rid: RuntimeId) -> bool {
        if self.palette.len() == 1 {
            return self.palette[0] == rid;
        }
        (0..4096).all(|cell| self.palette[self.palette_index(cell)] == rid)
    }

    /// Drop unused palette entries and shrink to the smallest bit width that
    /// still fits. Called before persistence, never on the hot path.
    pub fn compact(&mut self) {
        let mut used = vec![false; self.palette.len()];
        for cell in 0..4096 {
            used[self.palette_index(cell)] = true;
        }

        let mut remap = vec![0usize; self.palette.len()];
        let mut palette = Vec::with_capacity(self.palette.len());
        for (old, &keep) in used.iter().enumerate() {
            if keep {
                remap[old] = palette.len();
                palette.push(self.palette[old]);
            }
        }

        let bits = bits_for(palette.len());
        let mut packed = PalettedStorage {
            bits,
            words: vec![0u32; word_count(bits)],
            palette,
        };
        if bits > 0 {
            for cell in 0..4096 {
                packed.set_palette_index(cell, remap[self.palette_index(cell)]);
            }
        }
        *self = packed;
    }
}
