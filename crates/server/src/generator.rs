use strata_engine::block::RuntimeId;
use strata_engine::chunk::Chunk;
use strata_engine::world::{ChunkPos, Generator};

use crate::blocks::Palette;

/// Classic flat terrain: bedrock floor, a band of stone, dirt, grass on top.
pub struct FlatGenerator {
    bedrock: RuntimeId,
    stone: RuntimeId,
    dirt: RuntimeId,
    grass: RuntimeId,
    surface: i16,
}

impl FlatGenerator {
    pub fn new(palette: &Palette) -> Self {
        Self {
            bedrock: palette.bedrock,
            stone: palette.stone,
            dirt: palette.dirt,
            grass: palette.grass,
            surface: 4,
        }
    }

    /// The y of the grass layer.
    pub fn surface(&self) -> i32 {
        self.surface as i32
    }
}

impl Generator for FlatGenerator {
    fn generate_chunk(&self, _pos: ChunkPos, chunk: &mut Chunk) {
        for x in 0..16u8 {
            for z in 0..16u8 {
                chunk.set_runtime_id(x, 0, z, 0, self.bedrock);
                for y in 1..self.surface - 1 {
                    chunk.set_runtime_id(x, y, z, 0, self.stone);
                }
                chunk.set_runtime_id(x, self.surface - 1, z, 0, self.dirt);
                chunk.set_runtime_id(x, self.surface, z, 0, self.grass);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks;

    #[test]
    fn flat_layers() {
        let palette = blocks::build().unwrap();
        let generator = FlatGenerator::new(&palette);
        let mut chunk = Chunk::new(palette.air);
        generator.generate_chunk(ChunkPos::new(0, 0), &mut chunk);

        assert_eq!(chunk.runtime_id(0, 0, 0, 0), palette.bedrock);
        assert_eq!(chunk.runtime_id(7, 2, 7, 0), palette.stone);
        assert_eq!(chunk.runtime_id(7, 3, 7, 0), palette.dirt);
        assert_eq!(chunk.runtime_id(7, 4, 7, 0), palette.grass);
        assert_eq!(chunk.runtime_id(7, 5, 7, 0), palette.air);
        assert_eq!(chunk.highest_block(15, 15), 4);
    }
}
