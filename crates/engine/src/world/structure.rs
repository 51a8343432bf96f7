use crate::block::{Block, Liquid};

/// A prebuilt arrangement of blocks pasted into a world with
/// `World::build_structure`. Cells outside the structure's own content (both
/// returns `None`) are left untouched, so structures may be sparse.
pub trait Structure: Send + Sync {
    /// Extent along x, y and z.
    fn dimensions(&self) -> [i32; 3];

    /// The content of the cell at the given offset within the structure: an
    /// optional layer-0 block and an optional liquid sharing the cell.
    fn at(&self, x: i32, y: i32, z: i32) -> (Option<Block>, Option<Liquid>);
}
