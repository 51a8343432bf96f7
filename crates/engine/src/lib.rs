//! Strata engine: a concurrent, chunk-indexed voxel world core.
//!
//! The engine is split into three layers:
//!
//! - [`block`]: the process-wide block state registry mapping every distinct
//!   `(name, properties)` combination to a dense runtime ID, plus the
//!   capability traits (random tick, scheduled tick, liquid displacement, ...)
//!   that the world core consults instead of concrete block types.
//! - [`chunk`]: the raw voxel containers -- paletted block storage, sub-chunk
//!   light tables, and the network/disk codecs.
//! - [`world`]: the top-level facade -- chunk cache with lazy load/generate/
//!   evict, block and liquid read-modify-write, entity residency, viewer
//!   subscription and the fixed-rate tick loop.
//!
//! Game-specific content (concrete blocks, generators, persistence backends)
//! lives in downstream crates; the engine only ever talks to the collaborator
//! traits in [`world`].

pub mod block;
pub mod chunk;
pub mod world;
