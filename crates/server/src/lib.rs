//! Reference wiring around the strata world engine: a concrete block
//! palette, a flat terrain generator and gzip-on-disk persistence. The binary
//! in `main.rs` assembles these into a running world.

pub mod blocks;
pub mod generator;
pub mod provider;
