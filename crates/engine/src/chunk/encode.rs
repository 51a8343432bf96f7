//! Chunk serialisation.
//!
//! Two forms exist. The network form is sent to viewers: palettes hold raw
//! runtime IDs, which are only stable within one process. The serialised
//! (disk) form survives restarts: palettes hold full block states as NBT
//! compounds, resolved against the registry again on load.
//!
//! Both forms share the sub-chunk layout: a version byte, a layer count, and
//! per layer a size byte (`bits << 1 | flag`, flag 1 for network palettes),
//! the packed index words and the palette.

use fastnbt::Value;

use crate::block::{BlockRegistry, BlockState, PropertyValue};

use super::storage::{padded, word_count, PalettedStorage};
use super::{Chunk, SUB_CHUNK_COUNT};

/// Current sub-chunk blob version.
pub(crate) const SUB_CHUNK_VERSION: u8 = 8;

pub(crate) fn put_varu32(out: &mut Vec<u8>, mut v: u32) {
    loop {
        let b = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(b);
            return;
        }
        out.push(b | 0x80);
    }
}

fn put_storage(out: &mut Vec<u8>, s: &PalettedStorage, network: bool) {
    let flag = if network { 1 } else { 0 };
    out.push((s.bits() << 1) | flag);
    for word in s.words() {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

/// A chunk in its persistent form: one opaque blob per present sub-chunk plus
/// the flat column data (heightmap and biomes).
pub struct SerialisedChunk {
    pub sub_chunks: Vec<Option<SerialisedSubChunk>>,
    /// 512 bytes of little-endian u16 heightmap followed by 256 biome bytes.
    pub data_2d: Vec<u8>,
}

/// One serialised sub-chunk blob.
pub struct SerialisedSubChunk(pub Vec<u8>);

impl SerialisedChunk {
    /// Flatten into a single byte vector, the unit the provider compresses
    /// and writes to disk.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_varu32(&mut out, self.sub_chunks.len() as u32);
        for sub in &self.sub_chunks {
            match sub {
                Some(SerialisedSubChunk(blob)) => {
                    out.push(1);
                    put_varu32(&mut out, blob.len() as u32);
                    out.extend_from_slice(blob);
                }
                None => out.push(0),
            }
        }
        out.extend_from_slice(&self.data_2d);
        out
    }
}

/// Encode a chunk and the block-entity data stored in it for sending to a
/// viewer. Palette entries are raw runtime IDs.
pub fn encode_network(chunk: &Chunk, block_entities: &[Value]) -> Vec<u8> {
    let count = chunk.highest_sub_chunk();
    let mut out = Vec::new();
    put_varu32(&mut out, count as u32);

    let empty = PalettedStorage::filled(chunk.air());
    for index in 0..count {
        out.push(SUB_CHUNK_VERSION);
        let storages: &[PalettedStorage] = match chunk.sub_chunk(index) {
            Some(sub) => sub.storages(),
            None => std::slice::from_ref(&empty),
        };
        out.push(storages.len() as u8);
        for s in storages {
            put_storage(&mut out, s, true);
            put_varu32(&mut out, s.palette().len() as u32);
            for rid in s.palette() {
                put_varu32(&mut out, rid.0);
            }
        }
    }

    let mut biomes = [0u8; 256];
    for x in 0..16u8 {
        for z in 0..16u8 {
            biomes[((z as usize) << 4) | x as usize] = chunk.biome(x, z);
        }
    }
    out.extend_from_slice(&biomes);
    out.push(0); // border block count

    for nbt in block_entities {
        // Block entity payloads are length-framed so a damaged tail can be
        // skipped without losing the chunk.
        if let Ok(bytes) = fastnbt::to_bytes(nbt) {
            put_varu32(&mut out, bytes.len() as u32);
            out.extend_from_slice(&bytes);
        }
    }
    out
}

fn state_to_nbt(state: &BlockState) -> Value {
    let mut states = std::collections::HashMap::new();
    for (k, v) in &state.properties {
        let value = match v {
            PropertyValue::Bool(b) => Value::Byte(*b as i8),
            PropertyValue::Int(n) => Value::Int(*n),
            PropertyValue::Str(s) => Value::String(s.clone()),
        };
        states.insert(k.clone(), value);
    }
    let mut compound = std::collections::HashMap::new();
    compound.insert("name".to_string(), Value::String(state.name.clone()));
    compound.insert("states".to_string(), Value::Compound(states));
    Value::Compound(compound)
}

/// Encode a chunk for persistence. Palette entries are full block states so
/// the result stays valid across registry changes; unregistered runtime IDs
/// are silently written as air.
pub fn encode_serialised(chunk: &Chunk, reg: &BlockRegistry) -> SerialisedChunk {
    let air_state = reg
        .resolve(chunk.air())
        .cloned()
        .unwrap_or_else(|| BlockState::new("air"));

    let mut sub_chunks = Vec::with_capacity(SUB_CHUNK_COUNT);
    for index in 0..SUB_CHUNK_COUNT {
        let Some(sub) = chunk.sub_chunk(index) else {
            sub_chunks.push(None);
            continue;
        };
        let mut blob = Vec::new();
        blob.push(SUB_CHUNK_VERSION);
        blob.push(sub.storages().len() as u8);
        for s in sub.storages() {
            put_storage(&mut blob, s, false);
            put_varu32(&mut blob, s.palette().len() as u32);
            for rid in s.palette() {
                let state = reg.resolve(*rid).unwrap_or(&air_state);
                if let Ok(bytes) = fastnbt::to_bytes(&state_to_nbt(state)) {
                    put_varu32(&mut blob, bytes.len() as u32);
                    blob.extend_from_slice(&bytes);
                }
            }
        }
        sub_chunks.push(Some(SerialisedSubChunk(blob)));
    }

    let mut data_2d = Vec::with_capacity(768);
    for z in 0..16u8 {
        for x in 0..16u8 {
            let height = (chunk.highest_block(x, z) + 1) as u16;
            data_2d.extend_from_slice(&height.to_le_bytes());
        }
    }
    for z in 0..16u8 {
        for x in 0..16u8 {
            data_2d.push(chunk.biome(x, z));
        }
    }

    SerialisedChunk { sub_chunks, data_2d }
}

/// Sanity helper shared with the decoder: the exact byte length of the packed
/// words for a bit width.
pub(crate) fn words_byte_len(bits: u8) -> usize {
    word_count(bits) * 4
}

pub(crate) fn valid_bits(bits: u8) -> bool {
    matches!(bits, 0 | 1 | 2 | 4 | 8 | 16) || padded(bits)
}
