//! Chunk deserialisation, the inverse of [`super::encode`].

use std::collections::BTreeMap;

use fastnbt::Value;
use thiserror::Error;

use crate::block::{BlockRegistry, BlockState, PropertyValue, RuntimeId};

use super::encode::{valid_bits, words_byte_len};
use super::storage::PalettedStorage;
use super::{Chunk, SerialisedChunk, SubChunk, SUB_CHUNK_COUNT};

/// Errors raised while decoding a chunk payload. Each variant names the part
/// of the payload that was malformed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of data while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("sub-chunk {index} has unsupported version {version}")]
    UnsupportedVersion { index: usize, version: u8 },
    #[error("sub-chunk {index} has invalid palette size {bits}")]
    InvalidPaletteSize { index: usize, bits: u8 },
    #[error("sub-chunk {index} has packed indices outside its palette")]
    IndexOutOfRange { index: usize },
    #[error("sub-chunk count {0} exceeds the column height")]
    SubChunkCount(u32),
    #[error("palette entry is not a valid block state compound")]
    MalformedPaletteEntry,
    #[error("palette references unregistered block state {0}")]
    UnknownBlockState(String),
    #[error("malformed NBT: {0}")]
    Nbt(#[from] fastnbt::error::Error),
}

struct Reader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, off: 0 }
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, DecodeError> {
        let b = *self
            .data
            .get(self.off)
            .ok_or(DecodeError::UnexpectedEof(what))?;
        self.off += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .off
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof(what))?;
        let s = &self.data[self.off..end];
        self.off = end;
        Ok(s)
    }

    fn varu32(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let mut v = 0u32;
        for shift in (0..35).step_by(7) {
            let b = self.u8(what)?;
            v |= ((b & 0x7F) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
        }
        Err(DecodeError::UnexpectedEof(what))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.off
    }
}

/// Read one storage header and its packed words; the palette is read by the
/// caller since its element type differs between the two forms.
fn read_storage_words(
    r: &mut Reader<'_>,
    index: usize,
) -> Result<(u8, Vec<u32>), DecodeError> {
    let bits = r.u8("storage size byte")? >> 1;
    if !valid_bits(bits) {
        return Err(DecodeError::InvalidPaletteSize { index, bits });
    }
    let raw = r.bytes(words_byte_len(bits), "storage words")?;
    let words = raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((bits, words))
}

/// Decode a network-form chunk payload produced by [`super::encode_network`].
///
/// The block-entity tail is decoded permissively: a malformed record ends the
/// tail but keeps everything decoded before it, so a viewer still gets the
/// blocks even if an entity payload was damaged in transit.
pub fn decode_network(
    data: &[u8],
    air: RuntimeId,
) -> Result<(Chunk, Vec<Value>), DecodeError> {
    let mut r = Reader::new(data);

    let count = r.varu32("sub-chunk count")?;
    if count as usize > SUB_CHUNK_COUNT {
        return Err(DecodeError::SubChunkCount(count));
    }

    let mut sub: [Option<Box<SubChunk>>; SUB_CHUNK_COUNT] = Default::default();
    for index in 0..count as usize {
        let version = r.u8("sub-chunk version")?;
        let layers = match version {
            1 => 1,
            8 => r.u8("layer count")?,
            v => return Err(DecodeError::UnsupportedVersion { index, version: v }),
        };
        let mut storages = Vec::with_capacity(layers as usize);
        for _ in 0..layers {
            let (bits, words) = read_storage_words(&mut r, index)?;
            let len = r.varu32("palette length")?;
            let mut palette = Vec::with_capacity(len as usize);
            for _ in 0..len {
                palette.push(RuntimeId(r.varu32("palette entry")?));
            }
            let storage = PalettedStorage::from_parts(bits, words, palette);
            if !storage.indices_in_range() {
                return Err(DecodeError::IndexOutOfRange { index });
            }
            storages.push(storage);
        }
        sub[index] = Some(Box::new(SubChunk::with_storages(air, storages)));
    }

    let biomes_raw = r.bytes(256, "biomes")?;
    let mut biomes = [0u8; 256];
    biomes.copy_from_slice(biomes_raw);
    let _border = r.u8("border block count")?;

    let mut block_entities = Vec::new();
    while r.remaining() > 0 {
        let Ok(len) = r.varu32("block entity length") else { break };
        let Ok(bytes) = r.bytes(len as usize, "block entity") else { break };
        match fastnbt::from_bytes::<Value>(bytes) {
            Ok(nbt) => block_entities.push(nbt),
            Err(_) => break,
        }
    }

    Ok((Chunk::with_sub_chunks(air, sub, biomes), block_entities))
}

fn nbt_to_state(nbt: &Value) -> Result<BlockState, DecodeError> {
    let Value::Compound(compound) = nbt else {
        return Err(DecodeError::MalformedPaletteEntry);
    };
    let Some(Value::String(name)) = compound.get("name") else {
        return Err(DecodeError::MalformedPaletteEntry);
    };
    let mut properties = BTreeMap::new();
    if let Some(Value::Compound(states)) = compound.get("states") {
        for (k, v) in states {
            let value = match v {
                Value::Byte(b) => PropertyValue::Bool(*b != 0),
                Value::Int(n) => PropertyValue::Int(*n),
                Value::String(s) => PropertyValue::Str(s.clone()),
                _ => return Err(DecodeError::MalformedPaletteEntry),
            };
            properties.insert(k.clone(), value);
        }
    }
    Ok(BlockState { name: name.clone(), properties })
}

/// Decode a persisted chunk, resolving every palette state through the
/// registry. A state that is no longer registered fails the whole chunk; a
/// provider that wants to survive registry changes must migrate first.
pub fn decode_serialised(
    serialised: &SerialisedChunk,
    reg: &BlockRegistry,
) -> Result<Chunk, DecodeError> {
    let air = reg.air();
    let mut sub: [Option<Box<SubChunk>>; SUB_CHUNK_COUNT] = Default::default();

    for (index, blob) in serialised.sub_chunks.iter().enumerate().take(SUB_CHUNK_COUNT) {
        let Some(blob) = blob else { continue };
        let mut r = Reader::new(&blob.0);

        let version = r.u8("sub-chunk version")?;
        let layers = match version {
            1 => 1,
            8 => r.u8("layer count")?,
            v => return Err(DecodeError::UnsupportedVersion { index, version: v }),
        };
        let mut storages = Vec::with_capacity(layers as usize);
        for _ in 0..layers {
            let (bits, words) = read_storage_words(&mut r, index)?;
            let len = r.varu32("palette length")?;
            let mut palette = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let n = r.varu32("palette entry length")?;
                let bytes = r.bytes(n as usize, "palette entry")?;
                let state = nbt_to_state(&fastnbt::from_bytes::<Value>(bytes)?)?;
                let rid = reg
                    .lookup(&state)
                    .ok_or_else(|| DecodeError::UnknownBlockState(state.to_string()))?;
                palette.push(rid);
            }
            let storage = PalettedStorage::from_parts(bits, words, palette);
            if !storage.indices_in_range() {
                return Err(DecodeError::IndexOutOfRange { index });
            }
            storages.push(storage);
        }
        sub[index] = Some(Box::new(SubChunk::with_storages(air, storages)));
    }

    let mut biomes = [0u8; 256];
    if serialised.data_2d.len() >= 768 {
        biomes.copy_from_slice(&serialised.data_2d[512..768]);
    }
    Ok(Chunk::with_sub_chunks(air, sub, biomes))
}

/// Split a flattened provider blob back into a [`SerialisedChunk`].
pub fn read_serialised(data: &[u8]) -> Result<SerialisedChunk, DecodeError> {
    let mut r = Reader::new(data);
    let count = r.varu32("sub-chunk count")?;
    if count as usize > SUB_CHUNK_COUNT {
        return Err(DecodeError::SubChunkCount(count));
    }
    let mut sub_chunks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match r.u8("sub-chunk presence")? {
            0 => sub_chunks.push(None),
            _ => {
                let len = r.varu32("sub-chunk length")?;
                let blob = r.bytes(len as usize, "sub-chunk blob")?.to_vec();
                sub_chunks.push(Some(super::SerialisedSubChunk(blob)));
            }
        }
    }
    let data_2d = r.bytes(768, "column data")?.to_vec();
    Ok(SerialisedChunk { sub_chunks, data_2d })
}
