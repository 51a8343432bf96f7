//! Disk persistence for worlds.
//!
//! Layout inside the world directory:
//!
//! ```text
//! settings.json                   world metadata
//! chunks/c.<x>.<z>.dat            gzipped serialised chunk
//! block_entities/c.<x>.<z>.json   block-entity payloads
//! entities/c.<x>.<z>.json         saveable entity records
//! ```
//!
//! Chunks use the engine's serialised form, whose palettes carry full block
//! states; everything else is JSON since the payloads are small and the
//! format stays inspectable with a text editor.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use fastnbt::Value;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::info;

use strata_engine::block::BlockRegistry;
use strata_engine::chunk::{decode_serialised, encode_serialised, read_serialised, Chunk};
use strata_engine::world::{ChunkPos, Entity, Provider, SaveableEntity, Settings};

#[derive(Serialize, Deserialize)]
struct EntityRecord {
    kind: String,
    data: Value,
}

pub struct DiskProvider {
    root: PathBuf,
    registry: Arc<BlockRegistry>,
}

impl DiskProvider {
    /// Open (creating if needed) a world directory.
    pub fn open(root: impl Into<PathBuf>, registry: Arc<BlockRegistry>) -> anyhow::Result<Self> {
        let root = root.into();
        for sub in ["chunks", "block_entities", "entities"] {
            fs::create_dir_all(root.join(sub))
                .with_context(|| format!("creating {}", root.join(sub).display()))?;
        }
        info!("world directory at {}", root.display());
        Ok(Self { root, registry })
    }

    fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.root.join(format!("chunks/c.{}.{}.dat", pos.x, pos.z))
    }

    fn block_nbt_path(&self, pos: ChunkPos) -> PathBuf {
        self.root
            .join(format!("block_entities/c.{}.{}.json", pos.x, pos.z))
    }

    fn entities_path(&self, pos: ChunkPos) -> PathBuf {
        self.root.join(format!("entities/c.{}.{}.json", pos.x, pos.z))
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}

impl Provider for DiskProvider {
    fn settings(&self) -> Settings {
        let path = self.settings_path();
        if !path.exists() {
            return Settings::default();
        }
        match fs::read(&path)
            .context("reading settings")
            .and_then(|data| serde_json::from_slice(&data).context("parsing settings"))
        {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("{}: {e:#}; using defaults", path.display());
                Settings::default()
            }
        }
    }

    fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(settings)?;
        fs::write(self.settings_path(), data).context("writing settings")
    }

    fn load_chunk(&self, pos: ChunkPos) -> anyhow::Result<Option<Chunk>> {
        let path = self.chunk_path(pos);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let mut raw = Vec::new();
        GzDecoder::new(file)
            .read_to_end(&mut raw)
            .with_context(|| format!("decompressing {}", path.display()))?;
        let serialised = read_serialised(&raw)
            .with_context(|| format!("splitting chunk {pos}"))?;
        let chunk = decode_serialised(&serialised, &self.registry)
            .with_context(|| format!("decoding chunk {pos}"))?;
        Ok(Some(chunk))
    }

    fn save_chunk(&self, pos: ChunkPos, chunk: &Chunk) -> anyhow::Result<()> {
        let raw = encode_serialised(chunk, &self.registry).to_bytes();
        let file = fs::File::create(self.chunk_path(pos))
            .with_context(|| format!("creating chunk file for {pos}"))?;
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(&raw)?;
        enc.finish()
            .with_context(|| format!("compressing chunk {pos}"))?;
        Ok(())
    }

    /// Entity payloads are written for inspection and future migration, but
    /// this server registers no entity factories, so nothing is revived on
    /// load.
    fn load_entities(&self, _pos: ChunkPos) -> anyhow::Result<Vec<Arc<dyn Entity>>> {
        Ok(Vec::new())
    }

    fn save_entities(&self, pos: ChunkPos, entities: &[&dyn SaveableEntity]) -> anyhow::Result<()> {
        let path = self.entities_path(pos);
        if entities.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }
        let records: Vec<EntityRecord> = entities
            .iter()
            .map(|e| EntityRecord {
                kind: e.kind().to_string(),
                data: e.encode_nbt(),
            })
            .collect();
        fs::write(path, serde_json::to_vec(&records)?)
            .with_context(|| format!("writing entities of chunk {pos}"))
    }

    fn load_block_nbt(&self, pos: ChunkPos) -> anyhow::Result<Vec<Value>> {
        let path = self.block_nbt_path(pos);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing block entities of chunk {pos}"))
    }

    fn save_block_nbt(&self, pos: ChunkPos, nbt: &[Value]) -> anyhow::Result<()> {
        let path = self.block_nbt_path(pos);
        if nbt.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }
        fs::write(path, serde_json::to_vec(&nbt)?)
            .with_context(|| format!("writing block entities of chunk {pos}"))
    }

    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
