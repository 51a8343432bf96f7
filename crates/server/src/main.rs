use std::path::PathBuf;
use std::sync::Arc;

use strata_engine::world::{World, WorldConfig};
use strata_server::blocks;
use strata_server::generator::FlatGenerator;
use strata_server::provider::DiskProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let world_dir: PathBuf = std::env::args()
        .skip_while(|a| a != "--world")
        .nth(1)
        .unwrap_or_else(|| "world".into())
        .into();
    let read_only = std::env::args().any(|a| a == "--read-only");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    tracing::info!("strata world server");

    let palette = Arc::new(blocks::build()?);
    tracing::info!("block palette ready: {} states", palette.registry.len());

    let provider = DiskProvider::open(&world_dir, palette.registry.clone())?;
    let generator = FlatGenerator::new(&palette);

    let world = World::new(
        palette.registry.clone(),
        Arc::new(provider),
        Arc::new(generator),
        WorldConfig::default(),
    );
    if read_only {
        world.set_read_only();
        tracing::info!("running read-only; nothing will be persisted");
    }
    tracing::info!(
        "world '{}' up, spawn at {}",
        world.name(),
        world.spawn()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down, saving world...");
    world.close()?;
    tracing::info!("world saved, bye");
    Ok(())
}
