use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tower_http::cors::CorsLayer;

use antixray_server::config::EngineConfig;
use antixray_server::host::{BridgeHost, WorldDescriptor};
use antixray_server::lifecycle::Engine;
use antixray_server::voxel_grid::VoxelGrid;
use antixray_server::ws::{ws_handler, AppState};
use antixray_shared::types::WorldId;

/// Seed for the generated demo worlds
const WORLD_SEED: u64 = 12345;
const WORLD_HALF_EXTENT: i32 = 48;
const GROUND_LEVEL: i32 = 64;

fn load_config() -> anyhow::Result<EngineConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path))?;
            EngineConfig::from_json(&json).map_err(anyhow::Error::msg)?
        }
        None => EngineConfig::default(),
    };
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn generate_worlds() -> Vec<WorldDescriptor> {
    let mut rng = ChaCha8Rng::seed_from_u64(WORLD_SEED);
    ["overworld", "nether"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let grid = VoxelGrid::generate(&mut rng, WORLD_HALF_EXTENT, GROUND_LEVEL);
            tracing::info!("Generated world '{}' with {} solid blocks", name, grid.len());
            WorldDescriptor {
                id: WorldId(i as u32),
                name: name.to_string(),
                probe: Arc::new(grid),
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config().context("invalid engine configuration")?;
    let listen_addr = config.listen_addr.clone();

    let host = Arc::new(BridgeHost::new(generate_worlds()));
    let engine = Arc::new(Engine::new(host.clone(), config));
    engine.enable()?;

    let app_state = AppState {
        engine: engine.clone(),
        host,
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    tracing::info!("Starting anti-xray engine on {}", listen_addr);
    println!("Anti-xray engine listening on {}", listen_addr);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {}", listen_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Teardown blocks on the worker pool drain.
    tokio::task::spawn_blocking(move || engine.disable()).await??;
    Ok(())
}
