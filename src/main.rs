//! floorviz - Perspective tile visualizer service
//!
//! Composites room photos with tile textures warped onto the floor, runs a
//! debounced request to an external generation backend for a realistic
//! rendering, and shows the result against the original behind a draggable
//! reveal line. Frames are served over a small web API.

mod assets;
mod cache;
mod compositor;
mod config;
mod dispatcher;
mod error;
mod generator;
mod geometry;
mod homography;
mod layout;
mod server;
mod session;
mod surface;
mod warp;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::assets::AssetLoader;
use crate::cache::ImageCache;
use crate::session::Event;

/// floorviz - Preview tile textures on room photos
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "floorviz.toml")]
    config: PathBuf,

    /// Web server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Web server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("floorviz v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load_or_create(&args.config)?;
    let host = args.host.clone().unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    info!(
        "Surface: {}x{} @{}x, warp grid {}x{}",
        config.render.width,
        config.render.height,
        config.render.device_pixel_ratio,
        config.render.grid.cols,
        config.render.grid.rows
    );
    info!(
        "Catalog: {} rooms, {} textures, assets from {:?}",
        config.rooms.len(),
        config.textures.len(),
        config.assets.root
    );

    let cache = Arc::new(ImageCache::new(
        Arc::new(AssetLoader::from_config(&config.assets)),
        config.session.cache_capacity,
    ));
    let generator = generator::from_config(&config.generator);

    // Start the dispatcher owning the session and compositor
    let (dispatcher_handle, session) = dispatcher::spawn(&config, cache.clone(), generator);

    if let Some(room) = config.rooms.first() {
        info!("Opening with room {}", room.id);
        session.send(Event::SelectRoom(room.clone()));
    }

    // Start the web server
    let addr = format!("{}:{}", host, port);
    info!("Starting web server at http://{}", addr);

    let state = Arc::new(server::AppState::new(Arc::new(config), session, cache));
    let server_handle = tokio::spawn(async move { server::run_server(&addr, state).await });

    // Wait for either to finish (or error)
    tokio::select! {
        result = dispatcher_handle => {
            match result {
                Ok(()) => info!("Dispatcher exited"),
                Err(e) => tracing::error!("Dispatcher task panicked: {}", e),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => tracing::error!("Server error: {}", e),
                Err(e) => tracing::error!("Server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
