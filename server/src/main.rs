//! Realm Game Server
//!
//! Authoritative simulation server: one game loop owns the world and ticks
//! it at a fixed rate, socket tasks feed it events, and a persistence task
//! does all storage I/O.

mod commands;
mod config;
mod control;
mod cooldown;
mod entities;
mod events;
mod network;
mod packets;
mod persistence;
mod world;

use std::future::Future;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::ServerConfig;
use crate::cooldown::now_millis;
use crate::entities::GidAllocator;
use crate::network::{writer_set, NetEvent, Server};
use crate::persistence::{Cache, Database, MemoryStore, PersistenceHandle, PostgresStore};
use crate::world::{definitions, World};

/// How long shutdown waits for sockets to flush their close frames
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connect to PostgreSQL (and Redis, when configured) and start the
/// persistence task. Without a database, accounts live in memory.
async fn init_persistence(config: &ServerConfig) -> PersistenceHandle {
    let memory = || {
        warn!("Running without a database: accounts and characters are kept in memory");
        persistence::spawn(MemoryStore::with_tokens(config.dev_tokens.clone()))
    };

    let Some(url) = config.database_url.as_deref() else {
        return memory();
    };

    let db = match Database::connect(url, config.db_max_connections).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return memory();
        }
    };
    if let Err(e) = db.ensure_schema().await {
        error!("Failed to prepare database schema: {}", e);
        return memory();
    }
    if let Err(e) = db.seed_tokens(config.dev_tokens.keys().map(String::as_str)).await {
        warn!("Failed to seed development accounts: {}", e);
    }
    info!("Connected to database");

    let cache = match config.redis_url.as_deref() {
        Some(url) => match Cache::connect(url).await {
            Ok(cache) => {
                info!("Connected to Redis cache");
                Some(cache)
            }
            Err(e) => {
                warn!("Failed to connect to Redis, continuing without cache: {}", e);
                None
            }
        },
        None => None,
    };

    persistence::spawn(PostgresStore::new(db, cache))
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Main game loop: ticks, socket events and periodic saves until `shutdown`
/// resolves
async fn run_game_loop(
    world: &mut World,
    events: &mut mpsc::UnboundedReceiver<NetEvent>,
    config: &ServerConfig,
    shutdown: impl Future<Output = ()>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(config.tick_rate.max(1))));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let save_every = Duration::from_secs(config.save_interval_secs.max(1));
    let mut save = tokio::time::interval_at(tokio::time::Instant::now() + save_every, save_every);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => world.tick(now_millis()),
            Some(event) = events.recv() => world.handle_event(event, now_millis()),
            _ = save.tick() => world.save_all(),
            _ = &mut shutdown => break,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = ServerConfig::path_from_env();
    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration in {}: {}", config_path, e);
            return;
        }
    };

    info!("Starting Realm Server...");
    info!("Tick rate: {} Hz", config.tick_rate);

    let map_definitions = match definitions::load_or_default(config.maps_path.as_deref()) {
        Ok(definitions) => definitions,
        Err(e) => {
            error!("Failed to load map definitions: {}", e);
            return;
        }
    };

    let persistence = init_persistence(&config).await;
    let gids = GidAllocator::new();
    let mut world = World::new(map_definitions, gids.clone(), persistence.clone(), &config);

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (tracker, writers) = writer_set();
    let address = config.listen_address();
    let server = match Server::bind(&address, gids, persistence.clone(), events_tx, tracker).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server on {}: {}", address, e);
            persistence.shutdown().await;
            return;
        }
    };
    info!("Listening on {}", address);
    let accept = tokio::spawn(server.run());

    info!("Server started successfully!");
    run_game_loop(&mut world, &mut events, &config, shutdown_signal()).await;

    info!("Shutting down...");
    world.shutdown();
    accept.abort();
    if !writers.wait(CLOSE_GRACE).await {
        warn!("Some sockets were still closing after {:?}", CLOSE_GRACE);
    }
    persistence.shutdown().await;
    info!("Shutdown complete");
}
