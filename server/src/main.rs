//! Persona NPC Server
//!
//! Standalone host that serves per-viewer NPCs over UDP.

use std::time::{Duration, Instant};

use log::{error, info, warn};

use persona::config::NpcConfig;
use persona::error::NpcError;
use persona::host::Host;
use persona::math::Location;
use persona::movement::{self, BehaviourKind, MoveBehaviour, Path, PathKind};
use persona::network::Server;
use persona::npc::{AttributeDefaults, ClickAction, ClickBinding, ClickFilter, FollowLook, Npc, Visibility};
use persona::registry::NpcManager;
use persona::skins;
use persona::world::GridWorld;

/// Config file, overridable with `PERSONA_CONFIG`
const CONFIG_PATH: &str = "persona.json";

/// World the demo NPCs live in
const DEMO_WORLD: &str = "world";

/// Solid up to here in the demo world
const DEMO_GROUND: i32 = 64;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::var("PERSONA_CONFIG").unwrap_or_else(|_| CONFIG_PATH.to_string());
    let config = match NpcConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Could not load {}: {}", path, e);
            warn!("Using default config");
            NpcConfig::default()
        }
    };

    info!("Starting Persona Server...");
    info!("Tick rate: {} Hz", config.tick_rate);
    info!("Listening on port {}", config.listen_port);

    let mut npcs = NpcManager::new(config.clone(), AttributeDefaults::default());

    // Skin lookups are optional; without them every skin request resolves
    // to the fallback skin
    match skins::init(&config.skin).await {
        Ok((fetcher, results)) => {
            npcs.set_skin_fetcher(fetcher, results);
        }
        Err(e) => {
            error!("Failed to initialize skin lookups: {}", e);
            error!("Server will run with fallback skins only");
        }
    }

    let mut world = GridWorld::new();
    world.set_ground_level(DEMO_WORLD, DEMO_GROUND);
    let mut host = Host::new(world, npcs);

    if let Err(e) = spawn_demo_npcs(&mut host) {
        error!("Failed to spawn demo NPCs: {}", e);
    }

    let interactions = host.npcs.interaction_sender();
    let mut server = match Server::new(config.listen_port, interactions).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return;
        }
    };

    let tick_duration = config.tick_duration();
    let mut last_report = Instant::now();
    let report_interval = Duration::from_secs(60);

    info!("Server started successfully!");

    // Main loop
    loop {
        let tick_start = Instant::now();

        server.process_incoming(&mut host);
        host.tick(tick_start);
        server.process_outgoing(&mut host).await;

        if last_report.elapsed() >= report_interval {
            info!(
                "{} viewers connected, tick {}",
                server.client_count(),
                host.npcs.tick_count()
            );
            last_report = Instant::now();
        }

        // Sleep until next tick
        let elapsed = tick_start.elapsed();
        if elapsed < tick_duration {
            tokio::time::sleep(tick_duration - elapsed).await;
        }
    }
}

/// A greeter everyone sees and a guard walking a loop
fn spawn_demo_npcs(host: &mut Host) -> Result<(), NpcError> {
    let y = DEMO_GROUND as f64 + 1.0;
    let Host { world, packets, npcs } = host;

    let greeter = npcs.create_global("greeter", Location::new(DEMO_WORLD, 0.5, y, 0.5), Visibility::Everyone)?;
    greeter
        .attributes_mut()
        .set_text(Some(vec!["&6Greeter".to_string(), "&7Click me".to_string()]));
    greeter.attributes_mut().set_follow_look(Some(FollowLook::NearestPlayer));
    greeter.add_click_action(ClickBinding::new(
        ClickFilter::Right,
        ClickAction::Message("Welcome, {player}!".to_string()),
    ));
    greeter.add_click_action(ClickBinding::new(
        ClickFilter::Left,
        ClickAction::ActionBar("{npc} does not like that".to_string()),
    ));
    npcs.with_global(packets, world, "greeter", |npc, ctx| npc.create(ctx))?;

    let route = vec![
        Location::new(DEMO_WORLD, 8.5, y, 8.5),
        Location::new(DEMO_WORLD, 8.5, y, -8.5),
        Location::new(DEMO_WORLD, -8.5, y, -8.5),
        Location::new(DEMO_WORLD, -8.5, y, 8.5),
    ];
    let guard = npcs.create_global("guard", Location::new(DEMO_WORLD, -8.5, y, 8.5), Visibility::Everyone)?;
    guard.attributes_mut().set_text(Some(vec!["&cGuard".to_string()]));
    npcs.with_global(packets, world, "guard", |npc, ctx| {
        npc.create(ctx)?;
        let path = Path::new(route, PathKind::Repetitive)?;
        movement::set_behaviour(npc, ctx, MoveBehaviour::new(BehaviourKind::CustomPath(path)))
    })?;

    info!("Spawned demo NPCs");
    Ok(())
}
