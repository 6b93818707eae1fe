use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::sync::mpsc;
use std::thread;

use engine::world::{Tilemap, Vec2};
use engine::{
    resolve_app_paths, ConfigSnapshot, ConfigStore, LoopConfig, MapId, MetricsHandle,
    StartupError, World,
};
use populace::{Shard, ShardOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SEED_ENV_VAR: &str = "POPULACE_SEED";
const DEFAULT_MAP_SIZE: u32 = 128;

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) shard: Shard,
    pub(crate) metrics: MetricsHandle,
}

pub(crate) fn build_app() -> Result<AppWiring, StartupError> {
    init_tracing();
    info!("=== Populace Startup ===");

    let paths = resolve_app_paths()?;
    info!(
        root = %paths.root.display(),
        config = %paths.config_path.display(),
        "paths_resolved"
    );

    let store = ConfigStore::load(&paths.config_path);
    let seed = parse_seed_from_env().unwrap_or_else(rand::random);
    let world = build_world(&store.snapshot(), seed);
    info!(seed, "world_ready");

    let options = ShardOptions {
        seed,
        snapshot_path: Some(paths.snapshot_path()),
        echo_console: true,
    };
    let mut shard = Shard::new(world, store, options);
    let metrics = MetricsHandle::default();
    shard.attach_metrics(metrics.clone());

    let (sender, receiver) = mpsc::channel();
    let pump = thread::Builder::new()
        .name("admin-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
    match pump {
        Ok(_) => shard.attach_console(receiver),
        Err(err) => warn!(error = %err, "admin_input_unavailable"),
    }

    Ok(AppWiring {
        config: LoopConfig::default(),
        shard,
        metrics,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn parse_seed_from_env() -> Option<u64> {
    let raw = std::env::var(SEED_ENV_VAR).ok()?;
    match raw.trim().parse() {
        Ok(seed) => Some(seed),
        Err(_) => {
            warn!(value = %raw, "seed_env_ignored");
            None
        }
    }
}

/// Open ground covering every configured region, one tilemap per map.
fn build_world(config: &ConfigSnapshot, seed: u64) -> World {
    let mut world = World::new(seed);
    let mut extents: BTreeMap<MapId, (Vec2, Vec2)> = BTreeMap::new();
    for region in &config.regions {
        let entry = extents
            .entry(region.map)
            .or_insert((Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.0)));
        entry.0.x = entry.0.x.min(region.bounds.min.x);
        entry.0.y = entry.0.y.min(region.bounds.min.y);
        entry.1.x = entry.1.x.max(region.bounds.max.x);
        entry.1.y = entry.1.y.max(region.bounds.max.y);
    }
    if extents.is_empty() {
        let size = DEFAULT_MAP_SIZE as f32;
        extents.insert(MapId::default(), (Vec2::new(0.0, 0.0), Vec2::new(size, size)));
    }

    for (map, (min, max)) in extents {
        let origin = Vec2::new(min.x.floor(), min.y.floor());
        let width = (max.x - origin.x).ceil().max(1.0) as u32;
        let height = (max.y - origin.y).ceil().max(1.0) as u32;
        match Tilemap::open(width, height, origin) {
            Ok(tilemap) => {
                info!(map = map.0, width, height, "map_ready");
                world.insert_map(map, tilemap);
            }
            Err(err) => warn!(
                map = map.0,
                error = %err,
                component = "bootstrap",
                "map_build_failed"
            ),
        }
    }
    world
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_covers_builtin_regions() {
        let store = ConfigStore::builtin();
        let world = build_world(&store.snapshot(), 7);

        let map = world.map(MapId(0)).expect("map 0");
        assert_eq!(map.width(), 128);
        assert_eq!(map.height(), 128);
        for region in &store.snapshot().regions {
            assert!(world.is_walkable(region.map, region.bounds.center()));
        }
    }

    #[test]
    fn empty_config_gets_default_map() {
        let mut snapshot = (*ConfigStore::builtin().snapshot()).clone();
        snapshot.regions.clear();

        let world = build_world(&snapshot, 7);

        let map = world.map(MapId::default()).expect("default map");
        assert_eq!(map.width(), DEFAULT_MAP_SIZE);
    }
}
