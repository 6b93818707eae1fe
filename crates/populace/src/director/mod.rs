//! Population director.
//!
//! Keeps every active region at or above its minimum population without
//! passing the global cap, and owns the scenes running on the shard.

use engine::config::{ConfigSnapshot, RegionProfile};
use engine::world::{EntityId, MapId, MobileKind, Vec2, World, WorldError};
use engine::GameTime;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::brain::Brains;
use crate::persona::{CombatStyle, Persona};
use crate::scene::{
    DeferredSpeech, SceneContext, SceneHandle, SceneId, SceneKind, SceneState, SceneSummary,
};
use crate::spawn::{find_spawn_point, spawn_agent, AgentBlueprint};

mod registry;

pub use registry::{AgentRecord, AgentRegistry};

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("no spawn location found")]
    NoSpawnLocation,
    #[error("population is at the global cap of {0}")]
    AtCapacity(u32),
    #[error("scene {0} not found")]
    SceneNotFound(SceneId),
    #[error("scene {0} is already ending")]
    SceneAlreadyEnding(SceneId),
    #[error("a {kind:?} scene cannot start at {center:?} on {map:?}")]
    CannotTrigger {
        kind: SceneKind,
        map: MapId,
        center: Vec2,
    },
    #[error(transparent)]
    Spawn(#[from] WorldError),
}

/// Borrowed shard state for one director operation.
pub struct PopulationContext<'a> {
    pub world: &'a mut World,
    pub brains: &'a mut Brains,
    pub rng: &'a mut SmallRng,
    pub config: &'a ConfigSnapshot,
    pub now: GameTime,
    pub speech: &'a mut Vec<DeferredSpeech>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSpawnReport {
    pub region: String,
    pub before: u32,
    pub requested: u32,
    pub spawned: u32,
    pub failed_slots: u32,
    pub capped: bool,
}

impl RegionSpawnReport {
    fn untouched(region: &RegionProfile, before: u32) -> Self {
        Self {
            region: region.name.clone(),
            before,
            requested: 0,
            spawned: 0,
            failed_slots: 0,
            capped: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pruned: usize,
    pub trimmed: usize,
    pub at_cap: bool,
    pub regions: Vec<RegionSpawnReport>,
    pub scene_started: Option<SceneId>,
}

impl TickReport {
    pub fn spawned(&self) -> u32 {
        self.regions.iter().map(|report| report.spawned).sum()
    }
}

#[derive(Debug)]
pub struct Director {
    registry: AgentRegistry,
    scenes: Vec<SceneHandle>,
    next_scene_id: u64,
    auto_scenes: bool,
}

impl Director {
    pub fn new(auto_scenes: bool) -> Self {
        Self {
            registry: AgentRegistry::default(),
            scenes: Vec::new(),
            next_scene_id: 1,
            auto_scenes,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn auto_scenes(&self) -> bool {
        self.auto_scenes
    }

    pub fn set_auto_scenes(&mut self, enabled: bool) {
        if self.auto_scenes != enabled {
            info!(enabled, "auto_scenes_toggled");
        }
        self.auto_scenes = enabled;
    }

    /// Idempotent; returns whether the registry changed.
    pub fn register_agent(
        &mut self,
        record: AgentRecord,
        brains: &mut Brains,
        now: GameTime,
    ) -> bool {
        let id = record.id;
        if !self.registry.register(record) {
            return false;
        }
        brains.insert_fresh(id, now);
        true
    }

    /// Idempotent; returns whether the registry changed.
    pub fn unregister_agent(&mut self, id: EntityId, brains: &mut Brains) -> bool {
        brains.remove(id);
        self.registry.unregister(id)
    }

    pub fn live_count(&self, world: &World) -> u32 {
        u32::try_from(self.registry.live_count(world)).unwrap_or(u32::MAX)
    }

    pub fn count_in_region(&self, world: &World, region: &RegionProfile) -> u32 {
        let count = self
            .registry
            .iter()
            .filter_map(|record| world.get(record.id))
            .filter(|mobile| mobile.is_alive() && region.contains(mobile.map, mobile.position))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn scenes(&self) -> &[SceneHandle] {
        &self.scenes
    }

    pub fn scene(&self, id: SceneId) -> Option<&SceneHandle> {
        self.scenes.iter().find(|handle| handle.id() == id)
    }

    pub fn active_scenes(&self, now: GameTime) -> Vec<SceneSummary> {
        self.scenes
            .iter()
            .filter(|handle| !handle.is_complete())
            .map(|handle| handle.summary(now))
            .collect()
    }

    pub fn add_scene(&mut self, handle: SceneHandle) {
        self.next_scene_id = self.next_scene_id.max(handle.id().0.saturating_add(1));
        self.scenes.push(handle);
    }

    pub(crate) fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    fn allocate_scene_id(&mut self) -> SceneId {
        let id = SceneId(self.next_scene_id);
        self.next_scene_id = self.next_scene_id.saturating_add(1);
        id
    }

    /// One population pass: prune, enforce the cap, refill regions, maybe
    /// start a scene.
    pub fn tick(&mut self, ctx: &mut PopulationContext<'_>) -> TickReport {
        let mut report = TickReport {
            pruned: self.prune(ctx),
            trimmed: self.trim_to_cap(ctx),
            ..TickReport::default()
        };

        let cap = ctx.config.behavior.global_cap;
        let live = self.live_count(ctx.world);
        if live >= cap {
            info!(live, cap, "population_at_cap");
            report.at_cap = true;
            return report;
        }

        let config = ctx.config;
        for region in config.active_regions() {
            let count = self.count_in_region(ctx.world, region);
            report
                .regions
                .push(self.ensure_region_population(ctx, region, count));
        }

        report.scene_started = self.maybe_start_scene(ctx);
        debug!(
            pruned = report.pruned,
            trimmed = report.trimmed,
            spawned = report.spawned(),
            live = self.live_count(ctx.world),
            scenes = self.scenes.len(),
            "director_tick"
        );
        report
    }

    /// Tops `region` up toward its minimum. A region already at or above
    /// its minimum is left alone.
    pub fn ensure_region_population(
        &mut self,
        ctx: &mut PopulationContext<'_>,
        region: &RegionProfile,
        count: u32,
    ) -> RegionSpawnReport {
        let mut report = RegionSpawnReport::untouched(region, count);
        if count >= region.min {
            return report;
        }

        let wanted = (region.min - count).min(region.max.saturating_sub(count));
        let headroom = ctx
            .config
            .behavior
            .global_cap
            .saturating_sub(self.live_count(ctx.world));
        report.requested = wanted.min(headroom);
        report.capped = report.requested < wanted;

        for _ in 0..report.requested {
            let Some(point) = find_spawn_point(
                ctx.world,
                ctx.rng,
                region.map,
                region.bounds,
                ctx.config.behavior.spawn_attempts,
            ) else {
                report.failed_slots += 1;
                continue;
            };
            let persona = Persona::random_for_region(region.safety, ctx.rng);
            match self.spawn_at(ctx, AgentBlueprint::new(persona), region.map, point) {
                Ok(_) => report.spawned += 1,
                Err(error) => {
                    warn!(
                        component = "director",
                        region = %region.name,
                        error = %error,
                        "region_spawn_failed"
                    );
                    report.failed_slots += 1;
                }
            }
        }

        if report.failed_slots > 0 {
            warn!(
                component = "director",
                region = %region.name,
                requested = report.requested,
                failed = report.failed_slots,
                "region_spawn_partial"
            );
        }
        if report.requested > 0 {
            info!(
                region = %region.name,
                before = report.before,
                spawned = report.spawned,
                capped = report.capped,
                "region_population"
            );
        }
        report
    }

    /// Advances every scene one step and drops the ones that completed.
    pub fn update_scenes(&mut self, ctx: &mut PopulationContext<'_>) -> usize {
        let mut scene_ctx = scene_context(&mut self.registry, ctx);
        for handle in &mut self.scenes {
            handle.update(&mut scene_ctx);
        }
        let before = self.scenes.len();
        self.scenes.retain(|handle| {
            if handle.is_complete() {
                debug!(scene = handle.id().0, "scene_removed");
            }
            !handle.is_complete()
        });
        before - self.scenes.len()
    }

    /// Ends a scene now, running its cleanup in the same call.
    pub fn end_scene(
        &mut self,
        ctx: &mut PopulationContext<'_>,
        id: SceneId,
    ) -> Result<(), DirectorError> {
        let index = self
            .scenes
            .iter()
            .position(|handle| handle.id() == id)
            .ok_or(DirectorError::SceneNotFound(id))?;
        if !self.scenes[index].request_end("ended by operator") {
            return Err(DirectorError::SceneAlreadyEnding(id));
        }
        if self.scenes[index].state() == SceneState::Concluding {
            let mut scene_ctx = scene_context(&mut self.registry, ctx);
            self.scenes[index].update(&mut scene_ctx);
        }
        if self.scenes[index].is_complete() {
            self.scenes.remove(index);
        }
        Ok(())
    }

    pub fn create_scene(
        &mut self,
        ctx: &mut PopulationContext<'_>,
        kind: SceneKind,
        map: MapId,
        center: Vec2,
    ) -> Result<SceneId, DirectorError> {
        let cap = ctx.config.behavior.global_cap;
        let live = self.live_count(ctx.world);
        if live.saturating_add(kind.min_agents()) > cap {
            return Err(DirectorError::AtCapacity(cap));
        }
        let scene = kind.instantiate(ctx.rng);
        let id = self.allocate_scene_id();
        let handle = SceneHandle::new(id, map, center, ctx.now, scene);
        if !handle.can_trigger(ctx.world) {
            return Err(DirectorError::CannotTrigger { kind, map, center });
        }
        info!(
            scene = id.0,
            kind = kind.label(),
            map = map.0,
            x = center.x,
            y = center.y,
            "scene_created"
        );
        self.add_scene(handle);
        Ok(id)
    }

    /// Adopts agent bodies the registry does not know about.
    pub fn register_missing(&mut self, ctx: &mut PopulationContext<'_>) -> usize {
        let found: Vec<AgentRecord> = ctx
            .world
            .mobiles()
            .filter(|mobile| mobile.kind == MobileKind::Agent && mobile.is_alive())
            .filter(|mobile| !self.registry.contains(mobile.id))
            .map(|mobile| {
                let persona =
                    Persona::infer_from_karma(mobile.karma, mobile.primary_combat_skill());
                let style = mobile.held_weapon().map(|weapon| {
                    if weapon.is_ranged() {
                        CombatStyle::Ranged
                    } else {
                        CombatStyle::Melee(weapon.skill)
                    }
                });
                AgentRecord::new(mobile.id, persona, style)
            })
            .collect();
        let mut adopted = 0;
        for record in found {
            if self.register_agent(record, ctx.brains, ctx.now) {
                adopted += 1;
            }
        }
        if adopted > 0 {
            info!(adopted, "agents_adopted");
        }
        adopted
    }

    /// Spawns one agent anywhere inside `region`.
    pub fn spawn_in_region(
        &mut self,
        ctx: &mut PopulationContext<'_>,
        region: &RegionProfile,
        persona: Persona,
    ) -> Result<EntityId, DirectorError> {
        let cap = ctx.config.behavior.global_cap;
        if self.live_count(ctx.world) >= cap {
            return Err(DirectorError::AtCapacity(cap));
        }
        let point = find_spawn_point(
            ctx.world,
            ctx.rng,
            region.map,
            region.bounds,
            ctx.config.behavior.spawn_attempts,
        )
        .ok_or(DirectorError::NoSpawnLocation)?;
        self.spawn_at(ctx, AgentBlueprint::new(persona), region.map, point)
    }

    /// Removes an agent and its body. Returns false when nothing existed.
    pub fn delete_agent(&mut self, ctx: &mut PopulationContext<'_>, id: EntityId) -> bool {
        let registered = self.unregister_agent(id, ctx.brains);
        let deleted = ctx.world.delete(id);
        if registered || deleted {
            info!(entity = id.0, "agent_deleted");
        }
        registered || deleted
    }

    fn spawn_at(
        &mut self,
        ctx: &mut PopulationContext<'_>,
        blueprint: AgentBlueprint,
        map: MapId,
        point: Vec2,
    ) -> Result<EntityId, DirectorError> {
        let spawned = spawn_agent(ctx.world, ctx.rng, blueprint, map, point)?;
        self.register_agent(
            AgentRecord::new(spawned.id, spawned.persona, spawned.style),
            ctx.brains,
            ctx.now,
        );
        debug!(
            entity = spawned.id.0,
            persona = %spawned.persona.label(),
            x = point.x,
            y = point.y,
            "agent_spawned"
        );
        Ok(spawned.id)
    }

    /// Drops records whose body is gone; dead bodies are deleted.
    fn prune(&mut self, ctx: &mut PopulationContext<'_>) -> usize {
        let mut pruned = 0;
        for id in self.registry.ids() {
            let keep = match ctx.world.get(id) {
                None => false,
                Some(mobile) if !mobile.is_alive() => {
                    ctx.world.delete(id);
                    false
                }
                Some(_) => true,
            };
            if !keep {
                self.unregister_agent(id, ctx.brains);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "agents_pruned");
        }
        pruned
    }

    /// Deletes agents, newest first, until the live count fits the cap.
    /// Free agents go before scene members; scenes prune the members they
    /// lose on their next update.
    fn trim_to_cap(&mut self, ctx: &mut PopulationContext<'_>) -> usize {
        let cap = ctx.config.behavior.global_cap;
        let mut excess = self.live_count(ctx.world).saturating_sub(cap);
        if excess == 0 {
            return 0;
        }
        let (free, committed): (Vec<&AgentRecord>, Vec<&AgentRecord>) = self
            .registry
            .iter()
            .rev()
            .filter(|record| ctx.world.is_live(record.id))
            .partition(|record| record.scene.is_none());
        let victims: Vec<EntityId> = free
            .into_iter()
            .chain(committed)
            .map(|record| record.id)
            .collect();
        let mut trimmed = 0;
        for id in victims {
            if excess == 0 {
                break;
            }
            self.unregister_agent(id, ctx.brains);
            ctx.world.delete(id);
            excess -= 1;
            trimmed += 1;
        }
        warn!(component = "director", trimmed, cap, "population_trimmed");
        trimmed
    }

    fn maybe_start_scene(&mut self, ctx: &mut PopulationContext<'_>) -> Option<SceneId> {
        if !self.auto_scenes {
            return None;
        }
        let config = ctx.config;
        let behavior = &config.behavior;
        let running = self.scenes.iter().filter(|handle| !handle.is_complete()).count();
        if running >= behavior.max_active_scenes as usize {
            return None;
        }
        if !ctx.rng.gen_bool(f64::from(behavior.scene_start_chance.clamp(0.0, 1.0))) {
            return None;
        }
        let regions: Vec<&RegionProfile> = config.active_regions().collect();
        let region = *regions.choose(ctx.rng)?;
        let kind = *SceneKind::ALL.choose(ctx.rng)?;
        let center = find_spawn_point(
            ctx.world,
            ctx.rng,
            region.map,
            region.bounds,
            behavior.spawn_attempts,
        )?;
        match self.create_scene(ctx, kind, region.map, center) {
            Ok(id) => Some(id),
            Err(error) => {
                debug!(region = %region.name, error = %error, "auto_scene_skipped");
                None
            }
        }
    }
}

fn scene_context<'s>(
    registry: &'s mut AgentRegistry,
    ctx: &'s mut PopulationContext<'_>,
) -> SceneContext<'s> {
    SceneContext {
        world: &mut *ctx.world,
        agents: registry,
        brains: &mut *ctx.brains,
        rng: &mut *ctx.rng,
        behavior: &ctx.config.behavior,
        now: ctx.now,
        speech: &mut *ctx.speech,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use engine::config::{ConfigSnapshot, RegionProfile, SafetyTier};
    use engine::world::{MapId, Rect, Tilemap, Vec2, World};
    use engine::GameTime;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::PopulationContext;
    use crate::brain::Brains;
    use crate::scene::DeferredSpeech;

    pub(crate) const MAP: MapId = MapId(0);

    pub(crate) fn region(name: &str, min: u32, max: u32) -> RegionProfile {
        RegionProfile {
            name: name.to_string(),
            map: MAP,
            bounds: Rect::from_corners(Vec2::new(0.0, 0.0), Vec2::new(32.0, 32.0)),
            min,
            max,
            active: true,
            safety: SafetyTier::Contested,
        }
    }

    pub(crate) struct Shardlet {
        pub(crate) world: World,
        pub(crate) brains: Brains,
        pub(crate) rng: SmallRng,
        pub(crate) config: ConfigSnapshot,
        pub(crate) now: GameTime,
        pub(crate) speech: Vec<DeferredSpeech>,
    }

    impl Shardlet {
        pub(crate) fn open(regions: Vec<RegionProfile>) -> Self {
            let mut world = World::new(13);
            world.insert_map(MAP, Tilemap::open(64, 64, Vec2::default()).expect("tilemap"));
            let mut config = ConfigSnapshot {
                regions,
                ..ConfigSnapshot::default()
            };
            config.behavior.auto_scenes = false;
            Self {
                world,
                brains: Brains::default(),
                rng: SmallRng::seed_from_u64(13),
                config,
                now: GameTime::from_secs(30),
                speech: Vec::new(),
            }
        }

        pub(crate) fn ctx(&mut self) -> PopulationContext<'_> {
            self.world.advance_clock(self.now);
            PopulationContext {
                world: &mut self.world,
                brains: &mut self.brains,
                rng: &mut self.rng,
                config: &self.config,
                now: self.now,
                speech: &mut self.speech,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use engine::world::{MobileSpec, Rect, BLOCKED_TILE_ID};

    use super::test_support::*;
    use super::*;
    use crate::persona::{ExperienceTier, Profile};

    fn fill_region(director: &mut Director, shard: &mut Shardlet, count: u32) {
        let region = region("Fill", count, count);
        let report = director.ensure_region_population(&mut shard.ctx(), &region, 0);
        assert_eq!(report.spawned, count);
    }

    #[test]
    fn region_at_max_spawns_nothing() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        let region = region("Full", 4, 4);
        let report = director.ensure_region_population(&mut shard.ctx(), &region, 4);
        assert_eq!(report.requested, 0);
        assert!(director.registry().is_empty());
    }

    #[test]
    fn region_one_below_min_spawns_exactly_one() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        let region = region("Almost", 5, 8);
        let report = director.ensure_region_population(&mut shard.ctx(), &region, 4);
        assert_eq!(report.requested, 1);
        assert_eq!(report.spawned, 1);
        assert_eq!(director.registry().len(), 1);
        assert_eq!(shard.brains.len(), 1);
    }

    #[test]
    fn region_above_min_is_left_alone() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        let region = region("Busy", 3, 10);
        let report = director.ensure_region_population(&mut shard.ctx(), &region, 6);
        assert_eq!(report.requested, 0);
    }

    #[test]
    fn blocked_region_reports_every_slot_failed() {
        let mut shard = Shardlet::open(Vec::new());
        let map = shard.world.map_mut(MAP).expect("map");
        for y in 0..8 {
            for x in 0..8 {
                map.set_tile(x, y, BLOCKED_TILE_ID);
            }
        }
        let mut director = Director::new(false);
        let mut walled = region("Walled", 3, 6);
        walled.bounds = Rect::from_corners(Vec2::new(0.0, 0.0), Vec2::new(8.0, 8.0));

        let report = director.ensure_region_population(&mut shard.ctx(), &walled, 0);
        assert_eq!(report.requested, 3);
        assert_eq!(report.spawned, 0);
        assert_eq!(report.failed_slots, 3);
    }

    #[test]
    fn tick_never_exceeds_the_global_cap() {
        let mut shard = Shardlet::open(vec![region("North", 10, 12), region("South", 10, 12)]);
        shard.config.behavior.global_cap = 7;
        let mut director = Director::new(false);

        let report = director.tick(&mut shard.ctx());
        assert_eq!(report.spawned(), 7);
        assert!(report.regions[0].capped);
        assert_eq!(report.regions[1].requested, 0);
        assert_eq!(director.live_count(&shard.world), 7);

        let again = director.tick(&mut shard.ctx());
        assert!(again.at_cap);
        assert_eq!(director.live_count(&shard.world), 7);
    }

    #[test]
    fn lowering_the_cap_trims_free_agents_newest_first() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        fill_region(&mut director, &mut shard, 5);
        let oldest = director.registry().ids()[0];

        shard.config.behavior.global_cap = 2;
        let report = director.tick(&mut shard.ctx());
        assert_eq!(report.trimmed, 3);
        assert!(report.at_cap);
        assert_eq!(director.live_count(&shard.world), 2);
        assert!(director.registry().contains(oldest));
    }

    #[test]
    fn tick_prunes_dead_agents_and_deletes_their_bodies() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        fill_region(&mut director, &mut shard, 2);
        let victim = director.registry().ids()[0];
        shard.world.kill(victim);

        let report = director.tick(&mut shard.ctx());
        assert_eq!(report.pruned, 1);
        assert!(!director.registry().contains(victim));
        assert!(!shard.brains.contains(victim));
        assert!(shard.world.get(victim).is_none());
    }

    #[test]
    fn tick_refills_regions_below_min() {
        let mut shard = Shardlet::open(vec![region("Town", 3, 6)]);
        let mut director = Director::new(false);
        let report = director.tick(&mut shard.ctx());
        assert_eq!(report.regions.len(), 1);
        assert_eq!(report.spawned(), 3);

        let town = shard.config.regions[0].clone();
        assert_eq!(director.count_in_region(&shard.world, &town), 3);
        let again = director.tick(&mut shard.ctx());
        assert_eq!(again.spawned(), 0);
    }

    #[test]
    fn inactive_regions_are_skipped() {
        let mut dormant = region("Dormant", 3, 6);
        dormant.active = false;
        let mut shard = Shardlet::open(vec![dormant]);
        let mut director = Director::new(false);
        let report = director.tick(&mut shard.ctx());
        assert!(report.regions.is_empty());
        assert!(director.registry().is_empty());
    }

    #[test]
    fn register_and_unregister_are_idempotent() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        let record = AgentRecord::new(
            EntityId(40),
            Persona::new(Profile::Crafter, ExperienceTier::Newbie),
            None,
        );
        assert!(director.register_agent(record.clone(), &mut shard.brains, shard.now));
        assert!(!director.register_agent(record, &mut shard.brains, shard.now));
        assert_eq!(director.registry().len(), 1);

        assert!(director.unregister_agent(EntityId(40), &mut shard.brains));
        assert!(!director.unregister_agent(EntityId(40), &mut shard.brains));
        assert!(director.registry().is_empty());
        assert!(shard.brains.is_empty());
    }

    #[test]
    fn register_missing_adopts_unknown_agent_bodies() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        let stray = shard
            .world
            .spawn(
                MobileSpec::new("Stray", MobileKind::Agent, MAP, Vec2::new(5.5, 5.5))
                    .with_karma(-80),
            )
            .expect("spawn");
        shard
            .world
            .spawn(MobileSpec::new(
                "Mule",
                MobileKind::PackAnimal,
                MAP,
                Vec2::new(6.5, 5.5),
            ))
            .expect("spawn");

        assert_eq!(director.register_missing(&mut shard.ctx()), 1);
        assert_eq!(director.registry().profile_of(stray), Some(Profile::Killer));
        assert!(shard.brains.contains(stray));
        assert_eq!(director.register_missing(&mut shard.ctx()), 0);
    }

    #[test]
    fn created_scene_runs_and_can_be_ended() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        let id = director
            .create_scene(&mut shard.ctx(), SceneKind::War, MAP, Vec2::new(32.5, 32.5))
            .expect("create");
        assert_eq!(director.active_scenes(shard.now).len(), 1);

        director.update_scenes(&mut shard.ctx());
        let handle = director.scene(id).expect("scene");
        assert_eq!(handle.state(), SceneState::Active);
        let participants = handle.core().participants().to_vec();
        assert!(!participants.is_empty());

        director.end_scene(&mut shard.ctx(), id).expect("end");
        assert!(director.scene(id).is_none());
        for agent in participants {
            assert_eq!(director.registry().scene_of(agent), None);
        }
        assert!(matches!(
            director.end_scene(&mut shard.ctx(), id),
            Err(DirectorError::SceneNotFound(_))
        ));
    }

    #[test]
    fn scene_without_room_for_its_agents_is_refused() {
        let mut shard = Shardlet::open(Vec::new());
        shard.config.behavior.global_cap = 3;
        let mut director = Director::new(false);

        let result =
            director.create_scene(&mut shard.ctx(), SceneKind::War, MAP, Vec2::new(32.5, 32.5));
        assert!(matches!(result, Err(DirectorError::AtCapacity(3))));

        director.tick(&mut shard.ctx());
        assert!(director.scenes().is_empty());
        assert!(director.live_count(&shard.world) <= 3);
    }

    #[test]
    fn scene_setup_that_meets_the_cap_leaves_nothing_behind() {
        let mut shard = Shardlet::open(Vec::new());
        shard.config.behavior.global_cap = 6;
        let mut director = Director::new(false);
        let id = director
            .create_scene(&mut shard.ctx(), SceneKind::War, MAP, Vec2::new(32.5, 32.5))
            .expect("room for a war");
        fill_region(&mut director, &mut shard, 4);

        director.update_scenes(&mut shard.ctx());
        assert!(director.scene(id).is_none());
        assert_eq!(director.registry().len(), 4);
        assert_eq!(director.live_count(&shard.world), 4);

        director.tick(&mut shard.ctx());
        assert!(director.live_count(&shard.world) <= 6);
    }

    #[test]
    fn scene_setup_sizes_sides_to_the_remaining_room() {
        let mut shard = Shardlet::open(Vec::new());
        shard.config.behavior.global_cap = 9;
        let mut director = Director::new(false);
        let id = director
            .create_scene(&mut shard.ctx(), SceneKind::War, MAP, Vec2::new(32.5, 32.5))
            .expect("room for a war");
        fill_region(&mut director, &mut shard, 4);

        director.update_scenes(&mut shard.ctx());
        let handle = director.scene(id).expect("scene");
        assert_eq!(handle.state(), SceneState::Active);
        assert_eq!(handle.core().participants().len(), 4);
        assert_eq!(director.live_count(&shard.world), 8);
    }

    #[test]
    fn lowered_cap_trims_scene_members_after_free_agents() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        let id = director
            .create_scene(&mut shard.ctx(), SceneKind::War, MAP, Vec2::new(32.5, 32.5))
            .expect("create");
        director.update_scenes(&mut shard.ctx());
        fill_region(&mut director, &mut shard, 1);
        let members = director.scene(id).expect("scene").core().participants().len();

        shard.config.behavior.global_cap = 2;
        let report = director.tick(&mut shard.ctx());
        assert_eq!(report.trimmed, members - 1);
        assert_eq!(director.live_count(&shard.world), 2);

        director.update_scenes(&mut shard.ctx());
        if let Some(handle) = director.scene(id) {
            for member in handle.core().participants() {
                assert!(shard.world.is_live(*member));
            }
        }
    }

    #[test]
    fn failed_war_setup_deletes_the_faction_already_spawned() {
        let mut shard = Shardlet::open(Vec::new());
        let tilemap = shard.world.map_mut(MAP).expect("map");
        for x in 36..48 {
            for y in 26..40 {
                tilemap.set_tile(x, y, BLOCKED_TILE_ID);
            }
        }
        let mut director = Director::new(false);
        let id = director
            .create_scene(&mut shard.ctx(), SceneKind::War, MAP, Vec2::new(32.5, 32.5))
            .expect("center is open");

        director.update_scenes(&mut shard.ctx());
        assert!(director.scene(id).is_none());
        assert!(director.registry().is_empty());
        assert!(shard.brains.is_empty());
        let agents = shard
            .world
            .mobiles()
            .filter(|mobile| mobile.kind == MobileKind::Agent)
            .count();
        assert_eq!(agents, 0);
    }

    #[test]
    fn scene_cannot_start_on_blocked_ground() {
        let mut shard = Shardlet::open(Vec::new());
        shard
            .world
            .map_mut(MAP)
            .expect("map")
            .set_tile(10, 10, BLOCKED_TILE_ID);
        let mut director = Director::new(false);
        let result =
            director.create_scene(&mut shard.ctx(), SceneKind::War, MAP, Vec2::new(10.5, 10.5));
        assert!(matches!(result, Err(DirectorError::CannotTrigger { .. })));
        assert!(director.scenes().is_empty());
    }

    #[test]
    fn auto_scenes_respect_the_toggle_and_the_limit() {
        let mut shard = Shardlet::open(vec![region("Field", 0, 0)]);
        shard.config.behavior.scene_start_chance = 1.0;
        shard.config.behavior.max_active_scenes = 1;
        let mut director = Director::new(false);
        assert_eq!(director.tick(&mut shard.ctx()).scene_started, None);

        director.set_auto_scenes(true);
        assert!(director.tick(&mut shard.ctx()).scene_started.is_some());
        shard.now = shard.now + Duration::from_secs(30);
        assert_eq!(director.tick(&mut shard.ctx()).scene_started, None);
        assert_eq!(director.scenes().len(), 1);
    }

    #[test]
    fn delete_agent_removes_record_and_body() {
        let mut shard = Shardlet::open(Vec::new());
        let mut director = Director::new(false);
        fill_region(&mut director, &mut shard, 1);
        let id = director.registry().ids()[0];

        assert!(director.delete_agent(&mut shard.ctx(), id));
        assert!(!director.delete_agent(&mut shard.ctx(), id));
        assert!(shard.world.get(id).is_none());
    }
}
