//! Scripted multi-agent scenarios.
//!
//! Every scenario implements [`Scene`]; a [`SceneHandle`] owns one boxed scene
//! plus its shared bookkeeping and drives it through
//! Preparing → Active → Concluding → Complete. Scenes never hold references
//! to agents; they act through a [`SceneContext`] borrowed for one update.

use std::fmt;
use std::time::Duration;

use engine::config::BehaviorConfig;
use engine::world::{EntityId, MapId, MobileSpec, Vec2, World, WorldError};
use engine::GameTime;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::brain::Brains;
use crate::director::{AgentRecord, AgentRegistry};
use crate::spawn::{find_spawn_point_near, spawn_agent, AgentBlueprint};

mod caravan;
mod war;

pub use caravan::{CaravanScene, CaravanState};
pub use war::{Matchup, WarScene, WarState};

const WAR_DURATION: Duration = Duration::from_secs(20 * 60);
const CARAVAN_MIN_DURATION: Duration = Duration::from_secs(15 * 60);

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SceneId(pub u64);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneKind {
    War,
    Caravan,
}

impl SceneKind {
    pub const ALL: [SceneKind; 2] = [SceneKind::War, SceneKind::Caravan];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "war" => Some(Self::War),
            "caravan" | "merchantcaravan" | "merchant_caravan" => Some(Self::Caravan),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::War => "War",
            Self::Caravan => "Merchant Caravan",
        }
    }

    pub fn default_duration(self) -> Duration {
        match self {
            Self::War => WAR_DURATION,
            Self::Caravan => CARAVAN_MIN_DURATION,
        }
    }

    /// Fewest agents a scene of this kind starts with.
    pub fn min_agents(self) -> u32 {
        match self {
            Self::War => war::min_agents(),
            Self::Caravan => caravan::min_agents(),
        }
    }

    /// A fresh, uninitialized scenario of this kind.
    pub fn instantiate<R: Rng + ?Sized>(self, rng: &mut R) -> Box<dyn Scene> {
        match self {
            Self::War => Box::new(WarScene::random(rng)),
            Self::Caravan => Box::new(CaravanScene::default()),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SceneState {
    Preparing,
    Active,
    Concluding,
    Complete,
}

impl SceneState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Preparing => "Preparing",
            Self::Active => "Active",
            Self::Concluding => "Concluding",
            Self::Complete => "Complete",
        }
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("no spawn location found near {center:?} on {map:?}")]
    NoSpawnLocation { map: MapId, center: Vec2 },
    #[error("failed to place scene body: {0}")]
    Spawn(#[from] WorldError),
    #[error("agent {0:?} already belongs to another scene")]
    AlreadyCommitted(EntityId),
    #[error("no walkable route found from {0:?}")]
    NoRoute(Vec2),
    #[error("population cap of {cap} reached")]
    AtCapacity { cap: u32 },
}

/// Bookkeeping shared by every scene kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneCore {
    pub id: SceneId,
    pub name: String,
    pub map: MapId,
    pub center: Vec2,
    pub started_at: GameTime,
    pub duration: Duration,
    participants: Vec<EntityId>,
    /// Scene-owned bodies (summons, pack animals) deleted on completion.
    summons: Vec<EntityId>,
}

impl SceneCore {
    pub fn new(
        id: SceneId,
        name: impl Into<String>,
        map: MapId,
        center: Vec2,
        now: GameTime,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            map,
            center,
            started_at: now,
            duration: WAR_DURATION,
            participants: Vec::new(),
            summons: Vec::new(),
        }
    }

    pub fn participants(&self) -> &[EntityId] {
        &self.participants
    }

    pub fn summons(&self) -> &[EntityId] {
        &self.summons
    }

    pub fn elapsed(&self, now: GameTime) -> Duration {
        now.saturating_since(self.started_at)
    }

    pub fn has_expired(&self, now: GameTime) -> bool {
        self.elapsed(now) >= self.duration
    }

    pub(crate) fn add_participant(&mut self, id: EntityId) {
        if !self.participants.contains(&id) {
            self.participants.push(id);
        }
    }

    pub(crate) fn add_summon(&mut self, id: EntityId) {
        if !self.summons.contains(&id) {
            self.summons.push(id);
        }
    }

    pub(crate) fn set_members(&mut self, participants: Vec<EntityId>, summons: Vec<EntityId>) {
        self.participants = participants;
        self.summons = summons;
    }

    /// Drops dead or deleted bodies and returns the agents that left.
    fn prune(&mut self, world: &World) -> Vec<EntityId> {
        let alive = |id: &EntityId| world.get(*id).is_some_and(|mobile| mobile.is_alive());
        let (kept, gone): (Vec<EntityId>, Vec<EntityId>) =
            self.participants.iter().partition(|id| alive(*id));
        self.participants = kept;
        self.summons.retain(alive);
        gone
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickVerdict {
    Continue,
    Conclude(String),
}

/// Per-kind state carried through a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenePayload {
    War(WarState),
    Caravan(CaravanState),
}

impl ScenePayload {
    pub fn kind(&self) -> SceneKind {
        match self {
            Self::War(_) => SceneKind::War,
            Self::Caravan(_) => SceneKind::Caravan,
        }
    }

    /// Rewrites saved body ids, dropping any `lookup` cannot resolve.
    pub fn remap(self, lookup: &dyn Fn(EntityId) -> Option<EntityId>) -> Self {
        match self {
            Self::War(state) => Self::War(state.remap(lookup)),
            Self::Caravan(state) => Self::Caravan(state.remap(lookup)),
        }
    }

    pub fn into_scene(self) -> Box<dyn Scene> {
        match self {
            Self::War(state) => Box::new(WarScene::from_state(state)),
            Self::Caravan(state) => Box::new(CaravanScene::from_state(state)),
        }
    }
}

pub trait Scene: fmt::Debug {
    fn kind(&self) -> SceneKind;

    fn title(&self) -> String {
        self.kind().label().to_string()
    }

    /// Cheap check made before a scene is registered.
    fn can_trigger(&self, world: &World, map: MapId, center: Vec2) -> bool {
        world.can_spawn_at(map, center)
    }

    fn initialize(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError>;

    fn on_activated(
        &mut self,
        _core: &SceneCore,
        _ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        Ok(())
    }

    /// Participants are already pruned of the dead when this runs.
    fn tick(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<TickVerdict, SceneError>;

    fn cleanup(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError>;

    fn on_completed(&mut self, _core: &SceneCore, _ctx: &mut SceneContext<'_>) {}

    fn save_state(&self) -> ScenePayload;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredSpeech {
    pub at: GameTime,
    pub speaker: EntityId,
    pub text: String,
}

/// Everything a scene may touch during one update.
pub struct SceneContext<'a> {
    pub world: &'a mut World,
    pub agents: &'a mut AgentRegistry,
    pub brains: &'a mut Brains,
    pub rng: &'a mut SmallRng,
    pub behavior: &'a BehaviorConfig,
    pub now: GameTime,
    pub speech: &'a mut Vec<DeferredSpeech>,
}

impl SceneContext<'_> {
    /// Agents that can still be created before the global cap is reached.
    pub fn headroom(&self) -> u32 {
        let live = u32::try_from(self.agents.live_count(self.world)).unwrap_or(u32::MAX);
        self.behavior.global_cap.saturating_sub(live)
    }

    pub(crate) fn at_capacity(&self) -> SceneError {
        SceneError::AtCapacity {
            cap: self.behavior.global_cap,
        }
    }

    /// Creates a registered agent already committed to `scene`. Fails once
    /// the live population has reached the global cap.
    pub fn spawn_agent(
        &mut self,
        scene: SceneId,
        blueprint: AgentBlueprint,
        map: MapId,
        near: Vec2,
        radius: f32,
    ) -> Result<EntityId, SceneError> {
        if self.headroom() == 0 {
            return Err(self.at_capacity());
        }
        let point = find_spawn_point_near(
            self.world,
            self.rng,
            map,
            near,
            radius,
            self.behavior.spawn_attempts,
        )
        .ok_or(SceneError::NoSpawnLocation { map, center: near })?;
        let spawned = spawn_agent(self.world, self.rng, blueprint, map, point)?;
        let mut record = AgentRecord::new(spawned.id, spawned.persona, spawned.style);
        record.scene = Some(scene);
        self.agents.register(record);
        self.brains.insert_fresh(spawned.id, self.now);
        Ok(spawned.id)
    }

    /// Places a scene-owned body that is not a registered agent.
    pub fn spawn_transient(
        &mut self,
        spec: MobileSpec,
        near: Vec2,
        radius: f32,
    ) -> Result<EntityId, SceneError> {
        let map = spec.map;
        let point = find_spawn_point_near(
            self.world,
            self.rng,
            map,
            near,
            radius,
            self.behavior.spawn_attempts,
        )
        .ok_or(SceneError::NoSpawnLocation { map, center: near })?;
        let spec = MobileSpec {
            position: point,
            ..spec
        };
        Ok(self.world.spawn(spec)?)
    }

    /// Commits an existing agent to `scene`.
    pub fn enlist(&mut self, scene: SceneId, id: EntityId) -> Result<(), SceneError> {
        if self.agents.set_scene(id, Some(scene)) {
            Ok(())
        } else {
            Err(SceneError::AlreadyCommitted(id))
        }
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.world.get(id).is_some_and(|mobile| mobile.is_alive())
    }

    pub fn position_of(&self, id: EntityId) -> Option<Vec2> {
        self.world.get(id).map(|mobile| mobile.position)
    }

    pub fn set_destination(&mut self, id: EntityId, point: Vec2) -> bool {
        self.brains.set_destination(id, point, self.now)
    }

    pub fn set_combatant(&mut self, id: EntityId, target: EntityId) -> bool {
        self.world.set_combatant(id, Some(target))
    }

    pub fn make_mutual_aggressors(&mut self, a: EntityId, b: EntityId) {
        self.world.make_mutual_aggressors(a, b);
    }

    pub fn clear_combat(&mut self, id: EntityId) {
        self.world.clear_combat(id);
    }

    pub fn say(&mut self, speaker: EntityId, text: impl Into<String>) {
        self.world.say(speaker, text);
    }

    pub fn say_later(&mut self, speaker: EntityId, text: impl Into<String>, delay: Duration) {
        self.speech.push(DeferredSpeech {
            at: self.now + delay,
            speaker,
            text: text.into(),
        });
    }

    pub fn request_support(&mut self, helper: EntityId, target: EntityId) {
        self.brains.request_support(helper, target);
    }

    /// Hands an agent back to the director's free population.
    pub fn release_agent(&mut self, id: EntityId) {
        self.agents.set_scene(id, None);
        self.brains.clear_destination(id);
        if let Some(mobile) = self.world.get_mut(id) {
            mobile.alliance = None;
        }
    }

    pub fn delete_agent(&mut self, id: EntityId) {
        self.agents.unregister(id);
        self.brains.remove(id);
        self.world.delete(id);
    }

    pub fn delete_summon(&mut self, id: EntityId) {
        self.world.delete(id);
    }
}

/// Read-only copy handed to callers outside the director.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSummary {
    pub id: SceneId,
    pub kind: SceneKind,
    pub name: String,
    pub state: SceneState,
    pub map: MapId,
    pub center: Vec2,
    pub participants: usize,
    pub elapsed: Duration,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct SceneHandle {
    core: SceneCore,
    state: SceneState,
    scene: Box<dyn Scene>,
}

impl SceneHandle {
    pub fn new(
        id: SceneId,
        map: MapId,
        center: Vec2,
        now: GameTime,
        scene: Box<dyn Scene>,
    ) -> Self {
        let mut core = SceneCore::new(id, scene.title(), map, center, now);
        core.duration = scene.kind().default_duration();
        Self {
            core,
            state: SceneState::Preparing,
            scene,
        }
    }

    /// Rebuilds a handle from saved parts; no lifecycle hook runs.
    pub(crate) fn restore(core: SceneCore, state: SceneState, scene: Box<dyn Scene>) -> Self {
        Self { core, state, scene }
    }

    pub fn id(&self) -> SceneId {
        self.core.id
    }

    pub fn kind(&self) -> SceneKind {
        self.scene.kind()
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn core(&self) -> &SceneCore {
        &self.core
    }

    pub fn is_complete(&self) -> bool {
        self.state == SceneState::Complete
    }

    pub fn can_trigger(&self, world: &World) -> bool {
        self.scene.can_trigger(world, self.core.map, self.core.center)
    }

    pub fn save_state(&self) -> ScenePayload {
        self.scene.save_state()
    }

    pub fn summary(&self, now: GameTime) -> SceneSummary {
        let elapsed = match self.state {
            SceneState::Preparing => Duration::ZERO,
            _ => self.core.elapsed(now),
        };
        SceneSummary {
            id: self.core.id,
            kind: self.kind(),
            name: self.core.name.clone(),
            state: self.state,
            map: self.core.map,
            center: self.core.center,
            participants: self.core.participants.len(),
            elapsed,
            duration: self.core.duration,
        }
    }

    /// Advances the state machine one step. Any failure forces a best-effort
    /// cleanup and the terminal state.
    pub fn update(&mut self, ctx: &mut SceneContext<'_>) -> SceneState {
        let result = match self.state {
            SceneState::Preparing => self.activate(ctx),
            SceneState::Active => self.advance(ctx),
            SceneState::Concluding => self.finish(ctx),
            SceneState::Complete => return SceneState::Complete,
        };
        if let Err(error) = result {
            warn!(
                component = "scene",
                scene = self.core.id.0,
                kind = self.kind().label(),
                state = self.state.label(),
                error = %error,
                "scene_failed"
            );
            self.abort(ctx);
        }
        self.state
    }

    /// Moves an active scene to Concluding; a scene still preparing has
    /// nothing to clean up and completes at once.
    pub fn request_end(&mut self, reason: &str) -> bool {
        let next = match self.state {
            SceneState::Preparing => SceneState::Complete,
            SceneState::Active => SceneState::Concluding,
            SceneState::Concluding | SceneState::Complete => return false,
        };
        info!(scene = self.core.id.0, reason, "scene_end_requested");
        self.transition(next);
        true
    }

    fn activate(&mut self, ctx: &mut SceneContext<'_>) -> Result<(), SceneError> {
        self.core.started_at = ctx.now;
        self.scene.initialize(&mut self.core, ctx)?;
        self.scene.on_activated(&self.core, ctx)?;
        info!(
            scene = self.core.id.0,
            kind = self.kind().label(),
            name = %self.core.name,
            participants = self.core.participants.len(),
            duration_secs = self.core.duration.as_secs(),
            "scene_activated"
        );
        self.transition(SceneState::Active);
        Ok(())
    }

    fn advance(&mut self, ctx: &mut SceneContext<'_>) -> Result<(), SceneError> {
        let gone = self.core.prune(ctx.world);
        if !gone.is_empty() {
            debug!(scene = self.core.id.0, pruned = gone.len(), "scene_pruned_dead");
        }
        for id in gone {
            ctx.agents.set_scene(id, None);
        }
        let verdict = self.scene.tick(&mut self.core, ctx)?;
        let reason = match verdict {
            TickVerdict::Conclude(reason) => Some(reason),
            TickVerdict::Continue if self.core.has_expired(ctx.now) => {
                Some("duration elapsed".to_string())
            }
            TickVerdict::Continue if self.core.participants.is_empty() => {
                Some("no participants left".to_string())
            }
            TickVerdict::Continue => None,
        };
        if let Some(reason) = reason {
            info!(scene = self.core.id.0, reason = %reason, "scene_concluding");
            self.transition(SceneState::Concluding);
        }
        Ok(())
    }

    fn finish(&mut self, ctx: &mut SceneContext<'_>) -> Result<(), SceneError> {
        self.scene.cleanup(&mut self.core, ctx)?;
        self.release_members(ctx);
        self.scene.on_completed(&self.core, ctx);
        info!(scene = self.core.id.0, kind = self.kind().label(), "scene_completed");
        self.transition(SceneState::Complete);
        Ok(())
    }

    fn abort(&mut self, ctx: &mut SceneContext<'_>) {
        let setup_failed = self.state == SceneState::Preparing;
        if let Err(secondary) = self.scene.cleanup(&mut self.core, ctx) {
            debug!(
                component = "scene",
                scene = self.core.id.0,
                error = %secondary,
                "scene_cleanup_failed"
            );
        }
        if setup_failed {
            self.discard_members(ctx);
        } else {
            self.release_members(ctx);
        }
        self.transition(SceneState::Complete);
    }

    /// A half-built scene never hands its agents to the free population.
    fn discard_members(&mut self, ctx: &mut SceneContext<'_>) {
        let participants = std::mem::take(&mut self.core.participants);
        if !participants.is_empty() {
            debug!(
                scene = self.core.id.0,
                deleted = participants.len(),
                "scene_setup_discarded"
            );
        }
        for id in participants {
            ctx.delete_agent(id);
        }
        for id in std::mem::take(&mut self.core.summons) {
            ctx.delete_summon(id);
        }
    }

    fn release_members(&mut self, ctx: &mut SceneContext<'_>) {
        for id in std::mem::take(&mut self.core.participants) {
            ctx.release_agent(id);
        }
        for id in std::mem::take(&mut self.core.summons) {
            ctx.delete_summon(id);
        }
    }

    fn transition(&mut self, next: SceneState) {
        if next <= self.state {
            return;
        }
        debug!(
            scene = self.core.id.0,
            from = self.state.label(),
            to = next.label(),
            "scene_state_changed"
        );
        self.state = next;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use engine::config::BehaviorConfig;
    use engine::world::{MapId, Tilemap, Vec2, World};
    use engine::GameTime;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::{DeferredSpeech, SceneContext};
    use crate::brain::Brains;
    use crate::director::AgentRegistry;

    pub(crate) const MAP: MapId = MapId(0);

    pub(crate) struct Stage {
        pub(crate) world: World,
        pub(crate) agents: AgentRegistry,
        pub(crate) brains: Brains,
        pub(crate) rng: SmallRng,
        pub(crate) behavior: BehaviorConfig,
        pub(crate) now: GameTime,
        pub(crate) speech: Vec<DeferredSpeech>,
    }

    impl Stage {
        pub(crate) fn open(size: u32) -> Self {
            let mut world = World::new(5);
            world.insert_map(MAP, Tilemap::open(size, size, Vec2::default()).expect("tilemap"));
            Self {
                world,
                agents: AgentRegistry::default(),
                brains: Brains::default(),
                rng: SmallRng::seed_from_u64(5),
                behavior: BehaviorConfig::default(),
                now: GameTime::from_secs(60),
                speech: Vec::new(),
            }
        }

        pub(crate) fn ctx(&mut self) -> SceneContext<'_> {
            self.world.advance_clock(self.now);
            SceneContext {
                world: &mut self.world,
                agents: &mut self.agents,
                brains: &mut self.brains,
                rng: &mut self.rng,
                behavior: &self.behavior,
                now: self.now,
                speech: &mut self.speech,
            }
        }
    }
}
