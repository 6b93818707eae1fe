//! Per-agent decision engine.
//!
//! Each registered agent owns one [`AgentBrain`]. The brain reads the world,
//! asks the registry for affiliation data, and commits at most one action per
//! heartbeat. Failures degrade to doing nothing for that heartbeat.

use std::collections::{BTreeMap, VecDeque};

use engine::config::BehaviorConfig;
use engine::world::{CastError, EntityId, ItemId, SpellId, Vec2, World};
use engine::GameTime;
use rand::rngs::SmallRng;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, trace};

use crate::director::AgentRegistry;

mod combat;
mod equipment;
mod navigation;
mod spells;
mod targeting;

pub use navigation::NavStep;
pub use targeting::{engagement_chance, power_estimate, PERCEPTION_RANGE};

const WANDER_CHANCE: f64 = 0.05;
const WANDER_RADIUS: f32 = 10.0;
const WANDER_ATTEMPTS: u32 = 6;

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("agent {0:?} disappeared during think")]
    AgentVanished(EntityId),
    #[error(transparent)]
    Cast(#[from] CastError),
}

/// What a think step committed to; mostly useful for tests and trace logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThinkOutcome {
    Inactive,
    HoldingCast,
    Fled,
    Supported { spell: SpellId, target: EntityId },
    AttackCast { spell: SpellId, target: EntityId },
    Engaged(EntityId),
    TargetAcquired(EntityId),
    Travel(NavStep),
    Wandering(Vec2),
    Idle,
}

pub struct ThinkContext<'a> {
    pub world: &'a mut World,
    pub agents: &'a AgentRegistry,
    pub behavior: &'a BehaviorConfig,
    pub rng: &'a mut SmallRng,
    pub now: GameTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TravelPlan {
    pub(crate) point: Vec2,
    pub(crate) issued_at: GameTime,
}

#[derive(Debug, Clone, Default)]
pub struct AgentBrain {
    destination: Option<TravelPlan>,
    stashed_destination: Option<TravelPlan>,
    last_location: Option<Vec2>,
    last_moved_at: GameTime,
    stuck_points: VecDeque<Vec2>,
    buff_cooldowns: BTreeMap<EntityId, GameTime>,
    buff_expiries: BTreeMap<(EntityId, SpellId), GameTime>,
    declined_until: BTreeMap<EntityId, GameTime>,
    next_cast_at: GameTime,
    next_support_at: GameTime,
    support_target: Option<EntityId>,
    stashed_item: Option<ItemId>,
}

impl AgentBrain {
    pub fn new(now: GameTime) -> Self {
        Self {
            last_moved_at: now,
            ..Self::default()
        }
    }

    pub fn destination(&self) -> Option<Vec2> {
        self.destination
            .or(self.stashed_destination)
            .map(|plan| plan.point)
    }

    pub fn set_destination(&mut self, point: Vec2, now: GameTime) {
        self.destination = Some(TravelPlan {
            point,
            issued_at: now,
        });
        self.stashed_destination = None;
        self.last_moved_at = now;
    }

    pub fn clear_destination(&mut self) {
        self.destination = None;
        self.stashed_destination = None;
    }

    /// Redirects the next beneficial spell to `target`.
    pub fn request_support(&mut self, target: EntityId) {
        self.support_target = Some(target);
    }

    pub fn stuck_points(&self) -> impl Iterator<Item = &Vec2> {
        self.stuck_points.iter()
    }

    pub fn think(&mut self, id: EntityId, ctx: &mut ThinkContext<'_>) -> ThinkOutcome {
        match self.try_think(id, ctx) {
            Ok(outcome) => {
                trace!(entity = id.0, outcome = ?outcome, "agent_thought");
                outcome
            }
            Err(error) => {
                debug!(component = "brain", entity = id.0, error = %error, "think_failed");
                ThinkOutcome::Idle
            }
        }
    }

    fn try_think(
        &mut self,
        id: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Result<ThinkOutcome, BrainError> {
        let Some(me) = ctx.world.get(id) else {
            return Ok(ThinkOutcome::Inactive);
        };
        if !me.is_alive() {
            return Ok(ThinkOutcome::Inactive);
        }
        let map = me.map;
        let combatant = me.combatant;

        self.restore_equipment(id, ctx);

        let valid_combatant = combatant.filter(|target| {
            ctx.world
                .get(*target)
                .is_some_and(|target| target.is_alive() && target.map == map)
        });
        if let Some(target) = valid_combatant {
            self.stash_destination();
            return self.combat_tick(id, target, ctx);
        }
        if combatant.is_some() {
            ctx.world.set_combatant(id, None);
        }
        self.restore_destination(ctx.now);

        if let Some(target) = self.acquire_target(id, ctx) {
            if ctx.world.set_combatant(id, Some(target)) {
                self.stash_destination();
                debug!(entity = id.0, target = target.0, "target_acquired");
                return Ok(ThinkOutcome::TargetAcquired(target));
            }
        }

        if self.destination.is_some() {
            return Ok(ThinkOutcome::Travel(self.navigate(id, ctx)?));
        }
        Ok(self.maybe_wander(id, ctx))
    }

    fn stash_destination(&mut self) {
        if self.stashed_destination.is_none() {
            self.stashed_destination = self.destination.take();
        }
    }

    fn restore_destination(&mut self, now: GameTime) {
        if let Some(plan) = self.stashed_destination.take() {
            if self.destination.is_none() {
                self.destination = Some(plan);
                self.last_moved_at = now;
            }
        }
    }

    fn maybe_wander(&mut self, id: EntityId, ctx: &mut ThinkContext<'_>) -> ThinkOutcome {
        if !ctx.rng.gen_bool(WANDER_CHANCE) {
            return ThinkOutcome::Idle;
        }
        let Some(me) = ctx.world.get(id) else {
            return ThinkOutcome::Idle;
        };
        let (map, origin) = (me.map, me.position);
        for _ in 0..WANDER_ATTEMPTS {
            let candidate = Vec2::new(
                origin.x + ctx.rng.gen_range(-WANDER_RADIUS..=WANDER_RADIUS),
                origin.y + ctx.rng.gen_range(-WANDER_RADIUS..=WANDER_RADIUS),
            )
            .snapped();
            if candidate.distance(origin) > 1.0 && ctx.world.is_walkable(map, candidate) {
                self.set_destination(candidate, ctx.now);
                return ThinkOutcome::Wandering(candidate);
            }
        }
        ThinkOutcome::Idle
    }
}

/// Brains for every registered agent, in ascending id order.
#[derive(Debug, Default)]
pub struct Brains {
    by_agent: BTreeMap<EntityId, AgentBrain>,
}

impl Brains {
    pub fn insert_fresh(&mut self, id: EntityId, now: GameTime) {
        self.by_agent.insert(id, AgentBrain::new(now));
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        self.by_agent.remove(&id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&AgentBrain> {
        self.by_agent.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut AgentBrain> {
        self.by_agent.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.by_agent.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_agent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_agent.is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.by_agent.keys().copied().collect()
    }

    pub fn set_destination(&mut self, id: EntityId, point: Vec2, now: GameTime) -> bool {
        let Some(brain) = self.by_agent.get_mut(&id) else {
            return false;
        };
        brain.set_destination(point, now);
        true
    }

    pub fn clear_destination(&mut self, id: EntityId) {
        if let Some(brain) = self.by_agent.get_mut(&id) {
            brain.clear_destination();
        }
    }

    pub fn request_support(&mut self, id: EntityId, target: EntityId) {
        if let Some(brain) = self.by_agent.get_mut(&id) {
            brain.request_support(target);
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(EntityId) -> bool) {
        self.by_agent.retain(|id, _| keep(*id));
    }
}


#[cfg(test)]
mod tests {
    use engine::world::Skill;

    use super::test_support::*;
    use super::*;
    use crate::persona::{CombatStyle, Profile};

    #[test]
    fn dead_agents_do_nothing() {
        let mut harness = Harness::open(16);
        let id = harness.agent(
            Profile::Crafter,
            0,
            CombatStyle::Melee(Skill::Macing),
            Vec2::new(4.5, 4.5),
        );
        harness.world.kill(id);
        let mut brain = AgentBrain::new(harness.now);
        assert_eq!(harness.think(&mut brain, id), ThinkOutcome::Inactive);
    }

    #[test]
    fn combat_stashes_destination_until_the_fight_ends() {
        let mut harness = Harness::open(24);
        let id = harness.agent(
            Profile::Adventurer,
            60,
            CombatStyle::Melee(Skill::Swords),
            Vec2::new(4.5, 4.5),
        );
        let foe = harness.agent(
            Profile::Killer,
            -90,
            CombatStyle::Melee(Skill::Swords),
            Vec2::new(5.5, 4.5),
        );
        let mut brain = AgentBrain::new(harness.now);
        brain.set_destination(Vec2::new(20.5, 20.5), harness.now);
        harness.world.set_combatant(id, Some(foe));

        harness.think(&mut brain, id);
        assert!(brain.destination.is_none());
        assert_eq!(brain.destination(), Some(Vec2::new(20.5, 20.5)));

        harness.world.delete(foe);
        harness.now = harness.now + std::time::Duration::from_secs(1);
        let outcome = harness.think(&mut brain, id);
        assert!(matches!(outcome, ThinkOutcome::Travel(_)), "{outcome:?}");
        assert_eq!(
            brain.destination.map(|plan| plan.point),
            Some(Vec2::new(20.5, 20.5))
        );
    }

    #[test]
    fn brains_table_routes_scene_commands() {
        let mut brains = Brains::default();
        brains.insert_fresh(EntityId(3), GameTime::ZERO);
        assert!(brains.set_destination(EntityId(3), Vec2::new(1.5, 1.5), GameTime::ZERO));
        assert!(!brains.set_destination(EntityId(4), Vec2::new(1.5, 1.5), GameTime::ZERO));
        assert_eq!(
            brains.get(EntityId(3)).and_then(AgentBrain::destination),
            Some(Vec2::new(1.5, 1.5))
        );
        brains.clear_destination(EntityId(3));
        assert_eq!(brains.get(EntityId(3)).and_then(AgentBrain::destination), None);
    }
}
