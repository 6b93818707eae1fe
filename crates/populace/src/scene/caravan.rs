//! A merchant caravan with guards and pack animals travelling a waypoint route.

use std::f32::consts::TAU;
use std::ops::RangeInclusive;
use std::time::Duration;

use engine::world::{
    AllianceGroup, EntityId, ItemKind, MobileKind, MobileSpec, Stats, Vec2, World,
};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Scene, SceneContext, SceneCore, SceneError, SceneKind, ScenePayload, TickVerdict};
use crate::persona::{Persona, Profile};
use crate::spawn::AgentBlueprint;

const MERCHANTS: RangeInclusive<u32> = 1..=2;
const GUARDS: RangeInclusive<u32> = 2..=3;
const PACK_ANIMALS: RangeInclusive<u32> = 2..=4;
const GOODS_PER_ANIMAL: RangeInclusive<u32> = 2..=5;
const GOODS_VALUE: RangeInclusive<u32> = 5..=120;
const TRAVEL_DISTANCE: RangeInclusive<f32> = 30.0..=60.0;
const MIN_DURATION: Duration = Duration::from_secs(15 * 60);
const UNITS_PER_MINUTE: f32 = 10.0;
const WAYPOINT_SPACING: f32 = 15.0;
const MAX_INTERMEDIATE_WAYPOINTS: usize = 5;
const WAYPOINT_RADIUS: f32 = 3.0;
const ARRIVAL_RADIUS: f32 = 5.0;
const FOLLOW_DISTANCE: f32 = 2.0;
const GATHER_RADIUS: f32 = 3.0;
const CHATTER_CHANCE: f64 = 0.05;

const TRADE_GOODS: [&str; 8] = [
    "bolt of cloth",
    "crate of spices",
    "iron ingots",
    "barrel of ale",
    "bundle of furs",
    "jar of glass beads",
    "salted fish",
    "sack of grain",
];

const CHATTER: [&str; 6] = [
    "Keep those animals moving.",
    "The roads are quiet today. Too quiet.",
    "These goods will fetch a fine price.",
    "Eyes open, the hills hide bandits.",
    "Not far now.",
    "Mind the cargo!",
];

pub(super) fn min_agents() -> u32 {
    MERCHANTS.start() + GUARDS.start()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaravanState {
    /// Intermediate waypoints followed by the destination.
    pub route: Vec<Vec2>,
    pub next_waypoint: usize,
    pub merchants: Vec<EntityId>,
    pub guards: Vec<EntityId>,
    pub pack_animals: Vec<EntityId>,
    pub defensive: bool,
}

impl CaravanState {
    pub(crate) fn remap(self, lookup: &dyn Fn(EntityId) -> Option<EntityId>) -> Self {
        let remap =
            |ids: Vec<EntityId>| -> Vec<EntityId> { ids.into_iter().filter_map(lookup).collect() };
        Self {
            merchants: remap(self.merchants),
            guards: remap(self.guards),
            pack_animals: remap(self.pack_animals),
            ..self
        }
    }

    pub fn destination(&self) -> Option<Vec2> {
        self.route.last().copied()
    }

    fn travellers(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.merchants.iter().chain(&self.guards).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaravanScene {
    state: CaravanState,
    requested_destination: Option<Vec2>,
}

impl CaravanScene {
    /// A caravan bound for a fixed destination instead of a random one.
    pub fn to(destination: Vec2) -> Self {
        Self {
            requested_destination: Some(destination),
            ..Self::default()
        }
    }

    pub fn from_state(state: CaravanState) -> Self {
        Self {
            state,
            requested_destination: None,
        }
    }

    pub fn state(&self) -> &CaravanState {
        &self.state
    }

    fn pick_destination(&self, core: &SceneCore, ctx: &mut SceneContext<'_>) -> Option<Vec2> {
        if let Some(destination) = self.requested_destination {
            return Some(destination.snapped());
        }
        (0..ctx.behavior.spawn_attempts).find_map(|_| {
            let angle = ctx.rng.gen_range(0.0..TAU);
            let distance = ctx.rng.gen_range(TRAVEL_DISTANCE);
            let candidate = Vec2::new(
                core.center.x + angle.cos() * distance,
                core.center.y + angle.sin() * distance,
            )
            .snapped();
            ctx.world.can_spawn_at(core.map, candidate).then_some(candidate)
        })
    }

    fn issue_current_waypoint(&self, ctx: &mut SceneContext<'_>) {
        let Some(target) = self.state.route.get(self.state.next_waypoint).copied() else {
            return;
        };
        for id in self.state.travellers() {
            ctx.set_destination(id, target);
        }
    }

    fn herd_pack_animals(&self, ctx: &mut SceneContext<'_>) {
        let leaders = self.state.travellers().collect::<Vec<_>>();
        for animal in &self.state.pack_animals {
            let Some(body) = ctx.world.get(*animal) else {
                continue;
            };
            let owner = body
                .owner
                .filter(|owner| ctx.is_alive(*owner))
                .or_else(|| leaders.first().copied());
            let Some(leader_at) = owner.and_then(|owner| ctx.position_of(owner)) else {
                continue;
            };
            if body.position.distance(leader_at) > FOLLOW_DISTANCE {
                ctx.world.step_along_path(*animal, leader_at, false);
            }
        }
    }

    /// Guards engage whoever is fighting the caravan; merchants call for help.
    fn defend(&mut self, core: &SceneCore, ctx: &mut SceneContext<'_>) -> bool {
        let members = self
            .state
            .travellers()
            .chain(self.state.pack_animals.iter().copied())
            .collect::<Vec<_>>();
        let threats = members
            .iter()
            .filter_map(|id| ctx.world.get(*id).and_then(|mobile| mobile.combatant))
            .filter(|enemy| !members.contains(enemy) && ctx.is_alive(*enemy))
            .collect::<Vec<_>>();
        if threats.is_empty() {
            if self.state.defensive {
                self.state.defensive = false;
                debug!(scene = core.id.0, "caravan_resumed");
                self.issue_current_waypoint(ctx);
            }
            return false;
        }

        let entering = !self.state.defensive;
        self.state.defensive = true;
        for guard in &self.state.guards {
            let idle = ctx
                .world
                .get(*guard)
                .is_some_and(|mobile| mobile.combatant.is_none());
            if !idle {
                continue;
            }
            if let Some(threat) = nearest(ctx.world, *guard, &threats) {
                ctx.set_combatant(*guard, threat);
            }
        }
        for merchant in &self.state.merchants {
            for guard in &self.state.guards {
                ctx.request_support(*guard, *merchant);
            }
            if entering {
                ctx.say(*merchant, "Guards! Protect the caravan!");
            }
        }
        if entering {
            info!(scene = core.id.0, threats = threats.len(), "caravan_under_attack");
        }
        true
    }
}

fn nearest(world: &World, from: EntityId, candidates: &[EntityId]) -> Option<EntityId> {
    let origin = world.get(from)?.position;
    candidates
        .iter()
        .filter_map(|id| world.get(*id))
        .min_by(|a, b| {
            a.position
                .distance_squared(origin)
                .total_cmp(&b.position.distance_squared(origin))
                .then(a.id.cmp(&b.id))
        })
        .map(|mobile| mobile.id)
}

/// Evenly spaced intermediate points plus the destination.
pub(crate) fn build_route(start: Vec2, destination: Vec2) -> Vec<Vec2> {
    let distance = start.distance(destination);
    let intermediate =
        ((distance / WAYPOINT_SPACING).round() as usize).clamp(1, MAX_INTERMEDIATE_WAYPOINTS);
    let mut route = (1..=intermediate)
        .map(|step| {
            let t = step as f32 / (intermediate + 1) as f32;
            start.lerp(destination, t).snapped()
        })
        .collect::<Vec<_>>();
    route.push(destination);
    route
}

pub(crate) fn travel_duration(distance: f32) -> Duration {
    let minutes = (distance / UNITS_PER_MINUTE).max(0.0);
    MIN_DURATION.max(Duration::from_secs_f32(minutes * 60.0))
}

impl Scene for CaravanScene {
    fn kind(&self) -> SceneKind {
        SceneKind::Caravan
    }

    fn initialize(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        let destination = self
            .pick_destination(core, ctx)
            .ok_or(SceneError::NoRoute(core.center))?;
        self.state.route = build_route(core.center, destination);
        self.state.next_waypoint = 0;
        let distance = core.center.distance(destination);
        core.duration = travel_duration(distance);
        core.name = format!(
            "Merchant Caravan to ({:.0}, {:.0})",
            destination.x, destination.y
        );

        let alliance = AllianceGroup::for_scene_side(core.id.0, 0);
        let headroom = ctx.headroom();
        let merchants = ctx
            .rng
            .gen_range(MERCHANTS)
            .min(headroom.saturating_sub(*GUARDS.start()));
        let guards = ctx.rng.gen_range(GUARDS).min(headroom.saturating_sub(merchants));
        if merchants < *MERCHANTS.start() || guards < *GUARDS.start() {
            return Err(ctx.at_capacity());
        }
        for (profile, count) in [(Profile::Crafter, merchants), (Profile::Adventurer, guards)] {
            for _ in 0..count {
                let persona = Persona::new(profile, Persona::random_tier(ctx.rng));
                let blueprint = AgentBlueprint::new(persona).with_alliance(alliance);
                let id = ctx.spawn_agent(core.id, blueprint, core.map, core.center, GATHER_RADIUS)?;
                core.add_participant(id);
                match profile {
                    Profile::Crafter => self.state.merchants.push(id),
                    _ => self.state.guards.push(id),
                }
            }
        }

        let animals = ctx.rng.gen_range(PACK_ANIMALS);
        for index in 0..animals as usize {
            let owner = self.state.merchants[index % self.state.merchants.len()];
            let mut spec =
                MobileSpec::new("a pack horse", MobileKind::PackAnimal, core.map, core.center)
                .with_stats(Stats {
                    strength: 80,
                    dexterity: 40,
                    intelligence: 10,
                })
                .with_owner(owner)
                .with_alliance(Some(alliance));
            for _ in 0..ctx.rng.gen_range(GOODS_PER_ANIMAL) {
                let name = TRADE_GOODS.choose(ctx.rng).copied().unwrap_or("crate of goods");
                let value = ctx.rng.gen_range(GOODS_VALUE);
                let goods = ctx.world.create_item(name, ItemKind::TradeGood { value });
                spec = spec.with_pack_item(goods);
            }
            let animal = ctx.spawn_transient(spec, core.center, GATHER_RADIUS)?;
            core.add_summon(animal);
            self.state.pack_animals.push(animal);
        }
        Ok(())
    }

    fn on_activated(
        &mut self,
        core: &SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        self.issue_current_waypoint(ctx);
        if let Some(merchant) = self.state.merchants.first() {
            ctx.say(*merchant, "Move out! We ride for the market.");
        }
        info!(
            scene = core.id.0,
            merchants = self.state.merchants.len(),
            guards = self.state.guards.len(),
            pack_animals = self.state.pack_animals.len(),
            waypoints = self.state.route.len(),
            duration_secs = core.duration.as_secs(),
            "caravan_departed"
        );
        Ok(())
    }

    fn tick(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<TickVerdict, SceneError> {
        for group in [
            &mut self.state.merchants,
            &mut self.state.guards,
            &mut self.state.pack_animals,
        ] {
            group.retain(|id| ctx.world.get(*id).is_some_and(|mobile| mobile.is_alive()));
        }
        if self.state.merchants.is_empty() && self.state.guards.is_empty() {
            return Ok(TickVerdict::Conclude("caravan was lost".to_string()));
        }

        if self.defend(core, ctx) {
            return Ok(TickVerdict::Continue);
        }
        self.herd_pack_animals(ctx);
        if ctx.rng.gen_bool(CHATTER_CHANCE) {
            let speakers = self.state.travellers().collect::<Vec<_>>();
            if let (Some(speaker), Some(line)) =
                (speakers.choose(ctx.rng), CHATTER.choose(ctx.rng))
            {
                ctx.say(*speaker, *line);
            }
        }

        let Some(destination) = self.state.destination() else {
            return Ok(TickVerdict::Conclude("caravan has no route".to_string()));
        };
        let all_within = |point: Vec2, radius: f32, ctx: &SceneContext<'_>| {
            self.state.travellers().all(|id| {
                ctx.position_of(id)
                    .is_some_and(|position| position.distance(point) <= radius)
            })
        };
        if all_within(destination, ARRIVAL_RADIUS, &*ctx) {
            if let Some(merchant) = self.state.merchants.first() {
                ctx.say(*merchant, "We made it! Unload the goods.");
            }
            info!(scene = core.id.0, "caravan_arrived");
            return Ok(TickVerdict::Conclude("caravan arrived".to_string()));
        }

        let last = self.state.route.len().saturating_sub(1);
        let target = self.state.route[self.state.next_waypoint.min(last)];
        if self.state.next_waypoint < last && all_within(target, WAYPOINT_RADIUS, &*ctx) {
            self.state.next_waypoint += 1;
            debug!(
                scene = core.id.0,
                waypoint = self.state.next_waypoint,
                of = self.state.route.len(),
                "caravan_waypoint_reached"
            );
            self.issue_current_waypoint(ctx);
        }
        Ok(TickVerdict::Continue)
    }

    fn cleanup(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        let everyone = self
            .state
            .travellers()
            .chain(core.summons().iter().copied())
            .collect::<Vec<_>>();
        for id in everyone {
            ctx.clear_combat(id);
        }
        Ok(())
    }

    fn save_state(&self) -> ScenePayload {
        ScenePayload::Caravan(self.state.clone())
    }
}
