//! Two factions meet near a point and fight until one side is wiped out.

use std::ops::RangeInclusive;
use std::time::Duration;

use engine::world::{AllianceGroup, EntityId, MobileKind, MobileSpec, Skill, Stats, Vec2, World};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Scene, SceneContext, SceneCore, SceneError, SceneKind, ScenePayload, TickVerdict};
use crate::persona::{Persona, Profile};
use crate::spawn::AgentBlueprint;

const SIDE_OFFSET: f32 = 8.0;
const RALLY_RADIUS: f32 = 3.0;
const SIDE_SIZE: RangeInclusive<u32> = 2..=4;
const SUMMON_CHANCE: f64 = 0.3;
const BATTLE_CRY_DELAY: Duration = Duration::from_secs(2);

pub(super) fn min_agents() -> u32 {
    SIDE_SIZE.start() * 2
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Matchup {
    #[default]
    EvilVsGood,
    AdventurersVsBandits,
    NeutralHouses,
}

struct Faction {
    name: &'static str,
    profile: Profile,
    karma: RangeInclusive<i32>,
    battle_cry: &'static str,
}

impl Matchup {
    pub const ALL: [Matchup; 3] = [
        Matchup::EvilVsGood,
        Matchup::AdventurersVsBandits,
        Matchup::NeutralHouses,
    ];

    pub fn faction_names(self) -> [&'static str; 2] {
        let [first, second] = self.factions();
        [first.name, second.name]
    }

    fn factions(self) -> [Faction; 2] {
        match self {
            Matchup::EvilVsGood => [
                Faction {
                    name: "The Forces of Shadow",
                    profile: Profile::Killer,
                    karma: -120..=-40,
                    battle_cry: "Darkness takes you all!",
                },
                Faction {
                    name: "The Order of Virtue",
                    profile: Profile::Adventurer,
                    karma: 40..=120,
                    battle_cry: "For virtue and the light!",
                },
            ],
            Matchup::AdventurersVsBandits => [
                Faction {
                    name: "The Adventurers Guild",
                    profile: Profile::Adventurer,
                    karma: 30..=90,
                    battle_cry: "Clear the road, guildmates!",
                },
                Faction {
                    name: "The Bandits",
                    profile: Profile::Killer,
                    karma: -90..=-30,
                    battle_cry: "Your coin or your life!",
                },
            ],
            Matchup::NeutralHouses => [
                Faction {
                    name: "House Blackthorn",
                    profile: Profile::Adventurer,
                    karma: -20..=20,
                    battle_cry: "Blackthorn holds!",
                },
                Faction {
                    name: "House Valoria",
                    profile: Profile::Adventurer,
                    karma: -20..=20,
                    battle_cry: "For Valoria!",
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarState {
    pub matchup: Matchup,
    #[serde(default)]
    pub side_size: Option<u32>,
    pub sides: [Vec<EntityId>; 2],
}

impl WarState {
    pub(crate) fn remap(self, lookup: &dyn Fn(EntityId) -> Option<EntityId>) -> Self {
        let [first, second] = self.sides;
        let remap_side = |side: Vec<EntityId>| -> Vec<EntityId> {
            side.into_iter().filter_map(lookup).collect()
        };
        Self {
            sides: [remap_side(first), remap_side(second)],
            ..self
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WarScene {
    state: WarState,
}

impl WarScene {
    pub fn new(matchup: Matchup) -> Self {
        Self {
            state: WarState {
                matchup,
                ..WarState::default()
            },
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let matchup = Matchup::ALL.choose(rng).copied().unwrap_or_default();
        Self::new(matchup)
    }

    pub fn with_side_size(mut self, size: u32) -> Self {
        self.state.side_size = Some(size.max(1));
        self
    }

    pub fn from_state(state: WarState) -> Self {
        Self { state }
    }

    pub fn side(&self, index: usize) -> &[EntityId] {
        self.state.sides.get(index).map_or(&[], Vec::as_slice)
    }

    fn rally_point(core: &SceneCore, side: usize) -> Vec2 {
        let offset = if side == 0 { -SIDE_OFFSET } else { SIDE_OFFSET };
        Vec2::new(core.center.x + offset, core.center.y)
    }

    fn raise_summon(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        let side = ctx.rng.gen_range(0..2usize);
        let Some(master) = self.state.sides[side].first().copied() else {
            return Ok(());
        };
        let spec = MobileSpec::new("a bound war spirit", MobileKind::Summon, core.map, core.center)
            .with_stats(Stats {
                strength: 70,
                dexterity: 60,
                intelligence: 20,
            })
            .with_skill(Skill::Wrestling, 70.0)
            .with_skill(Skill::Tactics, 60.0)
            .with_owner(master)
            .with_alliance(Some(AllianceGroup::for_scene_side(core.id.0, side as u8)))
            .expiring_at(core.started_at + core.duration);
        let summon = ctx.spawn_transient(spec, Self::rally_point(core, side), RALLY_RADIUS)?;
        core.add_summon(summon);
        for enemy in &self.state.sides[1 - side] {
            ctx.make_mutual_aggressors(summon, *enemy);
        }
        debug!(scene = core.id.0, summon = summon.0, side, "war_summon_raised");
        Ok(())
    }
}

fn nearest_living(world: &World, from: EntityId, candidates: &[EntityId]) -> Option<EntityId> {
    let origin = world.get(from)?.position;
    candidates
        .iter()
        .filter_map(|id| world.get(*id))
        .filter(|mobile| mobile.is_alive())
        .min_by(|a, b| {
            a.position
                .distance_squared(origin)
                .total_cmp(&b.position.distance_squared(origin))
                .then(a.id.cmp(&b.id))
        })
        .map(|mobile| mobile.id)
}

impl Scene for WarScene {
    fn kind(&self) -> SceneKind {
        SceneKind::War
    }

    fn title(&self) -> String {
        let [first, second] = self.state.matchup.faction_names();
        format!("{first} vs {second}")
    }

    fn initialize(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        let wanted = match self.state.side_size {
            Some(size) => size,
            None => ctx.rng.gen_range(SIDE_SIZE),
        };
        let size = wanted.min(ctx.headroom() / 2);
        if size < wanted.min(*SIDE_SIZE.start()) {
            return Err(ctx.at_capacity());
        }
        for (side, faction) in self.state.matchup.factions().into_iter().enumerate() {
            let rally = Self::rally_point(core, side);
            let alliance = AllianceGroup::for_scene_side(core.id.0, side as u8);
            for _ in 0..size {
                let persona = Persona::new(faction.profile, Persona::random_tier(ctx.rng));
                let karma = ctx.rng.gen_range(faction.karma.clone());
                let blueprint = AgentBlueprint::new(persona)
                    .with_karma(karma)
                    .with_alliance(alliance);
                let id = ctx.spawn_agent(core.id, blueprint, core.map, rally, RALLY_RADIUS)?;
                core.add_participant(id);
                self.state.sides[side].push(id);
            }
        }

        let [first, second] = &self.state.sides;
        for a in first {
            for b in second {
                ctx.make_mutual_aggressors(*a, *b);
            }
        }
        if ctx.rng.gen_bool(SUMMON_CHANCE) {
            if let Err(error) = self.raise_summon(core, ctx) {
                debug!(scene = core.id.0, error = %error, "war_summon_skipped");
            }
        }
        Ok(())
    }

    fn on_activated(
        &mut self,
        core: &SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        for (side, faction) in self.state.matchup.factions().into_iter().enumerate() {
            for member in &self.state.sides[side] {
                ctx.set_destination(*member, core.center);
            }
            if let Some(herald) = self.state.sides[side].first() {
                ctx.say_later(*herald, faction.battle_cry, BATTLE_CRY_DELAY);
            }
        }
        info!(
            scene = core.id.0,
            matchup = ?self.state.matchup,
            side_a = self.state.sides[0].len(),
            side_b = self.state.sides[1].len(),
            "war_started"
        );
        Ok(())
    }

    fn tick(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<TickVerdict, SceneError> {
        for side in &mut self.state.sides {
            side.retain(|id| ctx.world.get(*id).is_some_and(|mobile| mobile.is_alive()));
        }
        let names = self.state.matchup.faction_names();
        let survivors = [self.state.sides[0].len(), self.state.sides[1].len()];
        match survivors {
            [0, 0] => return Ok(TickVerdict::Conclude("both factions fell".to_string())),
            [0, _] | [_, 0] => {
                let winner = usize::from(survivors[0] == 0);
                let name = names[winner];
                if let Some(herald) = self.state.sides[winner].first() {
                    ctx.say(*herald, format!("{name} are victorious!"));
                }
                info!(
                    scene = core.id.0,
                    faction = name,
                    survivors = survivors[winner],
                    "war_victory"
                );
                return Ok(TickVerdict::Conclude(format!("{name} are victorious")));
            }
            _ => {}
        }

        for side in 0..2 {
            for member in &self.state.sides[side] {
                let idle = ctx
                    .world
                    .get(*member)
                    .is_some_and(|mobile| mobile.combatant.is_none() && !mobile.is_casting());
                if !idle {
                    continue;
                }
                let enemies = &self.state.sides[1 - side];
                if let Some(enemy) = nearest_living(ctx.world, *member, enemies) {
                    ctx.set_combatant(*member, enemy);
                }
            }
        }
        Ok(TickVerdict::Continue)
    }

    fn cleanup(
        &mut self,
        core: &mut SceneCore,
        ctx: &mut SceneContext<'_>,
    ) -> Result<(), SceneError> {
        for id in self.state.sides.iter().flatten().chain(core.summons()) {
            ctx.clear_combat(*id);
        }
        Ok(())
    }

    fn save_state(&self) -> ScenePayload {
        ScenePayload::War(self.state.clone())
    }
}
