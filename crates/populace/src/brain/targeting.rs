//! Target acquisition: join fights worth joining, then profile-driven hunting,
//! then the host's generic hostile search.

use std::time::Duration;

use engine::world::{EntityId, Mobile, MobileKind, Skill, StatKind, World};
use rand::Rng;
use tracing::debug;

use super::{AgentBrain, ThinkContext};
use crate::director::AgentRegistry;
use crate::persona::{AlignmentBand, ExperienceTier, Persona, Profile};

pub const PERCEPTION_RANGE: f32 = 12.0;
const ASSISTANCE_THRESHOLD: f32 = 40.0;
const LOSING_HEALTH_RATIO: f32 = 0.3;
const JUSTIFYING_KARMA_GAP: i32 = 50;
const MIN_ENGAGE_CHANCE: f32 = 0.05;
const MAX_ENGAGE_CHANCE: f32 = 0.95;
const DECLINE_COOLDOWN: Duration = Duration::from_secs(10);

impl AgentBrain {
    pub(crate) fn acquire_target(
        &mut self,
        id: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Option<EntityId> {
        if let Some(enemy) = assistance_target(ctx.world, ctx.agents, id) {
            return Some(enemy);
        }
        let Some(profile) = ctx.agents.profile_of(id) else {
            return ctx.world.find_best_target(id, PERCEPTION_RANGE);
        };
        let hunted = if profile.is_killer() {
            nearest_prey(ctx.world, ctx.agents, id)
        } else {
            self.consider_killers(id, ctx)
        };
        hunted.or_else(|| {
            ctx.world
                .find_best_target(id, PERCEPTION_RANGE)
                .filter(|target| !is_friendly(ctx.world, ctx.agents, id, *target))
        })
    }

    /// Non-killers pick a fight with a visible killer only when the odds look
    /// acceptable; a declined killer is not reconsidered for a while.
    fn consider_killers(&mut self, id: EntityId, ctx: &mut ThinkContext<'_>) -> Option<EntityId> {
        let now = ctx.now;
        self.declined_until.retain(|_, until| !now.has_reached(*until));

        let me = ctx.world.get(id)?;
        let candidate = visible_others(ctx.world, me)
            .filter(|other| other.kind == MobileKind::Agent)
            .filter(|other| ctx.agents.profile_of(other.id) == Some(Profile::Killer))
            .filter(|other| !self.declined_until.contains_key(&other.id))
            .filter(|other| !is_friendly(ctx.world, ctx.agents, id, other.id))
            .min_by(|a, b| closer(me, a, b))?;

        let own_power = power_estimate(me, ctx.agents.persona_of(id).as_ref());
        let their_power = power_estimate(candidate, ctx.agents.persona_of(candidate.id).as_ref());
        let chance = engagement_chance(own_power, their_power);
        let candidate_id = candidate.id;
        if ctx.rng.gen::<f32>() < chance {
            debug!(
                entity = id.0,
                target = candidate_id.0,
                chance,
                "killer_engaged"
            );
            Some(candidate_id)
        } else {
            self.declined_until
                .insert(candidate_id, now + DECLINE_COOLDOWN);
            None
        }
    }
}

/// Enemy of the best ally worth helping, if any clears the threshold and the
/// intervention is justified.
pub(crate) fn assistance_target(
    world: &World,
    agents: &AgentRegistry,
    observer_id: EntityId,
) -> Option<EntityId> {
    let observer = world.get(observer_id).filter(|mobile| mobile.is_alive())?;
    let observer_band = AlignmentBand::from_karma(observer.karma);

    let mut best: Option<(f32, EntityId, EntityId)> = None;
    for ally in visible_others(world, observer) {
        let Some(enemy_id) = ally.combatant else {
            continue;
        };
        if enemy_id == observer_id || observer.aggressors.contains(&ally.id) {
            continue;
        }
        let Some(enemy) = world.get(enemy_id).filter(|enemy| enemy.is_alive()) else {
            continue;
        };
        if AlignmentBand::from_karma(ally.karma).is_opposed_to(observer_band)
            || is_bound(observer, enemy)
        {
            continue;
        }
        let score = assistance_score(world, agents, observer, ally, enemy);
        if best.map_or(true, |(best_score, _, _)| score > best_score) {
            best = Some((score, ally.id, enemy_id));
        }
    }

    let (score, ally_id, enemy_id) = best?;
    if score <= ASSISTANCE_THRESHOLD {
        return None;
    }
    let ally = world.get(ally_id)?;
    let enemy = world.get(enemy_id)?;
    if !intervention_justified(agents, ally, enemy) {
        debug!(
            entity = observer_id.0,
            ally = ally_id.0,
            enemy = enemy_id.0,
            score,
            "assistance_unjustified"
        );
        return None;
    }
    debug!(
        entity = observer_id.0,
        ally = ally_id.0,
        enemy = enemy_id.0,
        score,
        "assistance_chosen"
    );
    Some(enemy_id)
}

pub(crate) fn assistance_score(
    world: &World,
    agents: &AgentRegistry,
    observer: &Mobile,
    ally: &Mobile,
    enemy: &Mobile,
) -> f32 {
    let distance = observer.position.distance(ally.position);
    let mut score = if distance <= 3.0 {
        40.0
    } else if distance <= 6.0 {
        25.0
    } else if distance <= 10.0 {
        10.0
    } else {
        0.0
    };

    let ally_health = ally.health_ratio();
    if ally_health < enemy.health_ratio() || ally_health < LOSING_HEALTH_RATIO {
        score += 30.0;
    }

    let attackers = world
        .in_range(ally.map, ally.position, PERCEPTION_RANGE)
        .into_iter()
        .filter_map(|id| world.get(id))
        .filter(|mobile| mobile.combatant == Some(ally.id))
        .count();
    score += 10.0 * attackers.saturating_sub(1) as f32;

    let observer_profile = agents.profile_of(observer.id);
    let observer_is_killer = observer_profile.is_some_and(Profile::is_killer);
    match AlignmentBand::from_karma(ally.karma) {
        AlignmentBand::Good => score += 10.0,
        AlignmentBand::Evil if !observer_is_killer => score -= 10.0,
        AlignmentBand::Evil | AlignmentBand::Neutral => {}
    }
    let ally_persona = agents.persona_of(ally.id);
    if ally_persona.is_some_and(|persona| persona.tier == ExperienceTier::Newbie) {
        score += 10.0;
    }

    let ally_is_killer = ally_persona.is_some_and(|persona| persona.profile.is_killer());
    let factor = match observer_profile {
        Some(Profile::Adventurer) => 1.3,
        Some(Profile::Crafter) => 0.6,
        Some(Profile::Killer) if ally_is_killer => 1.5,
        Some(Profile::Killer) => 0.4,
        None => 1.0,
    };
    score * factor
}

/// Agent-on-agent escalation needs a reason; creatures are always fair game.
pub(crate) fn intervention_justified(
    agents: &AgentRegistry,
    ally: &Mobile,
    enemy: &Mobile,
) -> bool {
    let Some(enemy_profile) = agents.profile_of(enemy.id) else {
        return true;
    };
    let ally_is_killer = agents.profile_of(ally.id).is_some_and(Profile::is_killer);
    if enemy_profile.is_killer() && !ally_is_killer {
        return true;
    }
    if enemy.combatant == Some(ally.id) && ally.aggressors.contains(&enemy.id) {
        return true;
    }
    let ally_band = AlignmentBand::from_karma(ally.karma);
    let enemy_band = AlignmentBand::from_karma(enemy.karma);
    ally_band.is_opposed_to(enemy_band) && (ally.karma - enemy.karma).abs() >= JUSTIFYING_KARMA_GAP
}

fn nearest_prey(world: &World, agents: &AgentRegistry, id: EntityId) -> Option<EntityId> {
    let me = world.get(id)?;
    visible_others(world, me)
        .filter(|other| other.kind == MobileKind::Agent)
        .filter(|other| AlignmentBand::from_karma(other.karma) != AlignmentBand::Evil)
        .filter(|other| !is_friendly(world, agents, id, other.id))
        .min_by(|a, b| closer(me, a, b))
        .map(|other| other.id)
}

fn is_bound(a: &Mobile, b: &Mobile) -> bool {
    a.owner == Some(b.id)
        || b.owner == Some(a.id)
        || (a.alliance.is_some() && a.alliance == b.alliance)
}

/// Shared alliance, ownership, or a common killer/non-killer side.
pub(crate) fn is_friendly(world: &World, agents: &AgentRegistry, a: EntityId, b: EntityId) -> bool {
    if a == b {
        return true;
    }
    let (Some(first), Some(second)) = (world.get(a), world.get(b)) else {
        return false;
    };
    if first.owner == Some(b) || second.owner == Some(a) {
        return true;
    }
    if let (Some(left), Some(right)) = (first.alliance, second.alliance) {
        return left == right;
    }
    if first.aggressors.contains(&b) || second.aggressors.contains(&a) {
        return false;
    }
    match (agents.profile_of(a), agents.profile_of(b)) {
        (Some(left), Some(right)) => left.is_killer() == right.is_killer(),
        _ => false,
    }
}

/// Weighted blend of stats, defensive skills and the primary weapon skill,
/// scaled by experience and alignment courage.
pub fn power_estimate(mobile: &Mobile, persona: Option<&Persona>) -> f32 {
    let stats = mobile.effective_stat(StatKind::Strength) as f32 * 0.4
        + mobile.effective_stat(StatKind::Dexterity) as f32 * 0.35
        + mobile.effective_stat(StatKind::Intelligence) as f32 * 0.25;
    let defense = mobile.skill(Skill::Tactics) * 0.4
        + mobile.skill(Skill::MagicResist) * 0.3
        + mobile.skill(Skill::Parrying) * 0.3;
    let primary = mobile
        .primary_combat_skill()
        .max(mobile.skill(Skill::Magery) * 0.8);
    let raw = stats * 0.35 + defense * 0.25 + primary * 0.4;

    let tier = persona.map_or(1.0, |persona| persona.tier.power_multiplier());
    let courage = match AlignmentBand::from_karma(mobile.karma) {
        AlignmentBand::Good => 1.10,
        AlignmentBand::Neutral => 1.0,
        AlignmentBand::Evil => 1.05,
    };
    raw * tier * courage
}

/// Even odds engage half the time; a 1.5x edge reaches ~90%.
pub fn engagement_chance(own_power: f32, their_power: f32) -> f32 {
    if their_power <= f32::EPSILON {
        return MAX_ENGAGE_CHANCE;
    }
    let ratio = own_power / their_power;
    (0.5 + (ratio - 1.0) * 0.8).clamp(MIN_ENGAGE_CHANCE, MAX_ENGAGE_CHANCE)
}

pub(super) fn visible_others<'w>(
    world: &'w World,
    me: &'w Mobile,
) -> impl Iterator<Item = &'w Mobile> + 'w {
    world
        .in_range(me.map, me.position, PERCEPTION_RANGE)
        .into_iter()
        .filter(move |other| *other != me.id)
        .filter_map(move |other| world.get(other))
        .filter(move |other| world.line_of_sight(me.map, me.position, other.position))
}

pub(super) fn closer(me: &Mobile, a: &Mobile, b: &Mobile) -> std::cmp::Ordering {
    let da = a.position.distance_squared(me.position);
    let db = b.position.distance_squared(me.position);
    da.total_cmp(&db).then(a.id.cmp(&b.id))
}
