//! Spell choice for attack casts and the throttled support pass.

use engine::world::{
    EffectKind, EntityId, Mobile, MobileKind, Skill, SpellEffect, SpellId, World,
    EFFECT_DURATION, SPELL_RANGE,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::targeting::{closer, is_friendly, visible_others};
use super::{AgentBrain, BrainError, ThinkContext};
use crate::director::AgentRegistry;

const MAGERY_PER_CIRCLE: f32 = 12.5;
const MIN_CASTING_MAGERY: f32 = 1.0;
const TOP_CIRCLE: f32 = 8.0;
const STRONGEST_SPELL_BIAS: f64 = 0.6;
const HEAL_BELOW: f32 = 0.5;
const GREATER_HEAL_BELOW: f32 = 0.3;

/// Wards first, then raw stat buffs.
const BUFF_PRIORITY: [SpellId; 6] = [
    SpellId::ReactiveArmor,
    SpellId::Protection,
    SpellId::MagicReflection,
    SpellId::Strength,
    SpellId::Agility,
    SpellId::Cunning,
];

pub(crate) fn max_circle(magery: f32) -> u8 {
    if magery < MIN_CASTING_MAGERY {
        return 0;
    }
    (1.0 + magery / MAGERY_PER_CIRCLE).floor().min(TOP_CIRCLE) as u8
}

pub(crate) fn can_cast(caster: &Mobile, spell: SpellId) -> bool {
    let def = spell.def();
    def.circle <= max_circle(caster.skill(Skill::Magery)) && caster.mana.current >= def.mana_cost
}

/// Biased toward the strongest attack the caster's skill and mana allow.
pub(crate) fn choose_attack_spell<R: Rng + ?Sized>(
    caster: &Mobile,
    rng: &mut R,
) -> Option<SpellId> {
    let castable = SpellId::ATTACKS
        .into_iter()
        .filter(|spell| can_cast(caster, *spell))
        .collect::<Vec<_>>();
    let strongest = *castable.last()?;
    if rng.gen_bool(STRONGEST_SPELL_BIAS) {
        Some(strongest)
    } else {
        castable.choose(rng).copied()
    }
}

fn applied_effect(spell: SpellId) -> Option<EffectKind> {
    match spell.def().effect {
        SpellEffect::Apply(kind) => Some(kind),
        _ => None,
    }
}

fn within_spell_reach(world: &World, caster: &Mobile, target: &Mobile) -> bool {
    target.is_alive()
        && target.map == caster.map
        && target.position.distance(caster.position) <= SPELL_RANGE
        && world.line_of_sight(caster.map, caster.position, target.position)
}

impl AgentBrain {
    /// Runs at most once per support interval. Dispelling a hostile summon
    /// beats healing, which beats buffing.
    pub(crate) fn support_pass(
        &mut self,
        id: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Result<Option<(SpellId, EntityId)>, BrainError> {
        let now = ctx.now;
        if !now.has_reached(self.next_support_at) {
            return Ok(None);
        }
        self.next_support_at = now + ctx.behavior.support_interval;
        self.buff_expiries.retain(|_, until| !now.has_reached(*until));
        self.buff_cooldowns.retain(|_, until| !now.has_reached(*until));

        let me = ctx.world.get(id).ok_or(BrainError::AgentVanished(id))?;
        if max_circle(me.skill(Skill::Magery)) == 0 {
            self.support_target = None;
            return Ok(None);
        }

        let mut choice = self.choose_dispel(id, ctx);
        if choice.is_none() {
            choice = healing_need(ctx.world, ctx.agents, id);
        }
        if choice.is_none() {
            choice = self.choose_buff(id, ctx);
        }
        let Some((spell, target)) = choice else {
            return Ok(None);
        };

        self.prepare_hands_for_cast(id, ctx);
        ctx.world.begin_cast(id, spell, target)?;
        if applied_effect(spell).is_some() {
            self.buff_expiries
                .insert((target, spell), now + EFFECT_DURATION);
            self.buff_cooldowns
                .insert(target, now + ctx.behavior.buff_cooldown);
        }
        debug!(
            entity = id.0,
            target = target.0,
            spell = spell.def().name,
            "support_cast"
        );
        Ok(Some((spell, target)))
    }

    fn choose_dispel(
        &self,
        id: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Option<(SpellId, EntityId)> {
        let me = ctx.world.get(id)?;
        if !can_cast(me, SpellId::Dispel) {
            return None;
        }
        let summon = visible_others(ctx.world, me)
            .filter(|other| other.kind == MobileKind::Summon)
            .filter(|other| match other.owner {
                Some(owner) => !is_friendly(ctx.world, ctx.agents, id, owner),
                None => true,
            })
            .min_by(|a, b| closer(me, a, b))?
            .id;
        (ctx.rng.gen::<f32>() < ctx.behavior.dispel_chance).then_some((SpellId::Dispel, summon))
    }

    /// The one-shot support target is consumed here whether or not it gets
    /// the buff.
    fn choose_buff(
        &mut self,
        id: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Option<(SpellId, EntityId)> {
        let requested = self.support_target.take();
        if ctx.rng.gen::<f32>() >= ctx.behavior.buff_chance {
            return None;
        }
        let world = &*ctx.world;
        let me = world.get(id)?;

        let mut recipients = Vec::new();
        if let Some(target) = requested
            .and_then(|target| world.get(target))
            .filter(|target| within_spell_reach(world, me, target))
        {
            recipients.push(target);
        }
        recipients.push(me);
        recipients.extend(visible_others(world, me).filter(|other| {
            Some(other.id) == me.owner
                || (other.kind == MobileKind::Agent && is_friendly(world, ctx.agents, id, other.id))
        }));

        recipients
            .into_iter()
            .filter(|recipient| !self.buff_cooldowns.contains_key(&recipient.id))
            .find_map(|recipient| {
                self.missing_buff(me, recipient)
                    .map(|spell| (spell, recipient.id))
            })
    }

    fn missing_buff(&self, caster: &Mobile, recipient: &Mobile) -> Option<SpellId> {
        BUFF_PRIORITY.into_iter().find(|spell| {
            can_cast(caster, *spell)
                && applied_effect(*spell).is_some_and(|kind| !recipient.has_effect(&kind))
                && !self.buff_expiries.contains_key(&(recipient.id, *spell))
        })
    }
}

/// Self first, then the owner, then visible allies from most to least hurt.
fn healing_need(
    world: &World,
    agents: &AgentRegistry,
    id: EntityId,
) -> Option<(SpellId, EntityId)> {
    let me = world.get(id)?;
    let mut patients = vec![me];
    if let Some(owner) = me
        .owner
        .and_then(|owner| world.get(owner))
        .filter(|owner| within_spell_reach(world, me, owner))
    {
        patients.push(owner);
    }
    let mut allies = visible_others(world, me)
        .filter(|other| other.kind == MobileKind::Agent && Some(other.id) != me.owner)
        .filter(|other| is_friendly(world, agents, id, other.id))
        .collect::<Vec<_>>();
    allies.sort_by(|a, b| {
        a.health_ratio()
            .total_cmp(&b.health_ratio())
            .then(a.id.cmp(&b.id))
    });
    patients.extend(allies);

    patients
        .into_iter()
        .find_map(|patient| remedy_for(me, patient).map(|spell| (spell, patient.id)))
}

fn remedy_for(caster: &Mobile, patient: &Mobile) -> Option<SpellId> {
    let ratio = patient.health_ratio();
    if ratio < GREATER_HEAL_BELOW && can_cast(caster, SpellId::GreaterHeal) {
        return Some(SpellId::GreaterHeal);
    }
    if ratio < HEAL_BELOW {
        if let Some(spell) = [SpellId::Heal, SpellId::GreaterHeal]
            .into_iter()
            .find(|spell| can_cast(caster, *spell))
        {
            return Some(spell);
        }
    }
    (patient.poisoned && can_cast(caster, SpellId::Cure)).then_some(SpellId::Cure)
}
