use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::time::GameTime;

use super::combat::DamageSource;
use super::mobile::{ActiveEffect, EntityId, MobileKind, Skill, StatKind};
use super::World;

pub const SPELL_RANGE: f32 = 12.0;
pub const EFFECT_DURATION: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WardKind {
    ReactiveArmor,
    Protection,
    MagicReflection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    Ward(WardKind),
    StatBuff { stat: StatKind, amount: u16 },
}

impl EffectKind {
    /// Two effects share a slot when one would refresh the other.
    pub fn same_slot(&self, other: &EffectKind) -> bool {
        match (self, other) {
            (EffectKind::Ward(a), EffectKind::Ward(b)) => a == b,
            (EffectKind::StatBuff { stat: a, .. }, EffectKind::StatBuff { stat: b, .. }) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpellEffect {
    Damage { min: u16, max: u16 },
    Heal { min: u16, max: u16 },
    Cure,
    Poison,
    Apply(EffectKind),
    Dispel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpellId {
    MagicArrow,
    Heal,
    ReactiveArmor,
    Harm,
    Cure,
    Protection,
    Strength,
    Agility,
    Cunning,
    Fireball,
    Poison,
    Lightning,
    GreaterHeal,
    MindBlast,
    MagicReflection,
    EnergyBolt,
    Dispel,
    FlameStrike,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpellDef {
    pub name: &'static str,
    pub circle: u8,
    pub mana_cost: u16,
    pub effect: SpellEffect,
}

impl SpellDef {
    pub fn cast_delay(&self) -> Duration {
        Duration::from_millis(500 + 250 * self.circle as u64)
    }

    pub fn is_harmful(&self) -> bool {
        matches!(
            self.effect,
            SpellEffect::Damage { .. } | SpellEffect::Poison | SpellEffect::Dispel
        )
    }
}

impl SpellId {
    pub const ATTACKS: [SpellId; 7] = [
        SpellId::MagicArrow,
        SpellId::Harm,
        SpellId::Fireball,
        SpellId::Lightning,
        SpellId::MindBlast,
        SpellId::EnergyBolt,
        SpellId::FlameStrike,
    ];

    pub fn def(self) -> SpellDef {
        let (name, circle, effect) = match self {
            SpellId::MagicArrow => ("Magic Arrow", 1, SpellEffect::Damage { min: 3, max: 6 }),
            SpellId::Heal => ("Heal", 1, SpellEffect::Heal { min: 6, max: 12 }),
            SpellId::ReactiveArmor => (
                "Reactive Armor",
                1,
                SpellEffect::Apply(EffectKind::Ward(WardKind::ReactiveArmor)),
            ),
            SpellId::Harm => ("Harm", 2, SpellEffect::Damage { min: 6, max: 10 }),
            SpellId::Cure => ("Cure", 2, SpellEffect::Cure),
            SpellId::Protection => (
                "Protection",
                2,
                SpellEffect::Apply(EffectKind::Ward(WardKind::Protection)),
            ),
            SpellId::Strength => (
                "Strength",
                2,
                SpellEffect::Apply(EffectKind::StatBuff {
                    stat: StatKind::Strength,
                    amount: 10,
                }),
            ),
            SpellId::Agility => (
                "Agility",
                2,
                SpellEffect::Apply(EffectKind::StatBuff {
                    stat: StatKind::Dexterity,
                    amount: 10,
                }),
            ),
            SpellId::Cunning => (
                "Cunning",
                2,
                SpellEffect::Apply(EffectKind::StatBuff {
                    stat: StatKind::Intelligence,
                    amount: 10,
                }),
            ),
            SpellId::Fireball => ("Fireball", 3, SpellEffect::Damage { min: 9, max: 15 }),
            SpellId::Poison => ("Poison", 3, SpellEffect::Poison),
            SpellId::Lightning => ("Lightning", 4, SpellEffect::Damage { min: 12, max: 19 }),
            SpellId::GreaterHeal => ("Greater Heal", 4, SpellEffect::Heal { min: 20, max: 32 }),
            SpellId::MindBlast => ("Mind Blast", 5, SpellEffect::Damage { min: 15, max: 24 }),
            SpellId::MagicReflection => (
                "Magic Reflection",
                5,
                SpellEffect::Apply(EffectKind::Ward(WardKind::MagicReflection)),
            ),
            SpellId::EnergyBolt => ("Energy Bolt", 6, SpellEffect::Damage { min: 20, max: 30 }),
            SpellId::Dispel => ("Dispel", 6, SpellEffect::Dispel),
            SpellId::FlameStrike => ("Flame Strike", 7, SpellEffect::Damage { min: 25, max: 38 }),
        };
        SpellDef {
            name,
            circle,
            mana_cost: mana_cost_for_circle(circle),
            effect,
        }
    }
}

fn mana_cost_for_circle(circle: u8) -> u16 {
    match circle {
        1 => 4,
        2 => 6,
        3 => 9,
        4 => 11,
        5 => 14,
        6 => 20,
        7 => 40,
        _ => 50,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCast {
    pub spell: SpellId,
    pub target: EntityId,
    pub completes_at: GameTime,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CastError {
    #[error("caster {0:?} is missing, deleted or dead")]
    CasterUnavailable(EntityId),
    #[error("caster is already casting")]
    AlreadyCasting,
    #[error("not enough mana: need {needed}, have {available}")]
    InsufficientMana { needed: u16, available: u16 },
    #[error("hands are occupied by an item that blocks casting")]
    HandsOccupied,
    #[error("target {0:?} is not a valid spell target")]
    InvalidTarget(EntityId),
    #[error("target is out of range or not visible")]
    OutOfSight,
}

impl World {
    /// Starts a cast; mana is spent immediately and the effect lands when
    /// the cast delay has elapsed.
    pub fn begin_cast(
        &mut self,
        caster_id: EntityId,
        spell: SpellId,
        target_id: EntityId,
    ) -> Result<(), CastError> {
        let def = spell.def();
        let caster = self
            .get(caster_id)
            .filter(|caster| caster.is_alive())
            .ok_or(CastError::CasterUnavailable(caster_id))?;
        if caster.is_casting() {
            return Err(CastError::AlreadyCasting);
        }
        if caster.held.as_ref().is_some_and(|item| item.blocks_casting()) {
            return Err(CastError::HandsOccupied);
        }
        if caster.mana.current < def.mana_cost {
            return Err(CastError::InsufficientMana {
                needed: def.mana_cost,
                available: caster.mana.current,
            });
        }
        let caster_map = caster.map;
        let caster_position = caster.position;

        let target = self
            .get(target_id)
            .filter(|target| target.is_alive())
            .ok_or(CastError::InvalidTarget(target_id))?;
        if target.map != caster_map
            || target.position.distance(caster_position) > SPELL_RANGE
            || !self.line_of_sight(caster_map, caster_position, target.position)
        {
            return Err(CastError::OutOfSight);
        }

        let completes_at = self.now + def.cast_delay();
        let Some(caster) = self.get_mut(caster_id) else {
            return Err(CastError::CasterUnavailable(caster_id));
        };
        caster.mana.drain(def.mana_cost);
        caster.casting = Some(PendingCast {
            spell,
            target: target_id,
            completes_at,
        });
        debug!(
            caster = caster_id.0,
            target = target_id.0,
            spell = def.name,
            "cast_started"
        );
        Ok(())
    }

    pub(super) fn complete_due_casts(&mut self) {
        let now = self.now;
        let due = self
            .mobiles()
            .filter(|mobile| mobile.is_alive())
            .filter_map(|mobile| {
                let cast = mobile.casting?;
                now.has_reached(cast.completes_at)
                    .then_some((mobile.id, cast))
            })
            .collect::<Vec<_>>();

        for (caster_id, cast) in due {
            if let Some(caster) = self.get_mut(caster_id) {
                caster.casting = None;
            }
            self.resolve_spell(caster_id, cast.spell, cast.target);
        }
    }

    fn resolve_spell(&mut self, caster_id: EntityId, spell: SpellId, target_id: EntityId) {
        let def = spell.def();
        let Some(caster) = self.get(caster_id) else {
            return;
        };
        let caster_map = caster.map;
        let caster_position = caster.position;
        let magery = caster.skill(Skill::Magery);
        let visible = self.get(target_id).is_some_and(|target| {
            target.is_alive()
                && target.map == caster_map
                && target.position.distance(caster_position) <= SPELL_RANGE
                && self.line_of_sight(caster_map, caster_position, target.position)
        });
        if !visible {
            debug!(caster = caster_id.0, spell = def.name, "cast_fizzled");
            return;
        }

        let mut target_id = target_id;
        if def.is_harmful() {
            let reflected = self.get_mut(target_id).is_some_and(|target| {
                let before = target.effects.len();
                target
                    .effects
                    .retain(|effect| effect.kind != EffectKind::Ward(WardKind::MagicReflection));
                before != target.effects.len()
            });
            if reflected {
                debug!(caster = caster_id.0, spell = def.name, "spell_reflected");
                target_id = caster_id;
            }
        }

        match def.effect {
            SpellEffect::Damage { min, max } => {
                let resist = self
                    .get(target_id)
                    .map(|target| target.skill(Skill::MagicResist))
                    .unwrap_or(0.0);
                let base = self.rng.gen_range(min..=max) as f32;
                let scaled = base * (1.0 + magery / 400.0) * (1.0 - resist / 250.0);
                let amount = scaled.round().max(1.0) as u16;
                self.apply_damage(target_id, Some(caster_id), amount, DamageSource::Spell);
            }
            SpellEffect::Heal { min, max } => {
                let amount = self.rng.gen_range(min..=max);
                if let Some(target) = self.get_mut(target_id) {
                    target.hits.restore(amount);
                }
            }
            SpellEffect::Cure => {
                if let Some(target) = self.get_mut(target_id) {
                    target.poisoned = false;
                }
            }
            SpellEffect::Poison => {
                let now = self.now;
                if let Some(target) = self.get_mut(target_id) {
                    target.poisoned = true;
                    target.next_poison_at = now;
                    target.aggressors.insert(caster_id);
                }
            }
            SpellEffect::Apply(kind) => {
                let expires_at = self.now + EFFECT_DURATION;
                if let Some(target) = self.get_mut(target_id) {
                    target.effects.retain(|effect| !effect.kind.same_slot(&kind));
                    target.effects.push(ActiveEffect { kind, expires_at });
                }
            }
            SpellEffect::Dispel => {
                let is_summon = self
                    .get(target_id)
                    .is_some_and(|target| target.kind == MobileKind::Summon);
                if is_summon {
                    self.delete(target_id);
                }
            }
        }
        debug!(
            caster = caster_id.0,
            target = target_id.0,
            spell = def.name,
            "cast_resolved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{ItemKind, MobileSpec, Vec2, Weapon};
    use super::*;

    fn caster(world: &mut World, at: Vec2) -> EntityId {
        let id = spawn_fighter(world, "mage", at);
        let mobile = world.get_mut(id).expect("mage");
        mobile.mana.max = 100;
        mobile.mana.current = 100;
        mobile.skills.insert(Skill::Magery, 90.0);
        id
    }

    #[test]
    fn blocking_item_prevents_cast() {
        let mut world = open_world(16);
        let mage = caster(&mut world, Vec2::new(1.5, 1.5));
        let sword = world.create_item(
            "longsword",
            ItemKind::Weapon(Weapon {
                skill: Skill::Swords,
                min_damage: 5,
                max_damage: 12,
                max_range: 1.5,
                spell_channeling: false,
            }),
        );
        world.get_mut(mage).expect("mage").held = Some(sword);
        assert_eq!(
            world.begin_cast(mage, SpellId::Heal, mage),
            Err(CastError::HandsOccupied)
        );
    }

    #[test]
    fn ward_lands_after_cast_delay() {
        let mut world = open_world(16);
        let mage = caster(&mut world, Vec2::new(1.5, 1.5));
        world
            .begin_cast(mage, SpellId::ReactiveArmor, mage)
            .expect("cast");
        assert_eq!(world.get(mage).expect("mage").mana.current, 96);

        world.tick(GameTime::from_millis(500));
        assert!(world.get(mage).expect("mage").is_casting());
        world.tick(GameTime::from_millis(750));
        let mobile = world.get(mage).expect("mage");
        assert!(!mobile.is_casting());
        assert!(mobile.has_effect(&EffectKind::Ward(WardKind::ReactiveArmor)));
    }

    #[test]
    fn reflection_turns_damage_back_on_caster() {
        let mut world = open_world(16);
        let mage = caster(&mut world, Vec2::new(1.5, 1.5));
        let target = spawn_fighter(&mut world, "target", Vec2::new(4.5, 1.5));
        world
            .get_mut(target)
            .expect("target")
            .effects
            .push(ActiveEffect {
                kind: EffectKind::Ward(WardKind::MagicReflection),
                expires_at: GameTime::from_secs(600),
            });

        world.begin_cast(mage, SpellId::Harm, target).expect("cast");
        world.tick(GameTime::from_secs(2));

        let target_mobile = world.get(target).expect("target");
        assert_eq!(target_mobile.hits.current, target_mobile.hits.max);
        assert!(!target_mobile.has_effect(&EffectKind::Ward(WardKind::MagicReflection)));
        let mage_mobile = world.get(mage).expect("mage");
        assert!(mage_mobile.hits.current < mage_mobile.hits.max);
    }

    #[test]
    fn dispel_removes_summons_only() {
        let mut world = open_world(16);
        let mage = caster(&mut world, Vec2::new(1.5, 1.5));
        let summon = world
            .spawn(MobileSpec::new(
                "daemon",
                MobileKind::Summon,
                TEST_MAP,
                Vec2::new(3.5, 1.5),
            ))
            .expect("summon");
        world.begin_cast(mage, SpellId::Dispel, summon).expect("cast");
        world.tick(GameTime::from_secs(3));
        assert!(world.get(summon).is_none());
    }
}
