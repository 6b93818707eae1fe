use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::geometry::Direction;
use super::magic::{EffectKind, WardKind};
use super::mobile::{EntityId, Skill, StatKind};
use super::World;

const MELEE_REACH: f32 = 1.5;
const WRESTLING_DAMAGE: (u16, u16) = (1, 6);
const POISON_INTERVAL: Duration = Duration::from_secs(3);
const POISON_DAMAGE: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DamageSource {
    Melee,
    Spell,
    Poison,
}

impl World {
    pub fn set_combatant(&mut self, id: EntityId, target: Option<EntityId>) -> bool {
        if let Some(target) = target {
            if target == id || !self.is_live(target) {
                return false;
            }
        }
        let Some(mobile) = self.get_mut(id) else {
            return false;
        };
        if !mobile.is_alive() {
            return false;
        }
        mobile.combatant = target;
        true
    }

    pub fn make_mutual_aggressors(&mut self, a: EntityId, b: EntityId) {
        if a == b {
            return;
        }
        if let Some(mobile) = self.get_mut(a) {
            mobile.aggressors.insert(b);
        }
        if let Some(mobile) = self.get_mut(b) {
            mobile.aggressors.insert(a);
        }
    }

    /// Drops the combatant and every aggressor link held by `id`.
    pub fn clear_combat(&mut self, id: EntityId) {
        if let Some(mobile) = self.get_mut(id) {
            mobile.combatant = None;
            mobile.aggressors.clear();
        }
    }

    pub fn kill(&mut self, id: EntityId) -> bool {
        let Some(mobile) = self.get_mut(id) else {
            return false;
        };
        if !mobile.is_alive() {
            return false;
        }
        mobile.hits.current = 0;
        mobile.alive = false;
        mobile.casting = None;
        mobile.combatant = None;
        mobile.poisoned = false;
        debug!(entity = id.0, name = %mobile.name, "mobile_killed");
        true
    }

    /// Applies damage after wards; returns the damage actually dealt.
    pub(crate) fn apply_damage(
        &mut self,
        target: EntityId,
        attacker: Option<EntityId>,
        amount: u16,
        source: DamageSource,
    ) -> u16 {
        let Some(mobile) = self.get_mut(target) else {
            return 0;
        };
        if !mobile.is_alive() {
            return 0;
        }

        let attacker = attacker.filter(|attacker| *attacker != target);
        let mut amount = amount;
        if source == DamageSource::Melee
            && mobile.has_effect(&EffectKind::Ward(WardKind::ReactiveArmor))
        {
            amount = amount.saturating_sub(amount * 3 / 10);
        }
        if source != DamageSource::Poison
            && !mobile.has_effect(&EffectKind::Ward(WardKind::Protection))
        {
            mobile.casting = None;
        }
        let dealt = mobile.hits.drain(amount);

        if let Some(attacker) = attacker {
            mobile.aggressors.insert(attacker);
            if mobile.combatant.is_none() {
                mobile.combatant = Some(attacker);
            }
        }
        let dead = mobile.hits.current == 0;
        if let Some(attacker) = attacker {
            if let Some(attacker_mobile) = self.get_mut(attacker) {
                attacker_mobile.aggressors.insert(target);
            }
        }
        if dead {
            self.kill(target);
        }
        dealt
    }

    pub(super) fn resolve_swings(&mut self) {
        let now = self.now;
        let attackers = self
            .mobiles()
            .filter(|mobile| {
                mobile.is_alive()
                    && mobile.combatant.is_some()
                    && !mobile.is_casting()
                    && now.has_reached(mobile.next_swing_at)
            })
            .map(|mobile| mobile.id)
            .collect::<Vec<_>>();

        for attacker in attackers {
            self.try_swing(attacker);
        }
    }

    fn try_swing(&mut self, attacker_id: EntityId) {
        let Some(attacker) = self.get(attacker_id) else {
            return;
        };
        let Some(target_id) = attacker.combatant else {
            return;
        };
        let attacker_map = attacker.map;
        let attacker_position = attacker.position;
        let (skill, reach, damage_range) = match attacker.held_weapon() {
            Some(weapon) => (
                weapon.skill,
                weapon.max_range.max(MELEE_REACH),
                (weapon.min_damage, weapon.max_damage.max(weapon.min_damage)),
            ),
            None => (Skill::Wrestling, MELEE_REACH, WRESTLING_DAMAGE),
        };
        let attack_skill = attacker.skill(skill);
        let strength = attacker.effective_stat(StatKind::Strength) as f32;
        let dexterity = attacker.effective_stat(StatKind::Dexterity) as f32;
        let tactics = attacker.skill(Skill::Tactics);

        let target = self
            .get(target_id)
            .filter(|target| target.is_alive())
            .map(|target| {
                (
                    target.map,
                    target.position,
                    target.skill(Skill::Parrying).max(target.primary_combat_skill()),
                )
            });
        let Some((target_map, target_position, defense_skill)) = target else {
            if let Some(attacker) = self.get_mut(attacker_id) {
                attacker.combatant = None;
            }
            return;
        };
        if target_map != attacker_map || attacker_position.distance(target_position) > reach {
            return;
        }
        if skill == Skill::Archery
            && !self.line_of_sight(attacker_map, attacker_position, target_position)
        {
            return;
        }

        let hit_chance = (0.5 + (attack_skill - defense_skill) / 200.0).clamp(0.2, 0.9);
        let swing_delay = Duration::from_millis((2500.0 - dexterity * 10.0).max(1250.0) as u64);
        let roll: f32 = self.rng.gen();
        let base = self.rng.gen_range(damage_range.0..=damage_range.1) as f32;
        let damage = (base * (1.0 + strength / 200.0) * (1.0 + tactics / 200.0)).round() as u16;

        let next_swing_at = self.now + swing_delay;
        if let Some(attacker) = self.get_mut(attacker_id) {
            attacker.next_swing_at = next_swing_at;
            if let Some(direction) = Direction::towards(attacker_position, target_position) {
                attacker.facing = direction;
            }
        }

        if roll < hit_chance {
            let dealt =
                self.apply_damage(target_id, Some(attacker_id), damage, DamageSource::Melee);
            debug!(
                attacker = attacker_id.0,
                target = target_id.0,
                dealt,
                "swing_hit"
            );
        } else if let Some(target) = self.get_mut(target_id) {
            // A miss still provokes the target.
            target.aggressors.insert(attacker_id);
            if target.combatant.is_none() {
                target.combatant = Some(attacker_id);
            }
        }
    }

    pub(super) fn apply_poison(&mut self) {
        let now = self.now;
        let poisoned = self
            .mobiles()
            .filter(|mobile| {
                mobile.is_alive() && mobile.poisoned && now.has_reached(mobile.next_poison_at)
            })
            .map(|mobile| mobile.id)
            .collect::<Vec<_>>();
        for id in poisoned {
            if let Some(mobile) = self.get_mut(id) {
                mobile.next_poison_at = now + POISON_INTERVAL;
            }
            self.apply_damage(id, None, POISON_DAMAGE, DamageSource::Poison);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{SpellId, Vec2};
    use super::*;
    use crate::time::GameTime;

    #[test]
    fn swings_eventually_kill_and_record_aggression() {
        let mut world = open_world(16);
        let attacker = spawn_fighter(&mut world, "attacker", Vec2::new(4.5, 4.5));
        let defender = spawn_fighter(&mut world, "defender", Vec2::new(5.5, 4.5));
        world.get_mut(defender).expect("defender").hits.current = 5;
        assert!(world.set_combatant(attacker, Some(defender)));

        let mut now = GameTime::ZERO;
        for _ in 0..200 {
            now = now + Duration::from_millis(250);
            world.tick(now);
            if !world.is_live(defender) {
                break;
            }
        }

        assert!(!world.is_live(defender));
        assert!(world
            .get(attacker)
            .expect("attacker")
            .aggressors
            .contains(&defender));
    }

    #[test]
    fn out_of_reach_target_is_not_hit() {
        let mut world = open_world(16);
        let attacker = spawn_fighter(&mut world, "attacker", Vec2::new(1.5, 1.5));
        let defender = spawn_fighter(&mut world, "defender", Vec2::new(8.5, 8.5));
        world.set_combatant(attacker, Some(defender));
        world.tick(GameTime::from_secs(1));
        world.tick(GameTime::from_secs(4));
        let defender = world.get(defender).expect("defender");
        assert_eq!(defender.hits.current, defender.hits.max);
    }

    #[test]
    fn damage_interrupts_unprotected_casts() {
        let mut world = open_world(16);
        let caster = spawn_fighter(&mut world, "caster", Vec2::new(1.5, 1.5));
        let other = spawn_fighter(&mut world, "other", Vec2::new(2.5, 1.5));
        world.get_mut(caster).expect("caster").mana.current = 50;
        world
            .begin_cast(caster, SpellId::MagicArrow, other)
            .expect("cast");
        world.apply_damage(caster, Some(other), 1, DamageSource::Melee);
        assert!(!world.get(caster).expect("caster").is_casting());
    }

    #[test]
    fn poison_ticks_until_cured() {
        let mut world = open_world(8);
        let id = spawn_fighter(&mut world, "sick", Vec2::new(1.5, 1.5));
        world.get_mut(id).expect("sick").poisoned = true;
        world.tick(GameTime::from_secs(1));
        let after_first = world.get(id).expect("sick").hits.current;
        assert!(after_first < world.get(id).expect("sick").hits.max);
        world.get_mut(id).expect("sick").poisoned = false;
        world.tick(GameTime::from_secs(10));
        assert!(world.get(id).expect("sick").hits.current >= after_first);
    }
}
