//! Per-heartbeat combat decisions for an agent with a live combatant.

use std::time::Duration;

use engine::world::{EntityId, Skill, SpellId};
use rand::Rng;
use tracing::debug;

use super::navigation::{step_away, step_toward};
use super::spells::{choose_attack_spell, max_circle};
use super::{AgentBrain, BrainError, ThinkContext, ThinkOutcome};

const FLEE_HEALTH_RATIO: f32 = 0.35;
const FLEE_BASE_CHANCE: f32 = 0.10;
const FLEE_DEFICIT_WEIGHT: f32 = 0.8;
const FLEE_MAX_CHANCE: f32 = 0.9;
const CAST_SKILL_WEIGHT: f32 = 0.6;
const LOW_HEALTH_RATIO: f32 = 0.5;
const LOW_HEALTH_CAST_BONUS: f32 = 0.25;
const MAX_CAST_CHANCE: f32 = 0.8;
const ATTACK_CAST_COOLDOWN: Duration = Duration::from_secs(3);
const RANGED_BAND_NEAR: f32 = 0.5;
const RANGED_BAND_FAR: f32 = 0.85;
const MELEE_REACH: f32 = 1.5;

impl AgentBrain {
    pub(crate) fn combat_tick(
        &mut self,
        id: EntityId,
        target: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Result<ThinkOutcome, BrainError> {
        let me = ctx.world.get(id).ok_or(BrainError::AgentVanished(id))?;
        if me.is_casting() {
            return Ok(ThinkOutcome::HoldingCast);
        }
        let own_health = me.health_ratio();
        let foe = ctx.world.get(target).ok_or(BrainError::AgentVanished(target))?;
        let (foe_health, foe_position) = (foe.health_ratio(), foe.position);

        if let Some(chance) = flee_chance(own_health, foe_health) {
            if ctx.rng.gen::<f32>() < chance && step_away(id, foe_position, ctx) {
                debug!(entity = id.0, target = target.0, chance, "agent_fled");
                return Ok(ThinkOutcome::Fled);
            }
        }

        if let Some((spell, ally)) = self.support_pass(id, ctx)? {
            return Ok(ThinkOutcome::Supported { spell, target: ally });
        }
        if let Some(spell) = self.try_attack_cast(id, target, ctx) {
            return Ok(ThinkOutcome::AttackCast { spell, target });
        }

        self.press_attack(id, target, ctx);
        Ok(ThinkOutcome::Engaged(target))
    }

    fn try_attack_cast(
        &mut self,
        id: EntityId,
        target: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Option<SpellId> {
        if !ctx.now.has_reached(self.next_cast_at) {
            return None;
        }
        let me = ctx.world.get(id)?;
        let magery = me.skill(Skill::Magery);
        if max_circle(magery) == 0 {
            return None;
        }
        let chance = cast_chance(magery, me.health_ratio());
        if ctx.rng.gen::<f32>() >= chance {
            return None;
        }
        let spell = choose_attack_spell(me, ctx.rng)?;

        self.prepare_hands_for_cast(id, ctx);
        match ctx.world.begin_cast(id, spell, target) {
            Ok(()) => {
                self.next_cast_at = ctx.now + spell.def().cast_delay() + ATTACK_CAST_COOLDOWN;
                Some(spell)
            }
            Err(error) => {
                debug!(entity = id.0, target = target.0, error = %error, "attack_cast_failed");
                None
            }
        }
    }

    /// Ranged fighters hold a stand-off band; everyone else closes to reach.
    fn press_attack(&mut self, id: EntityId, target: EntityId, ctx: &mut ThinkContext<'_>) {
        let (Some(me), Some(foe)) = (ctx.world.get(id), ctx.world.get(target)) else {
            return;
        };
        let foe_position = foe.position;
        let distance = me.position.distance(foe_position);
        let ranged_reach = me
            .held_weapon()
            .filter(|weapon| weapon.is_ranged())
            .map(|weapon| weapon.max_range);

        let Some(reach) = ranged_reach else {
            if distance > MELEE_REACH {
                step_toward(id, foe_position, ctx);
            } else {
                ctx.world.face(id, foe_position);
            }
            return;
        };
        let clear_shot = ctx.world.line_of_sight(me.map, me.position, foe_position);
        if distance > reach * RANGED_BAND_FAR || !clear_shot {
            step_toward(id, foe_position, ctx);
        } else if distance < reach * RANGED_BAND_NEAR {
            if !step_away(id, foe_position, ctx) {
                ctx.world.face(id, foe_position);
            }
        } else {
            ctx.world.face(id, foe_position);
        }
    }
}

/// `None` while health is above the flee threshold.
fn flee_chance(own_health: f32, foe_health: f32) -> Option<f32> {
    if own_health >= FLEE_HEALTH_RATIO {
        return None;
    }
    let deficit = (foe_health - own_health).max(0.0);
    Some((FLEE_BASE_CHANCE + deficit * FLEE_DEFICIT_WEIGHT).min(FLEE_MAX_CHANCE))
}

fn cast_chance(magery: f32, own_health: f32) -> f32 {
    let mut chance = magery / 100.0 * CAST_SKILL_WEIGHT;
    if own_health < LOW_HEALTH_RATIO {
        chance += LOW_HEALTH_CAST_BONUS;
    }
    chance.min(MAX_CAST_CHANCE)
}

#[cfg(test)]
mod tests {
    use engine::world::{Direction, Vec2};

    use super::super::test_support::*;
    use super::*;
    use crate::persona::{CombatStyle, Profile};

    fn duel(
        harness: &mut Harness,
        style: CombatStyle,
        at: Vec2,
        foe_at: Vec2,
    ) -> (EntityId, EntityId) {
        let id = harness.agent(Profile::Adventurer, 60, style, at);
        let foe = harness.agent(Profile::Killer, -80, CombatStyle::Melee(Skill::Swords), foe_at);
        harness.make_caster(id, 0.0, 0);
        assert!(harness.world.set_combatant(id, Some(foe)));
        (id, foe)
    }

    #[test]
    fn flee_and_cast_chances_follow_their_tables() {
        assert_eq!(flee_chance(0.5, 1.0), None);
        assert_eq!(flee_chance(0.3, 0.2), Some(0.1));
        let steep = flee_chance(0.0, 1.0).expect("flee");
        assert!((steep - FLEE_MAX_CHANCE).abs() < f32::EPSILON);

        assert!((cast_chance(100.0, 1.0) - 0.6).abs() < 1e-6);
        assert!((cast_chance(100.0, 0.2) - MAX_CAST_CHANCE).abs() < 1e-6);
        assert!((cast_chance(40.0, 0.2) - 0.49).abs() < 1e-6);
    }

    #[test]
    fn casting_agents_hold_position() {
        let mut harness = Harness::open(16);
        let (id, foe) = duel(
            &mut harness,
            CombatStyle::Melee(Skill::Swords),
            Vec2::new(2.5, 2.5),
            Vec2::new(6.5, 2.5),
        );
        harness.make_caster(id, 80.0, 60);
        harness.world.stash_held_item(id);
        harness
            .world
            .begin_cast(id, SpellId::MagicArrow, foe)
            .expect("cast");

        let mut brain = AgentBrain::new(harness.now);
        assert_eq!(harness.think(&mut brain, id), ThinkOutcome::HoldingCast);
        assert_eq!(harness.world.get(id).expect("body").position, Vec2::new(2.5, 2.5));
    }

    #[test]
    fn melee_fighters_close_the_gap() {
        let mut harness = Harness::open(16);
        let (id, foe) = duel(
            &mut harness,
            CombatStyle::Melee(Skill::Swords),
            Vec2::new(2.5, 2.5),
            Vec2::new(8.5, 2.5),
        );
        let mut brain = AgentBrain::new(harness.now);
        assert_eq!(harness.think(&mut brain, id), ThinkOutcome::Engaged(foe));
        assert!(harness.world.get(id).expect("body").position.x > 2.5);
    }

    #[test]
    fn archers_keep_their_stand_off_band() {
        let mut harness = Harness::open(24);
        let (id, foe) = duel(
            &mut harness,
            CombatStyle::Ranged,
            Vec2::new(10.5, 10.5),
            Vec2::new(13.5, 10.5),
        );
        let mut brain = AgentBrain::new(harness.now);
        assert_eq!(harness.think(&mut brain, id), ThinkOutcome::Engaged(foe));
        let backed_off = harness.world.get(id).expect("body").position;
        assert!(backed_off.x < 10.5, "archer moved to {backed_off:?}");

        harness
            .world
            .set_location(id, MAP, Vec2::new(6.5, 10.5))
            .expect("relocate");
        harness.now = harness.now + Duration::from_millis(250);
        assert_eq!(harness.think(&mut brain, id), ThinkOutcome::Engaged(foe));
        let archer = harness.world.get(id).expect("body");
        assert_eq!(archer.position, Vec2::new(6.5, 10.5));
        assert_eq!(archer.facing, Direction::East);
    }

    #[test]
    fn badly_hurt_agents_eventually_flee() {
        let mut harness = Harness::open(24);
        let (id, _foe) = duel(
            &mut harness,
            CombatStyle::Melee(Skill::Swords),
            Vec2::new(10.5, 10.5),
            Vec2::new(11.5, 10.5),
        );
        harness.world.get_mut(id).expect("body").hits.current = 1;
        let mut brain = AgentBrain::new(harness.now);

        let fled = (0..12).any(|_| {
            harness.now = harness.now + Duration::from_millis(250);
            harness.think(&mut brain, id) == ThinkOutcome::Fled
        });
        assert!(fled);
    }

    #[test]
    fn healthy_agents_never_flee() {
        let mut harness = Harness::open(24);
        let (id, _foe) = duel(
            &mut harness,
            CombatStyle::Melee(Skill::Swords),
            Vec2::new(10.5, 10.5),
            Vec2::new(11.5, 10.5),
        );
        let mut brain = AgentBrain::new(harness.now);
        for _ in 0..20 {
            harness.now = harness.now + Duration::from_millis(250);
            assert_ne!(harness.think(&mut brain, id), ThinkOutcome::Fled);
        }
    }

    #[test]
    fn skilled_casters_open_with_an_attack_spell() {
        let mut harness = Harness::open(24);
        harness.behavior.buff_chance = 0.0;
        let (id, foe) = duel(
            &mut harness,
            CombatStyle::Melee(Skill::Swords),
            Vec2::new(4.5, 4.5),
            Vec2::new(8.5, 4.5),
        );
        harness.make_caster(id, 100.0, 100);
        let mut brain = AgentBrain::new(harness.now);

        let mut first_cast = None;
        for _ in 0..12 {
            harness.now = harness.now + Duration::from_millis(250);
            match harness.think(&mut brain, id) {
                ThinkOutcome::AttackCast { spell, target } => {
                    first_cast = Some((spell, target));
                    break;
                }
                ThinkOutcome::Engaged(_) => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        let (spell, target) = first_cast.expect("an attack cast within a few heartbeats");
        assert_eq!(target, foe);
        assert!(SpellId::ATTACKS.contains(&spell));
        assert!(harness.world.get(id).expect("caster").is_casting());
    }
}
