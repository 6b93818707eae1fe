//! Builds agent bodies from a persona and places them in the world.

use engine::world::{
    AllianceGroup, EntityId, ItemKind, MapId, MobileKind, MobileSpec, Rect, Skill, Stats, Vec2,
    Weapon, World, WorldError,
};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::persona::{weighted_pick, CombatStyle, Persona, Profile};

const FIRST_NAMES: [&str; 24] = [
    "Aldric", "Bryn", "Cedric", "Dalia", "Edwin", "Fiona", "Garrick", "Hilda", "Ivo", "Jessa",
    "Kael", "Lyra", "Morwen", "Nils", "Oren", "Petra", "Quinn", "Rowan", "Sabine", "Tamsin",
    "Ulric", "Vesna", "Wulf", "Yara",
];
const KILLER_EPITHETS: [&str; 6] = [
    "the Cruel",
    "the Butcher",
    "Bloodhand",
    "the Grim",
    "Nightblade",
    "the Reaver",
];
const CRAFTER_TRADES: [&str; 5] = [
    "the Smith",
    "the Tailor",
    "the Tinker",
    "the Carpenter",
    "the Bowyer",
];
const MAGE_MAGERY_FLOOR: f32 = 50.0;

/// Everything needed to create one agent body; unset fields are rolled.
#[derive(Debug, Clone)]
pub struct AgentBlueprint {
    pub persona: Persona,
    pub style: Option<CombatStyle>,
    pub karma: Option<i32>,
    pub alliance: Option<AllianceGroup>,
    pub name: Option<String>,
}

impl AgentBlueprint {
    pub fn new(persona: Persona) -> Self {
        Self {
            persona,
            style: None,
            karma: None,
            alliance: None,
            name: None,
        }
    }

    pub fn with_style(mut self, style: CombatStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_karma(mut self, karma: i32) -> Self {
        self.karma = Some(karma);
        self
    }

    pub fn with_alliance(mut self, alliance: AllianceGroup) -> Self {
        self.alliance = Some(alliance);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnedAgent {
    pub id: EntityId,
    pub persona: Persona,
    pub style: Option<CombatStyle>,
}

pub fn spawn_agent<R: Rng + ?Sized>(
    world: &mut World,
    rng: &mut R,
    blueprint: AgentBlueprint,
    map: MapId,
    position: Vec2,
) -> Result<SpawnedAgent, WorldError> {
    let persona = blueprint.persona;
    let style = blueprint.style.or_else(|| roll_style(persona.profile, rng));
    let name = blueprint
        .name
        .unwrap_or_else(|| random_name(persona.profile, rng));
    let karma = blueprint.karma.unwrap_or_else(|| persona.roll_karma(rng));

    let stats = Stats {
        strength: persona.roll_stat(rng),
        dexterity: persona.roll_stat(rng),
        intelligence: persona.roll_stat(rng),
    };
    let mut spec = MobileSpec::new(name, MobileKind::Agent, map, position)
        .with_stats(stats)
        .with_karma(karma)
        .with_alliance(blueprint.alliance);
    for (skill, value) in roll_skills(persona, style, rng) {
        spec = spec.with_skill(skill, value);
    }

    let magery = spec.skills.get(&Skill::Magery).copied().unwrap_or(0.0);
    if let Some((label, weapon)) = style.and_then(weapon_for_style) {
        spec = spec.with_held(world.create_item(label, ItemKind::Weapon(weapon)));
    }
    if magery >= MAGE_MAGERY_FLOOR {
        spec = spec.with_pack_item(world.create_item("spellbook", ItemKind::Spellbook));
    }
    if persona.profile == Profile::Crafter {
        let value = rng.gen_range(10..=60);
        let wares = world.create_item("crafted wares", ItemKind::TradeGood { value });
        spec = spec.with_pack_item(wares);
    }

    let id = world.spawn(spec)?;
    debug!(
        entity = id.0,
        persona = %persona.label(),
        style = ?style,
        karma,
        "agent_body_created"
    );
    Ok(SpawnedAgent { id, persona, style })
}

pub fn roll_style<R: Rng + ?Sized>(profile: Profile, rng: &mut R) -> Option<CombatStyle> {
    let (melee, ranged, none) = match profile {
        Profile::Killer => (60, 25, 15),
        Profile::Adventurer => (55, 35, 10),
        Profile::Crafter => (50, 10, 40),
    };
    let weights = [(Some(true), melee), (Some(false), ranged), (None, none)];
    match weighted_pick(rng, &weights).flatten() {
        Some(true) => {
            let skills: &[Skill] = if profile == Profile::Crafter {
                &[Skill::Macing, Skill::Wrestling]
            } else {
                &[Skill::Swords, Skill::Fencing, Skill::Macing]
            };
            skills.choose(rng).copied().map(CombatStyle::Melee)
        }
        Some(false) => Some(CombatStyle::Ranged),
        None => None,
    }
}

pub fn random_name<R: Rng + ?Sized>(profile: Profile, rng: &mut R) -> String {
    let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Nameless");
    match profile {
        Profile::Killer => {
            let epithet = KILLER_EPITHETS.choose(rng).copied().unwrap_or("the Cruel");
            format!("{first} {epithet}")
        }
        Profile::Crafter => {
            let trade = CRAFTER_TRADES.choose(rng).copied().unwrap_or("the Smith");
            format!("{first} {trade}")
        }
        Profile::Adventurer => first.to_string(),
    }
}

fn roll_skills<R: Rng + ?Sized>(
    persona: Persona,
    style: Option<CombatStyle>,
    rng: &mut R,
) -> Vec<(Skill, f32)> {
    let primary = style.map(CombatStyle::skill).unwrap_or(Skill::Wrestling);
    let mut skills = vec![
        (primary, persona.roll_skill(rng)),
        (Skill::Tactics, persona.roll_skill(rng)),
        (Skill::MagicResist, persona.roll_skill(rng) * 0.8),
    ];
    let parry_scale = if style.is_some_and(CombatStyle::is_ranged) {
        0.5
    } else {
        0.9
    };
    skills.push((Skill::Parrying, persona.roll_skill(rng) * parry_scale));
    if primary != Skill::Wrestling {
        skills.push((Skill::Wrestling, persona.roll_skill(rng) * 0.5));
    }

    let mage_chance = match persona.profile {
        Profile::Killer => 0.5,
        Profile::Adventurer => 0.4,
        Profile::Crafter => 0.0,
    };
    let magery = if rng.gen_bool(mage_chance) {
        persona.roll_skill(rng)
    } else {
        persona.roll_skill(rng) * 0.3
    };
    skills.push((Skill::Magery, magery));

    let healing_scale = if persona.profile.is_killer() { 0.4 } else { 0.7 };
    skills.push((Skill::Healing, persona.roll_skill(rng) * healing_scale));
    skills
        .into_iter()
        .map(|(skill, value)| (skill, (value * 10.0).round() / 10.0))
        .collect()
}

fn weapon_for_style(style: CombatStyle) -> Option<(&'static str, Weapon)> {
    let melee = |skill, min_damage, max_damage| Weapon {
        skill,
        min_damage,
        max_damage,
        max_range: 1.5,
        spell_channeling: false,
    };
    match style {
        CombatStyle::Melee(Skill::Swords) => Some(("longsword", melee(Skill::Swords, 5, 15))),
        CombatStyle::Melee(Skill::Fencing) => Some(("kryss", melee(Skill::Fencing, 4, 12))),
        CombatStyle::Melee(Skill::Macing) => Some(("war mace", melee(Skill::Macing, 6, 16))),
        CombatStyle::Melee(_) => None,
        CombatStyle::Ranged => Some((
            "bow",
            Weapon {
                skill: Skill::Archery,
                min_damage: 6,
                max_damage: 14,
                max_range: 10.0,
                spell_channeling: false,
            },
        )),
    }
}

/// First spawnable point out of `attempts` uniform samples.
pub fn find_spawn_point<R: Rng + ?Sized>(
    world: &World,
    rng: &mut R,
    map: MapId,
    area: Rect,
    attempts: u32,
) -> Option<Vec2> {
    (0..attempts).find_map(|_| {
        area.sample_point(rng)
            .filter(|point| world.can_spawn_at(map, *point))
    })
}

pub fn find_spawn_point_near<R: Rng + ?Sized>(
    world: &World,
    rng: &mut R,
    map: MapId,
    center: Vec2,
    radius: f32,
    attempts: u32,
) -> Option<Vec2> {
    let area = Rect::from_corners(
        Vec2::new(center.x - radius, center.y - radius),
        Vec2::new(center.x + radius + 1.0, center.y + radius + 1.0),
    );
    find_spawn_point(world, rng, map, area, attempts)
}

#[cfg(test)]
mod tests {
    use engine::world::Tilemap;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::persona::ExperienceTier;

    fn world() -> World {
        let mut world = World::new(1);
        world.insert_map(MapId(0), Tilemap::open(32, 32, Vec2::default()).expect("tilemap"));
        world
    }

    #[test]
    fn blueprint_overrides_rolled_fields() {
        let mut world = world();
        let mut rng = SmallRng::seed_from_u64(2);
        let persona = Persona::new(Profile::Adventurer, ExperienceTier::Grandmaster);
        let blueprint = AgentBlueprint::new(persona)
            .with_style(CombatStyle::Ranged)
            .with_karma(77)
            .with_alliance(AllianceGroup(9))
            .named("Sir Test");

        let spawned = spawn_agent(&mut world, &mut rng, blueprint, MapId(0), Vec2::new(4.5, 4.5))
            .expect("spawn");
        let body = world.get(spawned.id).expect("body");
        assert_eq!(body.name, "Sir Test");
        assert_eq!(body.karma, 77);
        assert_eq!(body.alliance, Some(AllianceGroup(9)));
        assert!(body.held_weapon().is_some_and(Weapon::is_ranged));
        assert!(body.skill(Skill::Archery) >= 90.0);
        assert!(ExperienceTier::Grandmaster
            .stat_range()
            .contains(&body.stats.strength));
    }

    #[test]
    fn spawn_on_blocked_tile_is_rejected() {
        let mut world = world();
        world
            .map_mut(MapId(0))
            .expect("map")
            .block_tile_at(Vec2::new(2.5, 2.5));
        let mut rng = SmallRng::seed_from_u64(2);
        let blueprint = AgentBlueprint::new(Persona::new(Profile::Crafter, ExperienceTier::Newbie));
        let result = spawn_agent(&mut world, &mut rng, blueprint, MapId(0), Vec2::new(2.5, 2.5));
        assert!(matches!(result, Err(WorldError::NotSpawnable { .. })));
    }

    #[test]
    fn spawn_point_search_gives_up_after_attempts() {
        let mut world = World::new(1);
        let mut tilemap = Tilemap::open(4, 4, Vec2::default()).expect("tilemap");
        for y in 0..4 {
            for x in 0..4 {
                tilemap.set_tile(x, y, engine::world::BLOCKED_TILE_ID);
            }
        }
        world.insert_map(MapId(0), tilemap);
        let mut rng = SmallRng::seed_from_u64(4);
        let area = Rect::from_corners(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
        assert_eq!(find_spawn_point(&world, &mut rng, MapId(0), area, 20), None);
    }

    #[test]
    fn killer_names_carry_an_epithet() {
        let mut rng = SmallRng::seed_from_u64(8);
        let name = random_name(Profile::Killer, &mut rng);
        assert!(KILLER_EPITHETS.iter().any(|epithet| name.ends_with(epithet)), "{name}");
    }
}
