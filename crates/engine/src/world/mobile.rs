use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::time::GameTime;

use super::geometry::{Direction, MapId, Vec2};
use super::magic::{EffectKind, PendingCast};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ItemId(pub u64);

/// Side a mobile fights for while a scenario is running; equal groups are allies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllianceGroup(pub u64);

impl AllianceGroup {
    pub fn for_scene_side(scene_id: u64, side: u8) -> Self {
        Self(scene_id.saturating_mul(16).saturating_add(side as u64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MobileKind {
    Agent,
    Creature { aggressive: bool },
    Summon,
    PackAnimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Skill {
    Wrestling,
    Swords,
    Fencing,
    Macing,
    Archery,
    Tactics,
    Parrying,
    MagicResist,
    Magery,
    Healing,
}

impl Skill {
    pub const MELEE: [Skill; 4] = [Skill::Swords, Skill::Fencing, Skill::Macing, Skill::Wrestling];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatKind {
    Strength,
    Dexterity,
    Intelligence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub strength: u16,
    pub dexterity: u16,
    pub intelligence: u16,
}

impl Stats {
    pub fn get(&self, kind: StatKind) -> u16 {
        match kind {
            StatKind::Strength => self.strength,
            StatKind::Dexterity => self.dexterity,
            StatKind::Intelligence => self.intelligence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vital {
    pub current: u16,
    pub max: u16,
}

impl Vital {
    pub fn full(max: u16) -> Self {
        Self { current: max, max }
    }

    pub fn ratio(&self) -> f32 {
        if self.max == 0 {
            0.0
        } else {
            self.current as f32 / self.max as f32
        }
    }

    pub fn drain(&mut self, amount: u16) -> u16 {
        let drained = amount.min(self.current);
        self.current -= drained;
        drained
    }

    pub fn restore(&mut self, amount: u16) {
        self.current = self.current.saturating_add(amount).min(self.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weapon {
    pub skill: Skill,
    pub min_damage: u16,
    pub max_damage: u16,
    /// Reach in world units; melee weapons use 1.5.
    pub max_range: f32,
    pub spell_channeling: bool,
}

impl Weapon {
    pub fn is_ranged(&self) -> bool {
        self.skill == Skill::Archery
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemKind {
    Weapon(Weapon),
    Shield,
    Spellbook,
    TradeGood { value: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub kind: ItemKind,
}

impl Item {
    pub fn blocks_casting(&self) -> bool {
        match &self.kind {
            ItemKind::Weapon(weapon) => !weapon.spell_channeling,
            ItemKind::Shield | ItemKind::Spellbook | ItemKind::TradeGood { .. } => false,
        }
    }

    pub fn weapon(&self) -> Option<&Weapon> {
        match &self.kind {
            ItemKind::Weapon(weapon) => Some(weapon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub kind: EffectKind,
    pub expires_at: GameTime,
}

#[derive(Debug, Clone)]
pub struct Mobile {
    pub id: EntityId,
    pub name: String,
    pub kind: MobileKind,
    pub map: MapId,
    pub position: Vec2,
    pub facing: Direction,
    pub stats: Stats,
    pub hits: Vital,
    pub mana: Vital,
    pub skills: BTreeMap<Skill, f32>,
    pub karma: i32,
    pub alliance: Option<AllianceGroup>,
    pub owner: Option<EntityId>,
    pub combatant: Option<EntityId>,
    pub aggressors: BTreeSet<EntityId>,
    pub poisoned: bool,
    pub effects: Vec<ActiveEffect>,
    pub casting: Option<PendingCast>,
    pub held: Option<Item>,
    pub pack: Vec<Item>,
    pub summon_expires_at: Option<GameTime>,
    pub last_moved_at: GameTime,
    pub(crate) next_swing_at: GameTime,
    pub(crate) next_poison_at: GameTime,
    pub(crate) alive: bool,
    pub(crate) deleted: bool,
}

impl Mobile {
    pub fn is_alive(&self) -> bool {
        self.alive && !self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn skill(&self, skill: Skill) -> f32 {
        self.skills.get(&skill).copied().unwrap_or(0.0)
    }

    pub fn is_casting(&self) -> bool {
        self.casting.is_some()
    }

    pub fn health_ratio(&self) -> f32 {
        self.hits.ratio()
    }

    pub fn held_weapon(&self) -> Option<&Weapon> {
        self.held.as_ref().and_then(Item::weapon)
    }

    /// Stat including active buff bonuses.
    pub fn effective_stat(&self, kind: StatKind) -> u16 {
        let bonus: u16 = self
            .effects
            .iter()
            .filter_map(|effect| match effect.kind {
                EffectKind::StatBuff { stat, amount } if stat == kind => Some(amount),
                _ => None,
            })
            .sum();
        self.stats.get(kind).saturating_add(bonus)
    }

    pub fn has_effect(&self, kind: &EffectKind) -> bool {
        self.effects.iter().any(|effect| effect.kind.same_slot(kind))
    }

    /// Strongest combat skill the mobile can fight with right now.
    pub fn primary_combat_skill(&self) -> f32 {
        if let Some(weapon) = self.held_weapon() {
            return self.skill(weapon.skill);
        }
        self.skill(Skill::Wrestling)
    }
}

/// Everything needed to place a new mobile in the world.
#[derive(Debug, Clone)]
pub struct MobileSpec {
    pub name: String,
    pub kind: MobileKind,
    pub map: MapId,
    pub position: Vec2,
    pub stats: Stats,
    pub skills: BTreeMap<Skill, f32>,
    pub karma: i32,
    pub alliance: Option<AllianceGroup>,
    pub owner: Option<EntityId>,
    pub held: Option<Item>,
    pub pack: Vec<Item>,
    pub summon_expires_at: Option<GameTime>,
}

impl MobileSpec {
    pub fn new(name: impl Into<String>, kind: MobileKind, map: MapId, position: Vec2) -> Self {
        Self {
            name: name.into(),
            kind,
            map,
            position,
            stats: Stats {
                strength: 50,
                dexterity: 50,
                intelligence: 50,
            },
            skills: BTreeMap::new(),
            karma: 0,
            alliance: None,
            owner: None,
            held: None,
            pack: Vec::new(),
            summon_expires_at: None,
        }
    }

    pub fn with_stats(mut self, stats: Stats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_skill(mut self, skill: Skill, value: f32) -> Self {
        self.skills.insert(skill, value);
        self
    }

    pub fn with_karma(mut self, karma: i32) -> Self {
        self.karma = karma;
        self
    }

    pub fn with_alliance(mut self, alliance: Option<AllianceGroup>) -> Self {
        self.alliance = alliance;
        self
    }

    pub fn with_owner(mut self, owner: EntityId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_held(mut self, item: Item) -> Self {
        self.held = Some(item);
        self
    }

    pub fn with_pack_item(mut self, item: Item) -> Self {
        self.pack.push(item);
        self
    }

    pub fn expiring_at(mut self, at: GameTime) -> Self {
        self.summon_expires_at = Some(at);
        self
    }

    pub(crate) fn into_mobile(self, id: EntityId, now: GameTime) -> Mobile {
        // Hit points follow strength, mana follows intelligence.
        let hits = Vital::full(self.stats.strength.max(1));
        let mana = Vital::full(self.stats.intelligence);
        Mobile {
            id,
            name: self.name,
            kind: self.kind,
            map: self.map,
            position: self.position,
            facing: Direction::South,
            stats: self.stats,
            hits,
            mana,
            skills: self.skills,
            karma: self.karma,
            alliance: self.alliance,
            owner: self.owner,
            combatant: None,
            aggressors: BTreeSet::new(),
            poisoned: false,
            effects: Vec::new(),
            casting: None,
            held: self.held,
            pack: self.pack,
            summon_expires_at: self.summon_expires_at,
            last_moved_at: now,
            next_swing_at: now,
            next_poison_at: now,
            alive: true,
            deleted: false,
        }
    }
}
