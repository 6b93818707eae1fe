//! Reference host world: mobile storage, spatial queries, movement, and the
//! combat and spell resolution that agents drive through their decisions.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::debug;

use crate::time::GameTime;

mod combat;
mod geometry;
mod magic;
mod mobile;
pub mod nav;
mod tilemap;

pub use geometry::{Direction, MapId, Rect, Vec2};
pub use magic::{
    CastError, EffectKind, PendingCast, SpellDef, SpellEffect, SpellId, WardKind, EFFECT_DURATION,
    SPELL_RANGE,
};
pub use mobile::{
    ActiveEffect, AllianceGroup, EntityId, Item, ItemId, ItemKind, Mobile, MobileKind, MobileSpec,
    Skill, StatKind, Stats, Vital, Weapon,
};
pub use tilemap::{Tilemap, TilemapError, BLOCKED_TILE_ID, OPEN_TILE_ID};

const MAX_SPEECH_LINES: usize = 256;
const REGEN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq)]
pub enum WorldError {
    #[error("no tilemap registered for map {0:?}")]
    UnknownMap(MapId),
    #[error("location {position:?} on map {map:?} is not spawnable")]
    NotSpawnable { map: MapId, position: Vec2 },
    #[error("unknown or deleted entity {0:?}")]
    UnknownEntity(EntityId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechLine {
    pub at: GameTime,
    pub speaker: EntityId,
    pub text: String,
}

#[derive(Debug)]
struct EntityIdAllocator {
    next: u64,
}

impl Default for EntityIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl EntityIdAllocator {
    fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        id
    }
}

#[derive(Debug)]
pub struct World {
    entity_ids: EntityIdAllocator,
    item_ids: EntityIdAllocator,
    mobiles: BTreeMap<EntityId, Mobile>,
    maps: BTreeMap<MapId, Tilemap>,
    speech: VecDeque<SpeechLine>,
    rng: SmallRng,
    now: GameTime,
    next_regen_at: GameTime,
    path_budget: usize,
}

impl World {
    pub fn new(seed: u64) -> Self {
        Self {
            entity_ids: EntityIdAllocator::default(),
            item_ids: EntityIdAllocator::default(),
            mobiles: BTreeMap::new(),
            maps: BTreeMap::new(),
            speech: VecDeque::new(),
            rng: SmallRng::seed_from_u64(seed),
            now: GameTime::ZERO,
            next_regen_at: GameTime::ZERO + REGEN_INTERVAL,
            path_budget: nav::DEFAULT_MAX_EXPANDED_NODES,
        }
    }

    pub fn insert_map(&mut self, map: MapId, tilemap: Tilemap) {
        self.maps.insert(map, tilemap);
    }

    pub fn map(&self, map: MapId) -> Option<&Tilemap> {
        self.maps.get(&map)
    }

    pub fn map_mut(&mut self, map: MapId) -> Option<&mut Tilemap> {
        self.maps.get_mut(&map)
    }

    pub fn now(&self) -> GameTime {
        self.now
    }

    /// Moves the clock forward without resolving anything; the clock never
    /// runs backwards.
    pub fn advance_clock(&mut self, now: GameTime) {
        self.now = self.now.max(now);
    }

    pub fn spawn(&mut self, spec: MobileSpec) -> Result<EntityId, WorldError> {
        if !self.maps.contains_key(&spec.map) {
            return Err(WorldError::UnknownMap(spec.map));
        }
        if !self.is_walkable(spec.map, spec.position) {
            return Err(WorldError::NotSpawnable {
                map: spec.map,
                position: spec.position,
            });
        }
        let id = EntityId(self.entity_ids.allocate());
        let mobile = spec.into_mobile(id, self.now);
        debug!(entity = id.0, name = %mobile.name, kind = ?mobile.kind, "mobile_spawned");
        self.mobiles.insert(id, mobile);
        Ok(id)
    }

    pub fn create_item(&mut self, name: impl Into<String>, kind: ItemKind) -> Item {
        Item {
            id: ItemId(self.item_ids.allocate()),
            name: name.into(),
            kind,
        }
    }

    /// Marks the mobile deleted; storage is reclaimed by `purge_deleted`.
    pub fn delete(&mut self, id: EntityId) -> bool {
        let Some(mobile) = self.mobiles.get_mut(&id) else {
            return false;
        };
        if mobile.deleted {
            return false;
        }
        mobile.deleted = true;
        mobile.casting = None;
        mobile.combatant = None;
        debug!(entity = id.0, "mobile_deleted");
        true
    }

    pub fn purge_deleted(&mut self) -> usize {
        let before = self.mobiles.len();
        self.mobiles.retain(|_, mobile| !mobile.deleted);
        let removed = before - self.mobiles.len();
        if removed > 0 {
            let live_ids = self.mobiles.keys().copied().collect::<Vec<_>>();
            for mobile in self.mobiles.values_mut() {
                if let Some(target) = mobile.combatant {
                    if live_ids.binary_search(&target).is_err() {
                        mobile.combatant = None;
                    }
                }
                mobile
                    .aggressors
                    .retain(|aggressor| live_ids.binary_search(aggressor).is_ok());
            }
        }
        removed
    }

    /// Non-deleted mobile, alive or dead.
    pub fn get(&self, id: EntityId) -> Option<&Mobile> {
        self.mobiles.get(&id).filter(|mobile| !mobile.deleted)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Mobile> {
        self.mobiles.get_mut(&id).filter(|mobile| !mobile.deleted)
    }

    pub fn is_live(&self, id: EntityId) -> bool {
        self.get(id).is_some_and(Mobile::is_alive)
    }

    pub fn mobiles(&self) -> impl Iterator<Item = &Mobile> {
        self.mobiles.values().filter(|mobile| !mobile.deleted)
    }

    pub fn mobile_count(&self) -> usize {
        self.mobiles().count()
    }

    /// Live mobiles on `map` within `range` of `center`, ascending by id.
    pub fn in_range(&self, map: MapId, center: Vec2, range: f32) -> Vec<EntityId> {
        let range_squared = range * range;
        self.mobiles()
            .filter(|mobile| {
                mobile.is_alive()
                    && mobile.map == map
                    && mobile.position.distance_squared(center) <= range_squared
            })
            .map(|mobile| mobile.id)
            .collect()
    }

    pub fn line_of_sight(&self, map: MapId, from: Vec2, to: Vec2) -> bool {
        self.maps
            .get(&map)
            .is_some_and(|tilemap| nav::line_of_sight(tilemap, from, to))
    }

    pub fn can_see(&self, viewer: EntityId, target: EntityId) -> bool {
        let (Some(viewer), Some(target)) = (self.get(viewer), self.get(target)) else {
            return false;
        };
        viewer.map == target.map && self.line_of_sight(viewer.map, viewer.position, target.position)
    }

    pub fn is_walkable(&self, map: MapId, point: Vec2) -> bool {
        self.maps
            .get(&map)
            .is_some_and(|tilemap| tilemap.is_walkable(point))
    }

    /// Walkable and not already occupied by a living mobile.
    pub fn can_spawn_at(&self, map: MapId, point: Vec2) -> bool {
        if !self.is_walkable(map, point) {
            return false;
        }
        let tile = point.snapped();
        !self.mobiles().any(|mobile| {
            mobile.is_alive() && mobile.map == map && mobile.position.snapped() == tile
        })
    }

    pub fn distance_between(&self, a: EntityId, b: EntityId) -> Option<f32> {
        let (a, b) = (self.get(a)?, self.get(b)?);
        (a.map == b.map).then(|| a.position.distance(b.position))
    }

    pub fn set_location(
        &mut self,
        id: EntityId,
        map: MapId,
        point: Vec2,
    ) -> Result<(), WorldError> {
        if !self.is_walkable(map, point) {
            return Err(WorldError::NotSpawnable {
                map,
                position: point,
            });
        }
        let now = self.now;
        let mobile = self.get_mut(id).ok_or(WorldError::UnknownEntity(id))?;
        mobile.map = map;
        mobile.position = point;
        mobile.last_moved_at = now;
        Ok(())
    }

    pub fn face(&mut self, id: EntityId, point: Vec2) {
        if let Some(mobile) = self.get_mut(id) {
            if let Some(direction) = Direction::towards(mobile.position, point) {
                mobile.facing = direction;
            }
        }
    }

    /// One-tile move; diagonals may not cut blocked corners.
    pub fn try_step(&mut self, id: EntityId, direction: Direction, running: bool) -> bool {
        let Some(mobile) = self.get(id) else {
            return false;
        };
        if !mobile.is_alive() || mobile.is_casting() {
            return false;
        }
        let map = mobile.map;
        let origin = mobile.position;
        let destination = direction.step_from(origin);
        if !self.is_walkable(map, destination) {
            return false;
        }
        let (dx, dy) = direction.offset();
        if dx != 0 && dy != 0 {
            let side_a = Vec2::new(origin.x + dx as f32, origin.y);
            let side_b = Vec2::new(origin.x, origin.y + dy as f32);
            if !self.is_walkable(map, side_a) || !self.is_walkable(map, side_b) {
                return false;
            }
        }

        let now = self.now;
        let Some(mobile) = self.get_mut(id) else {
            return false;
        };
        mobile.position = destination;
        mobile.facing = direction;
        mobile.last_moved_at = now;
        if running {
            debug!(entity = id.0, ?direction, "mobile_ran");
        }
        true
    }

    pub fn find_path(&self, map: MapId, from: Vec2, to: Vec2) -> Option<Vec<Vec2>> {
        let tilemap = self.maps.get(&map)?;
        nav::find_path(tilemap, from, to, self.path_budget)
    }

    /// Steps once along an A* path toward `goal`.
    pub fn step_along_path(&mut self, id: EntityId, goal: Vec2, running: bool) -> bool {
        let Some(mobile) = self.get(id) else {
            return false;
        };
        let Some(path) = self.find_path(mobile.map, mobile.position, goal) else {
            return false;
        };
        let Some(next) = path.first().copied() else {
            return false;
        };
        let Some(direction) = Direction::towards(mobile.position, next) else {
            return false;
        };
        self.try_step(id, direction, running)
    }

    pub fn say(&mut self, speaker: EntityId, text: impl Into<String>) {
        let text = text.into();
        let Some(mobile) = self.get(speaker) else {
            return;
        };
        debug!(entity = speaker.0, name = %mobile.name, text = %text, "mobile_said");
        if self.speech.len() == MAX_SPEECH_LINES {
            self.speech.pop_front();
        }
        self.speech.push_back(SpeechLine {
            at: self.now,
            speaker,
            text,
        });
    }

    pub fn recent_speech(&self) -> impl Iterator<Item = &SpeechLine> {
        self.speech.iter()
    }

    /// Moves the held item into the pack.
    pub fn stash_held_item(&mut self, id: EntityId) -> Option<ItemId> {
        let mobile = self.get_mut(id)?;
        let item = mobile.held.take()?;
        let item_id = item.id;
        mobile.pack.push(item);
        Some(item_id)
    }

    /// Equips a pack item when the hands are free.
    pub fn equip_from_pack(&mut self, id: EntityId, item_id: ItemId) -> bool {
        let Some(mobile) = self.get_mut(id) else {
            return false;
        };
        if mobile.held.is_some() {
            return false;
        }
        let Some(index) = mobile.pack.iter().position(|item| item.id == item_id) else {
            return false;
        };
        let item = mobile.pack.remove(index);
        mobile.held = Some(item);
        true
    }

    /// Host fallback: nearest visible mobile that is already hostile to `id`.
    pub fn find_best_target(&self, id: EntityId, range: f32) -> Option<EntityId> {
        let seeker = self.get(id).filter(|mobile| mobile.is_alive())?;
        let seeker_aggressive = matches!(seeker.kind, MobileKind::Creature { aggressive: true });

        self.in_range(seeker.map, seeker.position, range)
            .into_iter()
            .filter(|candidate| *candidate != id)
            .filter_map(|candidate| self.get(candidate))
            .filter(|candidate| candidate.owner != Some(id) && seeker.owner != Some(candidate.id))
            .filter(|candidate| {
                let candidate_aggressive =
                    matches!(candidate.kind, MobileKind::Creature { aggressive: true });
                seeker.aggressors.contains(&candidate.id)
                    || (candidate_aggressive && !seeker_aggressive)
                    || (seeker_aggressive && !candidate_aggressive)
            })
            .filter(|candidate| self.line_of_sight(seeker.map, seeker.position, candidate.position))
            .min_by(|a, b| {
                let da = a.position.distance_squared(seeker.position);
                let db = b.position.distance_squared(seeker.position);
                da.total_cmp(&db).then(a.id.cmp(&b.id))
            })
            .map(|candidate| candidate.id)
    }

    /// Advances casts, swings, poison, regeneration, effect and summon expiry.
    pub fn tick(&mut self, now: GameTime) {
        self.advance_clock(now);
        self.complete_due_casts();
        self.resolve_swings();
        self.apply_poison();
        self.regenerate();
        self.expire_effects_and_summons();
    }

    fn regenerate(&mut self) {
        if !self.now.has_reached(self.next_regen_at) {
            return;
        }
        self.next_regen_at = self.now + REGEN_INTERVAL;
        for mobile in self.mobiles.values_mut() {
            if !mobile.is_alive() {
                continue;
            }
            mobile.hits.restore(1);
            let mana_gain = 1 + mobile.stats.intelligence / 20;
            mobile.mana.restore(mana_gain);
        }
    }

    fn expire_effects_and_summons(&mut self) {
        let now = self.now;
        let mut expired_summons = Vec::new();
        for mobile in self.mobiles.values_mut() {
            if mobile.deleted {
                continue;
            }
            mobile
                .effects
                .retain(|effect| !now.has_reached(effect.expires_at));
            if mobile
                .summon_expires_at
                .is_some_and(|deadline| now.has_reached(deadline))
            {
                expired_summons.push(mobile.id);
            }
        }
        for id in expired_summons {
            debug!(entity = id.0, "summon_expired");
            self.delete(id);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) const TEST_MAP: MapId = MapId(0);

    pub(crate) fn open_world(size: u32) -> World {
        let mut world = World::new(11);
        world.insert_map(
            TEST_MAP,
            Tilemap::open(size, size, Vec2::default()).expect("tilemap"),
        );
        world
    }

    pub(crate) fn spawn_fighter(world: &mut World, name: &str, at: Vec2) -> EntityId {
        let spec = MobileSpec::new(name, MobileKind::Agent, TEST_MAP, at)
            .with_skill(Skill::Wrestling, 80.0)
            .with_skill(Skill::Tactics, 80.0);
        world.spawn(spec).expect("spawn")
    }
}
