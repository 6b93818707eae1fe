use std::collections::BTreeMap;

use engine::world::{EntityId, World};

use crate::persona::{CombatStyle, Persona, Profile};
use crate::scene::SceneId;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub id: EntityId,
    pub persona: Persona,
    pub style: Option<CombatStyle>,
    pub scene: Option<SceneId>,
}

impl AgentRecord {
    pub fn new(id: EntityId, persona: Persona, style: Option<CombatStyle>) -> Self {
        Self {
            id,
            persona,
            style,
            scene: None,
        }
    }
}

/// Live agents keyed by body id. Iteration is in ascending id order.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    records: BTreeMap<EntityId, AgentRecord>,
}

impl AgentRegistry {
    /// Returns false when the agent was already registered; the existing
    /// record is kept.
    pub fn register(&mut self, record: AgentRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.records.insert(record.id, record);
        true
    }

    pub fn unregister(&mut self, id: EntityId) -> bool {
        self.records.remove(&id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&AgentRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AgentRecord> {
        self.records.values()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.records.keys().copied().collect()
    }

    pub fn profile_of(&self, id: EntityId) -> Option<Profile> {
        self.records.get(&id).map(|record| record.persona.profile)
    }

    pub fn persona_of(&self, id: EntityId) -> Option<Persona> {
        self.records.get(&id).map(|record| record.persona)
    }

    pub fn scene_of(&self, id: EntityId) -> Option<SceneId> {
        self.records.get(&id).and_then(|record| record.scene)
    }

    /// Joins or leaves a scene. Joining fails while the agent belongs to a
    /// different scene.
    pub fn set_scene(&mut self, id: EntityId, scene: Option<SceneId>) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        match (record.scene, scene) {
            (Some(current), Some(next)) if current != next => false,
            _ => {
                record.scene = scene;
                true
            }
        }
    }

    pub fn live_count(&self, world: &World) -> usize {
        self.records
            .keys()
            .filter(|id| world.is_live(**id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::ExperienceTier;

    fn record(id: u64) -> AgentRecord {
        AgentRecord::new(
            EntityId(id),
            Persona::new(Profile::Crafter, ExperienceTier::Average),
            None,
        )
    }

    #[test]
    fn register_twice_matches_register_once() {
        let mut registry = AgentRegistry::default();
        assert!(registry.register(record(1)));
        let once = registry.ids();

        let mut altered = record(1);
        altered.persona.profile = Profile::Killer;
        assert!(!registry.register(altered));
        assert_eq!(registry.ids(), once);
        assert_eq!(registry.profile_of(EntityId(1)), Some(Profile::Crafter));
    }

    #[test]
    fn unregister_twice_matches_unregister_once() {
        let mut registry = AgentRegistry::default();
        registry.register(record(1));
        registry.register(record(2));

        assert!(registry.unregister(EntityId(1)));
        let once = registry.ids();
        assert!(!registry.unregister(EntityId(1)));
        assert_eq!(registry.ids(), once);
        assert_eq!(once, vec![EntityId(2)]);
    }

    #[test]
    fn agent_cannot_join_a_second_scene() {
        let mut registry = AgentRegistry::default();
        registry.register(record(1));

        assert!(registry.set_scene(EntityId(1), Some(SceneId(4))));
        assert!(registry.set_scene(EntityId(1), Some(SceneId(4))));
        assert!(!registry.set_scene(EntityId(1), Some(SceneId(5))));
        assert_eq!(registry.scene_of(EntityId(1)), Some(SceneId(4)));

        assert!(registry.set_scene(EntityId(1), None));
        assert!(registry.set_scene(EntityId(1), Some(SceneId(5))));
    }
}
