use engine::world::{EntityId, ItemId, Weapon};
use tracing::debug;

use super::{AgentBrain, ThinkContext};
use crate::persona::CombatStyle;

impl AgentBrain {
    /// Frees the hands before a cast. Only the first stashed item is
    /// remembered so a chain of casts restores the original weapon.
    pub(crate) fn prepare_hands_for_cast(&mut self, id: EntityId, ctx: &mut ThinkContext<'_>) {
        let blocks = ctx
            .world
            .get(id)
            .and_then(|mobile| mobile.held.as_ref())
            .is_some_and(|item| item.blocks_casting());
        if !blocks {
            return;
        }
        if let Some(item) = ctx.world.stash_held_item(id) {
            debug!(entity = id.0, item = item.0, "weapon_stashed_for_cast");
            if self.stashed_item.is_none() {
                self.stashed_item = Some(item);
            }
        }
    }

    /// Re-equips after casting clears. Ranged-preferring agents reclaim a bow
    /// before anything else they stashed.
    pub(crate) fn restore_equipment(&mut self, id: EntityId, ctx: &mut ThinkContext<'_>) {
        let Some(stashed) = self.stashed_item else {
            return;
        };
        let Some(mobile) = ctx.world.get(id) else {
            return;
        };
        if mobile.is_casting() {
            return;
        }
        if mobile.held.is_some() {
            self.stashed_item = None;
            return;
        }

        let prefers_ranged = ctx
            .agents
            .get(id)
            .and_then(|record| record.style)
            .is_some_and(CombatStyle::is_ranged);
        let ranged_in_pack: Option<ItemId> = prefers_ranged
            .then(|| {
                mobile
                    .pack
                    .iter()
                    .find(|item| item.weapon().is_some_and(Weapon::is_ranged))
                    .map(|item| item.id)
            })
            .flatten();
        let choice = ranged_in_pack.unwrap_or(stashed);

        if ctx.world.equip_from_pack(id, choice) {
            debug!(entity = id.0, item = choice.0, "weapon_restored");
        }
        self.stashed_item = None;
    }
}
