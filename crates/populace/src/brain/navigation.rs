//! Travel toward a destination with stuck detection and escape.

use std::time::Duration;

use engine::world::{Direction, EntityId, Vec2};
use engine::GameTime;
use tracing::debug;

use super::{AgentBrain, BrainError, ThinkContext};

pub const ARRIVAL_RADIUS: f32 = 2.0;
const DESTINATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const STUCK_RADIUS: f32 = 2.0;
const NO_MOVE_THRESHOLD: Duration = Duration::from_secs(10);
const STUCK_HISTORY_CAPACITY: usize = 8;
const MOVED_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStep {
    Arrived,
    TimedOut,
    Moved,
    Escaped(Direction),
    Waiting,
    Abandoned,
}

impl AgentBrain {
    pub(crate) fn navigate(
        &mut self,
        id: EntityId,
        ctx: &mut ThinkContext<'_>,
    ) -> Result<NavStep, BrainError> {
        let Some(plan) = self.destination else {
            return Ok(NavStep::Arrived);
        };
        let position = ctx
            .world
            .get(id)
            .map(|mobile| mobile.position)
            .ok_or(BrainError::AgentVanished(id))?;
        self.note_position(position, ctx.now);

        if position.distance(plan.point) <= ARRIVAL_RADIUS {
            self.destination = None;
            return Ok(NavStep::Arrived);
        }
        if ctx.now.saturating_since(plan.issued_at) >= DESTINATION_TIMEOUT {
            debug!(entity = id.0, "destination_timed_out");
            self.destination = None;
            return Ok(NavStep::TimedOut);
        }

        if self.is_near_stuck_point(position) {
            if let Some(direction) = self.escape(id, ctx) {
                self.note_moved(id, ctx);
                return Ok(NavStep::Escaped(direction));
            }
        }
        if step_toward(id, plan.point, ctx) {
            self.note_moved(id, ctx);
            return Ok(NavStep::Moved);
        }

        if ctx.now.saturating_since(self.last_moved_at) < NO_MOVE_THRESHOLD {
            return Ok(NavStep::Waiting);
        }
        self.record_stuck(position);
        debug!(
            entity = id.0,
            x = position.x,
            y = position.y,
            stuck_points = self.stuck_points.len(),
            "agent_stuck"
        );
        if let Some(direction) = self.escape(id, ctx) {
            self.note_moved(id, ctx);
            return Ok(NavStep::Escaped(direction));
        }
        debug!(entity = id.0, "destination_abandoned");
        self.destination = None;
        Ok(NavStep::Abandoned)
    }

    pub(crate) fn record_stuck(&mut self, point: Vec2) {
        if self
            .stuck_points
            .iter()
            .any(|known| known.distance(point) < MOVED_EPSILON)
        {
            return;
        }
        if self.stuck_points.len() == STUCK_HISTORY_CAPACITY {
            self.stuck_points.pop_front();
        }
        self.stuck_points.push_back(point);
    }

    fn is_near_stuck_point(&self, position: Vec2) -> bool {
        self.stuck_points
            .iter()
            .any(|point| point.distance(position) <= STUCK_RADIUS)
    }

    /// Tries directions best-first, scoring each by how far its landing tile is
    /// from the closest remembered stuck point.
    fn escape(&mut self, id: EntityId, ctx: &mut ThinkContext<'_>) -> Option<Direction> {
        let position = ctx.world.get(id)?.position;
        let mut scored = Direction::ALL
            .into_iter()
            .map(|direction| {
                let landing = direction.step_from(position);
                let clearance = self
                    .stuck_points
                    .iter()
                    .map(|point| point.distance(landing))
                    .fold(f32::INFINITY, f32::min);
                (clearance, direction)
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        scored
            .into_iter()
            .map(|(_, direction)| direction)
            .find(|direction| ctx.world.try_step(id, *direction, true))
    }

    fn note_position(&mut self, position: Vec2, now: GameTime) {
        match self.last_location {
            Some(last) if last.distance(position) <= MOVED_EPSILON => {}
            Some(_) => {
                self.last_location = Some(position);
                self.last_moved_at = now;
            }
            None => self.last_location = Some(position),
        }
    }

    fn note_moved(&mut self, id: EntityId, ctx: &ThinkContext<'_>) {
        if let Some(mobile) = ctx.world.get(id) {
            self.last_location = Some(mobile.position);
            self.last_moved_at = ctx.now;
        }
    }
}

/// Pathfinding first, then the direct heading, its two neighbours, and finally
/// any step that shortens the straight-line distance.
pub(crate) fn step_toward(id: EntityId, goal: Vec2, ctx: &mut ThinkContext<'_>) -> bool {
    if ctx.world.step_along_path(id, goal, true) {
        return true;
    }
    let Some(position) = ctx.world.get(id).map(|mobile| mobile.position) else {
        return false;
    };
    let Some(direct) = Direction::towards(position, goal) else {
        return false;
    };
    for direction in [
        direct,
        direct.rotate_clockwise(),
        direct.rotate_counter_clockwise(),
    ] {
        if ctx.world.try_step(id, direction, true) {
            return true;
        }
    }
    let current = position.distance(goal);
    Direction::ALL
        .into_iter()
        .filter(|direction| direction.step_from(position).distance(goal) < current)
        .any(|direction| ctx.world.try_step(id, direction, true))
}

pub(crate) fn step_away(id: EntityId, threat: Vec2, ctx: &mut ThinkContext<'_>) -> bool {
    let Some(position) = ctx.world.get(id).map(|mobile| mobile.position) else {
        return false;
    };
    let away = Direction::towards(threat, position).unwrap_or(Direction::North);
    for direction in [away, away.rotate_clockwise(), away.rotate_counter_clockwise()] {
        if ctx.world.try_step(id, direction, true) {
            return true;
        }
    }
    let current = position.distance(threat);
    Direction::ALL
        .into_iter()
        .filter(|direction| direction.step_from(position).distance(threat) > current)
        .any(|direction| ctx.world.try_step(id, direction, true))
}

#[cfg(test)]
mod tests {
    use engine::world::{Skill, BLOCKED_TILE_ID};

    use super::super::test_support::*;
    use super::super::ThinkOutcome;
    use super::*;
    use crate::persona::{CombatStyle, Profile};

    fn crafter(harness: &mut Harness, at: Vec2) -> EntityId {
        harness.agent(Profile::Crafter, 0, CombatStyle::Melee(Skill::Macing), at)
    }

    /// Blocks the eight tiles around `center`, leaving `gap` open.
    fn wall_in(harness: &mut Harness, center: (u32, u32), gap: Option<Direction>) {
        let gap = gap.map(Direction::offset);
        let tilemap = harness.world.map_mut(MAP).expect("map");
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                if (dx == 0 && dy == 0) || gap == Some((dx, dy)) {
                    continue;
                }
                let x = (center.0 as i32 + dx) as u32;
                let y = (center.1 as i32 + dy) as u32;
                tilemap.set_tile(x, y, BLOCKED_TILE_ID);
            }
        }
    }

    #[test]
    fn walks_until_within_arrival_radius() {
        let mut harness = Harness::open(24);
        let id = crafter(&mut harness, Vec2::new(2.5, 2.5));
        let mut brain = AgentBrain::new(harness.now);
        brain.set_destination(Vec2::new(8.5, 2.5), harness.now);

        let mut arrived = false;
        for _ in 0..10 {
            harness.now = harness.now + Duration::from_millis(250);
            match harness.think(&mut brain, id) {
                ThinkOutcome::Travel(NavStep::Arrived) => {
                    arrived = true;
                    break;
                }
                ThinkOutcome::Travel(NavStep::Moved) => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert!(arrived);
        let position = harness.world.get(id).expect("body").position;
        assert!(position.distance(Vec2::new(8.5, 2.5)) <= ARRIVAL_RADIUS);
        assert_eq!(brain.destination(), None);
    }

    #[test]
    fn stationary_agent_records_stuck_point_after_threshold() {
        let mut harness = Harness::open(24);
        let start = Vec2::new(5.5, 5.5);
        let id = crafter(&mut harness, start);
        wall_in(&mut harness, (5, 5), None);
        let mut brain = AgentBrain::new(harness.now);
        brain.set_destination(Vec2::new(18.5, 18.5), harness.now);

        assert_eq!(
            harness.think(&mut brain, id),
            ThinkOutcome::Travel(NavStep::Waiting)
        );
        assert_eq!(brain.stuck_points().count(), 0);

        harness.now = harness.now + Duration::from_secs(11);
        assert_eq!(
            harness.think(&mut brain, id),
            ThinkOutcome::Travel(NavStep::Abandoned)
        );
        assert_eq!(brain.stuck_points().copied().collect::<Vec<_>>(), vec![start]);
        assert_eq!(brain.destination(), None);
    }

    #[test]
    fn blocked_agent_records_stuck_point_then_escapes_through_the_gap() {
        let mut harness = Harness::open(24);
        let start = Vec2::new(5.5, 5.5);
        let id = crafter(&mut harness, start);
        wall_in(&mut harness, (5, 5), Some(Direction::West));
        wall_in(&mut harness, (18, 5), None);
        let mut brain = AgentBrain::new(harness.now);
        brain.set_destination(Vec2::new(18.5, 5.5), harness.now);

        assert_eq!(
            harness.think(&mut brain, id),
            ThinkOutcome::Travel(NavStep::Waiting)
        );
        harness.now = harness.now + Duration::from_secs(5);
        assert_eq!(
            harness.think(&mut brain, id),
            ThinkOutcome::Travel(NavStep::Waiting)
        );
        assert_eq!(brain.stuck_points().count(), 0);

        harness.now = harness.now + Duration::from_secs(6);
        assert_eq!(
            harness.think(&mut brain, id),
            ThinkOutcome::Travel(NavStep::Escaped(Direction::West))
        );
        assert_eq!(brain.stuck_points().copied().collect::<Vec<_>>(), vec![start]);
        let first = harness.world.get(id).expect("body").position;
        assert_eq!(first, Vec2::new(4.5, 5.5));

        harness.now = harness.now + Duration::from_millis(250);
        let outcome = harness.think(&mut brain, id);
        assert!(
            matches!(outcome, ThinkOutcome::Travel(NavStep::Escaped(_))),
            "{outcome:?}"
        );
        let second = harness.world.get(id).expect("body").position;
        assert!(second.distance(start) > first.distance(start), "{second:?}");
        assert!(brain.destination().is_some());
    }

    #[test]
    fn escape_moves_away_from_recorded_stuck_points() {
        let mut harness = Harness::open(24);
        let start = Vec2::new(10.5, 10.5);
        let id = crafter(&mut harness, start);
        let mut brain = AgentBrain::new(harness.now);
        brain.record_stuck(start);
        brain.record_stuck(Vec2::new(11.5, 10.5));
        brain.set_destination(Vec2::new(20.5, 10.5), harness.now);

        let outcome = harness.think(&mut brain, id);
        assert!(
            matches!(outcome, ThinkOutcome::Travel(NavStep::Escaped(_))),
            "{outcome:?}"
        );
        let position = harness.world.get(id).expect("body").position;
        assert!(position.x < start.x, "escaped toward {position:?}");
        let clearance = brain
            .stuck_points()
            .map(|point| point.distance(position))
            .fold(f32::INFINITY, f32::min);
        assert!(clearance > 1.0);
    }

    #[test]
    fn stuck_history_is_bounded() {
        let mut brain = AgentBrain::new(GameTime::ZERO);
        for index in 0..12 {
            brain.record_stuck(Vec2::new(index as f32 * 5.0, 0.0));
        }
        let points = brain.stuck_points().copied().collect::<Vec<_>>();
        assert_eq!(points.len(), STUCK_HISTORY_CAPACITY);
        assert_eq!(points[0], Vec2::new(20.0, 0.0));
    }

    #[test]
    fn destinations_expire() {
        let mut harness = Harness::open(24);
        let id = crafter(&mut harness, Vec2::new(2.5, 2.5));
        let mut brain = AgentBrain::new(harness.now);
        brain.set_destination(Vec2::new(20.5, 20.5), harness.now);
        harness.now = harness.now + DESTINATION_TIMEOUT;
        assert_eq!(
            harness.think(&mut brain, id),
            ThinkOutcome::Travel(NavStep::TimedOut)
        );
    }
}
