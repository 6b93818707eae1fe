//! Population snapshots.
//!
//! A snapshot is a versioned JSON document holding every live agent body
//! and every running scene. Restoring recreates the bodies under fresh ids
//! and rewrites scene membership through an old-to-new id map; members that
//! no longer resolve are dropped.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine::config::write_text_atomic;
use engine::world::{
    AllianceGroup, EntityId, Item, MapId, Mobile, MobileKind, MobileSpec, Skill, Stats, Vec2,
    Vital, World,
};
use engine::GameTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::director::{AgentRecord, Director, PopulationContext};
use crate::persona::{CombatStyle, Persona};
use crate::scene::{SceneCore, SceneHandle, SceneId, SceneKind, ScenePayload, SceneState};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("read snapshot '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write snapshot '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode snapshot json: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Parse(String),
    #[error("validation failed at {path}: {message}")]
    Validation { path: String, message: String },
}

impl PersistenceError {
    fn expected_actual(
        path: impl Into<String>,
        expected: impl Display,
        actual: impl Display,
    ) -> Self {
        Self::Validation {
            path: path.into(),
            message: format!("expected {expected}, got {actual}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub version: u32,
    pub saved_at_millis: u64,
    pub agents: Vec<AgentSnapshot>,
    pub scenes: Vec<SceneSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySnapshot {
    pub id: EntityId,
    pub name: String,
    pub kind: MobileKind,
    pub map: MapId,
    pub position: Vec2,
    pub stats: Stats,
    pub hits: Vital,
    pub mana: Vital,
    #[serde(default)]
    pub skills: BTreeMap<Skill, f32>,
    pub karma: i32,
    #[serde(default)]
    pub alliance: Option<AllianceGroup>,
    #[serde(default)]
    pub owner: Option<EntityId>,
    #[serde(default)]
    pub held: Option<Item>,
    #[serde(default)]
    pub pack: Vec<Item>,
    /// Remaining lifetime for summons.
    #[serde(default)]
    pub expires_in_millis: Option<u64>,
}

impl BodySnapshot {
    pub fn capture(mobile: &Mobile, now: GameTime) -> Self {
        Self {
            id: mobile.id,
            name: mobile.name.clone(),
            kind: mobile.kind,
            map: mobile.map,
            position: mobile.position,
            stats: mobile.stats,
            hits: mobile.hits,
            mana: mobile.mana,
            skills: mobile.skills.clone(),
            karma: mobile.karma,
            alliance: mobile.alliance,
            owner: mobile.owner,
            held: mobile.held.clone(),
            pack: mobile.pack.clone(),
            expires_in_millis: mobile
                .summon_expires_at
                .map(|at| duration_millis(at.saturating_since(now))),
        }
    }

    /// Recreates the body under a fresh id; items get fresh ids too.
    fn respawn(
        &self,
        world: &mut World,
        owner: Option<EntityId>,
        now: GameTime,
    ) -> Option<EntityId> {
        let mut spec = MobileSpec::new(self.name.clone(), self.kind, self.map, self.position)
            .with_stats(self.stats)
            .with_karma(self.karma)
            .with_alliance(self.alliance);
        spec.skills = self.skills.clone();
        spec.owner = owner;
        if let Some(item) = &self.held {
            spec = spec.with_held(world.create_item(item.name.clone(), item.kind.clone()));
        }
        for item in &self.pack {
            spec = spec.with_pack_item(world.create_item(item.name.clone(), item.kind.clone()));
        }
        if let Some(millis) = self.expires_in_millis {
            spec = spec.expiring_at(now + Duration::from_millis(millis));
        }

        let id = match world.spawn(spec) {
            Ok(id) => id,
            Err(error) => {
                warn!(
                    component = "persistence",
                    saved_id = self.id.0,
                    error = %error,
                    "body_restore_failed"
                );
                return None;
            }
        };
        if let Some(mobile) = world.get_mut(id) {
            mobile.hits = self.hits;
            mobile.mana = self.mana;
        }
        Some(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub body: BodySnapshot,
    pub persona: Persona,
    #[serde(default)]
    pub style: Option<CombatStyle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub id: SceneId,
    pub kind: SceneKind,
    pub name: String,
    pub map: MapId,
    pub center: Vec2,
    pub elapsed_millis: u64,
    pub duration_millis: u64,
    pub state: SceneState,
    pub participants: Vec<EntityId>,
    #[serde(default)]
    pub summons: Vec<BodySnapshot>,
    pub payload: ScenePayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub agents_restored: usize,
    pub agents_dropped: usize,
    pub scenes_restored: usize,
    pub participants_dropped: usize,
}

/// Copies live agents and unfinished scenes out of the shard.
pub fn capture(director: &Director, world: &World, now: GameTime) -> PopulationSnapshot {
    let agents = director
        .registry()
        .iter()
        .filter_map(|record| {
            let mobile = world.get(record.id).filter(|mobile| mobile.is_alive())?;
            Some(AgentSnapshot {
                body: BodySnapshot::capture(mobile, now),
                persona: record.persona,
                style: record.style,
            })
        })
        .collect();

    let scenes = director
        .scenes()
        .iter()
        .filter(|handle| !handle.is_complete())
        .map(|handle| {
            let core = handle.core();
            let elapsed = match handle.state() {
                SceneState::Preparing => Duration::ZERO,
                _ => core.elapsed(now),
            };
            SceneSnapshot {
                id: core.id,
                kind: handle.kind(),
                name: core.name.clone(),
                map: core.map,
                center: core.center,
                elapsed_millis: duration_millis(elapsed),
                duration_millis: duration_millis(core.duration),
                state: handle.state(),
                participants: core.participants().to_vec(),
                summons: core
                    .summons()
                    .iter()
                    .filter_map(|id| world.get(*id).filter(|mobile| mobile.is_alive()))
                    .map(|mobile| BodySnapshot::capture(mobile, now))
                    .collect(),
                payload: handle.save_state(),
            }
        })
        .collect();

    PopulationSnapshot {
        version: SNAPSHOT_VERSION,
        saved_at_millis: now.as_millis(),
        agents,
        scenes,
    }
}

pub fn save(path: &Path, snapshot: &PopulationSnapshot) -> Result<(), PersistenceError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    write_text_atomic(path, &json).map_err(|source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        path = %path.display(),
        agents = snapshot.agents.len(),
        scenes = snapshot.scenes.len(),
        "snapshot_saved"
    );
    Ok(())
}

pub fn load(path: &Path) -> Result<PopulationSnapshot, PersistenceError> {
    let raw = fs::read_to_string(path).map_err(|source| PersistenceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot = parse_snapshot_json(&raw)?;
    validate_snapshot(&snapshot)?;
    Ok(snapshot)
}

pub fn parse_snapshot_json(raw: &str) -> Result<PopulationSnapshot, PersistenceError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, PopulationSnapshot>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        let source = error.into_inner();
        if path.is_empty() || path == "." {
            PersistenceError::Parse(format!("parse save json: {source}"))
        } else {
            PersistenceError::Parse(format!("parse save json at {path}: {source}"))
        }
    })
}

pub fn validate_snapshot(snapshot: &PopulationSnapshot) -> Result<(), PersistenceError> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::expected_actual(
            "version",
            SNAPSHOT_VERSION,
            snapshot.version,
        ));
    }
    for (index, agent) in snapshot.agents.iter().enumerate() {
        if agent.body.kind != MobileKind::Agent {
            return Err(PersistenceError::expected_actual(
                format!("agents[{index}].body.kind"),
                "Agent",
                format!("{:?}", agent.body.kind),
            ));
        }
        if !agent.body.position.is_finite() {
            return Err(PersistenceError::expected_actual(
                format!("agents[{index}].body.position"),
                "finite coordinates",
                format!("{:?}", agent.body.position),
            ));
        }
    }
    for (index, scene) in snapshot.scenes.iter().enumerate() {
        if scene.payload.kind() != scene.kind {
            return Err(PersistenceError::expected_actual(
                format!("scenes[{index}].payload.kind"),
                format!("{:?}", scene.kind),
                format!("{:?}", scene.payload.kind()),
            ));
        }
        if scene.state == SceneState::Complete {
            return Err(PersistenceError::expected_actual(
                format!("scenes[{index}].state"),
                "an unfinished scene",
                scene.state.label(),
            ));
        }
        if scene.duration_millis == 0 {
            return Err(PersistenceError::expected_actual(
                format!("scenes[{index}].duration_millis"),
                "a positive duration",
                0,
            ));
        }
        if !scene.center.is_finite() {
            return Err(PersistenceError::expected_actual(
                format!("scenes[{index}].center"),
                "finite coordinates",
                format!("{:?}", scene.center),
            ));
        }
    }
    Ok(())
}

/// Rebuilds agents and scenes from `snapshot` into a running shard.
pub fn restore(
    snapshot: PopulationSnapshot,
    director: &mut Director,
    ctx: &mut PopulationContext<'_>,
) -> Result<RestoreReport, PersistenceError> {
    validate_snapshot(&snapshot)?;
    let mut report = RestoreReport::default();
    let mut remapped: BTreeMap<EntityId, EntityId> = BTreeMap::new();

    for agent in &snapshot.agents {
        let Some(id) = agent.body.respawn(ctx.world, None, ctx.now) else {
            report.agents_dropped += 1;
            continue;
        };
        remapped.insert(agent.body.id, id);
        let record = AgentRecord::new(id, agent.persona, agent.style);
        director.register_agent(record, ctx.brains, ctx.now);
        report.agents_restored += 1;
    }

    for saved in snapshot.scenes {
        let mut summons = Vec::new();
        for body in &saved.summons {
            let owner = body.owner.and_then(|owner| remapped.get(&owner).copied());
            if let Some(id) = body.respawn(ctx.world, owner, ctx.now) {
                remapped.insert(body.id, id);
                summons.push(id);
            }
        }

        let mut participants = Vec::new();
        for old in &saved.participants {
            let Some(new) = remapped.get(old).copied() else {
                report.participants_dropped += 1;
                continue;
            };
            if !ctx.world.is_live(new) || !director.registry_mut().set_scene(new, Some(saved.id)) {
                report.participants_dropped += 1;
                continue;
            }
            participants.push(new);
        }

        let lookup = |old: EntityId| {
            remapped
                .get(&old)
                .copied()
                .filter(|new| participants.contains(new) || summons.contains(new))
        };
        let payload = saved.payload.remap(&lookup);

        let elapsed = Duration::from_millis(saved.elapsed_millis);
        let mut core = SceneCore::new(
            saved.id,
            saved.name,
            saved.map,
            saved.center,
            ctx.now.saturating_sub(elapsed),
        );
        core.duration = Duration::from_millis(saved.duration_millis);
        core.set_members(participants, summons);
        info!(
            scene = saved.id.0,
            kind = saved.kind.label(),
            state = saved.state.label(),
            participants = core.participants().len(),
            "scene_restored"
        );
        director.add_scene(SceneHandle::restore(core, saved.state, payload.into_scene()));
        report.scenes_restored += 1;
    }

    info!(
        agents = report.agents_restored,
        dropped_agents = report.agents_dropped,
        scenes = report.scenes_restored,
        dropped_participants = report.participants_dropped,
        "snapshot_restored"
    );
    Ok(report)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
