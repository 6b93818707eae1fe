//! Autonomous population for a persistent shard: a director that keeps
//! regions populated, scripted scenes, and a per-agent decision engine.

pub mod admin;
pub mod brain;
pub mod director;
pub mod persistence;
pub mod persona;
pub mod scene;
pub mod shard;
pub mod spawn;

pub use director::{AgentRecord, AgentRegistry, Director, DirectorError, PopulationContext};
pub use persona::{AlignmentBand, CombatStyle, ExperienceTier, Persona, Profile};
pub use scene::{SceneId, SceneKind, SceneState, SceneSummary};
pub use shard::{Shard, ShardOptions};
