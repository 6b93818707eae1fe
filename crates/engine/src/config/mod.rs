//! Population configuration: regions and behavior knobs loaded from XML.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::world::{MapId, Rect, Vec2};

mod atomic_io;
mod document;
mod hashing;
mod store;

pub use atomic_io::write_text_atomic;
pub use document::{
    parse_config_document, ConfigDiagnostic, ConfigErrorCode, ParsedConfig, SourceLocation,
};
pub use hashing::fingerprint_bytes;
pub use store::{ConfigError, ConfigStore, ReloadOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyTier {
    Guarded,
    Contested,
    Lawless,
}

impl SafetyTier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "guarded" => Some(Self::Guarded),
            "contested" => Some(Self::Contested),
            "lawless" => Some(Self::Lawless),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Guarded => "Guarded",
            Self::Contested => "Contested",
            Self::Lawless => "Lawless",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionProfile {
    pub name: String,
    pub map: MapId,
    pub bounds: Rect,
    pub min: u32,
    pub max: u32,
    pub active: bool,
    pub safety: SafetyTier,
}

impl RegionProfile {
    pub fn contains(&self, map: MapId, point: Vec2) -> bool {
        self.map == map && self.bounds.contains(point)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorConfig {
    pub tick_interval: Duration,
    pub startup_delay: Duration,
    pub global_cap: u32,
    pub spawn_attempts: u32,
    pub scene_tick_interval: Duration,
    pub auto_scenes: bool,
    pub max_active_scenes: u32,
    pub scene_start_chance: f32,
    pub support_interval: Duration,
    pub buff_cooldown: Duration,
    pub buff_chance: f32,
    pub dispel_chance: f32,
    pub verbose_logging: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            startup_delay: Duration::from_secs(10),
            global_cap: 300,
            spawn_attempts: 20,
            scene_tick_interval: Duration::from_secs(1),
            auto_scenes: true,
            max_active_scenes: 3,
            scene_start_chance: 0.1,
            support_interval: Duration::from_secs(3),
            buff_cooldown: Duration::from_secs(15),
            buff_chance: 0.6,
            dispel_chance: 0.75,
            verbose_logging: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub behavior: BehaviorConfig,
    pub regions: Vec<RegionProfile>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            behavior: BehaviorConfig::default(),
            regions: builtin_regions(),
        }
    }
}

impl ConfigSnapshot {
    pub fn region(&self, name: &str) -> Option<&RegionProfile> {
        self.regions
            .iter()
            .find(|region| region.name.eq_ignore_ascii_case(name))
    }

    pub fn active_regions(&self) -> impl Iterator<Item = &RegionProfile> {
        self.regions.iter().filter(|region| region.active)
    }

    /// Renders the snapshot in the on-disk format.
    pub fn to_xml(&self) -> String {
        let behavior = &self.behavior;
        let mut out = String::from("<Population>\n  <Behavior>\n");
        let fields: [(&str, String); 13] = [
            ("tickIntervalSeconds", behavior.tick_interval.as_secs().to_string()),
            ("startupDelaySeconds", behavior.startup_delay.as_secs().to_string()),
            ("globalCap", behavior.global_cap.to_string()),
            ("spawnAttempts", behavior.spawn_attempts.to_string()),
            (
                "sceneTickMillis",
                behavior.scene_tick_interval.as_millis().to_string(),
            ),
            ("autoScenes", behavior.auto_scenes.to_string()),
            ("maxActiveScenes", behavior.max_active_scenes.to_string()),
            ("sceneStartChance", behavior.scene_start_chance.to_string()),
            (
                "supportIntervalMillis",
                behavior.support_interval.as_millis().to_string(),
            ),
            (
                "buffCooldownSeconds",
                behavior.buff_cooldown.as_secs().to_string(),
            ),
            ("buffChance", behavior.buff_chance.to_string()),
            ("dispelChance", behavior.dispel_chance.to_string()),
            ("verboseLogging", behavior.verbose_logging.to_string()),
        ];
        for (name, value) in fields {
            let _ = writeln!(out, "    <{name}>{value}</{name}>");
        }
        out.push_str("  </Behavior>\n");
        for region in &self.regions {
            let _ = write!(
                out,
                concat!(
                    "  <Region>\n",
                    "    <name>{}</name>\n",
                    "    <map>{}</map>\n",
                    "    <bounds>{} {} {} {}</bounds>\n",
                    "    <min>{}</min>\n",
                    "    <max>{}</max>\n",
                    "    <active>{}</active>\n",
                    "    <safety>{}</safety>\n",
                    "  </Region>\n",
                ),
                escape_text(&region.name),
                region.map.0,
                region.bounds.min.x,
                region.bounds.min.y,
                region.bounds.max.x,
                region.bounds.max.y,
                region.min,
                region.max,
                region.active,
                region.safety.label()
            );
        }
        out.push_str("</Population>\n");
        out
    }
}

fn builtin_regions() -> Vec<RegionProfile> {
    vec![
        RegionProfile {
            name: "Britain".to_string(),
            map: MapId(0),
            bounds: Rect::from_corners(Vec2::new(0.0, 0.0), Vec2::new(64.0, 64.0)),
            min: 6,
            max: 12,
            active: true,
            safety: SafetyTier::Guarded,
        },
        RegionProfile {
            name: "Yew Woods".to_string(),
            map: MapId(0),
            bounds: Rect::from_corners(Vec2::new(64.0, 0.0), Vec2::new(128.0, 64.0)),
            min: 4,
            max: 8,
            active: true,
            safety: SafetyTier::Contested,
        },
        RegionProfile {
            name: "Bandit Camp".to_string(),
            map: MapId(0),
            bounds: Rect::from_corners(Vec2::new(0.0, 64.0), Vec2::new(64.0, 128.0)),
            min: 3,
            max: 6,
            active: true,
            safety: SafetyTier::Lawless,
        },
    ]
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn rendered_defaults_parse_back_without_diagnostics() {
        let snapshot = ConfigSnapshot::default();
        let parsed =
            parse_config_document(Path::new("population.xml"), &snapshot.to_xml()).expect("parse");
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        assert_eq!(parsed.snapshot, snapshot);
    }

    #[test]
    fn region_lookup_is_case_insensitive() {
        let snapshot = ConfigSnapshot::default();
        assert!(snapshot.region("yew woods").is_some());
        assert!(snapshot.region("Moonglow").is_none());
        assert_eq!(snapshot.active_regions().count(), 3);
    }
}
