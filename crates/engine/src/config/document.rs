use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use roxmltree::{Document, Node};

use crate::world::{MapId, Rect, Vec2};

use super::{BehaviorConfig, ConfigSnapshot, RegionProfile, SafetyTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorCode {
    XmlMalformed,
    InvalidRoot,
    UnknownElement,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateRegion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDiagnostic {
    pub code: ConfigErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ConfigDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ConfigDiagnostic {}

/// A usable snapshot plus everything that was skipped or defaulted on the way.
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    pub snapshot: ConfigSnapshot,
    pub diagnostics: Vec<ConfigDiagnostic>,
}

/// Only a malformed document or a wrong root element is an error; bad fields
/// fall back to defaults and bad regions are skipped, each with a diagnostic.
pub fn parse_config_document(
    file_path: &Path,
    raw: &str,
) -> Result<ParsedConfig, ConfigDiagnostic> {
    let doc = Document::parse(raw).map_err(|error| ConfigDiagnostic {
        code: ConfigErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "Population" {
        return Err(error_at_node(
            ConfigErrorCode::InvalidRoot,
            "root element must be <Population>".to_string(),
            file_path,
            &doc,
            root,
        ));
    }

    let mut ctx = ParseContext {
        file_path,
        doc: &doc,
        diagnostics: Vec::new(),
    };
    let mut behavior = BehaviorConfig::default();
    let mut regions = Vec::<RegionProfile>::new();
    let mut seen_behavior = false;
    let mut seen_region_names = HashSet::<String>::new();

    for child in root.children().filter(|node| node.is_element()) {
        match child.tag_name().name() {
            "Behavior" => {
                if seen_behavior {
                    ctx.report(
                        ConfigErrorCode::DuplicateField,
                        "duplicate <Behavior> block; keeping the first".to_string(),
                        child,
                    );
                    continue;
                }
                seen_behavior = true;
                parse_behavior(&mut ctx, child, &mut behavior);
            }
            "Region" => {
                let Some(region) = parse_region(&mut ctx, child) else {
                    continue;
                };
                if !seen_region_names.insert(region.name.to_ascii_lowercase()) {
                    ctx.report(
                        ConfigErrorCode::DuplicateRegion,
                        format!("duplicate region '{}'; keeping the first", region.name),
                        child,
                    );
                    continue;
                }
                regions.push(region);
            }
            other => {
                ctx.report(
                    ConfigErrorCode::UnknownElement,
                    format!("unsupported element <{other}> in <Population>"),
                    child,
                );
            }
        }
    }

    Ok(ParsedConfig {
        snapshot: ConfigSnapshot { behavior, regions },
        diagnostics: ctx.diagnostics,
    })
}

struct ParseContext<'a, 'input> {
    file_path: &'a Path,
    doc: &'a Document<'input>,
    diagnostics: Vec<ConfigDiagnostic>,
}

impl ParseContext<'_, '_> {
    fn report(&mut self, code: ConfigErrorCode, message: String, node: Node<'_, '_>) {
        self.diagnostics
            .push(error_at_node(code, message, self.file_path, self.doc, node));
    }
}

fn parse_behavior(ctx: &mut ParseContext<'_, '_>, node: Node<'_, '_>, out: &mut BehaviorConfig) {
    let mut seen_fields = HashSet::<String>::new();
    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name().to_string();
        if !seen_fields.insert(field_name.clone()) {
            ctx.report(
                ConfigErrorCode::DuplicateField,
                format!("duplicate field <{field_name}> in <Behavior>"),
                field,
            );
            continue;
        }

        match field_name.as_str() {
            "tickIntervalSeconds" => {
                if let Some(secs) = parse_positive_u64(ctx, field) {
                    out.tick_interval = Duration::from_secs(secs);
                }
            }
            "startupDelaySeconds" => {
                if let Some(secs) = parse_value::<u64>(ctx, field) {
                    out.startup_delay = Duration::from_secs(secs);
                }
            }
            "globalCap" => {
                if let Some(cap) = parse_value::<u32>(ctx, field) {
                    out.global_cap = cap;
                }
            }
            "spawnAttempts" => {
                if let Some(attempts) = parse_positive_u64(ctx, field) {
                    out.spawn_attempts = attempts.min(u32::MAX as u64) as u32;
                }
            }
            "sceneTickMillis" => {
                if let Some(millis) = parse_positive_u64(ctx, field) {
                    out.scene_tick_interval = Duration::from_millis(millis);
                }
            }
            "autoScenes" => {
                if let Some(flag) = parse_bool(ctx, field) {
                    out.auto_scenes = flag;
                }
            }
            "maxActiveScenes" => {
                if let Some(count) = parse_value::<u32>(ctx, field) {
                    out.max_active_scenes = count;
                }
            }
            "sceneStartChance" => {
                if let Some(chance) = parse_chance(ctx, field) {
                    out.scene_start_chance = chance;
                }
            }
            "supportIntervalMillis" => {
                if let Some(millis) = parse_positive_u64(ctx, field) {
                    out.support_interval = Duration::from_millis(millis);
                }
            }
            "buffCooldownSeconds" => {
                if let Some(secs) = parse_value::<u64>(ctx, field) {
                    out.buff_cooldown = Duration::from_secs(secs);
                }
            }
            "buffChance" => {
                if let Some(chance) = parse_chance(ctx, field) {
                    out.buff_chance = chance;
                }
            }
            "dispelChance" => {
                if let Some(chance) = parse_chance(ctx, field) {
                    out.dispel_chance = chance;
                }
            }
            "verboseLogging" => {
                if let Some(flag) = parse_bool(ctx, field) {
                    out.verbose_logging = flag;
                }
            }
            _ => ctx.report(
                ConfigErrorCode::UnknownField,
                format!("unknown field <{field_name}> in <Behavior>"),
                field,
            ),
        }
    }
}

fn parse_region(ctx: &mut ParseContext<'_, '_>, node: Node<'_, '_>) -> Option<RegionProfile> {
    let mut seen_fields = HashSet::<String>::new();
    let mut name: Option<String> = None;
    let mut map: Option<MapId> = None;
    let mut bounds: Option<Rect> = None;
    let mut min: Option<u32> = None;
    let mut max: Option<u32> = None;
    let mut active = true;
    let mut safety = SafetyTier::Contested;
    let mut valid = true;

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name().to_string();
        if !seen_fields.insert(field_name.clone()) {
            ctx.report(
                ConfigErrorCode::DuplicateField,
                format!("duplicate field <{field_name}> in <Region>"),
                field,
            );
            valid = false;
            continue;
        }

        let parsed = match field_name.as_str() {
            "name" => required_text(ctx, field, "name").map(|value| name = Some(value)),
            "map" => parse_value::<u16>(ctx, field).map(|value| map = Some(MapId(value))),
            "bounds" => parse_bounds(ctx, field).map(|value| bounds = Some(value)),
            "min" => parse_value::<u32>(ctx, field).map(|value| min = Some(value)),
            "max" => parse_value::<u32>(ctx, field).map(|value| max = Some(value)),
            "active" => parse_bool(ctx, field).map(|value| active = value),
            "safety" => required_text(ctx, field, "safety").and_then(|value| {
                match SafetyTier::parse(&value) {
                    Some(tier) => {
                        safety = tier;
                        Some(())
                    }
                    None => {
                        ctx.report(
                            ConfigErrorCode::InvalidValue,
                            format!(
                                "invalid safety '{value}'; allowed values: Guarded, Contested, Lawless"
                            ),
                            field,
                        );
                        None
                    }
                }
            }),
            _ => {
                ctx.report(
                    ConfigErrorCode::UnknownField,
                    format!("unknown field <{field_name}> in <Region>"),
                    field,
                );
                None
            }
        };
        if parsed.is_none() {
            valid = false;
        }
    }

    let mut require = |present: bool, field: &str| {
        if !present {
            ctx.report(
                ConfigErrorCode::MissingField,
                format!("missing required field <{field}> in <Region>"),
                node,
            );
        }
        present
    };
    let complete = require(name.is_some(), "name")
        & require(map.is_some(), "map")
        & require(bounds.is_some(), "bounds")
        & require(min.is_some(), "min")
        & require(max.is_some(), "max");
    if !valid || !complete {
        return None;
    }

    let (name, map, bounds, min, max) = (name?, map?, bounds?, min?, max?);
    if min > max {
        ctx.report(
            ConfigErrorCode::InvalidValue,
            format!("region '{name}' has min {min} greater than max {max}"),
            node,
        );
        return None;
    }

    Some(RegionProfile {
        name,
        map,
        bounds,
        min,
        max,
        active,
        safety,
    })
}

fn parse_bounds(ctx: &mut ParseContext<'_, '_>, field: Node<'_, '_>) -> Option<Rect> {
    let raw = required_text(ctx, field, "bounds")?;
    let parts = raw
        .split_whitespace()
        .map(str::parse::<f32>)
        .collect::<Result<Vec<_>, _>>()
        .ok()
        .filter(|parts| parts.len() == 4 && parts.iter().all(|value| value.is_finite()));
    let Some(parts) = parts else {
        ctx.report(
            ConfigErrorCode::InvalidValue,
            format!("bounds '{raw}' must be four numbers: x1 y1 x2 y2"),
            field,
        );
        return None;
    };
    let rect = Rect::from_corners(Vec2::new(parts[0], parts[1]), Vec2::new(parts[2], parts[3]));
    if rect.is_empty() {
        ctx.report(
            ConfigErrorCode::InvalidValue,
            format!("bounds '{raw}' enclose no area"),
            field,
        );
        return None;
    }
    Some(rect)
}

fn parse_value<T: std::str::FromStr>(
    ctx: &mut ParseContext<'_, '_>,
    field: Node<'_, '_>,
) -> Option<T> {
    let name = field.tag_name().name();
    let raw = required_text(ctx, field, name)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            ctx.report(
                ConfigErrorCode::InvalidValue,
                format!("{name} '{raw}' is not a valid {}", short_type_name::<T>()),
                field,
            );
            None
        }
    }
}

fn parse_positive_u64(ctx: &mut ParseContext<'_, '_>, field: Node<'_, '_>) -> Option<u64> {
    let value = parse_value::<u64>(ctx, field)?;
    if value == 0 {
        ctx.report(
            ConfigErrorCode::InvalidValue,
            format!("{} must be greater than zero", field.tag_name().name()),
            field,
        );
        return None;
    }
    Some(value)
}

fn parse_chance(ctx: &mut ParseContext<'_, '_>, field: Node<'_, '_>) -> Option<f32> {
    let value = parse_value::<f32>(ctx, field)?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        ctx.report(
            ConfigErrorCode::InvalidValue,
            format!("{} must be within [0, 1]", field.tag_name().name()),
            field,
        );
        return None;
    }
    Some(value)
}

fn parse_bool(ctx: &mut ParseContext<'_, '_>, field: Node<'_, '_>) -> Option<bool> {
    let name = field.tag_name().name();
    let raw = required_text(ctx, field, name)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => {
            ctx.report(
                ConfigErrorCode::InvalidValue,
                format!("{name} '{raw}' is not a boolean"),
                field,
            );
            None
        }
    }
}

fn required_text(
    ctx: &mut ParseContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
) -> Option<String> {
    let value = node.text().map(str::trim).unwrap_or_default().to_string();
    if value.is_empty() {
        ctx.report(
            ConfigErrorCode::MissingField,
            format!("field <{field_name}> must not be empty"),
            node,
        );
        return None;
    }
    Some(value)
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

fn error_at_node(
    code: ConfigErrorCode,
    message: String,
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> ConfigDiagnostic {
    let pos = doc.text_pos_at(node.range().start);
    ConfigDiagnostic {
        code,
        message,
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ParsedConfig {
        parse_config_document(Path::new("population.xml"), raw).expect("document should parse")
    }

    #[test]
    fn malformed_xml_reports_location() {
        let error = parse_config_document(Path::new("population.xml"), "<Population><Region>")
            .expect_err("malformed");
        assert_eq!(error.code, ConfigErrorCode::XmlMalformed);
        assert!(error.location.is_some());
    }

    #[test]
    fn wrong_root_is_rejected() {
        let error = parse_config_document(Path::new("population.xml"), "<Defs/>")
            .expect_err("wrong root");
        assert_eq!(error.code, ConfigErrorCode::InvalidRoot);
    }

    #[test]
    fn bad_behavior_value_keeps_default_and_reports() {
        let parsed = parse(
            r#"<Population>
  <Behavior>
    <globalCap>lots</globalCap>
    <spawnAttempts>12</spawnAttempts>
    <buffChance>1.5</buffChance>
  </Behavior>
</Population>"#,
        );
        let behavior = &parsed.snapshot.behavior;
        assert_eq!(behavior.global_cap, BehaviorConfig::default().global_cap);
        assert_eq!(behavior.spawn_attempts, 12);
        assert_eq!(behavior.buff_chance, BehaviorConfig::default().buff_chance);
        assert_eq!(parsed.diagnostics.len(), 2);
        assert!(parsed
            .diagnostics
            .iter()
            .all(|diagnostic| diagnostic.code == ConfigErrorCode::InvalidValue));
        assert_eq!(parsed.diagnostics[0].location.map(|loc| loc.line), Some(3));
    }

    #[test]
    fn invalid_region_is_skipped_without_blocking_others() {
        let parsed = parse(
            r#"<Population>
  <Region>
    <name>Inverted</name><map>0</map><bounds>0 0 10 10</bounds><min>5</min><max>2</max>
  </Region>
  <Region>
    <name>Incomplete</name><map>0</map><min>1</min><max>2</max>
  </Region>
  <Region>
    <name>Minoc</name><map>1</map><bounds>10 10 0 0</bounds><min>1</min><max>3</max>
    <safety>lawless</safety><active>no</active>
  </Region>
</Population>"#,
        );
        assert_eq!(parsed.snapshot.regions.len(), 1);
        let region = &parsed.snapshot.regions[0];
        assert_eq!(region.name, "Minoc");
        assert_eq!(region.map, MapId(1));
        assert_eq!(region.safety, SafetyTier::Lawless);
        assert!(!region.active);
        assert_eq!(region.bounds.min, Vec2::new(0.0, 0.0));
        assert_eq!(
            parsed
                .diagnostics
                .iter()
                .map(|diagnostic| diagnostic.code)
                .collect::<Vec<_>>(),
            vec![ConfigErrorCode::InvalidValue, ConfigErrorCode::MissingField]
        );
    }

    #[test]
    fn duplicate_region_names_keep_first() {
        let parsed = parse(
            r#"<Population>
  <Region><name>Vesper</name><map>0</map><bounds>0 0 4 4</bounds><min>1</min><max>1</max></Region>
  <Region><name>vesper</name><map>0</map><bounds>0 0 8 8</bounds><min>2</min><max>2</max></Region>
</Population>"#,
        );
        assert_eq!(parsed.snapshot.regions.len(), 1);
        assert_eq!(parsed.snapshot.regions[0].min, 1);
        assert_eq!(parsed.diagnostics[0].code, ConfigErrorCode::DuplicateRegion);
    }
}
