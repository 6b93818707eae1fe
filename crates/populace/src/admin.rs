//! Operator console: line parsing and the command table.
//!
//! Lines arrive from stdin, are parsed against the registry, and the
//! resulting [`AdminCommand`]s are queued for the shard to execute on its
//! next heartbeat. Output is plain text lines.

use std::collections::{HashMap, VecDeque};

use crate::persona::{ExperienceTier, Profile};
use crate::scene::{SceneId, SceneKind};

pub const MAX_PENDING_LINES: usize = 64;
pub const MAX_PENDING_COMMANDS: usize = 128;
pub const MAX_OUTPUT_LINES: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Status,
    Scenes,
    Scene {
        id: SceneId,
    },
    Spawn {
        profile: Option<Profile>,
        tier: Option<ExperienceTier>,
        region: Option<String>,
    },
    Delete {
        entity_id: u64,
    },
    EndScene {
        id: SceneId,
    },
    CreateScene {
        kind: SceneKind,
        place: ScenePlacement,
    },
    AutoScenes {
        enabled: Option<bool>,
    },
    RegisterMissing,
    Reload,
    Save,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenePlacement {
    AnyRegion,
    Region(String),
    Point { x: f32, y: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalAction {
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCommand {
    Local(LocalAction),
    Queueable(AdminCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandParseError {
    reason: String,
    usage: String,
}

impl CommandParseError {
    fn new(reason: impl Into<String>, usage: &str) -> Self {
        Self {
            reason: reason.into(),
            usage: usage.to_string(),
        }
    }
}

type ParseFn = dyn Fn(&[String]) -> Result<ParsedCommand, CommandParseError> + Send + Sync;

type BuiltinParse = fn(&[String]) -> Result<ParsedCommand, CommandParseError>;

const BUILTINS: [(&str, &str, &str, BuiltinParse); 13] = [
    ("help", "List commands", "", parse_help_command),
    ("status", "Population and loop summary", "", parse_status_command),
    ("scenes", "List running scenes", "", parse_scenes_command),
    ("scene", "Show one scene", "<scene_id:u64>", parse_scene_command),
    (
        "spawn",
        "Spawn one agent",
        concat!(
            "[profile:killer|crafter|adventurer] ",
            "[tier:newbie|average|proficient|grandmaster] [region:string]"
        ),
        parse_spawn_command,
    ),
    ("delete", "Delete an agent by id", "<entity_id:u64>", parse_delete_command),
    ("end_scene", "End a running scene", "<scene_id:u64>", parse_end_scene_command),
    (
        "create_scene",
        "Start a scene",
        "<kind:war|caravan> [region:string | x:f32 y:f32]",
        parse_create_scene_command,
    ),
    (
        "auto_scenes",
        "Show or toggle automatic scenes",
        "[on|off]",
        parse_auto_scenes_command,
    ),
    (
        "register_missing",
        "Adopt agent bodies missing from the registry",
        "",
        parse_register_missing_command,
    ),
    ("reload", "Reload population config", "", parse_reload_command),
    ("save", "Write a population snapshot", "", parse_save_command),
    ("quit", "Save and stop the server", "", parse_quit_command),
];

pub struct CommandSpec {
    name: String,
    help: String,
    arg_schema: String,
    parse: Box<ParseFn>,
}

pub struct AdminCommandRegistry {
    specs: Vec<CommandSpec>,
    lookup_by_lower_name: HashMap<String, usize>,
}

impl AdminCommandRegistry {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, help, arg_schema, parse) in BUILTINS {
            if let Err(reason) = registry.register(name, help, arg_schema, parse) {
                tracing::warn!(
                    component = "admin",
                    command = name,
                    %reason,
                    "command_registration_failed"
                );
            }
        }
        registry
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        arg_schema: impl Into<String>,
        parse: F,
    ) -> Result<(), String>
    where
        F: Fn(&[String]) -> Result<ParsedCommand, CommandParseError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("command name cannot be empty".to_string());
        }
        let lower = name.to_ascii_lowercase();
        if self.lookup_by_lower_name.contains_key(&lower) {
            return Err(format!("duplicate command registration: {name}"));
        }

        self.specs.push(CommandSpec {
            name,
            help: help.into(),
            arg_schema: arg_schema.into(),
            parse: Box::new(parse),
        });
        self.lookup_by_lower_name.insert(lower, self.specs.len() - 1);
        Ok(())
    }

    pub fn lookup(&self, input_name: &str) -> Option<&CommandSpec> {
        let lower = input_name.to_ascii_lowercase();
        let index = self.lookup_by_lower_name.get(&lower)?;
        self.specs.get(*index)
    }

    pub fn iter_specs_in_order(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.specs.iter().map(|spec| {
            (
                spec.name.as_str(),
                spec.help.as_str(),
                spec.arg_schema.as_str(),
            )
        })
    }
}

impl Default for AdminCommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Raw input, parsed commands awaiting execution, and reply lines.
#[derive(Default)]
pub struct AdminConsole {
    registry: AdminCommandRegistry,
    pending_lines: VecDeque<String>,
    pending_commands: VecDeque<AdminCommand>,
    output: VecDeque<String>,
}

impl AdminConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_line(&mut self, line: impl Into<String>) {
        push_bounded(&mut self.pending_lines, line.into(), MAX_PENDING_LINES);
    }

    pub fn append_output_line(&mut self, line: impl Into<String>) {
        push_bounded(&mut self.output, line.into(), MAX_OUTPUT_LINES);
    }

    pub fn drain_output_into(&mut self, out: &mut Vec<String>) {
        out.extend(self.output.drain(..));
    }

    pub fn drain_pending_commands_into(&mut self, out: &mut Vec<AdminCommand>) {
        out.extend(self.pending_commands.drain(..));
    }

    pub fn process_pending_lines(&mut self) {
        let lines: Vec<String> = self.pending_lines.drain(..).collect();
        for raw_line in lines {
            self.process_line(&raw_line);
        }
    }

    fn process_line(&mut self, raw_line: &str) {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            return;
        }

        let tokens = match tokenize_line(trimmed) {
            Ok(tokens) => tokens,
            Err(reason) => {
                self.append_output_line(format!("error: {reason}. usage: help"));
                return;
            }
        };
        let Some((command_name, args)) = tokens.split_first() else {
            return;
        };
        let Some(spec) = self.registry.lookup(command_name) else {
            self.append_output_line(format!(
                "error: unknown command '{command_name}'. try: help"
            ));
            return;
        };

        match (spec.parse)(args) {
            Ok(ParsedCommand::Local(LocalAction::Help)) => self.print_help(),
            Ok(ParsedCommand::Queueable(command)) => {
                push_bounded(&mut self.pending_commands, command, MAX_PENDING_COMMANDS);
            }
            Err(error) => {
                self.append_output_line(format!(
                    "error: {}. usage: {}",
                    error.reason, error.usage
                ));
            }
        }
    }

    fn print_help(&mut self) {
        let lines: Vec<String> = self
            .registry
            .iter_specs_in_order()
            .map(|(name, help, arg_schema)| {
                if arg_schema.is_empty() {
                    format!("{name} - {help}")
                } else {
                    format!("{name} {arg_schema} - {help}")
                }
            })
            .collect();
        for line in lines {
            self.append_output_line(line);
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, max_len: usize) {
    if queue.len() == max_len {
        queue.pop_front();
    }
    queue.push_back(value);
}

fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut seen_token_content = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                seen_token_content = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if seen_token_content {
                    tokens.push(std::mem::take(&mut current));
                    seen_token_content = false;
                }
            }
            _ => {
                current.push(ch);
                seen_token_content = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if seen_token_content {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_help_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    require_no_args(args, "help")?;
    Ok(ParsedCommand::Local(LocalAction::Help))
}

fn parse_status_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    require_no_args(args, "status")?;
    Ok(ParsedCommand::Queueable(AdminCommand::Status))
}

fn parse_scenes_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    require_no_args(args, "scenes")?;
    Ok(ParsedCommand::Queueable(AdminCommand::Scenes))
}

fn parse_scene_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    let id = parse_single_scene_id(args, "scene <scene_id>")?;
    Ok(ParsedCommand::Queueable(AdminCommand::Scene { id }))
}

fn parse_end_scene_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    let id = parse_single_scene_id(args, "end_scene <scene_id>")?;
    Ok(ParsedCommand::Queueable(AdminCommand::EndScene { id }))
}

fn parse_spawn_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    const USAGE: &str = "spawn [profile] [tier] [region]";
    if args.len() > 3 {
        return Err(CommandParseError::new("expected at most three arguments", USAGE));
    }
    let profile = match args.first().map(String::as_str) {
        None | Some("any") => None,
        Some(value) => Some(Profile::parse(value).ok_or_else(|| {
            CommandParseError::new(
                format!("unknown profile '{value}' (expected killer|crafter|adventurer)"),
                USAGE,
            )
        })?),
    };
    let tier = match args.get(1).map(String::as_str) {
        None | Some("any") => None,
        Some(value) => Some(ExperienceTier::parse(value).ok_or_else(|| {
            CommandParseError::new(
                format!(
                    "unknown tier '{value}' (expected newbie|average|proficient|grandmaster)"
                ),
                USAGE,
            )
        })?),
    };
    Ok(ParsedCommand::Queueable(AdminCommand::Spawn {
        profile,
        tier,
        region: args.get(2).cloned(),
    }))
}

fn parse_delete_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    const USAGE: &str = "delete <entity_id>";
    let [raw] = args else {
        return Err(CommandParseError::new(
            "expected exactly one argument <entity_id>",
            USAGE,
        ));
    };
    let entity_id = raw.parse::<u64>().map_err(|_| {
        CommandParseError::new(format!("invalid entity id '{raw}' (expected u64)"), USAGE)
    })?;
    Ok(ParsedCommand::Queueable(AdminCommand::Delete { entity_id }))
}

fn parse_create_scene_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    const USAGE: &str = "create_scene <kind> [region | x y]";
    let Some((raw_kind, rest)) = args.split_first() else {
        return Err(CommandParseError::new("missing required argument <kind>", USAGE));
    };
    let kind = SceneKind::parse(raw_kind).ok_or_else(|| {
        CommandParseError::new(
            format!("unknown scene kind '{raw_kind}' (expected war|caravan)"),
            USAGE,
        )
    })?;
    let place = match rest {
        [] => ScenePlacement::AnyRegion,
        [region] => ScenePlacement::Region(region.clone()),
        [x, y] => ScenePlacement::Point {
            x: parse_coordinate(x, "x", USAGE)?,
            y: parse_coordinate(y, "y", USAGE)?,
        },
        _ => {
            return Err(CommandParseError::new(
                "expected <kind>, <kind> <region> or <kind> <x> <y>",
                USAGE,
            ))
        }
    };
    Ok(ParsedCommand::Queueable(AdminCommand::CreateScene { kind, place }))
}

fn parse_auto_scenes_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    const USAGE: &str = "auto_scenes [on|off]";
    let enabled = match args {
        [] => None,
        [value] => match value.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(true),
            "off" | "false" | "0" => Some(false),
            _ => {
                return Err(CommandParseError::new(
                    format!("invalid toggle '{value}' (expected on|off)"),
                    USAGE,
                ))
            }
        },
        _ => return Err(CommandParseError::new("unexpected extra arguments", USAGE)),
    };
    Ok(ParsedCommand::Queueable(AdminCommand::AutoScenes { enabled }))
}

fn parse_register_missing_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    require_no_args(args, "register_missing")?;
    Ok(ParsedCommand::Queueable(AdminCommand::RegisterMissing))
}

fn parse_reload_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    require_no_args(args, "reload")?;
    Ok(ParsedCommand::Queueable(AdminCommand::Reload))
}

fn parse_save_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    require_no_args(args, "save")?;
    Ok(ParsedCommand::Queueable(AdminCommand::Save))
}

fn parse_quit_command(args: &[String]) -> Result<ParsedCommand, CommandParseError> {
    require_no_args(args, "quit")?;
    Ok(ParsedCommand::Queueable(AdminCommand::Quit))
}

fn parse_single_scene_id(args: &[String], usage: &str) -> Result<SceneId, CommandParseError> {
    let [raw] = args else {
        return Err(CommandParseError::new(
            "expected exactly one argument <scene_id>",
            usage,
        ));
    };
    raw.parse::<u64>().map(SceneId).map_err(|_| {
        CommandParseError::new(format!("invalid scene id '{raw}' (expected u64)"), usage)
    })
}

fn parse_coordinate(raw: &str, axis: &str, usage: &str) -> Result<f32, CommandParseError> {
    raw.parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| {
            CommandParseError::new(
                format!("invalid {axis} coordinate '{raw}' (expected f32)"),
                usage,
            )
        })
}

fn require_no_args(args: &[String], usage: &str) -> Result<(), CommandParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandParseError::new("unexpected extra arguments", usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str]) -> (Vec<AdminCommand>, Vec<String>) {
        let mut console = AdminConsole::new();
        for line in lines {
            console.submit_line(*line);
        }
        console.process_pending_lines();
        let mut commands = Vec::new();
        console.drain_pending_commands_into(&mut commands);
        let mut output = Vec::new();
        console.drain_output_into(&mut output);
        (commands, output)
    }

    #[test]
    fn help_lists_commands_in_registration_order() {
        let (commands, output) = run(&["help"]);
        assert!(commands.is_empty());
        assert_eq!(output.len(), BUILTINS.len());
        assert_eq!(output[0], "help - List commands");
        assert_eq!(output[3], "scene <scene_id:u64> - Show one scene");
        assert_eq!(output[12], "quit - Save and stop the server");
    }

    #[test]
    fn unknown_command_reports_clear_error() {
        let (_, output) = run(&["teleport"]);
        assert_eq!(output, vec!["error: unknown command 'teleport'. try: help"]);
    }

    #[test]
    fn command_names_are_case_insensitive() {
        let (commands, _) = run(&["STATUS", "End_Scene 4"]);
        assert_eq!(
            commands,
            vec![AdminCommand::Status, AdminCommand::EndScene { id: SceneId(4) }]
        );
    }

    #[test]
    fn bad_args_report_usage_hint() {
        let (commands, output) = run(&["delete foo", "end_scene"]);
        assert!(commands.is_empty());
        assert_eq!(
            output,
            vec![
                "error: invalid entity id 'foo' (expected u64). usage: delete <entity_id>",
                "error: expected exactly one argument <scene_id>. usage: end_scene <scene_id>",
            ]
        );
    }

    #[test]
    fn spawn_accepts_optional_positional_arguments() {
        let (commands, _) = run(&[
            "spawn",
            "spawn killer grandmaster \"Yew Woods\"",
            "spawn any newbie",
        ]);
        assert_eq!(
            commands,
            vec![
                AdminCommand::Spawn {
                    profile: None,
                    tier: None,
                    region: None,
                },
                AdminCommand::Spawn {
                    profile: Some(Profile::Killer),
                    tier: Some(ExperienceTier::Grandmaster),
                    region: Some("Yew Woods".to_string()),
                },
                AdminCommand::Spawn {
                    profile: None,
                    tier: Some(ExperienceTier::Newbie),
                    region: None,
                },
            ]
        );
    }

    #[test]
    fn create_scene_placements() {
        let (commands, output) = run(&[
            "create_scene war",
            "create_scene caravan Britain",
            "create_scene war 12.5 -3",
            "create_scene siege",
        ]);
        assert_eq!(
            commands,
            vec![
                AdminCommand::CreateScene {
                    kind: SceneKind::War,
                    place: ScenePlacement::AnyRegion,
                },
                AdminCommand::CreateScene {
                    kind: SceneKind::Caravan,
                    place: ScenePlacement::Region("Britain".to_string()),
                },
                AdminCommand::CreateScene {
                    kind: SceneKind::War,
                    place: ScenePlacement::Point { x: 12.5, y: -3.0 },
                },
            ]
        );
        assert_eq!(
            output,
            vec![
                concat!(
                    "error: unknown scene kind 'siege' (expected war|caravan). ",
                    "usage: create_scene <kind> [region | x y]"
                )
            ]
        );
    }

    #[test]
    fn auto_scenes_toggle_parses() {
        let (commands, output) = run(&["auto_scenes", "auto_scenes OFF", "auto_scenes maybe"]);
        assert_eq!(
            commands,
            vec![
                AdminCommand::AutoScenes { enabled: None },
                AdminCommand::AutoScenes {
                    enabled: Some(false)
                },
            ]
        );
        assert_eq!(
            output,
            vec!["error: invalid toggle 'maybe' (expected on|off). usage: auto_scenes [on|off]"]
        );
    }

    #[test]
    fn tokenizer_handles_quotes_and_errors() {
        assert_eq!(
            tokenize_line("spawn crafter average \"Bandit Camp\"").expect("tokens"),
            vec!["spawn", "crafter", "average", "Bandit Camp"]
        );
        assert_eq!(tokenize_line("a \"\" b").expect("tokens"), vec!["a", "", "b"]);
        assert!(tokenize_line("spawn \"oops").is_err());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = AdminCommandRegistry::with_builtins();
        let result = registry.register("SAVE", "again", "", parse_save_command);
        assert_eq!(result, Err("duplicate command registration: SAVE".to_string()));
    }

    #[test]
    fn pending_lines_are_bounded() {
        let mut console = AdminConsole::new();
        for _ in 0..(MAX_PENDING_LINES + 5) {
            console.submit_line("save");
        }
        console.process_pending_lines();
        let mut commands = Vec::new();
        console.drain_pending_commands_into(&mut commands);
        assert_eq!(commands.len(), MAX_PENDING_LINES);
    }
}
