//! Composition root driven by the server loop.
//!
//! One heartbeat runs, in order: operator commands, due tasks (director
//! ticks, deferred speech), scene updates, one think step per agent in
//! ascending id order, world resolution, then the purge of deleted bodies.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use engine::config::{ConfigSnapshot, ConfigStore, ReloadOutcome};
use engine::world::{EntityId, MapId, Vec2, World};
use engine::{
    GameTime, LoopCommand, MetricsHandle, RegionProfile, Simulation, TaskHandle, TaskQueue,
};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use crate::admin::{AdminCommand, AdminConsole, ScenePlacement};
use crate::brain::{Brains, ThinkContext, ThinkOutcome};
use crate::director::{Director, DirectorError, PopulationContext, TickReport};
use crate::persistence::{self, PersistenceError};
use crate::persona::Persona;
use crate::scene::{DeferredSpeech, SceneId, SceneSummary};
use crate::spawn::find_spawn_point;

#[derive(Debug, Clone, Default)]
pub struct ShardOptions {
    pub seed: u64,
    /// Snapshot file restored on start and written on stop and `save`.
    pub snapshot_path: Option<PathBuf>,
    /// Operator replies are echoed to stdout.
    pub echo_console: bool,
}

pub struct Shard {
    world: World,
    director: Director,
    brains: Brains,
    tasks: TaskQueue<Shard>,
    rng: SmallRng,
    config: ConfigStore,
    speech: Vec<DeferredSpeech>,
    console: AdminConsole,
    admin_input: Option<Receiver<String>>,
    metrics: Option<MetricsHandle>,
    options: ShardOptions,
    now: GameTime,
    next_scene_update_at: GameTime,
    director_task: Option<TaskHandle>,
    director_interval: Duration,
    last_tick: Option<TickReport>,
    heartbeats: u64,
    quit_requested: bool,
}

impl Shard {
    pub fn new(world: World, config: ConfigStore, options: ShardOptions) -> Self {
        let snapshot = config.snapshot();
        Self {
            world,
            director: Director::new(snapshot.behavior.auto_scenes),
            brains: Brains::default(),
            tasks: TaskQueue::new(),
            rng: SmallRng::seed_from_u64(options.seed),
            config,
            speech: Vec::new(),
            console: AdminConsole::new(),
            admin_input: None,
            metrics: None,
            options,
            now: GameTime::ZERO,
            next_scene_update_at: GameTime::ZERO,
            director_task: None,
            director_interval: snapshot.behavior.tick_interval,
            last_tick: None,
            heartbeats: 0,
            quit_requested: false,
        }
    }

    pub fn attach_console(&mut self, input: Receiver<String>) {
        self.admin_input = Some(input);
    }

    /// Loop health shown at the end of `status`.
    pub fn attach_metrics(&mut self, handle: MetricsHandle) {
        self.metrics = Some(handle);
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn director(&self) -> &Director {
        &self.director
    }

    pub fn brains(&self) -> &Brains {
        &self.brains
    }

    pub fn now(&self) -> GameTime {
        self.now
    }

    pub fn config(&self) -> Arc<ConfigSnapshot> {
        self.config.snapshot()
    }

    pub fn last_tick(&self) -> Option<&TickReport> {
        self.last_tick.as_ref()
    }

    pub fn active_scenes(&self) -> Vec<SceneSummary> {
        self.director.active_scenes(self.now)
    }

    /// Parses and executes one operator line immediately.
    pub fn run_admin_line(&mut self, line: &str) -> Vec<String> {
        self.console.submit_line(line);
        self.process_console();
        let mut output = Vec::new();
        self.console.drain_output_into(&mut output);
        output
    }

    /// Runs one director pass now, outside the regular schedule.
    pub fn run_director_tick(&mut self) -> TickReport {
        let report = self.with_population(|director, ctx| director.tick(ctx));
        if self.config.snapshot().behavior.verbose_logging {
            info!(
                pruned = report.pruned,
                trimmed = report.trimmed,
                spawned = report.spawned(),
                at_cap = report.at_cap,
                registered = self.director.registry().len(),
                "director_tick_summary"
            );
        }
        self.last_tick = Some(report.clone());
        report
    }

    fn with_population<R>(
        &mut self,
        run: impl FnOnce(&mut Director, &mut PopulationContext<'_>) -> R,
    ) -> R {
        let config = self.config.snapshot();
        self.world.advance_clock(self.now);
        let mut ctx = PopulationContext {
            world: &mut self.world,
            brains: &mut self.brains,
            rng: &mut self.rng,
            config: &config,
            now: self.now,
            speech: &mut self.speech,
        };
        run(&mut self.director, &mut ctx)
    }

    fn schedule_director(&mut self, first_at: GameTime) {
        if let Some(handle) = self.director_task.take() {
            self.tasks.cancel(handle);
        }
        let interval = self.config.snapshot().behavior.tick_interval;
        self.director_interval = interval;
        let handle = self.tasks.schedule_repeating(
            first_at,
            interval,
            "director_tick",
            |shard: &mut Shard| {
                shard.run_director_tick();
            },
        );
        self.director_task = Some(handle);
    }

    fn run_due_tasks(&mut self) {
        while let Some(due) = self.tasks.pop_due(self.now) {
            trace!(task = due.label(), "task_due");
            if let Some(rearm) = due.run(self) {
                self.tasks.rearm(rearm);
            }
        }
    }

    fn queue_deferred_speech(&mut self) {
        for line in self.speech.drain(..) {
            let DeferredSpeech { at, speaker, text } = line;
            self.tasks
                .schedule_at(at, "deferred_speech", move |shard: &mut Shard| {
                    shard.world.say(speaker, text);
                });
        }
    }

    fn update_scenes(&mut self) {
        if !self.now.has_reached(self.next_scene_update_at) {
            return;
        }
        let interval = self.config.snapshot().behavior.scene_tick_interval;
        self.next_scene_update_at = self.now + interval;
        let removed = self.with_population(|director, ctx| director.update_scenes(ctx));
        if removed > 0 {
            debug!(removed, "scenes_completed");
        }
    }

    fn think_all(&mut self) {
        let config = self.config.snapshot();
        let verbose = config.behavior.verbose_logging;
        for id in self.brains.ids() {
            let Some(brain) = self.brains.get_mut(id) else {
                continue;
            };
            let mut ctx = ThinkContext {
                world: &mut self.world,
                agents: self.director.registry(),
                behavior: &config.behavior,
                rng: &mut self.rng,
                now: self.now,
            };
            let outcome = brain.think(id, &mut ctx);
            if verbose && !matches!(outcome, ThinkOutcome::Inactive | ThinkOutcome::Idle) {
                debug!(entity = id.0, outcome = ?outcome, "agent_decision");
            }
        }
    }

    fn pump_admin_input(&mut self) {
        let Some(input) = &self.admin_input else {
            return;
        };
        let mut disconnected = false;
        let mut lines = Vec::new();
        loop {
            match input.try_recv() {
                Ok(line) => lines.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        if disconnected {
            debug!("admin_input_closed");
            self.admin_input = None;
        }
        for line in lines {
            self.console.submit_line(line);
        }
        self.process_console();
        if self.options.echo_console {
            let mut output = Vec::new();
            self.console.drain_output_into(&mut output);
            let mut stdout = io::stdout().lock();
            for line in output {
                let _ = writeln!(stdout, "{line}");
            }
        }
    }

    fn process_console(&mut self) {
        self.console.process_pending_lines();
        let mut commands = Vec::new();
        self.console.drain_pending_commands_into(&mut commands);
        for command in commands {
            info!(command = ?command, "admin_command");
            for line in self.execute_admin(command) {
                self.console.append_output_line(line);
            }
        }
    }

    fn execute_admin(&mut self, command: AdminCommand) -> Vec<String> {
        match command {
            AdminCommand::Status => self.status_lines(),
            AdminCommand::Scenes => {
                let scenes = self.active_scenes();
                if scenes.is_empty() {
                    return vec!["no active scenes".to_string()];
                }
                scenes.iter().map(scene_line).collect()
            }
            AdminCommand::Scene { id } => self.scene_detail(id),
            AdminCommand::Spawn {
                profile,
                tier,
                region,
            } => vec![self.admin_spawn(profile, tier, region)],
            AdminCommand::Delete { entity_id } => {
                let id = EntityId(entity_id);
                if self.with_population(|director, ctx| director.delete_agent(ctx, id)) {
                    vec![format!("deleted agent #{entity_id}")]
                } else {
                    vec![format!("error: agent {entity_id} not found")]
                }
            }
            AdminCommand::EndScene { id } => {
                match self.with_population(|director, ctx| director.end_scene(ctx, id)) {
                    Ok(()) => vec![format!("scene {id} ended")],
                    Err(error) => vec![format!("error ending scene: {error}")],
                }
            }
            AdminCommand::CreateScene { kind, place } => {
                let Some((map, center)) = self.scene_location(&place) else {
                    return vec!["error: no spawn location found".to_string()];
                };
                match self.with_population(|director, ctx| {
                    director.create_scene(ctx, kind, map, center)
                }) {
                    Ok(id) => vec![format!(
                        "created scene #{id} ({}) at ({:.1}, {:.1})",
                        kind.label(),
                        center.x,
                        center.y
                    )],
                    Err(error) => vec![format!("error creating scene: {error}")],
                }
            }
            AdminCommand::AutoScenes { enabled } => {
                if let Some(enabled) = enabled {
                    self.director.set_auto_scenes(enabled);
                }
                let state = if self.director.auto_scenes() { "on" } else { "off" };
                vec![format!("auto scenes: {state}")]
            }
            AdminCommand::RegisterMissing => {
                let adopted = self.with_population(|director, ctx| director.register_missing(ctx));
                vec![format!("registered {adopted} missing agents")]
            }
            AdminCommand::Reload => vec![self.reload_config()],
            AdminCommand::Save => match self.save_snapshot() {
                Ok(Some(line)) => vec![line],
                Ok(None) => vec!["error: no snapshot path configured".to_string()],
                Err(error) => vec![format!("error: {error}")],
            },
            AdminCommand::Quit => {
                self.quit_requested = true;
                vec!["shutting down".to_string()]
            }
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let config = self.config.snapshot();
        let registered = self.director.registry().len();
        let live = self.director.live_count(&self.world);
        let bodies = self
            .world
            .mobiles()
            .filter(|mobile| mobile.kind == engine::MobileKind::Agent)
            .count();
        let mut lines = vec![
            format!(
                "agents: {registered} registered, {live} live, {bodies} agent bodies in world, cap {cap}",
                cap = config.behavior.global_cap
            ),
            format!(
                "scenes: {} active, auto scenes {}",
                self.active_scenes().len(),
                if self.director.auto_scenes() { "on" } else { "off" }
            ),
            format!(
                "time: {:.1}s, {} heartbeats",
                self.now.as_millis() as f64 / 1000.0,
                self.heartbeats
            ),
        ];
        for region in &config.regions {
            let count = self.director.count_in_region(&self.world, region);
            let suffix = if region.active { "" } else { " (inactive)" };
            lines.push(format!(
                "region {}: {count} agents, min {} max {}{suffix}",
                region.name, region.min, region.max
            ));
        }
        if let Some(metrics) = self.metrics.as_ref().and_then(MetricsHandle::latest) {
            lines.push(format!(
                "loop: {:.1} tps, avg {:.2}ms, worst {:.2}ms, {} overruns, {}ms dropped",
                metrics.tps,
                metrics.heartbeat_time_ms,
                metrics.worst_heartbeat_ms,
                metrics.overruns,
                metrics.dropped_backlog_ms
            ));
        }
        lines
    }

    fn scene_detail(&self, id: SceneId) -> Vec<String> {
        let Some(handle) = self.director.scene(id) else {
            return vec![format!("error: scene {id} not found")];
        };
        let summary = handle.summary(self.now);
        let mut lines = vec![scene_line(&summary)];
        lines.push(format!(
            "center ({:.1}, {:.1}) on map {}",
            summary.center.x, summary.center.y, summary.map.0
        ));
        let members: Vec<String> = handle
            .core()
            .participants()
            .iter()
            .map(|member| format!("#{}", member.0))
            .collect();
        lines.push(format!("participants: {}", members.join(" ")));
        lines
    }

    fn admin_spawn(
        &mut self,
        profile: Option<crate::persona::Profile>,
        tier: Option<crate::persona::ExperienceTier>,
        region: Option<String>,
    ) -> String {
        let config = self.config.snapshot();
        let region = match region {
            Some(name) => match config.region(&name) {
                Some(region) => region.clone(),
                None => return format!("error: unknown region '{name}'"),
            },
            None => {
                let active: Vec<&RegionProfile> = config.active_regions().collect();
                match active.choose(&mut self.rng) {
                    Some(region) => (*region).clone(),
                    None => return "error: no active regions".to_string(),
                }
            }
        };
        let rolled = Persona::random_for_region(region.safety, &mut self.rng);
        let persona = Persona::new(
            profile.unwrap_or(rolled.profile),
            tier.unwrap_or(rolled.tier),
        );
        let spawned = self
            .with_population(|director, ctx| director.spawn_in_region(ctx, &region, persona));
        match spawned {
            Ok(id) => format!("spawned {} #{} in {}", persona.label(), id.0, region.name),
            Err(DirectorError::NoSpawnLocation) => "error: no spawn location found".to_string(),
            Err(error) => format!("error: {error}"),
        }
    }

    fn scene_location(&mut self, place: &ScenePlacement) -> Option<(MapId, Vec2)> {
        let config = self.config.snapshot();
        let attempts = config.behavior.spawn_attempts;
        let region = match place {
            ScenePlacement::Point { x, y } => {
                let point = Vec2::new(*x, *y);
                let map = config
                    .regions
                    .iter()
                    .find(|region| region.bounds.contains(point))
                    .map(|region| region.map)
                    .unwrap_or_default();
                return Some((map, point));
            }
            ScenePlacement::Region(name) => config.region(name)?.clone(),
            ScenePlacement::AnyRegion => {
                let active: Vec<&RegionProfile> = config.active_regions().collect();
                (*active.choose(&mut self.rng)?).clone()
            }
        };
        let center = find_spawn_point(
            &self.world,
            &mut self.rng,
            region.map,
            region.bounds,
            attempts,
        )?;
        Some((region.map, center))
    }

    fn reload_config(&mut self) -> String {
        match self.config.reload() {
            ReloadOutcome::Unchanged => "config unchanged".to_string(),
            ReloadOutcome::Reloaded {
                region_count,
                diagnostics,
            } => {
                let interval = self.config.snapshot().behavior.tick_interval;
                if interval != self.director_interval {
                    self.schedule_director(self.now + interval);
                }
                format!(
                    "config reloaded: {region_count} regions, {} diagnostics",
                    diagnostics.len()
                )
            }
            ReloadOutcome::Failed(error) => format!("error: reload failed: {error}"),
        }
    }

    /// Writes a snapshot when a path is configured.
    pub fn save_snapshot(&mut self) -> Result<Option<String>, PersistenceError> {
        let Some(path) = self.options.snapshot_path.clone() else {
            return Ok(None);
        };
        let snapshot = persistence::capture(&self.director, &self.world, self.now);
        persistence::save(&path, &snapshot)?;
        Ok(Some(format!(
            "saved {} agents and {} scenes to {}",
            snapshot.agents.len(),
            snapshot.scenes.len(),
            path.display()
        )))
    }

    fn restore_snapshot(&mut self) {
        let Some(path) = self.options.snapshot_path.clone() else {
            return;
        };
        if !path.exists() {
            info!(path = %path.display(), "snapshot_absent");
            return;
        }
        let snapshot = match persistence::load(&path) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    component = "persistence",
                    path = %path.display(),
                    error = %error,
                    "snapshot_load_failed"
                );
                return;
            }
        };
        let result =
            self.with_population(|director, ctx| persistence::restore(snapshot, director, ctx));
        if let Err(error) = result {
            warn!(
                component = "persistence",
                path = %path.display(),
                error = %error,
                "snapshot_restore_failed"
            );
        }
    }
}

impl Simulation for Shard {
    fn start(&mut self, now: GameTime) {
        self.now = now;
        self.world.advance_clock(now);
        self.restore_snapshot();
        let startup_delay = self.config.snapshot().behavior.startup_delay;
        self.schedule_director(now + startup_delay);
        self.next_scene_update_at = now;
        info!(
            regions = self.config.snapshot().regions.len(),
            agents = self.director.registry().len(),
            startup_delay_ms = startup_delay.as_millis() as u64,
            "shard_started"
        );
    }

    fn heartbeat(&mut self, now: GameTime) -> LoopCommand {
        self.now = now;
        self.heartbeats = self.heartbeats.saturating_add(1);
        self.world.advance_clock(now);

        self.pump_admin_input();
        self.run_due_tasks();
        self.update_scenes();
        self.queue_deferred_speech();
        self.think_all();
        self.world.tick(now);
        self.world.purge_deleted();

        if self.quit_requested {
            LoopCommand::Shutdown
        } else {
            LoopCommand::Continue
        }
    }

    fn stop(&mut self, now: GameTime) {
        self.now = now;
        match self.save_snapshot() {
            Ok(Some(line)) => info!(summary = %line, "shutdown_snapshot"),
            Ok(None) => {}
            Err(error) => warn!(
                component = "persistence",
                error = %error,
                "shutdown_snapshot_failed"
            ),
        }
        info!(
            heartbeats = self.heartbeats,
            agents = self.director.registry().len(),
            "shard_stopped"
        );
    }
}

fn scene_line(summary: &SceneSummary) -> String {
    format!(
        "#{} {} '{}' {} participants={} elapsed={}s/{}s",
        summary.id,
        summary.kind.label(),
        summary.name,
        summary.state.label(),
        summary.participants,
        summary.elapsed.as_secs(),
        summary.duration.as_secs()
    )
}
