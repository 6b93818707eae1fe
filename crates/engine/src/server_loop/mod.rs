//! Headless fixed-step heartbeat loop.
//!
//! Wall-clock time is accumulated and converted into whole heartbeats of
//! `1 / target_tps` seconds. Each heartbeat advances [`GameTime`] by exactly one
//! step, so a simulation observes a steady clock even when the host stalls; a
//! stall longer than `max_ticks_per_frame` heartbeats is dropped and logged.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::time::GameTime;

mod metrics;

use metrics::MetricsWindow;
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    /// Stops the loop after this many heartbeats; `None` runs until the
    /// simulation asks for shutdown.
    pub max_heartbeats: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 4,
            max_frame_delta: Duration::from_secs(1),
            max_ticks_per_frame: 8,
            metrics_log_interval: Duration::from_secs(30),
            max_heartbeats: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    Continue,
    Shutdown,
}

/// Anything the loop can drive one heartbeat at a time.
pub trait Simulation {
    fn start(&mut self, now: GameTime);
    fn heartbeat(&mut self, now: GameTime) -> LoopCommand;
    fn stop(&mut self, now: GameTime);
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("target ticks per second must be at most {max}, got {got}")]
    TickRateTooHigh { max: u32, got: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub heartbeats: u64,
    pub final_time: GameTime,
}

const MAX_TARGET_TPS: u32 = 1000;

pub fn run_server(
    config: &LoopConfig,
    simulation: &mut dyn Simulation,
) -> Result<LoopSummary, LoopError> {
    run_server_with_metrics(config, simulation, &MetricsHandle::default())
}

pub fn run_server_with_metrics(
    config: &LoopConfig,
    simulation: &mut dyn Simulation,
    metrics_handle: &MetricsHandle,
) -> Result<LoopSummary, LoopError> {
    let target_tps = config.target_tps.max(1);
    if target_tps > MAX_TARGET_TPS {
        return Err(LoopError::TickRateTooHigh {
            max: MAX_TARGET_TPS,
            got: target_tps,
        });
    }
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_secs(1));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(30));
    let fixed_dt = Duration::from_millis(u64::from(1000 / target_tps).max(1));

    info!(
        target_tps,
        heartbeat_ms = fixed_dt.as_millis() as u64,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        "loop_config"
    );

    let mut now = GameTime::ZERO;
    let mut heartbeats = 0u64;
    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut metrics_window = MetricsWindow::new(metrics_log_interval, fixed_dt, last_frame_instant);
    simulation.start(now);

    'outer: loop {
        let frame_start = Instant::now();
        let raw_frame_dt = frame_start.saturating_duration_since(last_frame_instant);
        last_frame_instant = frame_start;
        accumulator = accumulator.saturating_add(clamp_frame_delta(raw_frame_dt, max_frame_delta));

        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        for _ in 0..step_plan.ticks_to_run {
            now = now.saturating_add(fixed_dt);
            let heartbeat_start = Instant::now();
            let command = simulation.heartbeat(now);
            metrics_window.record_heartbeat(heartbeat_start.elapsed());
            heartbeats = heartbeats.saturating_add(1);

            let budget_spent = config
                .max_heartbeats
                .is_some_and(|limit| heartbeats >= limit);
            if command == LoopCommand::Shutdown || budget_spent {
                info!(
                    heartbeats,
                    reason = if budget_spent { "heartbeat_budget" } else { "requested" },
                    "shutdown_requested"
                );
                break 'outer;
            }
        }
        accumulator = step_plan.remaining_accumulator;

        if step_plan.dropped_backlog > Duration::ZERO {
            metrics_window.record_dropped(step_plan.dropped_backlog);
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "sim_clamp_triggered"
            );
        }

        if let Some(snapshot) = metrics_window.close_if_due(Instant::now()) {
            metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                heartbeat_time_ms = snapshot.heartbeat_time_ms,
                worst_heartbeat_ms = snapshot.worst_heartbeat_ms,
                overruns = snapshot.overruns,
                dropped_backlog_ms = snapshot.dropped_backlog_ms,
                game_time_ms = now.as_millis(),
                "loop_metrics"
            );
        }

        let sleep = fixed_dt.saturating_sub(accumulator);
        if sleep > Duration::ZERO {
            thread::sleep(sleep);
        }
    }

    simulation.stop(now);
    info!(heartbeats, game_time_ms = now.as_millis(), "shutdown");
    Ok(LoopSummary {
        heartbeats,
        final_time: now,
    })
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        started: bool,
        stopped_at: Option<GameTime>,
        seen: Vec<GameTime>,
        shutdown_after: Option<usize>,
    }

    impl Simulation for Recorder {
        fn start(&mut self, _now: GameTime) {
            self.started = true;
        }

        fn heartbeat(&mut self, now: GameTime) -> LoopCommand {
            self.seen.push(now);
            if self.shutdown_after == Some(self.seen.len()) {
                LoopCommand::Shutdown
            } else {
                LoopCommand::Continue
            }
        }

        fn stop(&mut self, now: GameTime) {
            self.stopped_at = Some(now);
        }
    }

    fn fast_config() -> LoopConfig {
        LoopConfig {
            target_tps: 500,
            max_heartbeats: Some(5),
            ..LoopConfig::default()
        }
    }

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);
        assert_eq!(
            clamp_frame_delta(Duration::from_millis(600), max_frame_delta),
            max_frame_delta
        );
    }

    #[test]
    fn plan_sim_steps_runs_expected_ticks_without_drop() {
        let result = plan_sim_steps(Duration::from_millis(750), Duration::from_millis(250), 5);

        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_sim_steps_drops_backlog_when_tick_cap_hit() {
        let result = plan_sim_steps(Duration::from_millis(1100), Duration::from_millis(250), 2);

        assert_eq!(result.ticks_to_run, 2);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::from_millis(600));
    }

    #[test]
    fn game_time_advances_one_step_per_heartbeat() {
        let mut recorder = Recorder::default();
        let summary = run_server(&fast_config(), &mut recorder).expect("loop");

        assert!(recorder.started);
        assert_eq!(summary.heartbeats, 5);
        assert_eq!(summary.final_time, GameTime::from_millis(10));
        assert_eq!(recorder.stopped_at, Some(summary.final_time));
        let steps: Vec<u64> = recorder.seen.iter().map(|t| t.as_millis()).collect();
        assert_eq!(steps, vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn simulation_can_request_shutdown() {
        let mut recorder = Recorder {
            shutdown_after: Some(2),
            ..Recorder::default()
        };
        let summary = run_server(&fast_config(), &mut recorder).expect("loop");
        assert_eq!(summary.heartbeats, 2);
    }

    #[test]
    fn rejects_tick_rates_finer_than_a_millisecond() {
        let config = LoopConfig {
            target_tps: 5000,
            ..LoopConfig::default()
        };
        let mut recorder = Recorder::default();
        assert!(matches!(
            run_server(&config, &mut recorder),
            Err(LoopError::TickRateTooHigh { .. })
        ));
    }
}
