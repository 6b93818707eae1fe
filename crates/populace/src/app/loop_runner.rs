use std::process::ExitCode;

use engine::run_server_with_metrics;
use tracing::{error, info};

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        config,
        mut shard,
        metrics,
    } = app;
    match run_server_with_metrics(&config, &mut shard, &metrics) {
        Ok(summary) => {
            info!(
                heartbeats = summary.heartbeats,
                game_time_ms = summary.final_time.as_millis(),
                "server_stopped"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "server_failed");
            ExitCode::FAILURE
        }
    }
}
