use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Heartbeat health over the last completed reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub tps: f32,
    pub heartbeat_time_ms: f32,
    pub worst_heartbeat_ms: f32,
    /// Heartbeats whose own run time exceeded one step.
    pub overruns: u32,
    /// Wall-clock time discarded because the loop fell too far behind.
    pub dropped_backlog_ms: u64,
    pub total_heartbeats: u64,
}

/// Latest published window, readable from the simulation side.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    latest: Arc<RwLock<Option<LoopMetricsSnapshot>>>,
}

impl MetricsHandle {
    /// `None` until the first window closes.
    pub fn latest(&self) -> Option<LoopMetricsSnapshot> {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, snapshot: LoopMetricsSnapshot) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

#[derive(Debug)]
pub(crate) struct MetricsWindow {
    opened_at: Instant,
    length: Duration,
    step: Duration,
    heartbeats: u32,
    busy: Duration,
    worst: Duration,
    overruns: u32,
    dropped: Duration,
    total_heartbeats: u64,
}

impl MetricsWindow {
    pub(crate) fn new(length: Duration, step: Duration, opened_at: Instant) -> Self {
        Self {
            opened_at,
            length,
            step,
            heartbeats: 0,
            busy: Duration::ZERO,
            worst: Duration::ZERO,
            overruns: 0,
            dropped: Duration::ZERO,
            total_heartbeats: 0,
        }
    }

    pub(crate) fn record_heartbeat(&mut self, took: Duration) {
        self.heartbeats = self.heartbeats.saturating_add(1);
        self.total_heartbeats = self.total_heartbeats.saturating_add(1);
        self.busy = self.busy.saturating_add(took);
        self.worst = self.worst.max(took);
        if took > self.step {
            self.overruns = self.overruns.saturating_add(1);
        }
    }

    pub(crate) fn record_dropped(&mut self, backlog: Duration) {
        self.dropped = self.dropped.saturating_add(backlog);
    }

    /// Closes the window once it has run its full length.
    pub(crate) fn close_if_due(&mut self, now: Instant) -> Option<LoopMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.opened_at);
        if elapsed < self.length {
            return None;
        }

        let average_ms = match self.heartbeats {
            0 => 0.0,
            count => self.busy.as_secs_f32() * 1000.0 / count as f32,
        };
        let snapshot = LoopMetricsSnapshot {
            tps: self.heartbeats as f32 / elapsed.as_secs_f32().max(f32::EPSILON),
            heartbeat_time_ms: average_ms,
            worst_heartbeat_ms: self.worst.as_secs_f32() * 1000.0,
            overruns: self.overruns,
            dropped_backlog_ms: self.dropped.as_millis() as u64,
            total_heartbeats: self.total_heartbeats,
        };

        *self = Self {
            total_heartbeats: self.total_heartbeats,
            ..Self::new(self.length, self.step, now)
        };
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(250);

    #[test]
    fn window_reports_rate_and_overruns() {
        let base = Instant::now();
        let mut window = MetricsWindow::new(Duration::from_secs(1), STEP, base);
        for took in [2, 6, 300, 4] {
            window.record_heartbeat(Duration::from_millis(took));
        }
        window.record_dropped(Duration::from_millis(750));

        let snapshot = window
            .close_if_due(base + Duration::from_secs(1))
            .expect("window closes");

        assert!((snapshot.tps - 4.0).abs() < 0.05);
        assert!((snapshot.heartbeat_time_ms - 78.0).abs() < 0.01);
        assert!((snapshot.worst_heartbeat_ms - 300.0).abs() < 0.01);
        assert_eq!(snapshot.overruns, 1);
        assert_eq!(snapshot.dropped_backlog_ms, 750);
    }

    #[test]
    fn window_stays_open_until_its_length_passes() {
        let base = Instant::now();
        let mut window = MetricsWindow::new(Duration::from_secs(1), STEP, base);
        window.record_heartbeat(Duration::from_millis(3));

        assert!(window.close_if_due(base + Duration::from_millis(500)).is_none());
    }

    #[test]
    fn closing_resets_the_window_but_keeps_the_running_total() {
        let base = Instant::now();
        let mut window = MetricsWindow::new(Duration::from_secs(1), STEP, base);
        window.record_heartbeat(Duration::from_millis(400));
        window.record_heartbeat(Duration::from_millis(1));
        window.close_if_due(base + Duration::from_secs(1)).expect("first");

        window.record_heartbeat(Duration::from_millis(1));
        let second = window
            .close_if_due(base + Duration::from_secs(2))
            .expect("second");

        assert_eq!(second.overruns, 0);
        assert_eq!(second.total_heartbeats, 3);
        assert!((second.worst_heartbeat_ms - 1.0).abs() < 0.01);
    }

    #[test]
    fn handle_is_empty_until_published() {
        let handle = MetricsHandle::default();
        assert_eq!(handle.latest(), None);

        let snapshot = LoopMetricsSnapshot {
            tps: 4.0,
            total_heartbeats: 12,
            ..LoopMetricsSnapshot::default()
        };
        handle.clone().publish(snapshot);
        assert_eq!(handle.latest(), Some(snapshot));
    }
}
