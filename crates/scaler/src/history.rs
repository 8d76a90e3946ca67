//! Bounded metrics history and scale-event log

use crate::types::{MetricHistory, ScaleEvent};
use erpgate_pool::PoolMetrics;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Metric samples older than this are discarded; scaling windows may not exceed it
pub const HISTORY_RETENTION: Duration = Duration::from_secs(3600);

/// Scale events kept per autoscaler
pub const MAX_SCALE_EVENTS: usize = 100;

/// Result of testing a predicate over a trailing window
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Sustained {
    pub met: bool,
    pub span: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsWindow {
    samples: VecDeque<MetricHistory>,
}

impl MetricsWindow {
    pub fn push(&mut self, metrics: PoolMetrics, now: Instant) {
        self.samples.push_back(MetricHistory {
            recorded_at: now,
            metrics,
        });
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(HISTORY_RETENTION) else {
            return;
        };
        // Keep the newest sample at or before the cutoff so a full-length window stays covered
        while self.samples.get(1).is_some_and(|s| s.recorded_at <= cutoff) {
            self.samples.pop_front();
        }
    }

    /// The predicate holds for every sample recorded in `[now - window, now]`,
    /// and the history reaches back to the start of that window.
    pub fn sustained<F>(&self, window: Duration, now: Instant, predicate: F) -> Sustained
    where
        F: Fn(&PoolMetrics) -> bool,
    {
        let not_met = Sustained {
            met: false,
            span: Duration::ZERO,
        };
        let Some(start) = now.checked_sub(window) else {
            return not_met;
        };

        let in_window: Vec<&MetricHistory> = self
            .samples
            .iter()
            .filter(|s| s.recorded_at >= start)
            .collect();
        let (Some(first), Some(last)) = (in_window.first(), in_window.last()) else {
            return not_met;
        };

        let span = last.recorded_at.saturating_duration_since(first.recorded_at);
        let covered = self.samples.front().is_some_and(|s| s.recorded_at <= start);
        Sustained {
            met: covered && in_window.iter().all(|s| predicate(&s.metrics)),
            span,
        }
    }

    pub fn latest(&self) -> Option<&PoolMetrics> {
        self.samples.back().map(|s| &s.metrics)
    }

    pub fn snapshot(&self) -> Vec<MetricHistory> {
        self.samples.iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Debug, Default)]
pub(crate) struct EventLog {
    events: VecDeque<ScaleEvent>,
}

impl EventLog {
    pub fn push(&mut self, event: ScaleEvent) {
        if self.events.len() == MAX_SCALE_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ScaleEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&ScaleEvent> {
        self.events.back()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScaleAction;

    fn metrics(active: usize) -> PoolMetrics {
        PoolMetrics::from_counts(10, active, 0, 0.0)
    }

    fn busy(m: &PoolMetrics) -> bool {
        m.utilization > 0.85
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_requires_full_window() {
        let mut window = MetricsWindow::default();
        window.push(metrics(9), Instant::now());
        assert!(!window.sustained(Duration::from_secs(60), Instant::now(), busy).met);

        tokio::time::advance(Duration::from_secs(30)).await;
        window.push(metrics(9), Instant::now());
        assert!(!window.sustained(Duration::from_secs(60), Instant::now(), busy).met);

        tokio::time::advance(Duration::from_secs(30)).await;
        window.push(metrics(9), Instant::now());
        let result = window.sustained(Duration::from_secs(60), Instant::now(), busy);
        assert!(result.met);
        assert_eq!(result.span, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_bad_sample_breaks_the_window() {
        let mut window = MetricsWindow::default();
        for active in [9, 9, 3, 9, 9] {
            window.push(metrics(active), Instant::now());
            tokio::time::advance(Duration::from_secs(15)).await;
        }
        // Samples at 0,15,30,45,60s; now = 75s, window covers 15..75
        assert!(!window.sustained(Duration::from_secs(60), Instant::now(), busy).met);
        // Window 40..75 excludes the dip at 30s
        assert!(window.sustained(Duration::from_secs(35), Instant::now(), busy).met);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_pruned_to_retention() {
        let mut window = MetricsWindow::default();
        window.push(metrics(1), Instant::now());
        tokio::time::advance(Duration::from_secs(10)).await;
        window.push(metrics(2), Instant::now());
        tokio::time::advance(HISTORY_RETENTION).await;
        window.push(metrics(3), Instant::now());

        // The sample exactly at the cutoff survives as the window boundary
        assert_eq!(window.len(), 2);
        assert_eq!(window.snapshot()[0].metrics.active_connections, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_retention_window_can_be_sustained() {
        let mut window = MetricsWindow::default();
        for _ in 0..62 {
            window.push(metrics(9), Instant::now());
            tokio::time::advance(Duration::from_secs(61)).await;
        }
        window.push(metrics(9), Instant::now());
        assert!(window.sustained(HISTORY_RETENTION, Instant::now(), busy).met);
    }

    #[test]
    fn test_event_log_is_capped() {
        let mut log = EventLog::default();
        for i in 0..(MAX_SCALE_EVENTS + 5) {
            log.push(ScaleEvent {
                connection_id: "erp".into(),
                action: ScaleAction::Up,
                old_size: i,
                new_size: i + 1,
                reason: "test".into(),
                metrics: PoolMetrics::empty(),
                timestamp: chrono::Utc::now(),
                success: true,
                error: None,
            });
        }
        assert_eq!(log.len(), MAX_SCALE_EVENTS);
        let recent = log.recent(3);
        assert_eq!(recent.iter().map(|e| e.old_size).collect::<Vec<_>>(), vec![102, 103, 104]);
        assert_eq!(log.last().unwrap().old_size, 104);
    }
}
