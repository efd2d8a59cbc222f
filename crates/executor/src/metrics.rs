use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entity::EntityKind;

/// Executor operational counters, snapshotted by `Executor::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorMetrics {
    /// Executions by entity kind.
    pub executions: HashMap<EntityKind, u64>,
    /// Average execute duration by entity kind.
    pub avg_execute_duration: HashMap<EntityKind, Duration>,
    /// Failed executions (callback errors).
    pub failures: u64,
    pub last_execution: Option<DateTime<Utc>>,
    /// Wait set rebuilds, or event-map refreshes for the events executor.
    pub rebuilds: u64,
    pub waits: u64,
    pub wait_timeouts: u64,
}

impl ExecutorMetrics {
    /// Record one execution of an entity of `kind`.
    pub fn record_execution(&mut self, kind: EntityKind, duration: Duration, failed: bool) {
        let count = {
            let count = self.executions.entry(kind).or_default();
            *count += 1;
            *count
        };
        if failed {
            self.failures += 1;
        }
        self.last_execution = Some(Utc::now());

        let prev_avg = self
            .avg_execute_duration
            .get(&kind)
            .copied()
            .unwrap_or_default();

        // new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
        self.avg_execute_duration.insert(kind, new_avg);
    }

    pub fn record_wait(&mut self, timed_out: bool) {
        self.waits += 1;
        if timed_out {
            self.wait_timeouts += 1;
        }
    }

    pub fn record_rebuild(&mut self) {
        self.rebuilds += 1;
    }

    pub fn total_executions(&self) -> u64 {
        self.executions.values().sum()
    }
}
