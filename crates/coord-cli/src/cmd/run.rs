//! `coord run`: keeps RUNNING jobs materialized and re-checks WAITING
//! actions on an exponential backoff until interrupted.

use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use coord_core::action::ActionId;
use coord_core::config::{BackoffConfig, Config};
use coord_core::input_check::CheckOutcome;
use coord_core::{CoordError, Coordinator};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

pub fn run(root: &Path, once: bool, json: bool) -> anyhow::Result<()> {
    let cfg = Config::load(root).context("failed to load config.yaml")?;
    let coord = super::open(root)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        let mut queue = RecheckQueue::new(cfg.backoff.clone());
        if once {
            let summary = pass(&coord, &cfg, &mut queue).await?;
            return report(&summary, json);
        }

        tracing::info!(tick_seconds = cfg.tick_seconds, "driver started");
        let tick = Duration::from_secs(cfg.tick_seconds.max(1));
        loop {
            match pass(&coord, &cfg, &mut queue).await {
                Ok(summary) => tracing::debug!(?summary, pending = queue.len(), "pass complete"),
                Err(e) => tracing::warn!(error = %e, "pass failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("driver stopped");
                    return Ok(());
                }
            }
        }
    })
}

fn report(summary: &PassSummary, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(summary);
    }
    println!(
        "materialized {}, checked {}: {} ready, {} timed out, {} still waiting, {} failed",
        summary.materialized,
        summary.checked,
        summary.ready,
        summary.timed_out,
        summary.waiting,
        summary.failed
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// One pass
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
struct PassSummary {
    materialized: usize,
    checked: usize,
    ready: usize,
    timed_out: usize,
    waiting: usize,
    failed: usize,
}

/// Materialize and admit for every live job, then run every due input check.
async fn pass(coord: &Coordinator, cfg: &Config, queue: &mut RecheckQueue) -> anyhow::Result<PassSummary> {
    let lookahead = chrono::Duration::minutes(cfg.lookahead_minutes as i64);
    let c = coord.clone();
    let (materialized, waiting) = tokio::task::spawn_blocking(move || {
        let now = Utc::now();
        let mut materialized = 0;
        for job in c.jobs()? {
            if job.status.is_terminal() {
                continue;
            }
            match c.materialize_due(&job.id, lookahead, now) {
                Ok(created) => materialized += created.len(),
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "materialization failed"),
            }
            // Picks up READY actions whose admission was deferred.
            if let Err(e) = c.admit(&job.id, now) {
                tracing::warn!(job_id = %job.id, error = %e, "admission failed");
            }
        }
        Ok::<_, coord_core::CoordError>((materialized, c.waiting_actions()?))
    })
    .await
    .context("materialization task panicked")??;

    let mut summary = PassSummary {
        materialized,
        ..Default::default()
    };
    queue.sync(waiting, Instant::now());

    let limit = cfg.max_parallel_checks.max(1);
    loop {
        let due = queue.take_due(Instant::now(), limit);
        if due.is_empty() {
            break;
        }
        let mut tasks = JoinSet::new();
        for id in due {
            let c = coord.clone();
            tasks.spawn_blocking(move || {
                let result = c.check_inputs(&id, Utc::now());
                (id, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let (id, result) = joined.context("input check task panicked")?;
            summary.checked += 1;
            match result {
                Ok(CheckOutcome::Waiting { .. }) => {
                    summary.waiting += 1;
                    queue.back_off(&id, Instant::now());
                }
                Ok(CheckOutcome::Ready { .. }) => {
                    summary.ready += 1;
                    queue.forget(&id);
                }
                Ok(CheckOutcome::TimedOut) => {
                    summary.timed_out += 1;
                    queue.forget(&id);
                }
                // Re-added on the next pass if it is still WAITING.
                Ok(CheckOutcome::Skipped { .. } | CheckOutcome::Superseded) => queue.forget(&id),
                Err(e) => {
                    summary.failed += 1;
                    queue.record_failure(&id, &e, Instant::now());
                }
            }
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// RecheckQueue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    attempt: u32,
    due: Instant,
}

/// When each WAITING action is next checked. New actions are due at once;
/// each unsuccessful check pushes the next one out per the backoff.
#[derive(Debug)]
struct RecheckQueue {
    backoff: BackoffConfig,
    entries: HashMap<ActionId, Entry>,
    abandoned: HashSet<ActionId>,
}

impl RecheckQueue {
    fn new(backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            entries: HashMap::new(),
            abandoned: HashSet::new(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Track exactly the actions in `waiting`.
    fn sync(&mut self, waiting: Vec<ActionId>, now: Instant) {
        let mut next: HashMap<ActionId, Entry> = HashMap::with_capacity(waiting.len());
        self.abandoned.retain(|id| waiting.contains(id));
        for id in waiting {
            if self.abandoned.contains(&id) {
                continue;
            }
            let entry = self
                .entries
                .remove(&id)
                .unwrap_or(Entry { attempt: 0, due: now });
            next.insert(id, entry);
        }
        self.entries = next;
    }

    /// Up to `limit` actions due at `now`, earliest first. They stay queued
    /// until backed off or forgotten, but are not handed out twice.
    fn take_due(&mut self, now: Instant, limit: usize) -> Vec<ActionId> {
        let mut due: Vec<(&ActionId, &Entry)> =
            self.entries.iter().filter(|(_, e)| e.due <= now).collect();
        due.sort_by(|a, b| a.1.due.cmp(&b.1.due).then_with(|| a.0.cmp(b.0)));
        let ids: Vec<ActionId> = due.into_iter().take(limit).map(|(id, _)| id.clone()).collect();
        // In flight: park far enough out that the next call skips them.
        let parked = now + Duration::from_secs(self.backoff.max_seconds.max(1));
        for id in &ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.due = parked;
            }
        }
        ids
    }

    fn back_off(&mut self, id: &ActionId, now: Instant) {
        let entry = self.entries.entry(id.clone()).or_insert(Entry { attempt: 0, due: now });
        entry.due = now + self.backoff.delay(entry.attempt);
        entry.attempt = entry.attempt.saturating_add(1);
    }

    fn forget(&mut self, id: &ActionId) {
        self.entries.remove(id);
    }

    /// Store trouble is backed off and retried. Anything else is a defect in
    /// the job definition that no retry can fix; the action is dropped and
    /// not picked up again while this driver runs.
    fn record_failure(&mut self, id: &ActionId, error: &CoordError, now: Instant) {
        if error.is_retryable() {
            tracing::warn!(action_id = %id, error = %error, "input check failed, will retry");
            self.back_off(id, now);
        } else {
            tracing::error!(action_id = %id, error = %error, "input check cannot succeed, action dropped");
            self.forget(id);
            self.abandoned.insert(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> RecheckQueue {
        RecheckQueue::new(BackoffConfig {
            initial_seconds: 10,
            multiplier: 2.0,
            max_seconds: 100,
        })
    }

    fn id(n: u64) -> ActionId {
        ActionId::new("job", n)
    }

    #[test]
    fn new_actions_are_due_immediately() {
        let mut q = queue();
        let now = Instant::now();
        q.sync(vec![id(2), id(1)], now);
        assert_eq!(q.take_due(now, 10), vec![id(1), id(2)]);
        assert!(q.take_due(now, 10).is_empty(), "in-flight actions are not handed out twice");
    }

    #[test]
    fn limit_applies() {
        let mut q = queue();
        let now = Instant::now();
        q.sync((1..=5).map(id).collect(), now);
        assert_eq!(q.take_due(now, 2).len(), 2);
        assert_eq!(q.take_due(now, 10).len(), 3);
    }

    #[test]
    fn backoff_grows_per_attempt() {
        let mut q = queue();
        let now = Instant::now();
        q.sync(vec![id(1)], now);
        q.take_due(now, 1);

        q.back_off(&id(1), now);
        assert!(q.take_due(now + Duration::from_secs(9), 1).is_empty());
        assert_eq!(q.take_due(now + Duration::from_secs(10), 1), vec![id(1)]);

        q.back_off(&id(1), now);
        assert!(q.take_due(now + Duration::from_secs(19), 1).is_empty());
        assert_eq!(q.take_due(now + Duration::from_secs(20), 1), vec![id(1)]);
    }

    #[test]
    fn sync_keeps_schedule_and_drops_finished() {
        let mut q = queue();
        let now = Instant::now();
        q.sync(vec![id(1), id(2)], now);
        q.take_due(now, 10);
        q.back_off(&id(1), now);
        q.back_off(&id(2), now);

        q.sync(vec![id(2), id(3)], now);
        assert_eq!(q.len(), 2);
        // 3 is new, 2 keeps its backoff.
        assert_eq!(q.take_due(now, 10), vec![id(3)]);
    }

    #[test]
    fn forgotten_action_returns_fresh() {
        let mut q = queue();
        let now = Instant::now();
        q.sync(vec![id(1)], now);
        q.take_due(now, 1);
        q.back_off(&id(1), now);
        q.forget(&id(1));
        q.sync(vec![id(1)], now);
        assert_eq!(q.take_due(now, 1), vec![id(1)]);
    }

    #[test]
    fn store_failures_back_off_and_definition_errors_drop() {
        let mut q = queue();
        let now = Instant::now();
        q.sync(vec![id(1), id(2)], now);
        q.take_due(now, 10);

        q.record_failure(&id(1), &CoordError::Store("busy".to_string()), now);
        q.record_failure(&id(2), &CoordError::UnknownDataset("a".to_string()), now);
        assert_eq!(q.len(), 1);

        // Still WAITING in the store, but never handed out again.
        q.sync(vec![id(1), id(2)], now);
        assert_eq!(q.len(), 1);
        assert_eq!(q.take_due(now + Duration::from_secs(10), 10), vec![id(1)]);
    }
}
