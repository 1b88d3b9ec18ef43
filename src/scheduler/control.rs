use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::manager::{SchedulerStats, TaskManager};

/// Lazily produces tasks for the scheduler, a batch at a time.
#[async_trait]
pub trait TaskFeed: Send {
    /// True once no more tasks will be produced.
    fn is_exhausted(&self) -> bool;

    /// Add the next batch of tasks to the manager.
    async fn produce_next(&mut self, manager: &mut TaskManager) -> Result<()>;
}

/// Outcome of one control loop tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks pruned after reaching a terminal state
    pub finished: usize,
    /// Free slots the scheduler tried to fill
    pub requested: usize,
    pub submitted: usize,
}

/// Polling control loop keeping at most `quota` jobs on the cluster.
pub struct Scheduler {
    manager: TaskManager,
    quota: usize,
    feed: Option<Box<dyn TaskFeed>>,
}

impl Scheduler {
    /// Scheduler for a fixed batch already loaded into `manager`.
    pub fn new(manager: TaskManager, quota: usize) -> Self {
        Self {
            manager,
            quota,
            feed: None,
        }
    }

    /// Scheduler that tops up `manager` from `feed` as tasks complete.
    pub fn with_feed(manager: TaskManager, quota: usize, feed: Box<dyn TaskFeed>) -> Self {
        Self {
            manager,
            quota,
            feed: Some(feed),
        }
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TaskManager {
        &mut self.manager
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn is_finished(&self) -> bool {
        self.manager.is_empty() && self.feed.as_ref().map_or(true, |f| f.is_exhausted())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.manager.stats()
    }

    /// One tick: refresh statuses, refill from the feed, then submit enough
    /// tasks to bring Waiting + Running back up to the quota.
    pub async fn update(&mut self) -> Result<TickReport> {
        let finished = self.manager.update_status().await?;

        if let Some(feed) = self.feed.as_mut() {
            while self.manager.len() < self.quota && !feed.is_exhausted() {
                feed.produce_next(&mut self.manager).await?;
            }
        }

        let requested = self.quota.saturating_sub(self.manager.stats().in_flight());
        let mut submitted = 0;
        if requested > 0 {
            tracing::info!(requested, "Trying to launch tasks");
            submitted = self.manager.submit_tasks(requested).await;
        }

        Ok(TickReport {
            finished,
            requested,
            submitted,
        })
    }

    /// Tick every `poll_interval` until all work is done or `shutdown` fires.
    ///
    /// Stopping early leaves already-submitted jobs on the cluster. Errors
    /// from the bulk status query end the loop.
    pub async fn run(&mut self, poll_interval: Duration, shutdown: CancellationToken) -> Result<()> {
        while !self.is_finished() {
            let stats = self.stats();
            tracing::info!(
                not_submitted = stats.not_submitted,
                waiting = stats.waiting,
                running = stats.running,
                "Stats : {stats}"
            );

            let report = self.update().await?;
            tracing::debug!(
                finished = report.finished,
                requested = report.requested,
                submitted = report.submitted,
                "Tick complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!(remaining = self.manager.len(), "Shutdown requested, leaving the control loop");
                    return Ok(());
                }
            }
        }
        tracing::info!("All tasks finished");
        Ok(())
    }
}
