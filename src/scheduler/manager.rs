use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::cluster::TaskBackend;
use crate::config::JobConfig;
use crate::error::Result;
use crate::scheduler::task::{Task, TaskArtifacts, TaskHooks, TaskStatus};

/// Counts of live tasks by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub not_submitted: usize,
    pub waiting: usize,
    pub running: usize,
}

impl SchedulerStats {
    /// Jobs currently occupying the cluster quota.
    pub fn in_flight(&self) -> usize {
        self.waiting + self.running
    }
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[N: {}, W: {}, R: {}]",
            self.not_submitted, self.waiting, self.running
        )
    }
}

/// Owns the live tasks in creation order.
///
/// Tasks are appended by [`TaskManager::create_task`] and leave the manager
/// only when [`TaskManager::update_status`] finds them finished or skipped.
pub struct TaskManager {
    template: JobConfig,
    tasks: Vec<Task>,
    backend: Arc<dyn TaskBackend>,
    hooks: Arc<dyn TaskHooks>,
}

impl TaskManager {
    pub fn new(
        template: JobConfig,
        backend: Arc<dyn TaskBackend>,
        hooks: Arc<dyn TaskHooks>,
    ) -> Self {
        Self {
            template,
            tasks: Vec::new(),
            backend,
            hooks,
        }
    }

    pub fn template(&self) -> &JobConfig {
        &self.template
    }

    pub fn backend(&self) -> &dyn TaskBackend {
        self.backend.as_ref()
    }

    /// Queue a new task built from the template with the given overrides.
    /// Duplicates are not detected.
    pub fn create_task(
        &mut self,
        command: Option<String>,
        stdout: Option<PathBuf>,
        stderr: Option<PathBuf>,
        artifacts: TaskArtifacts,
    ) -> Uuid {
        let config = self.template.with_overrides(command, stdout, stderr);
        let task = Task::new(config, artifacts);
        let id = task.id;
        tracing::debug!(task_id = %id, command = %task.config.command, "Task created");
        self.tasks.push(task);
        id
    }

    /// Submit not-yet-submitted tasks in creation order until `max` of them
    /// are accepted by the cluster. Returns how many were submitted.
    pub async fn submit_tasks(&mut self, max: usize) -> usize {
        let mut submitted = 0;
        if max == 0 {
            return submitted;
        }
        for task in self.tasks.iter_mut() {
            if task
                .submit(self.backend.as_ref(), self.hooks.as_ref())
                .await
            {
                submitted += 1;
            }
            if submitted >= max {
                break;
            }
        }
        submitted
    }

    /// Write the descriptor of every not-yet-submitted task without handing
    /// anything to the cluster. Tasks rejected by `preprocess` are left out.
    pub async fn write_descriptors(&self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for task in self.tasks.iter().filter(|t| t.is_not_submitted()) {
            if !self.hooks.preprocess(task) {
                continue;
            }
            written.push(task.write_descriptor(self.backend.as_ref()).await?);
        }
        Ok(written)
    }

    /// Refresh every task from a single bulk status query and drop the ones
    /// that reached a terminal state. Returns the number dropped.
    pub async fn update_status(&mut self) -> Result<usize> {
        let output = self.backend.query_status().await?;

        let backend = self.backend.as_ref();
        let hooks = self.hooks.as_ref();
        for task in self.tasks.iter_mut() {
            task.update_status(&output, backend, hooks);
        }

        let before = self.tasks.len();
        self.tasks.retain(|task| task.status.is_live());
        let removed = before - self.tasks.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.tasks.len(), "Pruned terminal tasks");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::NotSubmitted => stats.not_submitted += 1,
                TaskStatus::Waiting => stats.waiting += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Finished | TaskStatus::Skipped => {}
            }
        }
        stats
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
