use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cluster::{JobId, TaskBackend};
use crate::config::JobConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NotSubmitted,
    Waiting,
    Running,
    Finished,
    Skipped,
}

impl TaskStatus {
    /// Live tasks stay in the manager and count against the quota once submitted.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::NotSubmitted => write!(f, "not-submitted"),
            TaskStatus::Waiting => write!(f, "waiting"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Finished => write!(f, "finished"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Files a task is expected to produce or uses on the submitting host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskArtifacts {
    /// Output whose presence means the work is already done
    pub expected_output: Option<PathBuf>,
    /// Where to write the submission descriptor
    pub descriptor: Option<PathBuf>,
}

impl TaskArtifacts {
    pub fn expecting(path: impl Into<PathBuf>) -> Self {
        Self {
            expected_output: Some(path.into()),
            descriptor: None,
        }
    }
}

/// Hooks run around a task's life on the cluster.
pub trait TaskHooks: Send + Sync {
    /// Called before submission. Returning false skips the task.
    fn preprocess(&self, task: &Task) -> bool;

    /// Called once the cluster no longer lists the task's job.
    fn postprocess(&self, task: &Task);
}

/// Submits everything and does nothing on completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl TaskHooks for NoHooks {
    fn preprocess(&self, _task: &Task) -> bool {
        true
    }

    fn postprocess(&self, _task: &Task) {}
}

/// Skips tasks whose expected output already exists and reports missing
/// outputs after completion. Tasks without an expected output always run.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFileHooks;

impl TaskHooks for OutputFileHooks {
    fn preprocess(&self, task: &Task) -> bool {
        match &task.artifacts.expected_output {
            Some(path) if path.is_file() => {
                tracing::debug!(task_id = %task.id, path = %path.display(), "Output found, skipping");
                false
            }
            _ => true,
        }
    }

    fn postprocess(&self, task: &Task) {
        let Some(path) = &task.artifacts.expected_output else {
            return;
        };
        if path.is_file() {
            tracing::debug!(task_id = %task.id, path = %path.display(), "Output present");
        } else {
            tracing::warn!(
                task_id = %task.id,
                job_id = ?task.job_id.as_ref().map(JobId::as_str),
                path = %path.display(),
                "Job left the cluster without producing its output"
            );
        }
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub config: JobConfig,
    pub job_id: Option<JobId>,
    pub status: TaskStatus,
    pub artifacts: TaskArtifacts,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(config: JobConfig, artifacts: TaskArtifacts) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            job_id: None,
            status: TaskStatus::NotSubmitted,
            artifacts,
            attempts: 0,
            created_at: Utc::now(),
            submitted_at: None,
            finished_at: None,
        }
    }

    pub fn is_not_submitted(&self) -> bool {
        self.status == TaskStatus::NotSubmitted
    }

    pub fn is_waiting(&self) -> bool {
        self.status == TaskStatus::Waiting
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// Path of the render output named by the command's `-o` flag.
    pub fn output_flag(&self) -> Option<&str> {
        let mut args = self.config.command.split_whitespace();
        while let Some(arg) = args.next() {
            if arg == "-o" {
                return args.next();
            }
        }
        None
    }

    /// Where the submission descriptor for this task is written.
    pub fn descriptor_path(&self) -> PathBuf {
        if let Some(path) = &self.artifacts.descriptor {
            return path.clone();
        }
        match self.output_flag() {
            Some(output) => PathBuf::from(format!("{output}_args.sh")),
            None => std::env::temp_dir().join(format!("grid-render-{}_args.sh", self.id)),
        }
    }

    /// Submit the task to the cluster.
    ///
    /// Only fires from `NotSubmitted`; any other state returns false and
    /// leaves the task untouched. A task rejected by `preprocess` becomes
    /// `Skipped`. Every submission failure leaves the task `NotSubmitted`
    /// without an identifier so a later call retries it.
    pub async fn submit(&mut self, backend: &dyn TaskBackend, hooks: &dyn TaskHooks) -> bool {
        if !self.is_not_submitted() {
            return false;
        }

        if !hooks.preprocess(self) {
            self.status = TaskStatus::Skipped;
            self.finished_at = Some(Utc::now());
            tracing::debug!(task_id = %self.id, status = %self.status, "Task skipped");
            return false;
        }

        self.attempts += 1;
        match self.try_submit(backend).await {
            Ok(job_id) => {
                tracing::info!(task_id = %self.id, job_id = %job_id, "Task submitted");
                self.job_id = Some(job_id);
                self.status = TaskStatus::Waiting;
                self.submitted_at = Some(Utc::now());
                true
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %self.id,
                    attempt = self.attempts,
                    error = %e,
                    "Task submission failed"
                );
                self.job_id = None;
                self.status = TaskStatus::NotSubmitted;
                false
            }
        }
    }

    /// Write the executable submission descriptor and return its path.
    pub async fn write_descriptor(&self, backend: &dyn TaskBackend) -> Result<PathBuf> {
        let descriptor = self.descriptor_path();
        tracing::debug!(task_id = %self.id, path = %descriptor.display(), "Writing descriptor");
        write_executable(&descriptor, &backend.build_descriptor(&self.config)).await?;
        Ok(descriptor)
    }

    async fn try_submit(&self, backend: &dyn TaskBackend) -> Result<JobId> {
        let descriptor = self.write_descriptor(backend).await?;
        let output = backend.submit(&descriptor).await?;
        backend.parse_identifier(&output)
    }

    /// Refresh the status from one bulk status listing.
    ///
    /// Returns false once the task has finished. A job missing from the
    /// listing counts as finished whatever the reason it left the cluster.
    pub fn update_status(
        &mut self,
        bulk_output: &str,
        backend: &dyn TaskBackend,
        hooks: &dyn TaskHooks,
    ) -> bool {
        if !self.is_waiting() && !self.is_running() {
            return true;
        }
        let Some(job_id) = self.job_id.as_ref() else {
            return true;
        };

        if let Some(pos) = bulk_output.find(job_id.as_str()) {
            if self.is_waiting() {
                let line = bulk_output[pos..].lines().next().unwrap_or_default();
                let state = line.split_whitespace().nth(5);
                if state.is_some_and(|code| backend.is_running_code(code)) {
                    tracing::debug!(task_id = %self.id, job_id = %job_id, "Task running");
                    self.status = TaskStatus::Running;
                }
            }
            return true;
        }

        hooks.postprocess(self);
        self.status = TaskStatus::Finished;
        self.finished_at = Some(Utc::now());
        tracing::info!(
            task_id = %self.id,
            job_id = ?self.job_id.as_ref().map(JobId::as_str),
            status = %self.status,
            "Task finished"
        );
        false
    }
}

pub(crate) async fn write_executable(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = tokio::fs::metadata(path).await?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        tokio::fs::set_permissions(path, permissions).await?;
    }
    Ok(())
}
