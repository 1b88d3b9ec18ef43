use std::path::PathBuf;
use std::time::Duration;

/// Resource request and command line for one cluster job.
///
/// A `JobConfig` is used as a template by the task manager: every task gets
/// its own clone with the per-task command and output files applied, so a
/// task never shares its configuration with the template or another task.
/// No validation happens here; a bad walltime or memory value only shows up
/// when the cluster rejects the submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Full command line to execute. Empty until assigned.
    pub command: String,
    /// File receiving the job's stdout on the cluster
    pub stdout: Option<PathBuf>,
    /// File receiving the job's stderr on the cluster
    pub stderr: Option<PathBuf>,
    /// Memory request (e.g., "1G")
    pub memory: String,
    /// Wall-clock limit in `hh:mm:ss`. Ignored when a queue is set.
    pub walltime: String,
    /// Cores requested on the node
    pub threads: u32,
    /// Queue to submit to; `None` uses the default queue with a walltime
    pub queue: Option<String>,
    /// Free-form scheduler options. `BEST` requests a best-effort job.
    pub options: String,
    /// Cluster the job must run on, emitted as an OAR property filter
    pub property: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            stdout: None,
            stderr: None,
            memory: "1G".to_string(),
            walltime: "00:00:10".to_string(),
            threads: 1,
            queue: None,
            options: String::new(),
            property: None,
        }
    }
}

impl JobConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Returns a copy with only the given fields replaced.
    pub fn with_overrides(
        &self,
        command: Option<String>,
        stdout: Option<PathBuf>,
        stderr: Option<PathBuf>,
    ) -> Self {
        let mut config = self.clone();
        if let Some(command) = command {
            config.command = command;
        }
        if let Some(stdout) = stdout {
            config.stdout = Some(stdout);
        }
        if let Some(stderr) = stderr {
            config.stderr = Some(stderr);
        }
        config
    }

    pub fn with_walltime(mut self, walltime: impl Into<String>) -> Self {
        self.walltime = walltime.into();
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn with_property(mut self, cluster: impl Into<String>) -> Self {
        self.property = Some(cluster.into());
        self
    }

    /// A config is usable once it carries a command.
    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }

    pub fn is_best_effort(&self) -> bool {
        self.options.contains("BEST")
    }
}

/// Settings for talking to the OAR command line tools.
#[derive(Debug, Clone)]
pub struct OarConfig {
    pub submit_program: String,
    pub status_program: String,
    pub delete_program: String,
    /// State column value that `oarstat` prints for a running job
    pub running_code: String,
    /// Upper bound on how long `oarsub` may take to hand back an identifier
    pub submit_timeout: Duration,
    /// Renderer binary launched by the descriptor. When unset the task
    /// command is written to the descriptor verbatim.
    pub executable: Option<PathBuf>,
}

impl Default for OarConfig {
    fn default() -> Self {
        Self {
            submit_program: "oarsub".to_string(),
            status_program: "oarstat".to_string(),
            delete_program: "oardel".to_string(),
            running_code: "R".to_string(),
            submit_timeout: Duration::from_secs(20),
            executable: None,
        }
    }
}

impl OarConfig {
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }
}

/// Control loop settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of Waiting + Running jobs kept on the cluster
    pub quota: usize,
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quota: 100,
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl SchedulerConfig {
    pub fn new(quota: usize, poll_interval: Duration) -> Self {
        Self {
            quota,
            poll_interval,
        }
    }
}
