//! Access to the batch scheduler of the compute grid.
//!
//! The scheduler core only needs a handful of capabilities from the cluster:
//! - **Descriptor**: turn a [`JobConfig`] into a submission script
//! - **Submission**: hand the script to the cluster and read back an identifier
//! - **Bulk status**: one query listing every job the cluster still knows about
//! - **Deletion**: used by the standalone purge utility only
//!
//! [`TaskBackend`] bundles those capabilities. [`OarBackend`] is the only
//! implementation and drives the OAR tools through a [`CommandRunner`].

pub mod oar;
pub mod runner;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::JobConfig;
use crate::error::Result;

pub use oar::OarBackend;
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};

/// Identifier the cluster assigned to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Render the submission script for a job.
    fn build_descriptor(&self, config: &JobConfig) -> String;

    /// Shell command that would submit `descriptor`, for deferred runs.
    fn submission_line(&self, descriptor: &Path) -> String;

    /// Submit a descriptor file and return the raw submission output.
    async fn submit(&self, descriptor: &Path) -> Result<String>;

    /// Extract the job identifier from the output of [`TaskBackend::submit`].
    fn parse_identifier(&self, output: &str) -> Result<JobId>;

    /// Whether a status column value means the job is executing.
    fn is_running_code(&self, code: &str) -> bool;

    /// One bulk status query covering every job on the cluster.
    async fn query_status(&self) -> Result<String>;

    /// Identifiers of every job owned by `user`.
    async fn list_user_jobs(&self, user: &str) -> Result<Vec<JobId>>;

    async fn delete(&self, id: &JobId) -> Result<String>;
}
