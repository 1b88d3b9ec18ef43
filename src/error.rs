use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` did not return within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("`{program}` exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Could not parse a job identifier from submission output: {0:?}")]
    InvalidJobId(String),

    #[error("Cluster returned a negative job identifier: {0}")]
    NegativeJobId(i64),

    #[error("Scene preparation failed for {path}: {reason}")]
    Scene { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GridError>;
