//! Batches of arbitrary commands read from a text file, one job per line.
//!
//! Blank lines and lines starting with `#` are ignored. Jobs are numbered
//! in file order, skipped lines excluded, and that number names the job's
//! `<n>.out`, `<n>.err` and `<n>_args.sh` files when a log directory is
//! given.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::scheduler::task::write_executable;
use crate::scheduler::{TaskArtifacts, TaskManager};

/// Commands of a command file, trimmed, without blanks and comments.
pub fn parse_commands(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Queue one task per command of `text`. Returns the number queued.
pub fn queue_commands(manager: &mut TaskManager, text: &str, log_dir: Option<&Path>) -> usize {
    let commands = parse_commands(text);
    for (n, command) in commands.iter().enumerate() {
        let (stdout, stderr, artifacts) = match log_dir {
            Some(dir) => (
                Some(dir.join(format!("{n}.out"))),
                Some(dir.join(format!("{n}.err"))),
                TaskArtifacts {
                    expected_output: None,
                    descriptor: Some(dir.join(format!("{n}_args.sh"))),
                },
            ),
            None => (None, None, TaskArtifacts::default()),
        };
        manager.create_task(Some(command.to_string()), stdout, stderr, artifacts);
    }
    tracing::info!(jobs = commands.len(), "Queued batch commands");
    commands.len()
}

/// Write every pending descriptor plus an executable shell script that
/// submits them, instead of submitting anything. Returns the descriptors
/// in submission order.
pub async fn write_submission_script(manager: &TaskManager, script: &Path) -> Result<Vec<PathBuf>> {
    let descriptors = manager.write_descriptors().await?;

    let mut contents = String::from("#!/bin/sh\n");
    for descriptor in &descriptors {
        contents.push_str(&manager.backend().submission_line(descriptor));
        contents.push('\n');
    }
    write_executable(script, &contents).await?;

    tracing::info!(
        script = %script.display(),
        jobs = descriptors.len(),
        "Wrote submission script"
    );
    Ok(descriptors)
}
