use std::fmt::Write as _;
use std::path::Path;

use async_trait::async_trait;

use crate::cluster::{CommandRunner, JobId, TaskBackend};
use crate::config::{JobConfig, OarConfig};
use crate::error::{GridError, Result};

/// [`TaskBackend`] for the OAR batch scheduler (`oarsub`, `oarstat`, `oardel`).
#[derive(Debug, Clone)]
pub struct OarBackend<R> {
    config: OarConfig,
    runner: R,
}

impl<R: CommandRunner> OarBackend<R> {
    pub fn new(config: OarConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &OarConfig {
        &self.config
    }

    fn write_command(&self, script: &mut String, command: &str) {
        match &self.config.executable {
            Some(executable) => {
                let _ = writeln!(script, "EXECUTABLE={}", executable.display());
                if let Some(dir) = executable.parent().filter(|d| !d.as_os_str().is_empty()) {
                    let _ = writeln!(
                        script,
                        "export LD_LIBRARY_PATH=$LD_LIBRARY_PATH:{}",
                        dir.display()
                    );
                }
                script.push_str("export OMP_NUM_THREADS=1\n");

                // The first token names the renderer on the submitting host;
                // the job runs the configured executable instead.
                script.push_str("$EXECUTABLE");
                for arg in command.split_whitespace().skip(1) {
                    script.push(' ');
                    script.push_str(arg);
                }
                script.push('\n');
            }
            None => {
                script.push_str("export OMP_NUM_THREADS=1\n");
                script.push_str(command);
                script.push('\n');
            }
        }
    }
}

#[async_trait]
impl<R: CommandRunner> TaskBackend for OarBackend<R> {
    fn build_descriptor(&self, config: &JobConfig) -> String {
        let mut script = String::from("#!/bin/sh\n");

        if let Some(stdout) = &config.stdout {
            let _ = writeln!(script, "#OAR -O {}", stdout.display());
        }
        if let Some(stderr) = &config.stderr {
            let _ = writeln!(script, "#OAR -E {}", stderr.display());
        }

        let _ = write!(script, "#OAR -l /nodes=1/core={}", config.threads);
        match &config.queue {
            // Queues carry their own time limits
            Some(queue) => {
                script.push('\n');
                let _ = writeln!(script, "#OAR -q {queue}");
            }
            None => {
                let _ = writeln!(script, ",walltime={}", config.walltime);
            }
        }

        if let Some(cluster) = &config.property {
            let _ = writeln!(script, "#OAR -p cluster='{cluster}'");
        }

        if config.is_best_effort() {
            script.push_str("#OAR -t besteffort\n");
            script.push_str("#OAR -t idempotent\n");
        }

        self.write_command(&mut script, &config.command);
        script
    }

    fn submission_line(&self, descriptor: &Path) -> String {
        let mut line = self.config.submit_program.clone();
        for arg in submit_args(descriptor) {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }

    async fn submit(&self, descriptor: &Path) -> Result<String> {
        let args = submit_args(descriptor);
        let output = self
            .runner
            .run(
                &self.config.submit_program,
                &args,
                Some(self.config.submit_timeout),
            )
            .await?;
        tracing::debug!(
            descriptor = %descriptor.display(),
            exit_code = ?output.exit_code,
            stdout = %output.stdout,
            "oarsub returned"
        );
        Ok(output.stdout)
    }

    /// `oarsub` ends its report with `OAR_JOB_ID=<id>` followed by a newline,
    /// so the identifier sits on the second-to-last line.
    fn parse_identifier(&self, output: &str) -> Result<JobId> {
        let lines: Vec<&str> = output.split('\n').collect();
        let line = lines
            .len()
            .checked_sub(2)
            .map(|i| lines[i])
            .ok_or_else(|| GridError::InvalidJobId(output.to_string()))?;
        let value = line
            .split('=')
            .nth(1)
            .map(str::trim)
            .ok_or_else(|| GridError::InvalidJobId(output.to_string()))?;
        let id: i64 = value
            .parse()
            .map_err(|_| GridError::InvalidJobId(output.to_string()))?;
        if id < 0 {
            return Err(GridError::NegativeJobId(id));
        }
        Ok(JobId::new(value))
    }

    fn is_running_code(&self, code: &str) -> bool {
        code == self.config.running_code
    }

    async fn query_status(&self) -> Result<String> {
        let program = &self.config.status_program;
        let output = self.runner.run(program, &[], None).await?;
        if !output.success() {
            return Err(GridError::CommandFailed {
                program: program.clone(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    async fn list_user_jobs(&self, user: &str) -> Result<Vec<JobId>> {
        let program = &self.config.status_program;
        let args = vec!["-u".to_string(), user.to_string()];
        let output = self.runner.run(program, &args, None).await?;
        if !output.success() {
            return Err(GridError::CommandFailed {
                program: program.clone(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(parse_user_jobs(&output.stdout))
    }

    async fn delete(&self, id: &JobId) -> Result<String> {
        let program = &self.config.delete_program;
        let output = self
            .runner
            .run(program, &[id.as_str().to_string()], None)
            .await?;
        if !output.success() {
            return Err(GridError::CommandFailed {
                program: program.clone(),
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }
}

fn submit_args(descriptor: &Path) -> Vec<String> {
    vec!["-S".to_string(), descriptor.display().to_string()]
}

/// `oarstat -u` prints two header lines, one row per job, then a trailing
/// line. The job identifier is the first column of each row.
fn parse_user_jobs(output: &str) -> Vec<JobId> {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() < 3 {
        return Vec::new();
    }
    lines[2..lines.len() - 1]
        .iter()
        .filter_map(|line| line.split_whitespace().next())
        .map(JobId::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::CommandOutput;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned outputs and records every call.
    #[derive(Default)]
    struct Replay {
        outputs: Mutex<Vec<Result<CommandOutput>>>,
        calls: Mutex<Vec<(String, Vec<String>, Option<Duration>)>>,
    }

    impl Replay {
        fn with(outputs: Vec<Result<CommandOutput>>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for Replay {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            timeout: Option<Duration>,
        ) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec(), timeout));
            self.outputs.lock().unwrap().remove(0)
        }
    }

    fn ok(stdout: &str) -> Result<CommandOutput> {
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn backend() -> OarBackend<Replay> {
        OarBackend::new(OarConfig::default(), Replay::default())
    }

    #[test]
    fn descriptor_with_walltime_and_outputs() {
        let config = JobConfig {
            command: "render -o /out/0_0 scene.xml".to_string(),
            stdout: Some(PathBuf::from("/out/0_0.out")),
            stderr: Some(PathBuf::from("/out/0_0.err")),
            walltime: "02:00:00".to_string(),
            threads: 4,
            ..Default::default()
        };
        let script = backend().build_descriptor(&config);

        assert_eq!(
            script,
            "#!/bin/sh\n\
             #OAR -O /out/0_0.out\n\
             #OAR -E /out/0_0.err\n\
             #OAR -l /nodes=1/core=4,walltime=02:00:00\n\
             export OMP_NUM_THREADS=1\n\
             render -o /out/0_0 scene.xml\n"
        );
    }

    #[test]
    fn descriptor_with_queue_omits_walltime() {
        let config = JobConfig::new("render scene.xml")
            .with_queue("besteffort")
            .with_options("BEST");
        let script = backend().build_descriptor(&config);

        assert!(script.contains("#OAR -l /nodes=1/core=1\n"));
        assert!(!script.contains("walltime"));
        assert!(script.contains("#OAR -q besteffort\n"));
        assert!(script.contains("#OAR -t besteffort\n#OAR -t idempotent\n"));
    }

    #[test]
    fn descriptor_restricts_cluster_property() {
        let config = JobConfig::new("render scene.xml")
            .with_walltime("00:30:00")
            .with_property("lucky");
        let script = backend().build_descriptor(&config);

        assert_eq!(
            script,
            "#!/bin/sh\n\
             #OAR -l /nodes=1/core=1,walltime=00:30:00\n\
             #OAR -p cluster='lucky'\n\
             export OMP_NUM_THREADS=1\n\
             render scene.xml\n"
        );
    }

    #[test]
    fn submission_line_matches_submit_arguments() {
        assert_eq!(
            backend().submission_line(Path::new("/out/3_args.sh")),
            "oarsub -S /out/3_args.sh"
        );
    }

    #[test]
    fn descriptor_swaps_in_configured_executable() {
        let backend = OarBackend::new(
            OarConfig::default().with_executable("/opt/mts/mitsuba"),
            Replay::default(),
        );
        let script = backend.build_descriptor(&JobConfig::new("mitsuba.sh -z -p 1 scene.xml"));

        assert!(script.contains("EXECUTABLE=/opt/mts/mitsuba\n"));
        assert!(script.contains("export LD_LIBRARY_PATH=$LD_LIBRARY_PATH:/opt/mts\n"));
        assert!(script.ends_with("$EXECUTABLE -z -p 1 scene.xml\n"));
    }

    #[test]
    fn parses_identifier_from_second_to_last_line() {
        let output = "[ADMISSION RULE] Set default walltime\nGenerate a job key...\nOAR_JOB_ID=4242\n";
        assert_eq!(backend().parse_identifier(output).unwrap(), JobId::new("4242"));
    }

    #[test]
    fn rejects_unparsable_identifiers() {
        let b = backend();
        assert!(matches!(b.parse_identifier(""), Err(GridError::InvalidJobId(_))));
        assert!(matches!(
            b.parse_identifier("no id here\n"),
            Err(GridError::InvalidJobId(_))
        ));
        assert!(matches!(
            b.parse_identifier("OAR_JOB_ID=abc\n"),
            Err(GridError::InvalidJobId(_))
        ));
        // Without the trailing newline the id is on the last line, not the second-to-last
        assert!(matches!(
            b.parse_identifier("header\nOAR_JOB_ID=12"),
            Err(GridError::InvalidJobId(_))
        ));
    }

    #[test]
    fn rejects_negative_identifier() {
        assert!(matches!(
            backend().parse_identifier("OAR_JOB_ID=-1\n"),
            Err(GridError::NegativeJobId(-1))
        ));
    }

    #[test]
    fn running_code_matches_exactly() {
        let b = backend();
        assert!(b.is_running_code("R"));
        assert!(!b.is_running_code("W"));
        assert!(!b.is_running_code("r"));
    }

    #[tokio::test]
    async fn submit_passes_descriptor_and_timeout() {
        let backend = OarBackend::new(
            OarConfig::default(),
            Replay::with(vec![ok("OAR_JOB_ID=7\n")]),
        );
        let stdout = backend.submit(Path::new("/out/0_0_args.sh")).await.unwrap();
        assert_eq!(stdout, "OAR_JOB_ID=7\n");

        let calls = backend.runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "oarsub");
        assert_eq!(calls[0].1, vec!["-S", "/out/0_0_args.sh"]);
        assert_eq!(calls[0].2, Some(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn failed_status_query_is_an_error() {
        let backend = OarBackend::new(
            OarConfig::default(),
            Replay::with(vec![Ok(CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "oarstat: cannot connect".to_string(),
            })]),
        );
        let err = backend.query_status().await.unwrap_err();
        assert!(matches!(err, GridError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn lists_user_jobs_skipping_headers() {
        let table = "Job id     Name  User  Submission Date     S Queue\n\
                     ---------- ----- ----- ------------------- - -----\n\
                     101        r1    alice 2024-01-01 10:00:00 R default\n\
                     102        r2    alice 2024-01-01 10:00:01 W besteffort\n";
        let backend = OarBackend::new(OarConfig::default(), Replay::with(vec![ok(table)]));

        let ids = backend.list_user_jobs("alice").await.unwrap();
        assert_eq!(ids, vec![JobId::new("101"), JobId::new("102")]);
    }

    #[test]
    fn user_job_listing_without_rows() {
        assert!(parse_user_jobs("").is_empty());
        assert!(parse_user_jobs("Job id\n------\n").is_empty());
    }
}
