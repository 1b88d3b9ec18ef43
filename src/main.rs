use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use grid_render::batch;
use grid_render::cluster::{CommandRunner, OarBackend, ProcessRunner, TaskBackend};
use grid_render::config::{JobConfig, OarConfig, SchedulerConfig};
use grid_render::error::GridError;
use grid_render::purge::purge_user_jobs;
use grid_render::scheduler::{OutputFileHooks, Scheduler, TaskManager};
use grid_render::shutdown::install_shutdown_handler;
use grid_render::tiling::{CopyCamera, ExternalTemplater, ImageJob, SceneSource, SequenceFeed};

#[derive(Parser, Debug)]
#[command(name = "grid-render")]
#[command(version)]
#[command(about = "Render tiled images and animations as jobs on an OAR cluster")]
#[command(propagate_version = true)]
struct Args {
    /// Directory receiving grid-render.log
    #[arg(long, global = true, default_value = ".")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Render one image split into tiles
    Image(ImageArgs),

    /// Render an animation, one tiled image per camera file
    Sequence(SequenceArgs),

    /// Run one job per line of a command file
    Batch(BatchArgs),

    /// Delete every job a user has on the cluster
    Purge(PurgeArgs),
}

// =============================================================================
// Shared Arguments
// =============================================================================

/// Resource requests applied to every job.
#[derive(Parser, Debug)]
struct JobArgs {
    /// Memory request
    #[arg(short = 'm', long, default_value = "1G")]
    memory: String,

    /// Wall-clock limit (hh:mm:ss), ignored when a queue is given
    #[arg(short = 't', long = "time", default_value = "00:00:10")]
    walltime: String,

    /// Queue to submit to
    #[arg(short = 'q', long)]
    queue: Option<String>,

    /// Cores per job
    #[arg(short = 'j', long, default_value = "1")]
    jobs: u32,

    /// Extra scheduler options ("BEST" for best-effort jobs)
    #[arg(short = 'a', long, default_value = "")]
    options: String,

    /// Only run on this cluster of the grid
    #[arg(short = 'p', long)]
    property: Option<String>,
}

impl JobArgs {
    fn to_config(&self) -> JobConfig {
        JobConfig {
            memory: self.memory.clone(),
            walltime: self.walltime.clone(),
            queue: self.queue.clone(),
            threads: self.jobs,
            options: self.options.clone(),
            property: self.property.clone(),
            ..JobConfig::default()
        }
    }
}

#[derive(Parser, Debug)]
struct ClusterArgs {
    /// Renderer binary the job descriptors launch on the nodes
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Seconds to wait for oarsub before treating the submission as failed
    #[arg(long, default_value = "20")]
    submit_timeout: u64,

    /// Seconds between two status polls
    #[arg(long)]
    poll: Option<u64>,
}

impl ClusterArgs {
    fn oar_config(&self) -> OarConfig {
        let mut config =
            OarConfig::default().with_submit_timeout(Duration::from_secs(self.submit_timeout));
        if let Some(executable) = &self.executable {
            config = config.with_executable(executable);
        }
        config
    }
}

// =============================================================================
// Subcommand Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ImageArgs {
    /// Width resolution
    #[arg(short = 'x', long, default_value = "1920")]
    width: u32,

    /// Height resolution
    #[arg(short = 'y', long, default_value = "1080")]
    height: u32,

    /// Scene file to render
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Output directory
    #[arg(short = 'o', long, default_value = "rendu")]
    output: PathBuf,

    /// Tile edge length in pixels
    #[arg(short = 's', long, default_value = "128")]
    subblocks: u32,

    /// Extension of the images the renderer writes
    #[arg(short = 'e', long)]
    extension: String,

    /// Renderer launcher used in the tile commands
    #[arg(short = 'r', long)]
    renderer: PathBuf,

    /// Maximum number of jobs on the cluster
    #[arg(short = 'l', long, default_value = "300")]
    limit_jobs: usize,

    #[command(flatten)]
    job: JobArgs,

    #[command(flatten)]
    cluster: ClusterArgs,
}

#[derive(Parser, Debug)]
struct SequenceArgs {
    /// Width resolution
    #[arg(short = 'x', long, default_value = "1920")]
    width: u32,

    /// Height resolution
    #[arg(short = 'y', long, default_value = "1080")]
    height: u32,

    /// Scene template filled per frame
    #[arg(short = 'd', long)]
    template: Option<PathBuf>,

    /// Search pattern used to extract values from the camera files
    #[arg(short = 'z', long)]
    pattern: Option<PathBuf>,

    /// External tool producing a scene from camera, pattern and template
    #[arg(long, default_value = "extract-xml")]
    templater: String,

    /// Output directory, one sub-directory per frame
    #[arg(short = 'o', long, default_value = "rendu")]
    output: PathBuf,

    /// Number of frames
    #[arg(short = 'f', long)]
    frames: u32,

    /// First frame number
    #[arg(short = 'b', long, default_value = "1")]
    begin: u32,

    /// Frame increment
    #[arg(short = 's', long, default_value = "1")]
    step: u32,

    /// Directory holding the camera files
    #[arg(short = 'c', long)]
    camera: PathBuf,

    /// Camera file prefix (files are <name><frame:05>.xml)
    #[arg(short = 'n', long)]
    name: String,

    /// Extension of the images the renderer writes
    #[arg(short = 'e', long, default_value = "hdr")]
    extension: String,

    /// Maximum number of jobs on the cluster
    #[arg(short = 'l', long, default_value = "100")]
    limit_jobs: usize,

    /// Tile edge length in pixels
    #[arg(short = 'w', long, default_value = "128")]
    window_size: u32,

    /// Use the camera files as scenes instead of filling the template
    #[arg(long)]
    no_pattern: bool,

    /// Renderer launcher used in the tile commands
    #[arg(short = 'r', long)]
    renderer: PathBuf,

    #[command(flatten)]
    job: JobArgs,

    #[command(flatten)]
    cluster: ClusterArgs,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// File with one command per line; blank lines and # comments are ignored
    commands: PathBuf,

    /// Directory receiving <n>.out and <n>.err for each command
    #[arg(long)]
    log_output: Option<PathBuf>,

    /// Maximum number of jobs on the cluster
    #[arg(short = 'l', long, default_value = "10")]
    limit_jobs: usize,

    /// Write the descriptors and a script of oarsub calls here instead of submitting
    #[arg(short = 'b', long)]
    bash: Option<PathBuf>,

    #[command(flatten)]
    job: JobArgs,

    #[command(flatten)]
    cluster: ClusterArgs,
}

#[derive(Parser, Debug)]
struct PurgeArgs {
    /// Owner of the jobs to delete
    #[arg(short = 'u', long, env = "USER")]
    user: String,

    /// Output format
    #[arg(long, short = 'O', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Log to stderr and to `<log_dir>/grid-render.log`. The returned guard
/// flushes the file writer when dropped.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("grid-render")
        .filename_suffix("log")
        .build(log_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

fn oar_backend(cluster: &ClusterArgs, runner: Arc<ProcessRunner>) -> Arc<dyn TaskBackend> {
    Arc::new(OarBackend::new(cluster.oar_config(), runner))
}

async fn run_scheduler(
    mut scheduler: Scheduler,
    config: SchedulerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = install_shutdown_handler()?;
    tracing::info!(
        quota = config.quota,
        poll_interval = ?config.poll_interval,
        tasks = scheduler.manager().len(),
        "Starting scheduler"
    );
    scheduler.run(config.poll_interval, shutdown).await?;
    Ok(())
}

fn poll_interval(cluster: &ClusterArgs, default_secs: u64) -> Duration {
    Duration::from_secs(cluster.poll.unwrap_or(default_secs))
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_image(args: ImageArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.renderer.exists() {
        return Err(GridError::Config(format!(
            "renderer not found: {}",
            args.renderer.display()
        ))
        .into());
    }

    let template = args.job.to_config();
    let backend = oar_backend(&args.cluster, Arc::new(ProcessRunner));
    let mut manager = TaskManager::new(template, backend, Arc::new(OutputFileHooks));

    let image = ImageJob::new(
        args.width,
        args.height,
        &args.input,
        &args.output,
        &args.renderer,
    )
    .with_threads(args.job.jobs)
    .with_subblock(args.subblocks)
    .with_extension(&args.extension);
    image.create_tasks(&mut manager)?;

    let config = SchedulerConfig::new(args.limit_jobs, poll_interval(&args.cluster, 3));
    run_scheduler(Scheduler::new(manager, config.quota), config).await?;
    println!("Finish !");
    Ok(())
}

async fn handle_sequence(args: SequenceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runner = Arc::new(ProcessRunner);

    let scenes: Box<dyn SceneSource> = if args.no_pattern {
        let scene_dir = args
            .template
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| args.camera.clone());
        Box::new(CopyCamera { scene_dir })
    } else {
        let (Some(template), Some(pattern)) = (args.template.clone(), args.pattern.clone()) else {
            return Err(GridError::Config(
                "--template and --pattern are required unless --no-pattern is set".to_string(),
            )
            .into());
        };
        let templater_runner: Arc<dyn CommandRunner> = runner.clone();
        Box::new(ExternalTemplater {
            program: args.templater.clone(),
            pattern,
            template,
            runner: templater_runner,
            timeout: Duration::from_secs(args.cluster.submit_timeout),
        })
    };

    let template = args.job.to_config();
    let backend = oar_backend(&args.cluster, runner);
    let manager = TaskManager::new(template, backend, Arc::new(OutputFileHooks));

    let image = ImageJob::new(args.width, args.height, "", &args.output, &args.renderer)
        .with_threads(args.job.jobs)
        .with_subblock(args.window_size)
        .with_extension(&args.extension);
    let feed = SequenceFeed {
        camera_dir: args.camera.clone(),
        camera_name: args.name.clone(),
        current: args.begin,
        end: args.begin.saturating_add(args.frames),
        step: args.step,
        output_root: args.output.clone(),
        image,
        scenes,
    };

    let config = SchedulerConfig::new(args.limit_jobs, poll_interval(&args.cluster, 10));
    let scheduler = Scheduler::with_feed(manager, config.quota, Box::new(feed));
    run_scheduler(scheduler, config).await?;
    println!("FINISH!");
    Ok(())
}

async fn handle_batch(args: BatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let contents = tokio::fs::read_to_string(&args.commands).await?;

    if let Some(dir) = &args.log_output {
        tokio::fs::create_dir_all(dir).await?;
    }

    let backend = oar_backend(&args.cluster, Arc::new(ProcessRunner));
    let mut manager = TaskManager::new(args.job.to_config(), backend, Arc::new(OutputFileHooks));
    batch::queue_commands(&mut manager, &contents, args.log_output.as_deref());

    if let Some(script) = &args.bash {
        let descriptors = batch::write_submission_script(&manager, script).await?;
        println!(
            "Wrote {} descriptors, submit them with {}",
            descriptors.len(),
            script.display()
        );
        return Ok(());
    }

    let config = SchedulerConfig::new(args.limit_jobs, poll_interval(&args.cluster, 3));
    run_scheduler(Scheduler::new(manager, config.quota), config).await?;
    println!("Finish !");
    Ok(())
}

async fn handle_purge(args: PurgeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let backend = OarBackend::new(OarConfig::default(), ProcessRunner);
    let report = purge_user_jobs(&backend, &args.user).await?;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            if report.deleted.is_empty() && report.failed.is_empty() {
                println!("No jobs found for {}.", args.user);
            }
            for id in &report.deleted {
                println!("{:<12} deleted", id.as_str());
            }
            for failure in &report.failed {
                println!("{:<12} FAILED  {}", failure.job_id.as_str(), failure.error);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_dir)?;

    match args.command {
        Commands::Image(image_args) => handle_image(image_args).await?,
        Commands::Sequence(sequence_args) => handle_sequence(sequence_args).await?,
        Commands::Batch(batch_args) => handle_batch(batch_args).await?,
        Commands::Purge(purge_args) => handle_purge(purge_args).await?,
    }

    Ok(())
}
