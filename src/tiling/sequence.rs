use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::CommandRunner;
use crate::error::{GridError, Result};
use crate::scheduler::{TaskFeed, TaskManager};
use crate::tiling::image::ImageJob;

/// Produces the scene file rendered for one frame.
#[async_trait]
pub trait SceneSource: Send + Sync {
    async fn prepare(&self, camera_file: &Path, frame: u32) -> Result<PathBuf>;
}

/// Uses each camera file as the scene, copied to `temp_<frame>.xml`.
#[derive(Debug, Clone)]
pub struct CopyCamera {
    pub scene_dir: PathBuf,
}

#[async_trait]
impl SceneSource for CopyCamera {
    async fn prepare(&self, camera_file: &Path, frame: u32) -> Result<PathBuf> {
        let scene = self.scene_dir.join(format!("temp_{frame}.xml"));
        tracing::debug!(camera = %camera_file.display(), scene = %scene.display(), "Copying camera file");
        tokio::fs::copy(camera_file, &scene)
            .await
            .map_err(|e| GridError::Scene {
                path: camera_file.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(scene)
    }
}

/// Fills a scene template with values extracted from the camera file by an
/// external tool, invoked as
/// `<program> -i <camera> -s <pattern> -t <template> -o <scene>`.
/// The scene is written next to the template.
pub struct ExternalTemplater {
    pub program: String,
    pub pattern: PathBuf,
    pub template: PathBuf,
    pub runner: Arc<dyn CommandRunner>,
    pub timeout: Duration,
}

impl ExternalTemplater {
    pub fn scene_path(&self, frame: u32) -> PathBuf {
        let dir = self.template.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("temp_{frame}.xml"))
    }
}

#[async_trait]
impl SceneSource for ExternalTemplater {
    async fn prepare(&self, camera_file: &Path, frame: u32) -> Result<PathBuf> {
        let scene = self.scene_path(frame);
        let args = vec![
            "-i".to_string(),
            camera_file.display().to_string(),
            "-s".to_string(),
            self.pattern.display().to_string(),
            "-t".to_string(),
            self.template.display().to_string(),
            "-o".to_string(),
            scene.display().to_string(),
        ];

        let output = self
            .runner
            .run(&self.program, &args, Some(self.timeout))
            .await
            .map_err(|e| GridError::Scene {
                path: camera_file.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !output.success() {
            return Err(GridError::Scene {
                path: camera_file.to_path_buf(),
                reason: format!(
                    "{} exited with {:?}: {}",
                    self.program, output.exit_code, output.stderr
                ),
            });
        }
        tracing::debug!(camera = %camera_file.display(), scene = %scene.display(), "Scene generated");
        Ok(scene)
    }
}

/// Frame cursor that turns an animation into per-frame tile batches on
/// demand, so only about a quota's worth of tasks exists at any time.
pub struct SequenceFeed {
    pub camera_dir: PathBuf,
    /// Camera files are `<camera_name><frame:05>.xml`
    pub camera_name: String,
    pub current: u32,
    /// First frame not rendered. Frame `end` itself is never queued, even
    /// while earlier frames are still running.
    pub end: u32,
    pub step: u32,
    /// Frame `n` renders into `<output_root>/<n>/`
    pub output_root: PathBuf,
    /// Settings shared by every frame. Scene and output dir are set per frame.
    pub image: ImageJob,
    pub scenes: Box<dyn SceneSource>,
}

impl SequenceFeed {
    pub fn camera_file(&self, frame: u32) -> PathBuf {
        self.camera_dir
            .join(format!("{}{:05}.xml", self.camera_name, frame))
    }

    pub fn frame_output_dir(&self, frame: u32) -> PathBuf {
        self.output_root.join(frame.to_string())
    }
}

#[async_trait]
impl TaskFeed for SequenceFeed {
    fn is_exhausted(&self) -> bool {
        self.current >= self.end
    }

    async fn produce_next(&mut self, manager: &mut TaskManager) -> Result<()> {
        let frame = self.current;
        let scene = self.scenes.prepare(&self.camera_file(frame), frame).await?;

        let mut image = self.image.clone();
        image.scene = scene;
        image.output_dir = self.frame_output_dir(frame);
        let count = image.create_tasks(manager)?;

        // A zero step would never reach the end frame
        self.current = self.current.saturating_add(self.step.max(1));
        tracing::info!(frame, tiles = count, next = self.current, "Frame queued");
        Ok(())
    }
}
