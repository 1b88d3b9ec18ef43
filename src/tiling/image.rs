use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::scheduler::{TaskArtifacts, TaskManager};

/// Rectangular region of a frame rendered as one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// File stem derived from the pixel offset. Stable across runs, which is
    /// what lets a rerun find tiles rendered earlier.
    pub fn name(&self) -> String {
        format!("{}_{}", self.x, self.y)
    }
}

/// Split a `width` x `height` frame into tiles of edge `subblock`.
///
/// Full tiles come first (column by column), then the bottom remainder row,
/// the right remainder column and finally the corner tile.
pub fn tiles(width: u32, height: u32, subblock: u32) -> Vec<Tile> {
    if subblock == 0 {
        return Vec::new();
    }
    let columns = width / subblock;
    let rows = height / subblock;
    let rest_w = width % subblock;
    let rest_h = height % subblock;

    let mut tiles = Vec::new();
    for x in 0..columns {
        for y in 0..rows {
            tiles.push(Tile::new(x * subblock, y * subblock, subblock, subblock));
        }
    }
    if rest_h != 0 {
        for x in 0..columns {
            tiles.push(Tile::new(x * subblock, rows * subblock, subblock, rest_h));
        }
    }
    if rest_w != 0 {
        for y in 0..rows {
            tiles.push(Tile::new(columns * subblock, y * subblock, rest_w, subblock));
        }
    }
    if rest_w != 0 && rest_h != 0 {
        tiles.push(Tile::new(columns * subblock, rows * subblock, rest_w, rest_h));
    }
    tiles
}

/// Renderer block size: the largest power of two not above
/// `subblock / threads`, and never below 1.
pub fn mts_sub_blocks(subblock: u32, threads: u32) -> u32 {
    let per_thread = subblock / threads.max(1);
    if per_thread == 0 {
        return 1;
    }
    1 << (u32::BITS - 1 - per_thread.leading_zeros())
}

/// Command line for the renderer with `-D` scene definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    pub renderer: PathBuf,
    pub definitions: BTreeMap<String, String>,
}

impl RenderCommand {
    pub fn new(renderer: impl Into<PathBuf>) -> Self {
        Self {
            renderer: renderer.into(),
            definitions: BTreeMap::new(),
        }
    }

    pub fn define(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.definitions.insert(key.into(), value.to_string());
        self
    }

    /// Definitions for a crop of a `width` x `height` frame.
    pub fn for_tile(renderer: impl Into<PathBuf>, width: u32, height: u32, tile: &Tile) -> Self {
        Self::new(renderer)
            .define("width", width)
            .define("height", height)
            .define("cropWidth", tile.width)
            .define("cropHeight", tile.height)
            .define("cropX", tile.x)
            .define("cropY", tile.y)
    }
}

impl std::fmt::Display for RenderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -z", self.renderer.display())?;
        for (key, value) in &self.definitions {
            write!(f, " -D{key}={value}")?;
        }
        Ok(())
    }
}

/// One frame rendered as a set of tile jobs.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub width: u32,
    pub height: u32,
    /// Scene file handed to the renderer
    pub scene: PathBuf,
    pub output_dir: PathBuf,
    pub threads: u32,
    pub subblock: u32,
    /// Extension of the image the renderer writes, without the dot
    pub extension: String,
    pub renderer: PathBuf,
    /// Extra `-D` definitions passed to every tile
    pub defines: BTreeMap<String, String>,
}

impl ImageJob {
    pub fn new(
        width: u32,
        height: u32,
        scene: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        renderer: impl Into<PathBuf>,
    ) -> Self {
        Self {
            width,
            height,
            scene: scene.into(),
            output_dir: output_dir.into(),
            threads: 1,
            subblock: 128,
            extension: "png".to_string(),
            renderer: renderer.into(),
            defines: BTreeMap::new(),
        }
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_subblock(mut self, subblock: u32) -> Self {
        self.subblock = subblock;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn tiles(&self) -> Vec<Tile> {
        tiles(self.width, self.height, self.subblock)
    }

    pub fn mts_sub_blocks(&self) -> u32 {
        mts_sub_blocks(self.subblock, self.threads)
    }

    /// Path the renderer writes for `tile`, without extension.
    pub fn tile_stem(&self, tile: &Tile) -> PathBuf {
        self.output_dir.join(tile.name())
    }

    /// Image whose presence marks `tile` as done.
    pub fn tile_image(&self, tile: &Tile) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", tile.name(), self.extension))
    }

    pub fn tile_command(&self, tile: &Tile) -> String {
        let mut command = RenderCommand::for_tile(&self.renderer, self.width, self.height, tile);
        for (key, value) in &self.defines {
            command = command.define(key.clone(), value);
        }
        format!(
            "{} -p {} -b {} -o {} {}",
            command,
            self.threads,
            self.mts_sub_blocks(),
            self.tile_stem(tile).display(),
            self.scene.display()
        )
    }

    pub fn create_output_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Create the output directory and queue one task per tile.
    pub fn create_tasks(&self, manager: &mut TaskManager) -> Result<usize> {
        self.create_output_dir()?;
        let tiles = self.tiles();
        for tile in &tiles {
            let stem = self.tile_stem(tile);
            manager.create_task(
                Some(self.tile_command(tile)),
                Some(stem.with_extension("out")),
                Some(stem.with_extension("err")),
                TaskArtifacts::expecting(self.tile_image(tile)),
            );
        }
        tracing::info!(
            scene = %self.scene.display(),
            output_dir = %self.output_dir.display(),
            tiles = tiles.len(),
            "Queued image tiles"
        );
        Ok(tiles.len())
    }
}
