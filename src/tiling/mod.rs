//! Decomposition of render work into cluster tasks.
//!
//! - [`image`]: splits one frame into tiles, one task per tile
//! - [`sequence`]: walks an animation frame by frame, feeding the scheduler
//!   a frame's tiles whenever it has room
//!
//! Tile outputs are named after their pixel offset (`<x>_<y>.<ext>`), so a
//! rerun over a partially rendered directory regenerates the same names and
//! the output hooks skip what is already on disk.

pub mod image;
pub mod sequence;

pub use image::{mts_sub_blocks, tiles, ImageJob, RenderCommand, Tile};
pub use sequence::{CopyCamera, ExternalTemplater, SceneSource, SequenceFeed};
