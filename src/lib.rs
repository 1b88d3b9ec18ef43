pub mod batch;
pub mod cluster;
pub mod config;
pub mod error;
pub mod purge;
pub mod scheduler;
pub mod shutdown;
pub mod tiling;
