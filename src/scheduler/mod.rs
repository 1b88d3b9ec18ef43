pub mod control;
pub mod manager;
pub mod task;

pub use control::{Scheduler, TaskFeed, TickReport};
pub use manager::{SchedulerStats, TaskManager};
pub use task::{NoHooks, OutputFileHooks, Task, TaskArtifacts, TaskHooks, TaskStatus};
