pub mod scheduler;
pub mod task;

pub use scheduler::{Scheduler, SchedulerError};
pub use task::{InitError, Task, TaskId};
