//! Task lifecycle: the concurrency-safe task record with its bounded
//! output buffer, and the supervising [`Manager`].

mod manager;
mod task;

pub use manager::{Manager, ManagerConfig, NotifyFn, StartOptions, TaskEvent, TaskSpec};
pub use task::{
    generate_id, Priority, Status, Task, TaskFilter, TaskKind, TaskSnapshot,
};
