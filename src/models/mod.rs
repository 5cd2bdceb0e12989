pub mod task;

pub use task::{NewTaskRequest, Priority, Task, TaskRow, format_time};
