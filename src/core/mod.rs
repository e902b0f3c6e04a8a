pub mod filter;
pub mod store;
pub mod task;

pub use filter::{DateRange, StatusFilter, TaskQuery};
pub use store::{TaskList, TaskObserver};
pub use task::{Category, Priority, Subtask, Task};
