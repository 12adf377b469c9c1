//! Domain model (IDs, tasks, results, states, events).
//!
//! Nothing in here knows about redb, tokio channels or the host; the types are
//! shared by the store, the executor protocol and the coordinator wire format.

pub mod events;
pub mod ids;
pub mod progress;
pub mod result;
pub mod state;
pub mod task;

pub use events::CoordinatorEvent;
pub use ids::{InstanceId, ResultId, TaskId};
pub use progress::{CompletedTask, Progress, RunSummary, Stats, StatusReport};
pub use result::{StateBlob, TaskResult};
pub use state::{EngineStatus, TaskStatus, Visibility};
pub use task::{NewTask, Task, TaskAction};
