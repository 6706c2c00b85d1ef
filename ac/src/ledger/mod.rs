//! Run-scoped mutable state
//!
//! Both ledgers are owned by the driver: created at run start, discarded at
//! run end, mutated only through their methods and never across an await.

mod progress;
mod task;

pub use progress::{HistoryEntry, NodeState, ProgressLedger};
pub use task::{EnhancedContext, ErrorRecord, ProjectConfig, TaskLedger};
