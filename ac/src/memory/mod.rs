//! Memory subsystem
//!
//! Three stores with different retention semantics:
//! - communication memory: an inter-worker mailbox that shapes the next
//!   prompt
//! - execution log: a searchable historical archive of every invocation
//! - unit-test memory: full raw test output parsed for the repair worker
//!
//! The system outlives individual runs. Store failures never abort a run;
//! they are logged and swallowed.

use std::path::PathBuf;

use tracing::{info, warn};

mod comm;
mod exec_log;

pub use comm::{AgentContext, AgentMessage, CommunicationMemory, ExecutionState, MessageType, WorkerOutputs};
pub use exec_log::{AgentStats, ExecutionLog, LogStatistics, classify_task};
pub use unit_test::{
    FailureKind, ParsedTestOutput, RefactorInfo, TestAnalysis, TestFailure, TestRecord, UnitTestMemory,
    parse_test_output,
};

use vectorstore::VectorStore;

/// The process-wide memory system, shared across runs
pub struct MemorySystem {
    pub comm: CommunicationMemory,
    pub exec_log: ExecutionLog,
    pub unit_test: UnitTestMemory,
    base_dir: PathBuf,
}

impl MemorySystem {
    /// Create the system; stores open on `initialize`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            comm: CommunicationMemory::new(),
            exec_log: ExecutionLog::new(),
            unit_test: UnitTestMemory::new(),
            base_dir: base_dir.into(),
        }
    }

    /// Open the backing stores; idempotent, failure degrades to in-memory
    pub async fn initialize(&self) {
        let open = |name: &str| -> Option<VectorStore> {
            match VectorStore::open(self.base_dir.join(name)) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(store = name, error = %e, "failed to open memory store, continuing without persistence");
                    None
                }
            }
        };

        if !self.comm.has_store().await {
            if let Some(store) = open("communication") {
                self.comm.attach_store(store).await;
            }
        }
        if !self.exec_log.has_store().await {
            if let Some(store) = open("executions") {
                self.exec_log.attach_store(store).await;
            }
        }
        if !self.unit_test.has_store().await {
            if let Some(store) = open("unit_tests") {
                self.unit_test.attach_store(store).await;
            }
        }

        info!(dir = %self.base_dir.display(), "memory system initialized");
    }

    /// Release the backing stores; in-memory caches survive
    pub async fn close(&self) {
        self.comm.close().await;
        self.exec_log.close().await;
        self.unit_test.close().await;
    }
}
