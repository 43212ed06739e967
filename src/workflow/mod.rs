pub mod checkpoint;
pub mod shutdown;
pub mod state;
pub mod store;

pub use checkpoint::{CheckpointManager, MANUALLY_CLEARED};
pub use shutdown::{ShutdownNotice, ShutdownTrigger, listen_for_signals, shutdown_channel};
pub use state::{
    Metadata, RetryConfig, RunCounters, RunReport, StopReason, WorkflowState, WorkflowStatus,
    WorkflowType,
};
pub use store::{SqliteWorkflowStore, WorkflowFilter, WorkflowStore};
