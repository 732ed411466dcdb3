pub mod coordinator;
pub mod queries;
pub mod state;

pub use coordinator::{Plan, Run, WorkflowCoordinator};
pub use queries::{LatestResponse, PendingQuery, QueryKind, QueryOutcome};
pub use state::{TerminalOutcome, WorkflowState};
