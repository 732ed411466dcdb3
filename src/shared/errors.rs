use crate::approvals::ApprovalDecision;
use crate::config::ConfigError;
use crate::workflow::{QueryKind, WorkflowState};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("`{call}` failed: {reason}")]
    Transport {
        call: String,
        status: Option<u16>,
        reason: String,
    },
    #[error("`{call}` returned a malformed body: {reason}")]
    Parse { call: String, reason: String },
    #[error("`{operation}` is not valid in state `{state}`")]
    InvalidStateTransition {
        operation: &'static str,
        state: WorkflowState,
    },
    #[error("{kind} response #{ticket} was superseded by request #{latest}")]
    StaleResponse {
        kind: QueryKind,
        ticket: u64,
        latest: u64,
    },
    #[error("event stream for run `{run_id}` disconnected: {reason}")]
    StreamDisconnected { run_id: String, reason: String },
    #[error("plan creation requires at least one selected test")]
    EmptySelection,
    #[error("approval `{approval_id}` was already decided as `{decision}`")]
    AlreadyDecided {
        approval_id: String,
        decision: ApprovalDecision,
    },
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
