use crate::stream::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Aborted,
    Completed,
    Failed,
}

impl std::fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalOutcome::Aborted => write!(f, "aborted"),
            TerminalOutcome::Completed => write!(f, "completed"),
            TerminalOutcome::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    EngagementCreated,
    PlanCreated,
    RunStarted,
    RunPaused,
    RunTerminal(TerminalOutcome),
}

impl WorkflowState {
    /// State implied by a run's projected status.
    pub fn from_run_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Pending | RunStatus::Running => WorkflowState::RunStarted,
            RunStatus::Paused => WorkflowState::RunPaused,
            RunStatus::Aborted => WorkflowState::RunTerminal(TerminalOutcome::Aborted),
            RunStatus::Completed => WorkflowState::RunTerminal(TerminalOutcome::Completed),
            RunStatus::Failed => WorkflowState::RunTerminal(TerminalOutcome::Failed),
        }
    }

    pub fn is_run_live(self) -> bool {
        matches!(self, WorkflowState::RunStarted | WorkflowState::RunPaused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::RunTerminal(_))
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::Idle => write!(f, "idle"),
            WorkflowState::EngagementCreated => write!(f, "engagement_created"),
            WorkflowState::PlanCreated => write!(f, "plan_created"),
            WorkflowState::RunStarted => write!(f, "run_started"),
            WorkflowState::RunPaused => write!(f, "run_paused"),
            WorkflowState::RunTerminal(outcome) => write!(f, "run_terminal({outcome})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_maps_onto_workflow_state() {
        assert_eq!(
            WorkflowState::from_run_status(RunStatus::Pending),
            WorkflowState::RunStarted
        );
        assert_eq!(
            WorkflowState::from_run_status(RunStatus::Paused),
            WorkflowState::RunPaused
        );
        assert_eq!(
            WorkflowState::from_run_status(RunStatus::Failed),
            WorkflowState::RunTerminal(TerminalOutcome::Failed)
        );
        assert!(WorkflowState::RunPaused.is_run_live());
        assert!(!WorkflowState::RunTerminal(TerminalOutcome::Completed).is_run_live());
        assert_eq!(
            WorkflowState::RunTerminal(TerminalOutcome::Aborted).to_string(),
            "run_terminal(aborted)"
        );
    }
}
