use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_EVENT_TYPE: &str = "message";

pub mod event_types {
    pub const RUN_QUEUED: &str = "run.queued";
    pub const RUN_STARTED: &str = "run.started";
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const RUN_PAUSED: &str = "run.paused";
    pub const RUN_RESUMED: &str = "run.resumed";
    pub const RUN_ABORTED: &str = "run.aborted";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_FAILED: &str = "run.failed";
    pub const KEEPALIVE: &str = "keepalive";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Structured(Value),
    /// Data that was not valid JSON, kept verbatim.
    Raw(String),
}

impl EventPayload {
    pub fn from_data(data: &str) -> Self {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => EventPayload::Structured(value),
            Err(_) => EventPayload::Raw(data.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EventPayload::Structured(value) => Some(value),
            EventPayload::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            EventPayload::Raw(raw) => Some(raw),
            EventPayload::Structured(_) => None,
        }
    }

    fn str_field(&self, key: &str) -> Option<String> {
        self.as_json()
            .and_then(|value| value.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// One decoded frame of a run's event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event_type: String,
    pub payload: EventPayload,
    /// Position in the subscription's delivery order, from 0 with no gaps.
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Event {
    pub fn kind(&self) -> RunEvent {
        RunEvent::from_event(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            event_types::RUN_ABORTED | event_types::RUN_COMPLETED | event_types::RUN_FAILED
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunQueued,
    RunStarted,
    StepStarted {
        test_id: Option<String>,
    },
    StepCompleted {
        test_id: Option<String>,
        result: Option<String>,
    },
    RunPaused,
    RunResumed,
    RunAborted,
    RunCompleted,
    RunFailed {
        message: Option<String>,
    },
    Keepalive,
    Unknown {
        event_type: String,
        payload: EventPayload,
    },
}

impl RunEvent {
    pub fn from_event(event: &Event) -> Self {
        let payload = &event.payload;
        match event.event_type.as_str() {
            event_types::RUN_QUEUED => RunEvent::RunQueued,
            event_types::RUN_STARTED => RunEvent::RunStarted,
            event_types::STEP_STARTED => RunEvent::StepStarted {
                test_id: payload.str_field("test_id"),
            },
            event_types::STEP_COMPLETED => RunEvent::StepCompleted {
                test_id: payload.str_field("test_id"),
                result: payload.str_field("result"),
            },
            event_types::RUN_PAUSED => RunEvent::RunPaused,
            event_types::RUN_RESUMED => RunEvent::RunResumed,
            event_types::RUN_ABORTED => RunEvent::RunAborted,
            event_types::RUN_COMPLETED => RunEvent::RunCompleted,
            event_types::RUN_FAILED => RunEvent::RunFailed {
                message: payload.str_field("message"),
            },
            event_types::KEEPALIVE => RunEvent::Keepalive,
            other => RunEvent::Unknown {
                event_type: other.to_string(),
                payload: payload.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Aborted,
    Completed,
    Failed,
}

impl RunStatus {
    /// Projects a run status from its event log. Control-call
    /// acknowledgements never feed into this.
    pub fn fold<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        events
            .into_iter()
            .fold(RunStatus::Pending, |status, event| status.apply(&event.kind()))
    }

    pub fn apply(self, event: &RunEvent) -> Self {
        if self.is_terminal() {
            return self;
        }
        match event {
            RunEvent::RunQueued => RunStatus::Pending,
            RunEvent::RunStarted
            | RunEvent::RunResumed
            | RunEvent::StepStarted { .. }
            | RunEvent::StepCompleted { .. } => RunStatus::Running,
            RunEvent::RunPaused => RunStatus::Paused,
            RunEvent::RunAborted => RunStatus::Aborted,
            RunEvent::RunCompleted => RunStatus::Completed,
            RunEvent::RunFailed { .. } => RunStatus::Failed,
            RunEvent::Keepalive | RunEvent::Unknown { .. } => self,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Aborted | RunStatus::Completed | RunStatus::Failed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}
