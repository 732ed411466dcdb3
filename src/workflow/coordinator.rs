use super::queries::{LatestResponse, PendingQuery, QueryKind, QueryOutcome};
use super::state::WorkflowState;
use crate::approvals::{Approval, ApprovalDecision, ApprovalGate, ApprovalVerdict};
use crate::config::{ClientConfig, StreamConfig};
use crate::gateway::{
    ApiGateway, AutoPlanRequest, ControlAck, Engagement, EngagementSpec, PlanPreview, PlanRequest,
    PlanValidation, RunAction,
};
use crate::selection::{SelectionEntry, SelectionModel};
use crate::session::SessionContext;
use crate::shared::{ApprovalId, ClientError, ClientLog, EngagementId, PlanId, RunId};
use crate::stream::{Event, EventSubscription, RunStatus, StreamCursor, StreamMessage};
use serde_json::json;
use std::time::{Duration, Instant};

const WAIT_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub id: PlanId,
    pub engagement_id: EngagementId,
    pub selected_tests: Vec<SelectionEntry>,
    pub risk_tier: String,
    pub plan_hash: Option<String>,
}

/// A started run and everything its subscription has delivered so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    id: RunId,
    plan_id: PlanId,
    events: Vec<Event>,
    status: RunStatus,
    stream_ended: bool,
    disconnect: Option<String>,
}

impl Run {
    fn new(id: RunId, plan_id: PlanId) -> Self {
        Self {
            id,
            plan_id,
            events: Vec::new(),
            status: RunStatus::Pending,
            stream_ended: false,
            disconnect: None,
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn plan_id(&self) -> &PlanId {
        &self.plan_id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Folded from the event log only.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stream_ended(&self) -> bool {
        self.stream_ended
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect.as_deref()
    }

    fn record(&mut self, event: Event) {
        self.status = self.status.apply(&event.kind());
        self.events.push(event);
    }
}

/// Drives one engagement from creation through plan and run.
///
/// All state lives here and is mutated only through `&mut self`. The run's
/// event stream is read on a background thread and folded in when the
/// caller polls.
#[derive(Debug)]
pub struct WorkflowCoordinator {
    gateway: ApiGateway,
    session: SessionContext,
    stream_config: StreamConfig,
    log: ClientLog,
    selection: SelectionModel,
    approvals: ApprovalGate,
    state: WorkflowState,
    engagement: Option<Engagement>,
    plan: Option<Plan>,
    run: Option<Run>,
    subscription: Option<EventSubscription>,
    validation: LatestResponse<PlanValidation>,
    preview: LatestResponse<PlanPreview>,
}

impl WorkflowCoordinator {
    pub fn new(gateway: ApiGateway, session: SessionContext, stream_config: StreamConfig) -> Self {
        Self {
            gateway,
            session,
            stream_config,
            log: ClientLog::disabled(),
            selection: SelectionModel::new(),
            approvals: ApprovalGate::default(),
            state: WorkflowState::Idle,
            engagement: None,
            plan: None,
            run: None,
            subscription: None,
            validation: LatestResponse::new(QueryKind::Validate),
            preview: LatestResponse::new(QueryKind::Preview),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let session = config.session.clone().ok_or_else(|| {
            ClientError::Config("`session` must be configured to drive a workflow".to_string())
        })?;
        let log = config
            .log_path
            .clone()
            .map(ClientLog::to_file)
            .unwrap_or_default();
        let gateway = ApiGateway::new(config).with_log(log.clone());
        Ok(Self::new(gateway, session, config.stream.clone()).with_log(log))
    }

    pub fn with_log(mut self, log: ClientLog) -> Self {
        self.approvals = ApprovalGate::new(log.clone());
        self.log = log;
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Replaces the session for every later call. A subscription already
    /// open keeps the headers it was opened with.
    pub fn set_session(&mut self, session: SessionContext) {
        self.log.info(
            "workflow.session_changed",
            &format!("tenant set to {}", session.tenant_id()),
        );
        self.session = session;
    }

    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionModel {
        &mut self.selection
    }

    pub fn engagement(&self) -> Option<&Engagement> {
        self.engagement.as_ref()
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn run(&self) -> Option<&Run> {
        self.run.as_ref()
    }

    pub fn has_live_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn latest_validation(&self) -> Option<&PlanValidation> {
        self.validation.current()
    }

    pub fn latest_preview(&self) -> Option<&PlanPreview> {
        self.preview.current()
    }

    pub fn approvals(&self) -> &ApprovalGate {
        &self.approvals
    }

    fn invalid(&self, operation: &'static str) -> ClientError {
        ClientError::InvalidStateTransition {
            operation,
            state: self.state,
        }
    }

    fn require_engagement(&self, operation: &'static str) -> Result<EngagementId, ClientError> {
        self.engagement
            .as_ref()
            .map(|engagement| engagement.id.clone())
            .ok_or_else(|| self.invalid(operation))
    }

    fn plan_request(&self, risk_tier: &str) -> PlanRequest {
        PlanRequest {
            selected_tests: self.selection.to_plan_request(),
            agents: json!({ "strategy": "recommended" }),
            risk_tier: risk_tier.to_string(),
        }
    }

    fn cancel_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
            self.log.info(
                "stream.cancelled",
                &format!("subscription for run {} cancelled", subscription.run_id()),
            );
        }
    }

    pub fn create_engagement(&mut self, spec: &EngagementSpec) -> Result<Engagement, ClientError> {
        if self.state.is_run_live() {
            return Err(self.invalid("create engagement"));
        }
        let engagement = self.gateway.create_engagement(&self.session, spec)?;
        self.cancel_subscription();
        self.plan = None;
        self.run = None;
        self.validation.invalidate();
        self.preview.invalidate();
        self.engagement = Some(engagement.clone());
        self.state = WorkflowState::EngagementCreated;
        self.log.info(
            "workflow.engagement_created",
            &format!("engagement {} created", engagement.id),
        );
        Ok(engagement)
    }

    pub fn validate_plan(
        &mut self,
        risk_tier: &str,
    ) -> Result<QueryOutcome<PlanValidation>, ClientError> {
        let pending = self.spawn_validate_plan(risk_tier)?;
        self.resolve_validation(pending)
    }

    pub fn preview_plan(&mut self, risk_tier: &str) -> Result<QueryOutcome<PlanPreview>, ClientError> {
        let pending = self.spawn_preview_plan(risk_tier)?;
        self.resolve_preview(pending)
    }

    /// Issues a validate call in the background. Any number may be in
    /// flight; only the most recently issued one can update
    /// [`latest_validation`](Self::latest_validation).
    pub fn spawn_validate_plan(
        &mut self,
        risk_tier: &str,
    ) -> Result<PendingQuery<PlanValidation>, ClientError> {
        let engagement_id = self.require_engagement("validate plan")?;
        let request = self.plan_request(risk_tier);
        let ticket = self.validation.issue();
        let gateway = self.gateway.clone();
        let session = self.session.clone();
        Ok(PendingQuery::spawn(QueryKind::Validate, ticket, move || {
            gateway.validate_plan(&session, &engagement_id, &request)
        }))
    }

    pub fn spawn_preview_plan(
        &mut self,
        risk_tier: &str,
    ) -> Result<PendingQuery<PlanPreview>, ClientError> {
        let engagement_id = self.require_engagement("preview plan")?;
        let request = self.plan_request(risk_tier);
        let ticket = self.preview.issue();
        let gateway = self.gateway.clone();
        let session = self.session.clone();
        Ok(PendingQuery::spawn(QueryKind::Preview, ticket, move || {
            gateway.preview_plan(&session, &engagement_id, &request)
        }))
    }

    /// Waits for a background validate call. A superseded response, failed
    /// or not, is dropped and reported as [`QueryOutcome::Superseded`].
    pub fn resolve_validation(
        &mut self,
        pending: PendingQuery<PlanValidation>,
    ) -> Result<QueryOutcome<PlanValidation>, ClientError> {
        let (ticket, result) = pending.wait();
        resolve_latest(&mut self.validation, &self.log, ticket, result)
    }

    pub fn resolve_preview(
        &mut self,
        pending: PendingQuery<PlanPreview>,
    ) -> Result<QueryOutcome<PlanPreview>, ClientError> {
        let (ticket, result) = pending.wait();
        resolve_latest(&mut self.preview, &self.log, ticket, result)
    }

    /// Asks the orchestrator to recommend tests for `packs` and adds them to
    /// the selection. Returns how many were newly selected.
    pub fn auto_plan(&mut self, packs: &[String], risk_tier: &str) -> Result<usize, ClientError> {
        let engagement_id = self.require_engagement("auto plan")?;
        let request = AutoPlanRequest {
            preferences: json!({ "packs": packs }),
            risk_tier: risk_tier.to_string(),
        };
        let recommended = self
            .gateway
            .auto_plan(&self.session, &engagement_id, &request)?;
        let added = self.selection.select_many(
            recommended
                .selected_tests
                .iter()
                .map(|entry| entry.test_id.as_str()),
        );
        self.log.info(
            "workflow.auto_plan",
            &format!("{added} recommended tests added for {engagement_id}"),
        );
        Ok(added)
    }

    pub fn create_plan(&mut self, risk_tier: &str) -> Result<Plan, ClientError> {
        let engagement_id = self.require_engagement("create plan")?;
        if self.state.is_run_live() {
            return Err(self.invalid("create plan"));
        }
        if self.selection.is_empty() {
            return Err(ClientError::EmptySelection);
        }
        let request = self.plan_request(risk_tier);
        let created = self
            .gateway
            .create_plan(&self.session, &engagement_id, &request)?;
        let plan = Plan {
            id: created.id,
            engagement_id,
            selected_tests: request.selected_tests,
            risk_tier: request.risk_tier,
            plan_hash: created.plan_hash,
        };
        self.cancel_subscription();
        self.run = None;
        self.plan = Some(plan.clone());
        self.state = WorkflowState::PlanCreated;
        self.log.info(
            "workflow.plan_created",
            &format!(
                "plan {} created with {} tests",
                plan.id,
                plan.selected_tests.len()
            ),
        );
        Ok(plan)
    }

    /// Starts the current plan and subscribes to the new run's events. Any
    /// earlier subscription is cancelled before the new one opens.
    pub fn start_run(&mut self) -> Result<RunId, ClientError> {
        if self.state != WorkflowState::PlanCreated {
            return Err(self.invalid("start run"));
        }
        let (engagement_id, plan_id) = match (self.engagement.as_ref(), self.plan.as_ref()) {
            (Some(engagement), Some(plan)) => (engagement.id.clone(), plan.id.clone()),
            _ => return Err(self.invalid("start run")),
        };
        let started = self
            .gateway
            .start_run(&self.session, &engagement_id, &plan_id)?;
        self.cancel_subscription();
        self.subscription = Some(EventSubscription::open(
            &self.gateway,
            &self.session,
            &started.id,
            &self.stream_config,
            self.log.clone(),
        ));
        self.run = Some(Run::new(started.id.clone(), plan_id));
        self.state = WorkflowState::RunStarted;
        self.log.info(
            "workflow.run_started",
            &format!("run {} started", started.id),
        );
        Ok(started.id)
    }

    /// Sends a control intent. The displayed status changes only when the
    /// matching event arrives on the stream.
    pub fn control_run(&mut self, action: RunAction) -> Result<ControlAck, ClientError> {
        let (operation, allowed) = match action {
            RunAction::Pause => ("pause run", self.state == WorkflowState::RunStarted),
            RunAction::Resume => ("resume run", self.state == WorkflowState::RunPaused),
            RunAction::Abort => ("abort run", self.state.is_run_live()),
        };
        let run_id = match self.run.as_ref() {
            Some(run) if allowed => run.id.clone(),
            _ => return Err(self.invalid(operation)),
        };
        let ack = self.gateway.control_run(&self.session, &run_id, action)?;
        self.log.info(
            "workflow.control_sent",
            &format!("{action} sent for run {run_id}"),
        );
        Ok(ack)
    }

    /// Folds every event received so far into the run. Returns the new
    /// events; a lost connection is returned once as
    /// [`ClientError::StreamDisconnected`], with the events that preceded it
    /// already in [`Run::events`].
    pub fn poll_events(&mut self) -> Result<Vec<Event>, ClientError> {
        let messages = match self.subscription.as_mut() {
            Some(subscription) => subscription.drain(),
            None => return Ok(Vec::new()),
        };
        let mut delivered = Vec::new();
        for message in messages {
            if let Some(event) = self.absorb(message)? {
                delivered.push(event);
            }
        }
        Ok(delivered)
    }

    /// Blocks until the run is terminal, its stream has finished, or
    /// `timeout` elapses, and returns the run status at that point.
    pub fn wait_for_terminal(&mut self, timeout: Duration) -> Result<RunStatus, ClientError> {
        // An unrepresentable deadline waits without limit.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let Some(run) = self.run.as_ref() else {
                return Err(self.invalid("wait for run"));
            };
            if run.status.is_terminal() {
                return Ok(run.status);
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => WAIT_STEP,
            };
            let Some(subscription) = self.subscription.as_mut() else {
                return Ok(run.status);
            };
            if remaining.is_zero() {
                return Ok(run.status);
            }
            if let Some(message) = subscription.next_timeout(remaining.min(WAIT_STEP)) {
                self.absorb(message)?;
            }
        }
    }

    /// Opens a fresh subscription for a live run whose stream was lost. The
    /// orchestrator replays the run from the start; events already in the
    /// log are skipped by id and numbering continues after the last one.
    pub fn resubscribe(&mut self) -> Result<(), ClientError> {
        if !self.state.is_run_live() || self.subscription.is_some() {
            return Err(self.invalid("resubscribe"));
        }
        let Some(run) = self.run.as_mut() else {
            return Err(ClientError::InvalidStateTransition {
                operation: "resubscribe",
                state: self.state,
            });
        };
        run.disconnect = None;
        let cursor = StreamCursor::after(&run.events);
        self.subscription = Some(EventSubscription::resume(
            &self.gateway,
            &self.session,
            &run.id,
            &self.stream_config,
            self.log.clone(),
            cursor,
        ));
        self.log.info(
            "stream.resubscribed",
            &format!("run {} resubscribed after {} events", run.id, run.events.len()),
        );
        Ok(())
    }

    pub fn cancel_stream(&mut self) {
        self.cancel_subscription();
    }

    pub fn refresh_approvals(&mut self) -> Result<(), ClientError> {
        let engagement_id = self.engagement.as_ref().map(|engagement| engagement.id.clone());
        self.approvals
            .refresh(&self.gateway, &self.session, engagement_id.as_ref())
    }

    pub fn request_approval(&mut self, reason: &str) -> Result<Approval, ClientError> {
        let engagement_id = self.require_engagement("request approval")?;
        self.approvals
            .request_approval(&self.gateway, &self.session, &engagement_id, reason)
    }

    pub fn decide_approval(
        &mut self,
        approval_id: &ApprovalId,
        verdict: ApprovalVerdict,
    ) -> Result<ApprovalDecision, ClientError> {
        self.approvals
            .decide_approval(&self.gateway, &self.session, approval_id, verdict)
    }

    pub fn set_quota(&mut self, monthly_budget: i64, per_plan_cap: i64) -> Result<(), ClientError> {
        self.approvals
            .set_quota(&self.gateway, &self.session, monthly_budget, per_plan_cap)
    }

    fn absorb(&mut self, message: StreamMessage) -> Result<Option<Event>, ClientError> {
        let Some(run) = self.run.as_mut() else {
            return Ok(None);
        };
        match message {
            StreamMessage::Event(event) => {
                run.record(event.clone());
                self.state = WorkflowState::from_run_status(run.status);
                if event.is_terminal() {
                    run.stream_ended = true;
                    self.subscription = None;
                }
                Ok(Some(event))
            }
            StreamMessage::Ended => {
                run.stream_ended = true;
                self.subscription = None;
                Ok(None)
            }
            StreamMessage::Disconnected { reason } => {
                run.disconnect = Some(reason.clone());
                self.subscription = None;
                Err(ClientError::StreamDisconnected {
                    run_id: run.id.to_string(),
                    reason,
                })
            }
        }
    }
}

fn resolve_latest<T: Clone>(
    slot: &mut LatestResponse<T>,
    log: &ClientLog,
    ticket: u64,
    result: Result<T, ClientError>,
) -> Result<QueryOutcome<T>, ClientError> {
    if let Err(stale) = slot.check(ticket) {
        log.info("workflow.response_discarded", &stale.to_string());
        return Ok(QueryOutcome::Superseded);
    }
    let value = result?;
    slot.accept(ticket, value).map(QueryOutcome::Applied)
}

