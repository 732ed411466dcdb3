pub mod types;

pub use types::{
    AutoPlan, AutoPlanRequest, ControlAck, CreatedPlan, Engagement, EngagementSpec, PlanIssue,
    PlanPreview, PlanRequest, PlanValidation, PreviewStep, RunAction, StartRunRequest,
    StartedRun,
};

use crate::approvals::{Approval, ApprovalVerdict, Quota, QuotaUpdate};
use crate::config::ClientConfig;
use crate::selection::{CatalogItem, Pack};
use crate::session::SessionContext;
use crate::shared::{ApprovalId, ClientError, ClientLog, EngagementId, PlanId, RunId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Read;

pub type EventByteStream = Box<dyn Read + Send + Sync + 'static>;

pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Blocking HTTP client for the orchestrator API.
///
/// Every call forwards the caller's [`SessionContext`] as headers and maps
/// failures into [`ClientError::Transport`] (network or non-2xx) or
/// [`ClientError::Parse`] (body not in the expected shape). Nothing is
/// retried here.
#[derive(Debug, Clone)]
pub struct ApiGateway {
    api_base: String,
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
    log: ClientLog,
}

#[derive(Debug, Deserialize)]
struct ApprovalList {
    #[serde(default)]
    approvals: Vec<Approval>,
}

#[derive(Debug, Deserialize)]
struct CatalogList {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct PackList {
    #[serde(default)]
    packs: Vec<Pack>,
}

impl ApiGateway {
    pub fn new(config: &ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        let stream_agent = ureq::AgentBuilder::new()
            .timeout_connect(config.request_timeout())
            .timeout_read(config.stream.idle_timeout())
            .build();
        Self {
            api_base: config.api_base.trim().to_string(),
            agent,
            stream_agent,
            log: ClientLog::disabled(),
        }
    }

    pub fn with_log(mut self, log: ClientLog) -> Self {
        self.log = log;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    fn authorize(request: ureq::Request, session: &SessionContext) -> ureq::Request {
        session
            .headers()
            .into_iter()
            .fold(request, |request, (name, value)| request.set(name, value))
    }

    fn fail(&self, call: &str, err: ureq::Error) -> ClientError {
        let err = match err {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                ClientError::Transport {
                    call: call.to_string(),
                    status: Some(status),
                    reason: format!("http {status}: {}", body.trim()),
                }
            }
            ureq::Error::Transport(transport) => ClientError::Transport {
                call: call.to_string(),
                status: None,
                reason: transport.to_string(),
            },
        };
        self.log.warn("gateway.request_failed", &err.to_string());
        err
    }

    fn decode<T: DeserializeOwned>(
        &self,
        call: &str,
        response: ureq::Response,
    ) -> Result<T, ClientError> {
        let body = response.into_string().map_err(|err| ClientError::Transport {
            call: call.to_string(),
            status: None,
            reason: format!("failed to read response body: {err}"),
        })?;
        serde_json::from_str(&body).map_err(|err| {
            let err = ClientError::Parse {
                call: call.to_string(),
                reason: err.to_string(),
            };
            self.log.warn("gateway.parse_failed", &err.to_string());
            err
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        call: &str,
        path: &str,
        query: &[(&str, &str)],
        session: &SessionContext,
    ) -> Result<T, ClientError> {
        let mut url = self.endpoint(path);
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{url}?{encoded}");
        }
        let response = Self::authorize(self.agent.get(&url), session)
            .call()
            .map_err(|err| self.fail(call, err))?;
        self.decode(call, response)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        call: &str,
        path: &str,
        body: &B,
        session: &SessionContext,
    ) -> Result<T, ClientError> {
        let url = self.endpoint(path);
        let body = serde_json::to_value(body).map_err(|err| ClientError::Parse {
            call: call.to_string(),
            reason: format!("failed to encode request: {err}"),
        })?;
        let response = Self::authorize(self.agent.post(&url), session)
            .send_json(body)
            .map_err(|err| self.fail(call, err))?;
        self.decode(call, response)
    }

    pub fn fetch_catalog(&self, session: &SessionContext) -> Result<Vec<CatalogItem>, ClientError> {
        let list: CatalogList = self.get_json("fetch catalog", "v1/catalog", &[], session)?;
        Ok(list.items)
    }

    pub fn fetch_packs(&self, session: &SessionContext) -> Result<Vec<Pack>, ClientError> {
        let list: PackList = self.get_json("fetch packs", "v1/catalog/packs", &[], session)?;
        Ok(list.packs)
    }

    pub fn create_engagement(
        &self,
        session: &SessionContext,
        spec: &EngagementSpec,
    ) -> Result<Engagement, ClientError> {
        self.post_json("create engagement", "v1/engagements", spec, session)
    }

    pub fn validate_plan(
        &self,
        session: &SessionContext,
        engagement_id: &EngagementId,
        request: &PlanRequest,
    ) -> Result<PlanValidation, ClientError> {
        let path = format!(
            "v2/engagements/{}/plan/validate",
            urlencoding::encode(engagement_id.as_str())
        );
        self.post_json("validate plan", &path, request, session)
    }

    pub fn preview_plan(
        &self,
        session: &SessionContext,
        engagement_id: &EngagementId,
        request: &PlanRequest,
    ) -> Result<PlanPreview, ClientError> {
        let path = format!(
            "v2/engagements/{}/plan/preview",
            urlencoding::encode(engagement_id.as_str())
        );
        self.post_json("preview plan", &path, request, session)
    }

    pub fn auto_plan(
        &self,
        session: &SessionContext,
        engagement_id: &EngagementId,
        request: &AutoPlanRequest,
    ) -> Result<AutoPlan, ClientError> {
        let path = format!(
            "v2/engagements/{}/plan/auto",
            urlencoding::encode(engagement_id.as_str())
        );
        self.post_json("auto plan", &path, request, session)
    }

    pub fn create_plan(
        &self,
        session: &SessionContext,
        engagement_id: &EngagementId,
        request: &PlanRequest,
    ) -> Result<CreatedPlan, ClientError> {
        let path = format!(
            "v1/engagements/{}/plan",
            urlencoding::encode(engagement_id.as_str())
        );
        self.post_json("create plan", &path, request, session)
    }

    pub fn start_run(
        &self,
        session: &SessionContext,
        engagement_id: &EngagementId,
        plan_id: &PlanId,
    ) -> Result<StartedRun, ClientError> {
        let body = StartRunRequest {
            engagement_id,
            plan_id,
        };
        self.post_json("start run", "v1/tests", &body, session)
    }

    pub fn control_run(
        &self,
        session: &SessionContext,
        run_id: &RunId,
        action: RunAction,
    ) -> Result<ControlAck, ClientError> {
        let path = format!("v2/runs/{}/control", urlencoding::encode(run_id.as_str()));
        self.post_json("control run", &path, &json!({ "action": action }), session)
    }

    /// Opens the run's text/event-stream body. The read side uses the stream
    /// idle timeout rather than the request timeout.
    pub fn open_event_stream(
        &self,
        session: &SessionContext,
        run_id: &RunId,
        last_event_id: Option<&str>,
    ) -> Result<EventByteStream, ClientError> {
        let url = self.endpoint(&format!(
            "v2/runs/{}/events",
            urlencoding::encode(run_id.as_str())
        ));
        let mut request = self
            .stream_agent
            .get(&url)
            .set("Accept", "text/event-stream")
            .set("Cache-Control", "no-cache");
        if let Some(last_event_id) = last_event_id.filter(|v| !v.is_empty()) {
            request = request.set(LAST_EVENT_ID_HEADER, last_event_id);
        }
        let response = Self::authorize(request, session)
            .call()
            .map_err(|err| self.fail("subscribe run events", err))?;
        Ok(response.into_reader())
    }

    pub fn get_quota(
        &self,
        session: &SessionContext,
        tenant_id: &str,
    ) -> Result<Option<Quota>, ClientError> {
        let call = "get quota";
        let path = format!("v2/quotas/{}", urlencoding::encode(tenant_id));
        let raw: Value = self.get_json(call, &path, &[], session)?;
        Quota::from_response(tenant_id, raw).map_err(|reason| ClientError::Parse {
            call: call.to_string(),
            reason,
        })
    }

    pub fn set_quota(
        &self,
        session: &SessionContext,
        update: &QuotaUpdate,
    ) -> Result<Value, ClientError> {
        self.post_json("set quota", "v2/quotas", update, session)
    }

    pub fn request_approval(
        &self,
        session: &SessionContext,
        engagement_id: &EngagementId,
        reason: &str,
    ) -> Result<Approval, ClientError> {
        let body = json!({
            "tenant_id": session.tenant_id(),
            "engagement_id": engagement_id,
            "reason": reason,
        });
        let mut approval: Approval =
            self.post_json("request approval", "v2/approvals", &body, session)?;
        if approval.engagement_id.is_none() {
            approval.engagement_id = Some(engagement_id.to_string());
        }
        if approval.reason.is_empty() {
            approval.reason = reason.to_string();
        }
        Ok(approval)
    }

    pub fn decide_approval(
        &self,
        session: &SessionContext,
        approval_id: &ApprovalId,
        verdict: ApprovalVerdict,
    ) -> Result<Value, ClientError> {
        let path = format!(
            "v2/approvals/{}/decide",
            urlencoding::encode(approval_id.as_str())
        );
        let body = json!({
            "tenant_id": session.tenant_id(),
            "decision": verdict.decision(),
        });
        self.post_json("decide approval", &path, &body, session)
    }

    pub fn list_approvals(
        &self,
        session: &SessionContext,
        engagement_id: Option<&EngagementId>,
    ) -> Result<Vec<Approval>, ClientError> {
        let query: Vec<(&str, &str)> = engagement_id
            .map(|id| vec![("engagement_id", id.as_str())])
            .unwrap_or_default();
        let list: ApprovalList = self.get_json("list approvals", "v2/approvals", &query, session)?;
        Ok(list.approvals)
    }
}
