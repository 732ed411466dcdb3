use crate::gateway::ApiGateway;
use crate::session::SessionContext;
use crate::shared::{ApprovalId, ClientError, ClientLog, EngagementId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    #[default]
    Pending,
    Approved,
    /// `denied` on the wire.
    #[serde(rename = "denied", alias = "rejected")]
    Rejected,
}

impl ApprovalDecision {
    pub fn is_decided(self) -> bool {
        !matches!(self, ApprovalDecision::Pending)
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalDecision::Pending => write!(f, "pending"),
            ApprovalDecision::Approved => write!(f, "approved"),
            ApprovalDecision::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalVerdict {
    Approve,
    Reject,
}

impl ApprovalVerdict {
    pub fn decision(self) -> ApprovalDecision {
        match self {
            ApprovalVerdict::Approve => ApprovalDecision::Approved,
            ApprovalVerdict::Reject => ApprovalDecision::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    #[serde(default)]
    pub engagement_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "status", alias = "decision", default)]
    pub decision: ApprovalDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub tenant_id: String,
    pub monthly_budget: i64,
    pub per_plan_cap: i64,
    #[serde(default)]
    pub consumed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUpdate {
    pub tenant_id: String,
    pub monthly_budget: i64,
    pub per_plan_cap: i64,
}

impl Quota {
    /// Accepts both response shapes the orchestrator serves: a flat quota
    /// record, or `{"quota": {...} | null, "used": n}`. `None` means no
    /// quota is configured for the tenant.
    pub fn from_response(tenant_id: &str, raw: Value) -> Result<Option<Self>, String> {
        let Value::Object(mut fields) = raw else {
            return Err("quota response is not an object".to_string());
        };
        let (record, used) = match fields.remove("quota") {
            Some(Value::Null) => return Ok(None),
            Some(Value::Object(inner)) => (inner, fields.get("used").cloned()),
            Some(other) => return Err(format!("unexpected `quota` value: {other}")),
            None => {
                let used = fields.get("used").cloned();
                (fields, used)
            }
        };
        let number = |key: &str| -> Result<i64, String> {
            record
                .get(key)
                .and_then(Value::as_i64)
                .ok_or_else(|| format!("quota field `{key}` is missing or not an integer"))
        };
        let consumed = record
            .get("consumed")
            .and_then(Value::as_i64)
            .or_else(|| used.as_ref().and_then(Value::as_i64))
            .unwrap_or(0);
        Ok(Some(Quota {
            tenant_id: record
                .get("tenant_id")
                .and_then(Value::as_str)
                .unwrap_or(tenant_id)
                .to_string(),
            monthly_budget: number("monthly_budget")?,
            per_plan_cap: number("per_plan_cap")?,
            consumed,
        }))
    }

    pub fn remaining(&self) -> i64 {
        self.monthly_budget - self.consumed
    }
}

/// Pull-refreshed view of the tenant's quota and the engagement's
/// approvals. Purely informational: the orchestrator enforces policy and
/// nothing here blocks a workflow transition.
#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    quota: Option<Quota>,
    approvals: Vec<Approval>,
    decided: BTreeMap<ApprovalId, ApprovalDecision>,
    log: ClientLog,
}

impl ApprovalGate {
    pub fn new(log: ClientLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn quota(&self) -> Option<&Quota> {
        self.quota.as_ref()
    }

    pub fn approvals(&self) -> &[Approval] {
        &self.approvals
    }

    pub fn approval(&self, approval_id: &ApprovalId) -> Option<&Approval> {
        self.approvals.iter().find(|a| &a.id == approval_id)
    }

    /// Refetches quota and approvals. The cache is replaced only when both
    /// calls succeed.
    pub fn refresh(
        &mut self,
        gateway: &ApiGateway,
        session: &SessionContext,
        engagement_id: Option<&EngagementId>,
    ) -> Result<(), ClientError> {
        let quota = gateway.get_quota(session, session.tenant_id())?;
        let approvals = gateway.list_approvals(session, engagement_id)?;
        for approval in approvals.iter().filter(|a| a.decision.is_decided()) {
            self.decided.insert(approval.id.clone(), approval.decision);
        }
        self.quota = quota;
        self.approvals = approvals;
        Ok(())
    }

    pub fn request_approval(
        &mut self,
        gateway: &ApiGateway,
        session: &SessionContext,
        engagement_id: &EngagementId,
        reason: &str,
    ) -> Result<Approval, ClientError> {
        let approval = gateway.request_approval(session, engagement_id, reason)?;
        self.log.info(
            "approval.requested",
            &format!("approval {} requested for {engagement_id}", approval.id),
        );
        self.approvals.retain(|a| a.id != approval.id);
        self.approvals.insert(0, approval.clone());
        Ok(approval)
    }

    /// Decides an approval once. A second decision for the same id fails
    /// with [`ClientError::AlreadyDecided`] without contacting the server.
    pub fn decide_approval(
        &mut self,
        gateway: &ApiGateway,
        session: &SessionContext,
        approval_id: &ApprovalId,
        verdict: ApprovalVerdict,
    ) -> Result<ApprovalDecision, ClientError> {
        if let Some(decision) = self.known_decision(approval_id) {
            return Err(ClientError::AlreadyDecided {
                approval_id: approval_id.to_string(),
                decision,
            });
        }
        gateway.decide_approval(session, approval_id, verdict)?;
        let decision = verdict.decision();
        self.decided.insert(approval_id.clone(), decision);
        if let Some(cached) = self.approvals.iter_mut().find(|a| &a.id == approval_id) {
            cached.decision = decision;
        }
        self.log.info(
            "approval.decided",
            &format!("approval {approval_id} decided as {decision}"),
        );
        Ok(decision)
    }

    pub fn set_quota(
        &mut self,
        gateway: &ApiGateway,
        session: &SessionContext,
        monthly_budget: i64,
        per_plan_cap: i64,
    ) -> Result<(), ClientError> {
        let update = QuotaUpdate {
            tenant_id: session.tenant_id().to_string(),
            monthly_budget,
            per_plan_cap,
        };
        gateway.set_quota(session, &update)?;
        let consumed = self.quota.as_ref().map(|q| q.consumed).unwrap_or(0);
        self.quota = Some(Quota {
            tenant_id: update.tenant_id,
            monthly_budget,
            per_plan_cap,
            consumed,
        });
        Ok(())
    }

    fn known_decision(&self, approval_id: &ApprovalId) -> Option<ApprovalDecision> {
        self.decided.get(approval_id).copied().or_else(|| {
            self.approval(approval_id)
                .map(|a| a.decision)
                .filter(|d| d.is_decided())
        })
    }
}
