use crate::selection::SelectionEntry;
use crate::shared::{EngagementId, PlanId, RunId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementSpec {
    pub tenant_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub engagement_type: String,
    #[serde(default)]
    pub scope: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub id: EngagementId,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub engagement_type: String,
    #[serde(default)]
    pub scope: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRequest {
    pub selected_tests: Vec<SelectionEntry>,
    pub agents: Value,
    pub risk_tier: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanIssue {
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub reason: String,
}

/// Response of the validate pre-check. The orchestrator reports cost either
/// as a flat `estimated_cost` or inside `estimate.cost_units`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanValidation {
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub errors: Vec<PlanIssue>,
    #[serde(default)]
    pub estimate: Option<Value>,
    #[serde(default)]
    pub quota: Option<Value>,
}

impl PlanValidation {
    pub fn estimated_cost(&self) -> Option<f64> {
        self.estimated_cost.or_else(|| {
            self.estimate
                .as_ref()
                .and_then(|estimate| estimate.get("cost_units"))
                .and_then(Value::as_f64)
        })
    }

    pub fn is_ok(&self) -> bool {
        self.ok.unwrap_or(self.errors.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreviewStep {
    pub test_id: String,
    #[serde(default)]
    pub tool_adapter: Option<String>,
    #[serde(default)]
    pub risk_tier: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanPreview {
    #[serde(default)]
    pub steps: Vec<PreviewStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoPlanRequest {
    pub preferences: Value,
    pub risk_tier: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AutoPlan {
    #[serde(default)]
    pub selected_tests: Vec<SelectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedPlan {
    pub id: PlanId,
    #[serde(default)]
    pub plan_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartRunRequest<'a> {
    pub engagement_id: &'a EngagementId,
    pub plan_id: &'a PlanId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartedRun {
    pub id: RunId,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunAction {
    Pause,
    Resume,
    Abort,
}

impl std::fmt::Display for RunAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunAction::Pause => write!(f, "pause"),
            RunAction::Resume => write!(f, "resume"),
            RunAction::Abort => write!(f, "abort"),
        }
    }
}

/// Acknowledgement of a control call. Carries the server's view for display
/// only; run status is never taken from it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ControlAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub status: Option<String>,
}
