use crate::app::command_support::{
    client_log, gateway, load_config, map_client_err, require_session, ParsedArgs,
};
use crate::gateway::EngagementSpec;
use crate::selection::ParamsEdit;
use crate::shared::ClientError;
use crate::stream::Event;
use crate::workflow::WorkflowCoordinator;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_ENGAGEMENT_TYPE: &str = "network";
const DEFAULT_RISK_TIER: &str = "safe_active";
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

const RUN_FLAGS: &[&str] = &[
    "name",
    "type",
    "scope",
    "risk-tier",
    "test",
    "pack",
    "auto-pack",
    "params",
    "timeout-secs",
];

pub fn cmd_run(args: &[String]) -> Result<String, String> {
    let parsed = ParsedArgs::parse(args)?;
    parsed.reject_unknown(RUN_FLAGS)?;
    if let Some(extra) = parsed.positionals.first() {
        return Err(format!("unexpected argument `{extra}`"));
    }
    let name = parsed
        .flag("name")
        .ok_or_else(|| "run requires --name <engagement name>".to_string())?;
    let scope = match parsed.flag("scope") {
        Some(raw) => serde_json::from_str::<Value>(raw)
            .map_err(|e| format!("--scope is not valid JSON: {e}"))?,
        None => json!({}),
    };
    let risk_tier = parsed.flag("risk-tier").unwrap_or(DEFAULT_RISK_TIER);
    let timeout_secs = match parsed.flag("timeout-secs") {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("--timeout-secs must be a number, got `{raw}`"))?,
        None => DEFAULT_RUN_TIMEOUT_SECS,
    };

    let config = load_config(&parsed)?;
    let session = require_session(&config)?;
    let gateway = gateway(&config);
    let mut coordinator =
        WorkflowCoordinator::new(gateway.clone(), session.clone(), config.stream.clone())
            .with_log(client_log(&config));
    let mut lines = Vec::new();

    let engagement = coordinator
        .create_engagement(&EngagementSpec {
            tenant_id: session.tenant_id().to_string(),
            name: name.to_string(),
            engagement_type: parsed
                .flag("type")
                .unwrap_or(DEFAULT_ENGAGEMENT_TYPE)
                .to_string(),
            scope,
        })
        .map_err(map_client_err)?;
    lines.push(format!("engagement: {}", engagement.id));

    coordinator
        .selection_mut()
        .select_many(parsed.flag_all("test"));
    let pack_ids = parsed.flag_all("pack");
    if !pack_ids.is_empty() {
        let packs = gateway.fetch_packs(&session).map_err(map_client_err)?;
        for pack_id in pack_ids {
            let pack = packs
                .iter()
                .find(|pack| pack.id == pack_id)
                .ok_or_else(|| format!("unknown pack `{pack_id}`"))?;
            coordinator.selection_mut().apply_pack(pack);
        }
    }
    let auto_packs: Vec<String> = parsed
        .flag_all("auto-pack")
        .into_iter()
        .map(str::to_string)
        .collect();
    if !auto_packs.is_empty() {
        let added = coordinator
            .auto_plan(&auto_packs, risk_tier)
            .map_err(map_client_err)?;
        lines.push(format!("auto plan: {added} tests recommended"));
    }
    for raw in parsed.flag_all("params") {
        let (test_id, text) = raw
            .split_once('=')
            .ok_or_else(|| "--params requires <test id>=<json>".to_string())?;
        if let ParamsEdit::Invalid { reason } = coordinator.selection_mut().set_params(test_id, text)
        {
            return Err(format!("params for `{test_id}` are invalid: {reason}"));
        }
    }

    if let Some(validation) = coordinator
        .validate_plan(risk_tier)
        .map_err(map_client_err)?
        .applied()
    {
        let cost = validation
            .estimated_cost()
            .map(|cost| cost.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(format!(
            "validate: {} (estimated cost {cost})",
            if validation.is_ok() { "ok" } else { "rejected" }
        ));
        for issue in &validation.errors {
            lines.push(format!(
                "  {}: {}",
                issue.test_id.as_deref().unwrap_or("plan"),
                issue.reason
            ));
        }
    }

    let plan = coordinator.create_plan(risk_tier).map_err(map_client_err)?;
    lines.push(format!(
        "plan: {} ({} tests)",
        plan.id,
        plan.selected_tests.len()
    ));
    let run_id = coordinator.start_run().map_err(map_client_err)?;
    lines.push(format!("run: {run_id}"));

    let outcome = coordinator.wait_for_terminal(Duration::from_secs(timeout_secs));
    if let Some(run) = coordinator.run() {
        lines.extend(run.events().iter().map(render_event));
    }
    match outcome {
        Ok(status) => {
            lines.push(format!("status: {status}"));
            Ok(lines.join("\n"))
        }
        Err(err @ ClientError::StreamDisconnected { .. }) => {
            lines.push(err.to_string());
            Err(lines.join("\n"))
        }
        Err(err) => Err(map_client_err(err)),
    }
}

fn render_event(event: &Event) -> String {
    let payload = match event.payload.as_json() {
        Some(value) => value.to_string(),
        None => event.payload.as_raw().unwrap_or_default().to_string(),
    };
    format!("[{}] {} {payload}", event.sequence, event.event_type)
}
