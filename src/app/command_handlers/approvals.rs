use crate::app::command_support::{
    client_log, gateway, load_config, map_client_err, require_session, ParsedArgs,
};
use crate::approvals::{ApprovalGate, ApprovalVerdict};
use crate::shared::{ApprovalId, EngagementId};

pub fn cmd_approvals(args: &[String]) -> Result<String, String> {
    let parsed = ParsedArgs::parse(args)?;
    parsed.reject_unknown(&["engagement"])?;
    let positionals: Vec<&str> = parsed.positionals.iter().map(String::as_str).collect();
    let config = load_config(&parsed)?;
    let session = require_session(&config)?;
    let gateway = gateway(&config);
    let mut gate = ApprovalGate::new(client_log(&config));

    match positionals.as_slice() {
        [] | ["list"] => {
            let engagement_id = parsed
                .flag("engagement")
                .map(EngagementId::parse)
                .transpose()?;
            gate.refresh(&gateway, &session, engagement_id.as_ref())
                .map_err(map_client_err)?;
            if gate.approvals().is_empty() {
                return Ok("no approvals".to_string());
            }
            Ok(gate
                .approvals()
                .iter()
                .map(|approval| {
                    format!(
                        "{} {} {} {}",
                        approval.id,
                        approval.decision,
                        approval.engagement_id.as_deref().unwrap_or("-"),
                        approval.reason
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ["request", engagement, reason @ ..] if !reason.is_empty() => {
            let engagement_id = EngagementId::parse(engagement)?;
            let approval = gate
                .request_approval(&gateway, &session, &engagement_id, &reason.join(" "))
                .map_err(map_client_err)?;
            Ok(format!("approval {} requested ({})", approval.id, approval.decision))
        }
        [verb @ ("approve" | "reject"), id] => {
            let verdict = if *verb == "approve" {
                ApprovalVerdict::Approve
            } else {
                ApprovalVerdict::Reject
            };
            let approval_id = ApprovalId::parse(id)?;
            let decision = gate
                .decide_approval(&gateway, &session, &approval_id, verdict)
                .map_err(map_client_err)?;
            Ok(format!("approval {approval_id} {decision}"))
        }
        _ => Err(
            "usage: approvals [list] [--engagement <id>] | approvals request <engagement> <reason> | approvals approve|reject <id>"
                .to_string(),
        ),
    }
}
