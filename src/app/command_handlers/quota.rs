use crate::app::command_support::{
    client_log, gateway, load_config, map_client_err, require_session, ParsedArgs,
};
use crate::approvals::ApprovalGate;

pub fn cmd_quota(args: &[String]) -> Result<String, String> {
    let parsed = ParsedArgs::parse(args)?;
    parsed.reject_unknown(&[])?;
    let positionals: Vec<&str> = parsed.positionals.iter().map(String::as_str).collect();
    let config = load_config(&parsed)?;
    let session = require_session(&config)?;
    let gateway = gateway(&config);
    let mut gate = ApprovalGate::new(client_log(&config));

    match positionals.as_slice() {
        [] | ["show"] => {
            let quota = gateway
                .get_quota(&session, session.tenant_id())
                .map_err(map_client_err)?;
            Ok(match quota {
                Some(quota) => format!(
                    "tenant: {}\nmonthly_budget: {}\nper_plan_cap: {}\nconsumed: {}\nremaining: {}",
                    quota.tenant_id,
                    quota.monthly_budget,
                    quota.per_plan_cap,
                    quota.consumed,
                    quota.remaining()
                ),
                None => format!("tenant: {}\nno quota configured", session.tenant_id()),
            })
        }
        ["set", budget, cap] => {
            let monthly_budget = parse_amount("budget", budget)?;
            let per_plan_cap = parse_amount("per-plan-cap", cap)?;
            gate.set_quota(&gateway, &session, monthly_budget, per_plan_cap)
                .map_err(map_client_err)?;
            Ok(format!(
                "quota set for {}: monthly_budget={monthly_budget} per_plan_cap={per_plan_cap}",
                session.tenant_id()
            ))
        }
        _ => Err("usage: quota [show] | quota set <budget> <per-plan-cap>".to_string()),
    }
}

fn parse_amount(name: &str, raw: &str) -> Result<i64, String> {
    let value = raw
        .parse::<i64>()
        .map_err(|_| format!("{name} must be an integer, got `{raw}`"))?;
    if value < 0 {
        return Err(format!("{name} must not be negative"));
    }
    Ok(value)
}
