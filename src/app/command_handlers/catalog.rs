use crate::app::command_support::{gateway, load_config, map_client_err, require_session, ParsedArgs};

pub fn cmd_catalog(args: &[String]) -> Result<String, String> {
    let parsed = ParsedArgs::parse(args)?;
    parsed.reject_unknown(&[])?;
    let config = load_config(&parsed)?;
    let session = require_session(&config)?;
    let gateway = gateway(&config);

    let items = gateway.fetch_catalog(&session).map_err(map_client_err)?;
    let packs = gateway.fetch_packs(&session).map_err(map_client_err)?;

    let mut lines = vec![format!("tests ({}):", items.len())];
    for item in &items {
        lines.push(format!(
            "  {:36} {} [{}] {}",
            item.id,
            item.title.as_deref().unwrap_or("-"),
            item.category.as_deref().unwrap_or("-"),
            item.risk_tier.as_deref().unwrap_or("")
        ));
    }
    lines.push(format!("packs ({}):", packs.len()));
    for pack in &packs {
        let tests: Vec<&str> = pack.tests.iter().map(String::as_str).collect();
        lines.push(format!("  {:36} {} -> {}", pack.id, pack.name, tests.join(", ")));
    }
    Ok(lines.join("\n"))
}
