#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Run,
    Catalog,
    Quota,
    Approvals,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "run" => CliVerb::Run,
        "catalog" => CliVerb::Catalog,
        "quota" => CliVerb::Quota,
        "approvals" => CliVerb::Approvals,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  run --name <name> [--test <id>]...   Create an engagement, plan and run, then follow events"
            .to_string(),
        "      [--type <type>] [--scope <json>] [--risk-tier <tier>] [--pack <id>]...".to_string(),
        "      [--auto-pack <id>]... [--params <id>=<json>]... [--timeout-secs <n>]".to_string(),
        "  catalog                              List catalog tests and packs".to_string(),
        "  quota [show]                         Show the tenant quota".to_string(),
        "  quota set <budget> <per-plan-cap>    Set the tenant quota".to_string(),
        "  approvals list [--engagement <id>]   List approvals".to_string(),
        "  approvals request <engagement> <reason>".to_string(),
        "                                       Request an approval".to_string(),
        "  approvals approve|reject <id>        Decide an approval".to_string(),
        String::new(),
        "Every command accepts --config <path> (default: $TESTDECK_CONFIG).".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
