use crate::app::cli::{help_text, parse_cli_verb, CliVerb};

pub mod approvals;
pub mod catalog;
pub mod quota;
pub mod run;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Run => run::cmd_run(&args[1..]),
        CliVerb::Catalog => catalog::cmd_catalog(&args[1..]),
        CliVerb::Quota => quota::cmd_quota(&args[1..]),
        CliVerb::Approvals => approvals::cmd_approvals(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::run_cli;

    #[test]
    fn empty_args_and_help_print_usage() {
        let usage = run_cli(Vec::new()).expect("help");
        assert!(usage.starts_with("Commands:"));
        assert_eq!(run_cli(vec!["help".to_string()]).expect("help"), usage);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = run_cli(vec!["deploy".to_string()]).expect_err("unknown");
        assert_eq!(err, "unknown command `deploy`");
    }
}
