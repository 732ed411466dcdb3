use crate::config::{load_client_config, ClientConfig};
use crate::gateway::ApiGateway;
use crate::session::SessionContext;
use crate::shared::{ClientError, ClientLog};
use std::path::PathBuf;

/// Positional arguments plus `--flag value` pairs, in command-line order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    pub positionals: Vec<String>,
    pub flags: Vec<(String, String)>,
}

impl ParsedArgs {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut i = 0usize;
        while i < args.len() {
            let arg = &args[i];
            if let Some(name) = arg.strip_prefix("--") {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| format!("--{name} requires a value"))?;
                parsed.flags.push((name.to_string(), value.clone()));
                i += 2;
            } else {
                parsed.positionals.push(arg.clone());
                i += 1;
            }
        }
        Ok(parsed)
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .rev()
            .find(|(flag, _)| flag == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn flag_all(&self, name: &str) -> Vec<&str> {
        self.flags
            .iter()
            .filter(|(flag, _)| flag == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn reject_unknown(&self, known: &[&str]) -> Result<(), String> {
        match self
            .flags
            .iter()
            .find(|(flag, _)| flag != "config" && !known.contains(&flag.as_str()))
        {
            Some((flag, _)) => Err(format!("unexpected argument `--{flag}`")),
            None => Ok(()),
        }
    }
}

pub fn load_config(args: &ParsedArgs) -> Result<ClientConfig, String> {
    let path = args.flag("config").map(PathBuf::from);
    load_client_config(path.as_deref()).map_err(|e| e.to_string())
}

pub fn require_session(config: &ClientConfig) -> Result<SessionContext, String> {
    config
        .session
        .clone()
        .ok_or_else(|| "config has no `session`; set user, email and tenant_id".to_string())
}

pub fn client_log(config: &ClientConfig) -> ClientLog {
    config
        .log_path
        .clone()
        .map(ClientLog::to_file)
        .unwrap_or_default()
}

pub fn gateway(config: &ClientConfig) -> ApiGateway {
    ApiGateway::new(config).with_log(client_log(config))
}

pub fn map_client_err(err: ClientError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_and_positionals_are_separated() {
        let parsed =
            ParsedArgs::parse(&args(&["set", "--test", "a", "100", "--test", "b"])).expect("parse");
        assert_eq!(parsed.positionals, vec!["set", "100"]);
        assert_eq!(parsed.flag_all("test"), vec!["a", "b"]);
        assert_eq!(parsed.flag("test"), Some("b"));
        assert_eq!(parsed.flag("missing"), None);
    }

    #[test]
    fn dangling_flag_and_unknown_flag_are_errors() {
        let err = ParsedArgs::parse(&args(&["--name"])).expect_err("dangling");
        assert_eq!(err, "--name requires a value");

        let parsed = ParsedArgs::parse(&args(&["--bogus", "x", "--config", "c.yaml"])).expect("parse");
        let err = parsed.reject_unknown(&["name"]).expect_err("unknown");
        assert_eq!(err, "unexpected argument `--bogus`");
    }
}
