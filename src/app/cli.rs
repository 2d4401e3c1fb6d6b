#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Record,
    Emit,
    History,
    Latest,
    Current,
    Progress,
    Finalize,
    Recover,
    Serve,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "record" => CliVerb::Record,
        "emit" => CliVerb::Emit,
        "history" => CliVerb::History,
        "latest" => CliVerb::Latest,
        "current" => CliVerb::Current,
        "progress" => CliVerb::Progress,
        "finalize" => CliVerb::Finalize,
        "recover" => CliVerb::Recover,
        "serve" => CliVerb::Serve,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  record <id> <task> <state> [opts]    Record a step update (started|completed|failed|retrying)"
            .to_string(),
        "  emit <id> <task> <state> [opts]      Record and publish to the webhook or a running serve"
            .to_string(),
        "  history <id>                         Print the merged task history".to_string(),
        "  latest <id>                          Print the raw latest-state pointer".to_string(),
        "  current <id>                         Print the current step update".to_string(),
        "  progress <id>                        Print the weighted completion percentage"
            .to_string(),
        "  finalize <id>                        Persist cached history to the durable store"
            .to_string(),
        "  recover                              Finalize every instance left in progress"
            .to_string(),
        "  serve                                Recover, then run the WebSocket hub and publish endpoint"
            .to_string(),
        String::new(),
        "Options:".to_string(),
        "  --progress <n>                       Progress value, 0 derives it for emit".to_string(),
        "  --details <json>                     Arbitrary JSON attached to the update".to_string(),
        "  --error <text>                       Error text, kept on failed updates".to_string(),
        "  --next-task <name>                   Announced next task (emit only)".to_string(),
        String::new(),
        "One-shot commands need `cache.backend: file`; `memory` is only usable with serve."
            .to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_parse_and_unknown_falls_through() {
        assert_eq!(parse_cli_verb("record"), CliVerb::Record);
        assert_eq!(parse_cli_verb("serve"), CliVerb::Serve);
        assert_eq!(parse_cli_verb("--help"), CliVerb::Help);
        assert_eq!(parse_cli_verb("Record"), CliVerb::Unknown);
    }
}
