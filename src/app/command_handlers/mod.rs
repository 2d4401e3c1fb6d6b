use crate::app::cli::{help_text, parse_cli_verb, CliVerb};

pub mod broadcast;
pub mod status;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Record => status::cmd_record(&args[1..]),
        CliVerb::Emit => broadcast::cmd_emit(&args[1..]),
        CliVerb::History => status::cmd_history(&args[1..]),
        CliVerb::Latest => status::cmd_latest(&args[1..]),
        CliVerb::Current => status::cmd_current(&args[1..]),
        CliVerb::Progress => status::cmd_progress(&args[1..]),
        CliVerb::Finalize => status::cmd_finalize(&args[1..]),
        CliVerb::Recover => status::cmd_recover(&args[1..]),
        CliVerb::Serve => broadcast::cmd_serve(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
