use crate::app::command_support::{
    format_progress, open_runtime, parse_step_args, require_instance_arg, to_json_line,
    update_lines,
};
use crate::status::{FinalizeOutcome, StepReport};

fn finalize_lines(outcome: &FinalizeOutcome) -> Vec<String> {
    vec![
        format!("persisted={}", outcome.persisted),
        format!("from_store={}", outcome.from_store),
        format!("from_cache={}", outcome.from_cache),
    ]
}

pub fn cmd_record(args: &[String]) -> Result<String, String> {
    let step = parse_step_args("record", args, false)?;
    let runtime = open_runtime()?;

    let mut report = StepReport::new(step.task_name, step.state, step.progress);
    report.details = step.details;
    report.error = step.error;
    let outcome = runtime
        .tracker
        .record(&step.instance_id, report)
        .map_err(|e| e.to_string())?;

    let mut lines = vec![format!("instance_id={}", step.instance_id)];
    lines.extend(update_lines(&outcome.update));
    match &outcome.finalized {
        Some(finalized) => {
            lines.push("finalized=true".to_string());
            lines.extend(finalize_lines(finalized));
        }
        None => lines.push("finalized=false".to_string()),
    }
    Ok(lines.join("\n"))
}

pub fn cmd_history(args: &[String]) -> Result<String, String> {
    let instance_id = require_instance_arg("history", args)?;
    let runtime = open_runtime()?;
    let history = runtime
        .tracker
        .get_history(&instance_id)
        .map_err(|e| e.to_string())?;

    let mut lines = vec![
        format!("instance_id={instance_id}"),
        format!("count={}", history.len()),
    ];
    for update in &history {
        lines.push(format!("update={}", to_json_line(update)?));
    }
    Ok(lines.join("\n"))
}

pub fn cmd_latest(args: &[String]) -> Result<String, String> {
    let instance_id = require_instance_arg("latest", args)?;
    let runtime = open_runtime()?;
    let latest = runtime
        .tracker
        .get_latest_state(&instance_id)
        .map_err(|e| e.to_string())?;
    let rendered = match latest {
        Some(latest) => to_json_line(&latest)?,
        None => "none".to_string(),
    };
    Ok(format!("instance_id={instance_id}\nlatest={rendered}"))
}

pub fn cmd_current(args: &[String]) -> Result<String, String> {
    let instance_id = require_instance_arg("current", args)?;
    let runtime = open_runtime()?;
    let current = runtime
        .tracker
        .current_state(&instance_id)
        .map_err(|e| e.to_string())?;

    let mut lines = vec![format!("instance_id={instance_id}")];
    match current {
        Some(update) => lines.extend(update_lines(&update)),
        None => lines.push("current=none".to_string()),
    }
    Ok(lines.join("\n"))
}

pub fn cmd_progress(args: &[String]) -> Result<String, String> {
    let instance_id = require_instance_arg("progress", args)?;
    let runtime = open_runtime()?;
    let history = runtime
        .tracker
        .get_history(&instance_id)
        .map_err(|e| e.to_string())?;
    let progress = runtime.tracker.calculate_progress(&history);
    Ok(format!(
        "instance_id={instance_id}\nprogress={}",
        format_progress(progress)
    ))
}

pub fn cmd_finalize(args: &[String]) -> Result<String, String> {
    let instance_id = require_instance_arg("finalize", args)?;
    let runtime = open_runtime()?;
    let outcome = runtime
        .tracker
        .finalize(&instance_id)
        .map_err(|e| e.to_string())?;

    let mut lines = vec![format!("instance_id={instance_id}")];
    lines.extend(finalize_lines(&outcome));
    Ok(lines.join("\n"))
}

pub fn cmd_recover(args: &[String]) -> Result<String, String> {
    if !args.is_empty() {
        return Err("usage: recover".to_string());
    }
    let runtime = open_runtime()?;
    let report = runtime
        .tracker
        .recover_from_cache()
        .map_err(|e| e.to_string())?;
    Ok([
        format!("finalized={}", report.finalized.len()),
        format!("patched={}", report.patched.len()),
        format!("finalized_ids={}", report.finalized.join(",")),
        format!("patched_ids={}", report.patched.join(",")),
    ]
    .join("\n"))
}
