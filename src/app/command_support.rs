use crate::cache::{FileStatusCache, MemoryStatusCache, StatusCache};
use crate::config::{load_global_settings, CacheBackend, ConfigError, Settings};
use crate::shared::EventLog;
use crate::status::update::MAX_PROGRESS;
use crate::status::{StatusTracker, StepUpdate, TaskState};
use crate::store::SqliteHistoryStore;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

pub fn load_settings() -> Result<Settings, String> {
    load_global_settings().map_err(map_config_err)
}

/// Settings plus a tracker wired to the configured cache and store.
pub struct Runtime {
    pub settings: Settings,
    pub state_root: PathBuf,
    pub tracker: StatusTracker,
}

/// Runtime for one-shot verbs, which need a cache that outlives the process.
pub fn open_runtime() -> Result<Runtime, String> {
    let settings = load_settings()?;
    if settings.cache.backend == CacheBackend::Memory {
        return Err(
            "`cache.backend: memory` is empty in every new process; it is only usable with `serve`"
                .to_string(),
        );
    }
    open_runtime_with(settings)
}

/// Runtime for `serve`, where any cache backend lives as long as the hub.
pub fn open_serve_runtime() -> Result<Runtime, String> {
    open_runtime_with(load_settings()?)
}

pub fn open_runtime_with(settings: Settings) -> Result<Runtime, String> {
    let state_root = settings.resolve_state_root().map_err(map_config_err)?;
    let cache: Arc<dyn StatusCache> = match settings.cache.backend {
        CacheBackend::File => {
            let dir = settings.resolve_cache_dir().map_err(map_config_err)?;
            Arc::new(FileStatusCache::open(dir).map_err(|e| e.to_string())?)
        }
        CacheBackend::Memory => Arc::new(MemoryStatusCache::new()),
    };
    let store_path = settings.resolve_store_path().map_err(map_config_err)?;
    let store = SqliteHistoryStore::open(&store_path).map_err(|e| e.to_string())?;
    let tracker = StatusTracker::new(cache, Arc::new(store))
        .with_event_log(EventLog::under_state_root(&state_root));
    Ok(Runtime {
        settings,
        state_root,
        tracker,
    })
}

/// Positional and flag arguments shared by `record` and `emit`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepArgs {
    pub instance_id: String,
    pub task_name: String,
    pub state: TaskState,
    pub progress: f64,
    pub details: Option<Value>,
    pub error: Option<String>,
    pub next_task: Option<String>,
}

pub fn parse_step_args(
    command: &str,
    args: &[String],
    allow_next_task: bool,
) -> Result<StepArgs, String> {
    let usage = if allow_next_task {
        format!(
            "usage: {command} <id> <task> <state> [--progress N] [--details JSON] [--error TEXT] [--next-task NAME]"
        )
    } else {
        format!("usage: {command} <id> <task> <state> [--progress N] [--details JSON] [--error TEXT]")
    };
    if args.len() < 3 {
        return Err(usage);
    }
    let state = args[2]
        .parse::<TaskState>()
        .map_err(|err| err.to_string())?;
    let mut parsed = StepArgs {
        instance_id: args[0].clone(),
        task_name: args[1].clone(),
        state,
        progress: 0.0,
        details: None,
        error: None,
        next_task: None,
    };

    let mut rest = args[3..].iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .ok_or_else(|| format!("missing value for `{flag}`\n{usage}"))?;
        match flag.as_str() {
            "--progress" => {
                let progress = value
                    .parse::<f64>()
                    .map_err(|_| format!("invalid progress `{value}`"))?;
                if !(0.0..=MAX_PROGRESS).contains(&progress) {
                    return Err(format!("invalid progress `{value}`"));
                }
                parsed.progress = progress;
            }
            "--details" => {
                let details = serde_json::from_str::<Value>(value)
                    .map_err(|err| format!("invalid details json: {err}"))?;
                parsed.details = Some(details);
            }
            "--error" => parsed.error = Some(value.clone()),
            "--next-task" if allow_next_task => parsed.next_task = Some(value.clone()),
            other => return Err(format!("unknown option `{other}`\n{usage}")),
        }
    }
    Ok(parsed)
}

pub fn require_instance_arg(command: &str, args: &[String]) -> Result<String, String> {
    match args {
        [id] => Ok(id.clone()),
        _ => Err(format!("usage: {command} <id>")),
    }
}

pub fn format_progress(progress: f64) -> String {
    format!("{progress:.2}")
}

pub fn update_lines(update: &StepUpdate) -> Vec<String> {
    let mut lines = vec![
        format!("task={}", update.task_name),
        format!("state={}", update.state),
        format!("progress={}", format_progress(update.progress)),
        format!("timestamp={}", update.timestamp),
    ];
    if let Some(details) = &update.details {
        lines.push(format!("details={details}"));
    }
    if let Some(error) = &update.error {
        lines.push(format!("error={error}"));
    }
    lines
}

pub fn to_json_line<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|err| format!("failed to encode json: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn step_args_parse_flags() {
        let parsed = parse_step_args(
            "emit",
            &args(&[
                "h1",
                "Creating enrich data",
                "completed",
                "--progress",
                "80",
                "--details",
                r#"{"rows":3}"#,
                "--next-task",
                "Generating hypothesis",
            ]),
            true,
        )
        .expect("parse");
        assert_eq!(parsed.state, TaskState::Completed);
        assert_eq!(parsed.progress, 80.0);
        assert_eq!(parsed.details, Some(serde_json::json!({"rows": 3})));
        assert_eq!(parsed.next_task.as_deref(), Some("Generating hypothesis"));
    }

    #[test]
    fn record_rejects_next_task_and_bad_state() {
        let err = parse_step_args(
            "record",
            &args(&["h1", "t", "started", "--next-task", "x"]),
            false,
        )
        .expect_err("next-task not allowed");
        assert!(err.contains("unknown option `--next-task`"));

        let err = parse_step_args("record", &args(&["h1", "t", "paused"]), false)
            .expect_err("unknown state");
        assert!(err.contains("paused"));
    }
}
