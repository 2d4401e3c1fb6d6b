use crate::app::command_support::{
    format_progress, open_runtime, open_serve_runtime, parse_step_args,
};
use crate::broadcast::{Broadcaster, EmitRequest, WebSocketHub, WebhookPublisher};
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub fn cmd_emit(args: &[String]) -> Result<String, String> {
    let step = parse_step_args("emit", args, true)?;
    let runtime = open_runtime()?;
    let publish_url = runtime.settings.broadcast.publish_url();

    let broadcaster = Broadcaster::new(
        runtime.tracker.clone(),
        Arc::new(WebhookPublisher::new(publish_url)),
        runtime.settings.broadcast.retry_policy(),
    )
    .with_topic_prefix(runtime.settings.broadcast.topic_prefix.clone());

    let mut request = EmitRequest::new(step.task_name, step.state).with_progress(step.progress);
    if let Some(details) = step.details {
        request = request.with_details(details);
    }
    if let Some(next_task) = step.next_task {
        request = request.with_next_task(next_task);
    }
    if let Some(error) = step.error {
        request = request.with_error(error);
    }

    let envelope = broadcaster
        .emit(&step.instance_id, request)
        .map_err(|e| e.to_string())?;
    let status = envelope
        .status
        .map(|status| status.as_str().to_string())
        .unwrap_or_else(|| "none".to_string());
    Ok([
        format!("instance_id={}", envelope.hypothesis_id),
        format!("topic={}", broadcaster.topic(&step.instance_id)),
        format!("task={}", envelope.task),
        format!("state={}", envelope.state),
        format!("progress={}", format_progress(envelope.progress)),
        format!("status={status}"),
        format!("history={}", envelope.task_history.len()),
    ]
    .join("\n"))
}

/// Blocks serving WebSocket subscribers and the publish endpoint until the
/// process is killed.
pub fn cmd_serve(args: &[String]) -> Result<String, String> {
    if !args.is_empty() {
        return Err("usage: serve".to_string());
    }
    let runtime = open_serve_runtime()?;
    let report = runtime
        .tracker
        .recover_from_cache()
        .map_err(|e| e.to_string())?;

    let bind = runtime.settings.broadcast.websocket_bind.clone();
    let listener =
        TcpListener::bind(&bind).map_err(|e| format!("failed to bind {bind}: {e}"))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("failed to read bound address: {e}"))?;
    println!("recovered={}", report.finalized.len());
    println!("listening={local_addr}");

    let hub = WebSocketHub::new(runtime.tracker.clone())
        .with_topic_prefix(runtime.settings.broadcast.topic_prefix.clone());
    let stop = Arc::new(AtomicBool::new(false));
    hub.serve(listener, &stop)
        .map_err(|e| format!("websocket hub stopped: {e}"))?;
    Ok("stopped=true".to_string())
}
