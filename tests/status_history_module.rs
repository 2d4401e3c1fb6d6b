use stepledger::shared::Timestamp;
use stepledger::status::{merge_histories, trailing_completed, StepUpdate, TaskState};

fn update(task: &str, millis: i64, state: TaskState, progress: f64) -> StepUpdate {
    StepUpdate {
        timestamp: Timestamp::from_millis(millis).expect("valid millis"),
        task_name: task.to_string(),
        state,
        progress,
        details: None,
        error: None,
    }
}

#[test]
fn merge_dedupes_by_task_and_timestamp_and_sorts() {
    let stored = vec![
        update("b", 2_000, TaskState::Started, 0.0),
        update("a", 1_000, TaskState::Started, 0.0),
    ];
    let cached = vec![
        update("c", 1_500, TaskState::Started, 0.0),
        update("b", 2_000, TaskState::Completed, 10.0),
    ];

    let merged = merge_histories([stored, cached]);
    let names: Vec<&str> = merged.iter().map(|u| u.task_name.as_str()).collect();
    assert_eq!(names, vec!["a", "c", "b"]);
    assert_eq!(merged[2].state, TaskState::Completed);

    for pair in merged.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[test]
fn same_task_at_different_times_is_kept() {
    let merged = merge_histories([vec![
        update("a", 1_000, TaskState::Started, 0.0),
        update("a", 1_001, TaskState::Completed, 10.0),
    ]]);
    assert_eq!(merged.len(), 2);
}

#[test]
fn trailing_window_keeps_last_five_completed() {
    let mut history = Vec::new();
    for index in 0..8 {
        history.push(update(&format!("t{index}"), index * 10, TaskState::Started, 0.0));
        history.push(update(
            &format!("t{index}"),
            index * 10 + 1,
            TaskState::Completed,
            0.0,
        ));
    }
    let window = trailing_completed(&history);
    let names: Vec<&str> = window.iter().map(|u| u.task_name.as_str()).collect();
    assert_eq!(names, vec!["t3", "t4", "t5", "t6", "t7"]);
    assert!(window.iter().all(|u| u.state == TaskState::Completed));
}
