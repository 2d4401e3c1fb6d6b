use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

fn run(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stepledger"))
        .args(args)
        .env("HOME", home)
        .env_remove("STEPLEDGER_CONFIG")
        .output()
        .expect("run stepledger")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn assert_ok(output: &Output) {
    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        stdout(output),
        stderr(output)
    );
}

fn assert_err_contains(output: &Output, needle: &str) {
    assert!(
        !output.status.success(),
        "expected failure, stdout:\n{}\nstderr:\n{}",
        stdout(output),
        stderr(output)
    );
    let text = format!("{}{}", stdout(output), stderr(output));
    assert!(
        text.contains(needle),
        "expected error to contain `{needle}`, got:\n{text}"
    );
}

#[test]
fn help_lists_commands() {
    let temp = tempdir().expect("tempdir");
    let output = run(temp.path(), &[]);
    assert_ok(&output);
    let text = stdout(&output);
    for verb in ["record", "emit", "history", "finalize", "recover", "serve"] {
        assert!(text.contains(verb), "help lacks {verb}");
    }
}

#[test]
fn record_then_query_round_trip() {
    let temp = tempdir().expect("tempdir");
    let home = temp.path();

    let output = run(
        home,
        &[
            "record",
            "h1",
            "Verifying existence of enrichment data",
            "started",
        ],
    );
    assert_ok(&output);
    assert!(stdout(&output).contains("finalized=false"));

    let output = run(
        home,
        &[
            "record",
            "h1",
            "Creating enrich data",
            "completed",
            "--progress",
            "80",
            "--details",
            r#"{"found":true}"#,
        ],
    );
    assert_ok(&output);
    let text = stdout(&output);
    assert!(text.contains("finalized=true"), "{text}");
    assert!(text.contains("persisted=2"), "{text}");

    let output = run(home, &["history", "h1"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("count=2"));

    let output = run(home, &["progress", "h1"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("progress=20.00"));

    let output = run(home, &["latest", "h1"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("latest=none"));

    let output = run(home, &["current", "h1"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("task=Creating enrich data"));

    assert!(home.join(".stepledger/history.sqlite3").is_file());
    let log = fs::read_to_string(home.join(".stepledger/logs/stepledger.log")).expect("log");
    assert!(log.contains("status.finalize"));
}

#[test]
fn recover_finalizes_instances_left_in_progress() {
    let temp = tempdir().expect("tempdir");
    let home = temp.path();
    assert_ok(&run(home, &["record", "h2", "Getting gene data", "started"]));

    let output = run(home, &["recover"]);
    assert_ok(&output);
    let text = stdout(&output);
    assert!(text.contains("finalized=1"), "{text}");
    assert!(text.contains("finalized_ids=h2"), "{text}");

    let output = run(home, &["recover"]);
    assert_ok(&output);
    assert!(stdout(&output).contains("finalized=0"));
}

#[test]
fn invalid_input_fails_with_message() {
    let temp = tempdir().expect("tempdir");
    assert_err_contains(
        &run(temp.path(), &["record", "h1", "t", "paused"]),
        "unknown task state",
    );
    assert_err_contains(
        &run(temp.path(), &["record", " ", "t", "started"]),
        "instance id is required",
    );
    assert_err_contains(&run(temp.path(), &["history"]), "usage: history <id>");
    assert_err_contains(&run(temp.path(), &["bogus"]), "unknown command `bogus`");
}

fn write_config(home: &Path, yaml: &str) {
    let dir = home.join(".stepledger");
    fs::create_dir_all(&dir).expect("config dir");
    fs::write(dir.join("config.yaml"), yaml).expect("write config");
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("free port")
        .port()
}

fn read_frame(client: &mut WebSocket<MaybeTlsStream<TcpStream>>) -> Value {
    loop {
        if let Message::Text(text) = client.read().expect("read frame") {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

struct ServeProcess(Child);

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn emit_fails_when_nothing_accepts_the_publish() {
    let temp = tempdir().expect("tempdir");
    write_config(
        temp.path(),
        &format!(
            "broadcast:\n  max_attempts: 1\n  websocket_bind: 127.0.0.1:{}\n",
            free_port()
        ),
    );
    assert_err_contains(
        &run(temp.path(), &["emit", "h1", "Getting gene data", "started"]),
        "giving up on topic `hypothesis_h1` after 1 attempts",
    );
}

#[test]
fn emit_reaches_websocket_subscriber_of_serve() {
    let temp = tempdir().expect("tempdir");
    let home = temp.path();
    let port = free_port();
    write_config(
        home,
        &format!("broadcast:\n  retry_backoff_ms: 200\n  websocket_bind: 127.0.0.1:{port}\n"),
    );

    let mut child = Command::new(env!("CARGO_BIN_EXE_stepledger"))
        .arg("serve")
        .env("HOME", home)
        .env_remove("STEPLEDGER_CONFIG")
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn serve");
    let serve_out = child.stdout.take().expect("serve stdout");
    let serve = ServeProcess(child);
    let listening = BufReader::new(serve_out)
        .lines()
        .map(|line| line.expect("serve line"))
        .find(|line| line.starts_with("listening="))
        .expect("listening line");
    assert_eq!(listening, format!("listening=127.0.0.1:{port}"));

    let (mut client, _) = connect(format!("ws://127.0.0.1:{port}")).expect("connect");
    if let MaybeTlsStream::Plain(stream) = client.get_ref() {
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("read timeout");
    }
    client
        .send(Message::Text(json!({"hypothesis_id": "h7"}).to_string()))
        .expect("subscribe");
    let ack = read_frame(&mut client);
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["room"], "hypothesis_h7");

    let output = run(
        home,
        &[
            "emit",
            "h7",
            "Creating enrich data",
            "completed",
            "--progress",
            "80",
        ],
    );
    assert_ok(&output);
    assert!(stdout(&output).contains("status=Enrichment_completed"));

    let deadline = Instant::now() + Duration::from_secs(10);
    let envelope = loop {
        assert!(Instant::now() < deadline, "no envelope before deadline");
        let frame = read_frame(&mut client);
        if frame["event"] == "task_update" && frame["data"].get("task").is_some() {
            break frame["data"].clone();
        }
    };
    assert_eq!(envelope["hypothesis_id"], "h7");
    assert_eq!(envelope["task"], "Creating enrich data");
    assert_eq!(envelope["status"], "Enrichment_completed");
    assert_eq!(envelope["progress"], 80.0);

    let _ = client.close(None);
    drop(serve);
}

#[test]
fn memory_cache_is_refused_for_one_shot_commands() {
    let temp = tempdir().expect("tempdir");
    write_config(temp.path(), "cache:\n  backend: memory\n");
    assert_err_contains(
        &run(temp.path(), &["record", "h1", "Getting gene data", "started"]),
        "only usable with `serve`",
    );
}

#[test]
fn config_path_override_is_honored() {
    let temp = tempdir().expect("tempdir");
    let state_root = temp.path().join("ledger-state");
    let config = temp.path().join("custom.yaml");
    fs::write(
        &config,
        format!("state_root: {}\n", state_root.display()),
    )
    .expect("write config");

    let output = Command::new(env!("CARGO_BIN_EXE_stepledger"))
        .args(["record", "h1", "Getting gene data", "started"])
        .env("HOME", temp.path())
        .env("STEPLEDGER_CONFIG", &config)
        .output()
        .expect("run stepledger");
    assert_ok(&output);
    assert!(state_root.join("history.sqlite3").is_file());
    assert!(state_root.join("cache").is_dir());
}
