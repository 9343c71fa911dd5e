use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::TempDir;

fn cli(state_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dslink-helper").expect("Binary exists");
    cmd.env("DSLINK_STATE_FILE", state_dir.path().join("state.json"))
        .env_remove("DSLINK_HELPER_PROGRAM")
        .env_remove("DSLINK_DEFAULT_ADDRESS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    let state = tempfile::tempdir().unwrap();
    cli(&state)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("send")
                .and(predicate::str::contains("resend"))
                .and(predicate::str::contains("last")),
        );
}

#[test]
fn send_with_missing_helper_reports_command_not_found() {
    let state = tempfile::tempdir().unwrap();
    cli(&state)
        .env("DSLINK_HELPER_PROGRAM", "/nonexistent/dslink-helper-test-3dslink")
        .args(["send", "app.3dsx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("command not found"));
}

#[test]
fn send_rejects_invalid_address() {
    let state = tempfile::tempdir().unwrap();
    cli(&state)
        .args(["send", "app.3dsx", "--address", "not-an-ip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid IPv4 address"));
}

#[test]
fn resend_without_history_fails() {
    let state = tempfile::tempdir().unwrap();
    cli(&state)
        .arg("resend")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No file has been sent yet"));
}

#[test]
fn last_shows_remembered_values() {
    let state = tempfile::tempdir().unwrap();
    write(
        state.path().join("state.json"),
        r#"{"last_file": "/work/app.3dsx", "last_address": "192.168.1.20"}"#,
    )
    .unwrap();

    cli(&state)
        .arg("last")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Last file: /work/app.3dsx")
                .and(predicate::str::contains("Last address: 192.168.1.20")),
        );
}

#[cfg(unix)]
#[test]
fn send_json_reports_accepted_outcome_and_remembers_file() {
    let state = tempfile::tempdir().unwrap();
    let helper = state.path().join("fake-3dslink");
    write(&helper, "#!/bin/sh\necho \"Sending $1, 16 bytes\"\nexit 0\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    cli(&state)
        .env("DSLINK_HELPER_PROGRAM", &helper)
        .args(["send", "/work/app.3dsx", "--json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"accepted\": true")
                .and(predicate::str::contains("\"kind\": \"success\"")),
        );

    let saved = std::fs::read_to_string(state.path().join("state.json")).unwrap();
    assert!(saved.contains("/work/app.3dsx"), "state was: {saved}");
}

#[cfg(unix)]
#[test]
fn send_passes_a_trimmed_address_to_the_helper() {
    let state = tempfile::tempdir().unwrap();
    let helper = state.path().join("fake-3dslink");
    write(
        &helper,
        "#!/bin/sh\n[ \"$2\" = \"-a\" ] && [ \"$3\" = \"10.0.0.7\" ] || exit 9\nexit 0\n",
    )
    .unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    cli(&state)
        .env("DSLINK_HELPER_PROGRAM", &helper)
        .args(["send", "/work/app.3dsx", "--address", " 10.0.0.7 ", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"address\": \"10.0.0.7\""));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use dslink_helper::cli::{run, Cli, Commands};

    // A missing config file makes run fail after the first event.
    let cli = Cli {
        config: Some(std::path::PathBuf::from("dummy.yaml")),
        command: Commands::Last { json: false },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
