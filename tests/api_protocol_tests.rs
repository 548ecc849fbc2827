//! Operator protocol behavior over an in-memory stream

mod common;

use std::sync::Arc;

use common::{add_device, harness, TestHarness};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use zino::api::auth;
use zino::api::legacy::Session;
use zino::api::notify::NotificationRegistry;
use zino::models::events::{EventKind, EventState, SubIndex};

struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    challenge: String,
}

impl Client {
    /// Connects a session over a duplex pipe and consumes the greeting
    async fn connect(harness: &TestHarness) -> (Self, Arc<NotificationRegistry>) {
        let notifications = Arc::new(NotificationRegistry::new());
        let (client_side, server_side) = tokio::io::duplex(16 * 1024);
        let session = Session::new(server_side, harness.runtime.clone(), notifications.clone());
        tokio::spawn(session.run());

        let (read_half, write_half) = tokio::io::split(client_side);
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            challenge: String::new(),
        };
        let greeting = client.read_line().await;
        assert!(greeting.starts_with("200 "), "unexpected greeting: {}", greeting);
        assert!(greeting.ends_with("Hello, there"));
        client.challenge = greeting.split(' ').nth(1).unwrap().to_string();
        assert_eq!(client.challenge.len(), 40);
        (client, notifications)
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Reads a whole code-framed multi-line response
    async fn read_multiline(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let terminal = line.as_bytes().get(3) == Some(&b' ');
            lines.push(line[5.min(line.len())..].to_string());
            if terminal {
                return lines;
            }
        }
    }

    async fn authenticate(&mut self) {
        let response = auth::expected_response(&self.challenge, "alice-secret");
        self.send(&format!("USER alice {}", response)).await;
        assert_eq!(self.read_line().await, "200 welcome");
    }
}

#[tokio::test]
async fn challenge_response_login_succeeds_with_correct_secret() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;

    client.send("AUTHTEST").await;
    assert_eq!(client.read_line().await, "200 ok");

    client.send("VERSION").await;
    let line = client.read_line().await;
    assert!(line.starts_with("200 zino version"));
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    let response = auth::expected_response(&client.challenge, "wrong-secret");
    client.send(&format!("USER alice {}", response)).await;
    assert_eq!(client.read_line().await, "500 Authentication failure");
}

#[tokio::test]
async fn privileged_commands_require_authentication() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    client.send("CASEIDS").await;
    assert_eq!(client.read_line().await, "500 Not authenticated");
}

#[tokio::test]
async fn repeated_user_command_is_rejected() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;
    client.send("USER alice whatever").await;
    assert_eq!(client.read_line().await, "500 already authenticated");
}

#[tokio::test]
async fn unknown_commands_and_bad_arity_use_500() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    client.send("FROBNICATE").await;
    assert_eq!(client.read_line().await, "500 unknown command: \"FROBNICATE\"");

    client.authenticate().await;
    client.send("SETSTATE 1").await;
    assert_eq!(
        client.read_line().await,
        "500 SETSTATE needs 2 parameters (caseid, state)"
    );
}

#[tokio::test]
async fn extra_arguments_are_accepted_and_ignored() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;
    client.send("VERSION please now").await;
    assert!(client.read_line().await.starts_with("200 zino version"));
}

#[tokio::test]
async fn caseids_lists_open_events() {
    let harness = harness();
    let (first, second) = {
        let mut state = harness.runtime.state.write();
        let (event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        let first = state.events.commit(event, "monitor").unwrap();
        let (event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Device, EventKind::Reachability);
        let second = state.events.commit(event, "monitor").unwrap();
        (first, second)
    };

    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;
    client.send("CASEIDS").await;
    let lines = client.read_multiline().await;
    assert_eq!(lines, vec![first.to_string(), second.to_string()]);
}

#[tokio::test]
async fn getattrs_dumps_simple_fields() {
    let harness = harness();
    let id = {
        let mut state = harness.runtime.state.write();
        let (mut event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        event.priority = 200;
        state.events.commit(event, "monitor").unwrap()
    };

    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;
    client.send(&format!("GETATTRS {}", id)).await;
    let lines = client.read_multiline().await;
    assert!(lines.contains(&format!("id: {}", id)));
    assert!(lines.contains(&"router: rtr-a".to_string()));
    assert!(lines.contains(&"state: open".to_string()));
    assert!(lines.contains(&"type: portstate".to_string()));
    assert!(lines.contains(&"priority: 200".to_string()));
}

#[tokio::test]
async fn setstate_transitions_and_rejects_illegal_moves() {
    let harness = harness();
    let id = {
        let mut state = harness.runtime.state.write();
        let (event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        state.events.commit(event, "monitor").unwrap()
    };

    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;

    client.send(&format!("SETSTATE {} working", id)).await;
    assert_eq!(client.read_line().await, "200 ok");
    {
        let state = harness.runtime.state.read();
        let event = state.events.get_by_id(id).unwrap();
        assert_eq!(event.state, EventState::Working);
        // The transition is in the audit history with the acting user
        let entry = event.history.last().unwrap();
        assert!(entry.message.contains("open -> working"));
        assert!(entry.message.contains("alice"));
    }

    client.send(&format!("SETSTATE {} closed", id)).await;
    assert_eq!(client.read_line().await, "200 ok");

    // Closed events are gone from the open set and locked down
    client.send(&format!("SETSTATE {} open", id)).await;
    let line = client.read_line().await;
    assert!(line.starts_with("500 "), "got: {}", line);
}

#[tokio::test]
async fn addhist_reads_multiline_input_with_both_line_endings() {
    let harness = harness();
    let id = {
        let mut state = harness.runtime.state.write();
        let (event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        state.events.commit(event, "monitor").unwrap()
    };

    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;
    client.send(&format!("ADDHIST {}", id)).await;
    assert!(client.read_line().await.starts_with("302 "));

    // Mixed CR-LF and bare LF terminators
    client.writer.write_all(b"first line\r\n").await.unwrap();
    client.writer.write_all(b"second line\n").await.unwrap();
    client.writer.write_all(b".\r\n").await.unwrap();
    assert_eq!(client.read_line().await, "200 ok");

    let state = harness.runtime.state.read();
    let event = state.events.get_by_id(id).unwrap();
    let entry = event.history.last().unwrap();
    assert!(entry.message.starts_with("alice"));
    assert!(entry.message.contains("first line"));
    assert!(entry.message.contains("second line"));

    // GETHIST renders the entry with a timestamped head line and
    // space-prefixed continuations
    drop(state);
    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;
    client.send(&format!("GETHIST {}", id)).await;
    let lines = client.read_multiline().await;
    assert!(lines.iter().any(|line| line.ends_with("alice")));
    assert!(lines.contains(&" first line".to_string()));
}

#[tokio::test]
async fn ntie_ties_a_notification_channel() {
    let harness = harness();
    let (mut client, notifications) = Client::connect(&harness).await;
    client.authenticate().await;

    // Unknown nonce
    client.send("NTIE deadbeef").await;
    assert!(client.read_line().await.starts_with("500 "));

    // A registered channel nonce ties successfully
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let nonce = notifications.register(tx);
    client.send(&format!("NTIE {}", nonce)).await;
    assert_eq!(client.read_line().await, "200 ok");

    // Commits now push deltas to the tied channel
    {
        let registry = notifications.clone();
        let mut state = harness.runtime.state.write();
        state.events.add_observer(Box::new(move |new_event, old_event, changed| {
            let batch = NotificationRegistry::build_notifications(new_event, old_event, changed);
            registry.send_notifications(&batch);
        }));
        let (event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Device, EventKind::Reachability);
        let id = state.events.commit(event, "monitor").unwrap();
        drop(state);
        assert_eq!(rx.try_recv().unwrap(), format!("{} state embryonic open", id));
    }
}

#[tokio::test]
async fn community_command_reports_configured_string() {
    let harness = harness();
    add_device(&harness, "rtr-a", "10.0.0.1");
    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;

    client.send("COMMUNITY rtr-a").await;
    assert_eq!(client.read_line().await, "201 public");
    client.send("COMMUNITY rtr-x").await;
    assert!(client.read_line().await.starts_with("500 "));
}

#[tokio::test]
async fn pm_add_list_and_cancel_round_trip() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    client.authenticate().await;

    let now = chrono::Utc::now().timestamp();
    client
        .send(&format!("PM ADD {} {} device exact rtr-c", now + 3600, now + 7200))
        .await;
    let line = client.read_line().await;
    assert!(line.starts_with("200 PM id "), "got: {}", line);

    client.send("PM LIST").await;
    let lines = client.read_multiline().await;
    assert_eq!(lines, vec!["1".to_string()]);

    client.send("PM DETAILS 1").await;
    let line = client.read_line().await;
    assert!(line.contains("device"));
    assert!(line.contains("exact"));
    assert!(line.contains("rtr-c"));

    client.send("PM CANCEL 1").await;
    assert_eq!(client.read_line().await, "200 ok");
    client.send("PM CANCEL 1").await;
    assert!(client.read_line().await.starts_with("500 "));
}

#[tokio::test]
async fn quit_closes_the_session() {
    let harness = harness();
    let (mut client, _) = Client::connect(&harness).await;
    client.send("QUIT").await;
    assert_eq!(client.read_line().await, "205 Bye");
    let mut line = String::new();
    // The server side hangs up after QUIT
    let read = client.reader.read_line(&mut line).await.unwrap();
    assert_eq!(read, 0);
}
