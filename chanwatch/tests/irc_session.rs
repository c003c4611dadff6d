//! Integration tests: controller + IRC transport against a scripted server.
//!
//! Each test binds a real TCP listener, plays the server side line by line,
//! and drives the client through `connect_controller`.

use std::time::Duration;

use chanwatch::client::{connect_controller, ConnectConfig};
use chanwatch_core::{ClientController, Event, JoinError, SessionLog, SessionStatus};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::{timeout, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Server side of one accepted connection.
struct ScriptedServer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// How long to wait for each client line.
    wait: Duration,
}

impl ScriptedServer {
    /// Read lines until one starts with `prefix`, skipping anything else.
    async fn expect(&mut self, prefix: &str) -> String {
        loop {
            let line = timeout(self.wait, self.lines.next_line())
                .await
                .unwrap_or_else(|_| panic!("Timeout waiting for: {prefix}"))
                .unwrap()
                .unwrap_or_else(|| panic!("Client hung up while waiting for: {prefix}"));
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
    }

    /// The next client line, or `None` once the client hangs up.
    async fn next_line(&mut self) -> Option<String> {
        timeout(self.wait, self.lines.next_line())
            .await
            .expect("Timeout waiting for a client line")
            .unwrap()
    }

    /// Complete NICK/USER registration for `nick`.
    async fn register(&mut self, nick: &str) {
        self.expect("NICK").await;
        self.expect("USER").await;
        self.send(&format!(":test-server 001 {nick} :Welcome, {nick}")).await;
        self.send(&format!(":test-server 422 {nick} :MOTD File is missing")).await;
    }
}

/// Start a listener and connect a controller to it.
async fn connect(nick: &str) -> (ClientController, ScriptedServer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ConnectConfig {
        server_addr: addr.to_string(),
        nick: nick.to_string(),
        user: nick.to_string(),
        ..Default::default()
    };

    let (accepted, controller) = tokio::join!(listener.accept(), connect_controller(&config));
    let (stream, _) = accepted.unwrap();
    let (reader, writer) = stream.into_split();
    let server = ScriptedServer {
        lines: BufReader::new(reader).lines(),
        writer,
        wait: WAIT,
    };
    (controller.unwrap(), server)
}

async fn wait_for_len(log: &SessionLog, len: usize) {
    let mut rx = log.subscribe();
    timeout(WAIT, async {
        while *rx.borrow_and_update() < len {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Timeout waiting for {len} log entries, have {:?}", log.snapshot()));
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn join_log_and_part_over_tcp() {
    let (controller, mut server) = connect("bot").await;
    server.register("bot").await;

    let pending = controller.join_channel("#test").await.unwrap();
    server.expect("JOIN #test").await;
    server.send(":bot!bot@localhost JOIN #test").await;
    server.send(":test-server 332 bot #test :hello world").await;
    server.send(":test-server 333 bot #test alice!a@host 1700000000").await;
    server.send(":alice!a@host PRIVMSG #test :hi bot").await;

    let log = timeout(WAIT, pending.wait()).await.unwrap().unwrap();
    wait_for_len(&log, 2).await;
    assert_eq!(
        log.snapshot(),
        vec![
            Event::Topic {
                channel: "#test".to_string(),
                text: "hello world".to_string(),
                setter: Some("alice".to_string()),
            },
            Event::Message {
                from: "alice".to_string(),
                to: "#test".to_string(),
                text: "hi bot".to_string(),
            },
        ]
    );

    let pending = controller.leave_channel("#test", Some("bye")).await.unwrap();
    server.expect("PART #test").await;
    server.send(":bot!bot@localhost PART #test :bye").await;

    let final_log = timeout(WAIT, pending.wait()).await.unwrap().unwrap();
    assert_eq!(
        final_log.snapshot().last(),
        Some(&Event::Part {
            channel: "#test".to_string(),
            nick: "bot".to_string(),
            reason: "bye".to_string(),
        })
    );
    assert_eq!(controller.status("#test"), None);
    assert!(controller.router().is_empty());
}

#[tokio::test]
async fn join_issued_before_welcome_is_queued() {
    let (controller, mut server) = connect("bot").await;
    let pending = controller.join_channel("#early").await.unwrap();

    server.register("bot").await;
    server.expect("JOIN #early").await;
    server.send(":bot!bot@localhost JOIN #early").await;

    let log = timeout(WAIT, pending.wait()).await.unwrap().unwrap();
    assert!(log.is_empty());
    assert_eq!(controller.status("#early"), Some(SessionStatus::Joined));
}

#[tokio::test]
async fn error_numeric_rejects_join() {
    let (controller, mut server) = connect("bot").await;
    server.register("bot").await;

    let pending = controller.join_channel("#nope").await.unwrap();
    server.expect("JOIN #nope").await;
    server.send(":test-server 403 bot #nope :No such channel").await;

    let err = timeout(WAIT, pending.wait()).await.unwrap().unwrap_err();
    assert_eq!(
        err,
        JoinError::Rejected {
            channel: "#nope".to_string(),
            detail: "403: #nope No such channel".to_string(),
        }
    );
    assert_eq!(controller.status("#nope"), None);
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (_controller, mut server) = connect("bot").await;
    server.register("bot").await;

    server.send("PING :test-server").await;
    let pong = server.expect("PONG").await;
    assert_eq!(pong, "PONG test-server");
}

#[tokio::test]
async fn say_reaches_server_and_own_log() {
    let (controller, mut server) = connect("bot").await;
    server.register("bot").await;

    let pending = controller.join_channel("#test").await.unwrap();
    server.expect("JOIN #test").await;
    server.send(":bot!bot@localhost JOIN #test").await;
    let log = timeout(WAIT, pending.wait()).await.unwrap().unwrap();

    controller.say("#test", "hello there").await.unwrap();
    let line = server.expect("PRIVMSG").await;
    assert_eq!(line, "PRIVMSG #test :hello there");

    wait_for_len(&log, 1).await;
    assert_eq!(
        log.snapshot(),
        vec![Event::SelfMessage {
            to: "#test".to_string(),
            text: "hello there".to_string(),
        }]
    );
}

#[tokio::test]
async fn server_hangup_ends_sessions() {
    let (controller, mut server) = connect("bot").await;
    server.register("bot").await;

    let pending = controller.join_channel("#test").await.unwrap();
    server.expect("JOIN #test").await;
    drop(server);

    let result = timeout(WAIT, pending.wait()).await.unwrap();
    assert!(result.is_err());
    timeout(WAIT, async {
        while controller.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timeout waiting for disconnect");
    assert!(controller.channels().is_empty());
}

#[tokio::test]
async fn quit_is_sent_on_disconnect() {
    let (controller, mut server) = connect("bot").await;
    server.register("bot").await;

    controller.disconnect(Some("see you")).await.unwrap();
    let quit = server.expect("QUIT").await;
    assert_eq!(quit, "QUIT :see you");
    assert!(!controller.is_connected());
}

#[tokio::test]
async fn server_assigned_nick_is_used_for_confirmation() {
    let (controller, mut server) = connect("watcherbot123").await;
    server.register("watcherbo").await;

    let pending = controller.join_channel("#test").await.unwrap();
    server.expect("JOIN #test").await;
    server.send(":watcherbo!w@host JOIN #test").await;

    let log = timeout(WAIT, pending.wait()).await.unwrap().unwrap();
    assert!(log.is_empty());
    assert_eq!(controller.nick(), "watcherbo");

    server.send(":alice!a@host KICK #test watcherbo :bye").await;
    wait_for_len(&log, 1).await;
    timeout(WAIT, async {
        while controller.status("#test").is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timeout waiting for the kick to end the session");
}

#[tokio::test]
async fn line_breaks_cannot_inject_commands() {
    let (controller, mut server) = connect("bot").await;
    server.register("bot").await;

    controller.say("#test", "hi\r\nQUIT :injected").await.unwrap();
    let line = server.expect("PRIVMSG").await;
    assert_eq!(line, "PRIVMSG #test :hi  QUIT :injected");

    controller.say("#test", "next").await.unwrap();
    assert_eq!(server.next_line().await.as_deref(), Some("PRIVMSG #test next"));
    assert!(controller.is_connected());
}

#[tokio::test(start_paused = true)]
async fn silent_server_gets_one_ping_then_times_out() {
    let (controller, mut server) = connect("bot").await;
    server.wait = Duration::from_secs(3600);
    server.register("bot").await;
    let silent_since = Instant::now();

    let mut pings = Vec::new();
    while let Some(line) = server.next_line().await {
        if line.starts_with("PING") {
            pings.push(silent_since.elapsed());
        }
    }

    assert_eq!(pings.len(), 1, "one keepalive per interval, got {pings:?}");
    assert!(pings[0] >= Duration::from_secs(59), "PING sent early: {pings:?}");
    assert!(silent_since.elapsed() >= Duration::from_secs(119));

    timeout(Duration::from_secs(60), async {
        while controller.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timeout waiting for disconnect");
}

#[tokio::test(start_paused = true)]
async fn answered_ping_keeps_connection_alive() {
    let (controller, mut server) = connect("bot").await;
    server.wait = Duration::from_secs(3600);
    server.register("bot").await;
    let start = Instant::now();

    for _ in 0..3 {
        let ping = server.expect("PING").await;
        assert_eq!(ping, "PING keepalive");
        server.send(":test-server PONG test-server :keepalive").await;
    }

    assert!(start.elapsed() >= Duration::from_secs(179));
    assert!(controller.is_connected());
}
