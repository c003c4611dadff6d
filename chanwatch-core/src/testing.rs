//! In-memory transport for tests.
//!
//! [`RecordingTransport`] accepts every command and remembers it. Pair it with
//! an `mpsc` channel of [`Event`](crate::event::Event)s to script what the
//! "server" says back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

use crate::transport::Transport;

/// A command as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentCommand {
    Join(String),
    Part {
        channel: String,
        reason: Option<String>,
    },
    Say {
        target: String,
        text: String,
    },
    Raw {
        command: String,
        args: Vec<String>,
    },
    Quit(Option<String>),
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentCommand>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, command: SentCommand) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("transport closed");
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn join(&self, channel: &str) -> Result<()> {
        self.record(SentCommand::Join(channel.to_string()))
    }

    async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.record(SentCommand::Part {
            channel: channel.to_string(),
            reason: reason.map(str::to_string),
        })
    }

    async fn say(&self, target: &str, text: &str) -> Result<()> {
        self.record(SentCommand::Say {
            target: target.to_string(),
            text: text.to_string(),
        })
    }

    async fn send(&self, command: &str, args: &[&str]) -> Result<()> {
        self.record(SentCommand::Raw {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }

    async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.record(SentCommand::Quit(message.map(str::to_string)))
    }
}
