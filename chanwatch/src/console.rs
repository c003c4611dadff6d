//! Line-oriented front end: input commands and log printing.

use chanwatch_core::SessionLog;
use tokio::task::JoinHandle;

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Join(String),
    /// Leave the named channel, or the current one.
    Part(Option<String>),
    Quit(Option<String>),
    /// Plain text for the current channel.
    Say(String),
    Unknown(String),
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Say(line.to_string());
        };
        let (name, rest) = match command.split_once(' ') {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };
        let arg = (!rest.is_empty()).then(|| rest.to_string());
        match name.to_ascii_lowercase().as_str() {
            "join" | "j" => match arg {
                Some(channel) => Input::Join(channel),
                None => Input::Unknown(line.to_string()),
            },
            "part" | "leave" => Input::Part(arg),
            "quit" | "q" | "exit" => Input::Quit(arg),
            _ => Input::Unknown(line.to_string()),
        }
    }
}

/// Print every entry of `log`, current and future, until the task is aborted
/// or the log is dropped.
pub fn follow(log: SessionLog) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut appended = log.subscribe();
        let mut printed = 0;
        loop {
            for event in log.since(printed) {
                println!("[{}] {event}", log.channel());
                printed += 1;
            }
            if appended.changed().await.is_err() {
                break;
            }
        }
    })
}
