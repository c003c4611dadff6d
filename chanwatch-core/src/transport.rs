//! The command side of a server connection.
//!
//! A transport pairs an implementation of [`Transport`] with a
//! `tokio::sync::mpsc::Receiver<Event>` carrying decoded server events, in the
//! order the server sent them. The receiver closing means the connection is
//! gone.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send JOIN for `channel`.
    async fn join(&self, channel: &str) -> Result<()>;

    /// Send PART for `channel`.
    async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()>;

    /// Send a PRIVMSG. Implementations report it back as `Event::SelfMessage`.
    async fn say(&self, target: &str, text: &str) -> Result<()>;

    /// Send an arbitrary command.
    async fn send(&self, command: &str, args: &[&str]) -> Result<()>;

    /// Send QUIT and close the connection.
    async fn quit(&self, message: Option<&str>) -> Result<()>;
}
