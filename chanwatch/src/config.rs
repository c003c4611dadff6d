use clap::Parser;

use crate::client::ConnectConfig;

/// Watch IRC channels from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(name = "chanwatch", version, about)]
pub struct ClientConfig {
    /// Server address (host:port). Port 6697 implies TLS.
    #[arg(long, default_value = "127.0.0.1:6667")]
    pub server: String,

    /// Nickname to register with.
    #[arg(long, default_value = "chanwatch")]
    pub nick: String,

    /// Username (ident). Defaults to the nick.
    #[arg(long)]
    pub user: Option<String>,

    /// Real name.
    #[arg(long, default_value = "chanwatch")]
    pub realname: String,

    /// Use TLS.
    #[arg(long)]
    pub tls: bool,

    /// Channels to join on startup. Repeatable or comma-separated.
    #[arg(long = "channel", value_delimiter = ',')]
    pub channels: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:6667".to_string(),
            nick: "chanwatch".to_string(),
            user: None,
            realname: "chanwatch".to_string(),
            tls: false,
            channels: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: self.server.clone(),
            nick: self.nick.clone(),
            user: self.user.clone().unwrap_or_else(|| self.nick.clone()),
            realname: self.realname.clone(),
            tls: self.tls,
        }
    }
}
