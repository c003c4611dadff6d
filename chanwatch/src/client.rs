//! IRC connection implementing [`Transport`].
//!
//! The connection runs in a spawned task: it registers with NICK/USER,
//! answers PINGs, keeps the link alive, decodes server lines into
//! [`Event`]s and writes the commands it receives from [`IrcTransport`].
//! Commands issued before registration completes are queued until `001`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chanwatch_core::{ClientController, ClientError, Event, Transport};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

use crate::decode::Decoder;
use crate::irc::WireMessage;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    pub nick: String,
    /// Username (ident).
    pub user: String,
    pub realname: String,
    /// Use TLS. Port 6697 implies TLS.
    pub tls: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "chanwatch".to_string(),
            user: "chanwatch".to_string(),
            realname: "chanwatch".to_string(),
            tls: false,
        }
    }
}

impl ConnectConfig {
    fn use_tls(&self) -> bool {
        self.tls || self.server_addr.ends_with(":6697")
    }
}

#[derive(Debug)]
enum Command {
    Join(String),
    Part {
        channel: String,
        reason: Option<String>,
    },
    Privmsg {
        target: String,
        text: String,
    },
    Raw(WireMessage),
    Quit(Option<String>),
}

/// Command side of a running connection. Cheap to clone.
#[derive(Clone, Debug)]
pub struct IrcTransport {
    cmd_tx: mpsc::Sender<Command>,
}

#[async_trait]
impl Transport for IrcTransport {
    async fn join(&self, channel: &str) -> Result<()> {
        self.cmd_tx.send(Command::Join(channel.to_string())).await?;
        Ok(())
    }

    async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Part {
                channel: channel.to_string(),
                reason: reason.map(str::to_string),
            })
            .await?;
        Ok(())
    }

    async fn say(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn send(&self, command: &str, args: &[&str]) -> Result<()> {
        self.cmd_tx
            .send(Command::Raw(WireMessage::new(command, args)))
            .await?;
        Ok(())
    }

    async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(str::to_string)))
            .await?;
        Ok(())
    }
}

/// A TCP (optionally TLS) connection that has not started IRC registration.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Open the TCP connection and, if configured, complete the TLS handshake.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {} failed: {e}", config.server_addr))?;

    if !config.use_tls() {
        tracing::info!(server = %config.server_addr, "Connected (plain)");
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let connector = TlsConnector::from(Arc::new(tls_config()));
    let host = config
        .server_addr
        .rsplit_once(':')
        .map_or(config.server_addr.as_str(), |(host, _)| host);
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", config.server_addr))?;
    tracing::info!(server = %config.server_addr, "Connected (TLS)");
    Ok(EstablishedConnection::Tls(Box::new(stream)))
}

fn tls_config() -> rustls::ClientConfig {
    // Another crate may already have installed a provider; either is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Start the IRC session on an established connection.
///
/// Returns the command side and the event stream. The stream closes when the
/// connection ends.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (IrcTransport, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
        };
        if let Err(e) = result {
            tracing::warn!("Connection ended: {e:#}");
            let _ = event_tx
                .send(Event::TransportError {
                    detail: format!("connection lost: {e:#}"),
                })
                .await;
        }
    });

    (IrcTransport { cmd_tx }, event_rx)
}

/// Connect and start the IRC session.
pub async fn connect(config: &ConnectConfig) -> Result<(IrcTransport, mpsc::Receiver<Event>)> {
    let conn = establish_connection(config).await?;
    Ok(connect_with_stream(conn, config.clone()))
}

/// Connect and hand the connection to a new [`ClientController`].
pub async fn connect_controller(config: &ConnectConfig) -> Result<ClientController, ClientError> {
    ClientController::connect(&config.nick, async {
        let (transport, events) = connect(config).await?;
        let transport: Arc<dyn Transport> = Arc::new(transport);
        Ok::<_, anyhow::Error>((transport, events))
    })
    .await
}

/// Drive one IRC session until the server closes it or we quit.
async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(&mut writer, &WireMessage::new("NICK", &[config.nick.as_str()])).await?;
    write_line(
        &mut writer,
        &WireMessage::new("USER", &[config.user.as_str(), "0", "*", config.realname.as_str()]),
    )
    .await?;

    let mut decoder = Decoder::new(&config.nick);
    let mut registered = false;
    let mut pending_commands: Vec<Command> = Vec::new();
    let mut line_buf = String::new();
    let mut last_activity = Instant::now();
    // Set while our keepalive PING is unanswered; cleared by any inbound line.
    let mut ping_outstanding = false;

    loop {
        tokio::select! {
            result = reader.read_line(&mut line_buf) => {
                let n = result?;
                if n == 0 {
                    let _ = event_tx.send(Event::TransportError { detail: "connection closed by server".to_string() }).await;
                    break;
                }
                last_activity = Instant::now();
                ping_outstanding = false;
                tracing::trace!("<- {}", line_buf.trim_end());

                if let Some(msg) = WireMessage::parse(&line_buf) {
                    if msg.command == "PING" {
                        write_line(&mut writer, &WireMessage::new("PONG", &[msg.trailing()])).await?;
                    } else if let Some(event) = decoder.decode(&msg) {
                        if matches!(event, Event::Registered { .. }) && !registered {
                            registered = true;
                            for cmd in pending_commands.drain(..) {
                                execute_command(&mut writer, cmd, &event_tx).await?;
                            }
                        }
                        if event_tx.send(event).await.is_err() {
                            tracing::debug!("Event receiver dropped, closing connection");
                            break;
                        }
                    }
                }
                line_buf.clear();
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Every transport handle is gone; nobody can send QUIT any more.
                    write_line(&mut writer, &WireMessage::new("QUIT", &[])).await?;
                    break;
                };
                let quitting = matches!(cmd, Command::Quit(_));
                if registered || quitting {
                    execute_command(&mut writer, cmd, &event_tx).await?;
                    if quitting {
                        break;
                    }
                } else {
                    pending_commands.push(cmd);
                }
            }
            _ = tokio::time::sleep_until(keepalive_deadline(last_activity, ping_outstanding)) => {
                if ping_outstanding {
                    tracing::warn!(server = %config.server_addr, "Ping timeout");
                    let _ = event_tx.send(Event::TransportError { detail: "ping timeout".to_string() }).await;
                    break;
                }
                write_line(&mut writer, &WireMessage::new("PING", &["keepalive"])).await?;
                ping_outstanding = true;
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Silence after which we send a keepalive PING.
const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Silence after which the connection is considered dead.
const PING_TIMEOUT: Duration = Duration::from_secs(120);

/// When the keepalive timer next fires: time to PING, or, with a PING
/// already unanswered, time to give up.
fn keepalive_deadline(last_activity: Instant, ping_outstanding: bool) -> Instant {
    if ping_outstanding {
        last_activity + PING_TIMEOUT
    } else {
        last_activity + PING_INTERVAL
    }
}

async fn execute_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    cmd: Command,
    event_tx: &mpsc::Sender<Event>,
) -> Result<()> {
    match cmd {
        Command::Join(channel) => write_line(writer, &WireMessage::new("JOIN", &[channel.as_str()])).await,
        Command::Part { channel, reason } => {
            let msg = match reason {
                Some(reason) => WireMessage::new("PART", &[channel.as_str(), reason.as_str()]),
                None => WireMessage::new("PART", &[channel.as_str()]),
            };
            write_line(writer, &msg).await
        }
        Command::Privmsg { target, text } => {
            write_line(writer, &WireMessage::new("PRIVMSG", &[target.as_str(), text.as_str()])).await?;
            let _ = event_tx.send(Event::SelfMessage { to: target, text }).await;
            Ok(())
        }
        Command::Raw(msg) => write_line(writer, &msg).await,
        Command::Quit(message) => {
            let msg = match message {
                Some(m) => WireMessage::new("QUIT", &[m.as_str()]),
                None => WireMessage::new("QUIT", &[]),
            };
            write_line(writer, &msg).await
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, msg: &WireMessage) -> Result<()> {
    let line = msg.to_string();
    tracing::trace!("-> {line}");
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
