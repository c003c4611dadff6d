//! Top-level owner of one connection and its channel sessions.
//!
//! The controller spawns a single pump task that receives the transport's
//! events and dispatches them on the [`EventRouter`], one at a time, in
//! delivery order. Every session transition and every log append happens
//! inside that dispatch.
//!
//! Joining a channel creates a [`ChannelSession`]; once the server confirms
//! it, a persistent subscription is wired (still inside the confirming
//! dispatch, so nothing that follows is missed) that appends every event
//! concerning the channel to a fresh [`SessionLog`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Abandonable, ClientError, InvariantViolation, JoinError, PartError};
use crate::event::{irc_lower, Event, EventKind};
use crate::log::SessionLog;
use crate::nick::OwnNick;
use crate::router::{EventRouter, ScopeId};
use crate::session::{ChannelSession, SessionStatus, TransitionOutcome};
use crate::transport::Transport;

/// An outcome that will be delivered once.
///
/// If the producing side goes away without answering, the outcome is
/// reported as abandoned.
#[derive(Debug)]
pub struct Pending<T, E> {
    channel: String,
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E: Abandonable> Pending<T, E> {
    fn new(channel: &str, rx: oneshot::Receiver<Result<T, E>>) -> Self {
        Self {
            channel: channel.to_string(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> Result<T, E> {
        let Self { channel, rx } = self;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(E::abandoned(channel, "outcome dropped".to_string())),
        }
    }

    /// The outcome, if it has arrived.
    pub fn try_outcome(&mut self) -> Option<Result<T, E>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(E::abandoned(
                self.channel.clone(),
                "outcome dropped".to_string(),
            ))),
        }
    }
}

/// Resolves to the channel's log once joined.
pub type PendingJoin = Pending<SessionLog, JoinError>;

/// Resolves to the channel's final log once parted.
pub type PendingPart = Pending<SessionLog, PartError>;

struct ActiveChannel {
    session: Arc<ChannelSession>,
    log: Option<(SessionLog, ScopeId)>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    router: EventRouter,
    nick: OwnNick,
    /// Keyed by case-folded channel name.
    channels: Mutex<HashMap<String, ActiveChannel>>,
    connected: AtomicBool,
}

pub struct ClientController {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

impl ClientController {
    /// Run `connecting` and start a controller on the resulting connection.
    ///
    /// A failure is reported straight away as [`ClientError::Connection`];
    /// nothing is retried.
    pub async fn connect<Fut>(nick: &str, connecting: Fut) -> Result<Self, ClientError>
    where
        Fut: Future<Output = anyhow::Result<(Arc<dyn Transport>, mpsc::Receiver<Event>)>>,
    {
        match connecting.await {
            Ok((transport, events)) => Ok(Self::start(transport, events, nick)),
            Err(e) => {
                tracing::warn!(%nick, "Connection failed: {e:#}");
                Err(ClientError::Connection(format!("{e:#}")))
            }
        }
    }

    /// Start a controller over an established connection.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, events: mpsc::Receiver<Event>, nick: &str) -> Self {
        let inner = Arc::new(Inner {
            transport,
            router: EventRouter::new(),
            nick: OwnNick::new(nick),
            channels: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });
        let pump = tokio::spawn(pump(inner.clone(), events));
        tracing::info!(%nick, "Controller started");
        Self { inner, pump }
    }

    /// Our nick as the server currently knows it.
    pub fn nick(&self) -> String {
        self.inner.nick.get()
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Request to join `channel`.
    ///
    /// Returns once JOIN has been handed to the transport; the returned
    /// [`PendingJoin`] resolves when the server answers.
    pub async fn join_channel(&self, channel: &str) -> Result<PendingJoin, ClientError> {
        self.inner.ensure_connected()?;
        let key = irc_lower(channel);
        let session = ChannelSession::new(channel, self.inner.nick.clone(), self.inner.router.clone());
        {
            let mut channels = self.inner.channels();
            if channels.contains_key(&key) {
                return Err(InvariantViolation::AlreadyActive {
                    channel: channel.to_string(),
                }
                .into());
            }
            channels.insert(
                key.clone(),
                ActiveChannel {
                    session: session.clone(),
                    log: None,
                },
            );
        }

        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(&self.inner);
        let result = session
            .join(self.inner.transport.as_ref(), move |session, outcome| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let _ = tx.send(inner.on_join_resolved(&key, session, outcome));
            })
            .await;
        if let Err(e) = result {
            self.inner.remove_if_same(&irc_lower(channel), &session);
            return Err(e.into());
        }
        Ok(Pending::new(channel, rx))
    }

    /// Request to leave `channel`. Only valid once the join has resolved.
    ///
    /// The returned [`PendingPart`] resolves to the channel's final log once
    /// the server acknowledges the part.
    pub async fn leave_channel(
        &self,
        channel: &str,
        reason: Option<&str>,
    ) -> Result<PendingPart, ClientError> {
        self.inner.ensure_connected()?;
        let key = irc_lower(channel);
        let session = self
            .inner
            .session(&key)
            .ok_or_else(|| InvariantViolation::UnknownChannel {
                channel: channel.to_string(),
            })?;

        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(&self.inner);
        session
            .part(self.inner.transport.as_ref(), reason, move |session, outcome| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let _ = tx.send(inner.on_part_resolved(&key, session, outcome));
            })
            .await?;
        Ok(Pending::new(channel, rx))
    }

    /// Drop the session for `channel` without waiting for the server.
    ///
    /// An unanswered join or part resolves as abandoned. There is no built-in
    /// timeout; callers that stop waiting use this to release the session.
    pub fn abandon(&self, channel: &str) -> Result<(), ClientError> {
        let removed = self.inner.channels().remove(&irc_lower(channel));
        let Some(active) = removed else {
            return Err(InvariantViolation::UnknownChannel {
                channel: channel.to_string(),
            }
            .into());
        };
        self.inner.dispose(active, "abandoned by caller");
        Ok(())
    }

    /// Send a message to a channel or nick.
    pub async fn say(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.inner.ensure_connected()?;
        self.inner
            .transport
            .say(target, text)
            .await
            .map_err(|e| ClientError::Transport(format!("{e:#}")))
    }

    /// Quit the server and end every session.
    pub async fn disconnect(&self, message: Option<&str>) -> Result<(), ClientError> {
        self.inner.ensure_connected()?;
        let sent = self.inner.transport.quit(message).await;
        self.inner.teardown("disconnected");
        sent.map_err(|e| ClientError::Transport(format!("{e:#}")))
    }

    /// The log of a joined channel.
    pub fn log(&self, channel: &str) -> Option<SessionLog> {
        let channels = self.inner.channels();
        let active = channels.get(&irc_lower(channel))?;
        active.log.as_ref().map(|(log, _)| log.clone())
    }

    pub fn status(&self, channel: &str) -> Option<SessionStatus> {
        self.inner.session(&irc_lower(channel)).map(|s| s.status())
    }

    /// Names of every channel with a live session, sorted.
    pub fn channels(&self) -> Vec<String> {
        let sessions: Vec<Arc<ChannelSession>> = self
            .inner
            .channels()
            .values()
            .map(|a| a.session.clone())
            .collect();
        let mut names: Vec<String> = sessions.iter().map(|s| s.channel()).collect();
        names.sort();
        names
    }
}

impl Drop for ClientController {
    fn drop(&mut self) {
        self.pump.abort();
        self.inner.teardown("controller dropped");
    }
}

async fn pump(inner: Arc<Inner>, mut events: mpsc::Receiver<Event>) {
    while let Some(event) = events.recv().await {
        inner.track_nick(&event);
        let handlers = inner.router.dispatch(&event);
        if handlers == 0 {
            tracing::trace!(kind = %event.kind(), "Event had no listeners");
        }
    }
    tracing::info!(nick = %inner.nick, "Event stream closed");
    inner.teardown("connection closed");
}

impl Inner {
    fn channels(&self) -> MutexGuard<'_, HashMap<String, ActiveChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, key: &str) -> Option<Arc<ChannelSession>> {
        self.channels().get(key).map(|a| a.session.clone())
    }

    /// Follow the nick the server assigns or renames us to. Runs before the
    /// event is dispatched, so its own listeners already see the new nick.
    fn track_nick(&self, event: &Event) {
        match event {
            Event::Registered { nick, .. } => self.nick.set(nick),
            Event::NickChange { old, new, .. } if self.nick.is(old) => self.nick.set(new),
            _ => {}
        }
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Connection("not connected".to_string()))
        }
    }

    /// Remove the entry for `key` if it still belongs to `session`.
    fn remove_if_same(&self, key: &str, session: &ChannelSession) -> Option<ActiveChannel> {
        let mut channels = self.channels();
        let same = channels
            .get(key)
            .is_some_and(|a| std::ptr::eq(Arc::as_ptr(&a.session), session));
        if same {
            channels.remove(key)
        } else {
            None
        }
    }

    fn on_join_resolved(
        self: &Arc<Self>,
        key: &str,
        session: &ChannelSession,
        outcome: &TransitionOutcome,
    ) -> Result<SessionLog, JoinError> {
        let channel = session.channel();
        match outcome {
            TransitionOutcome::Succeeded => {
                let log = SessionLog::new(channel.clone());
                let scope = self.router.new_scope();
                self.subscribe_log(scope, &log, &channel);

                let mut channels = self.channels();
                match channels.get_mut(key) {
                    Some(active) if std::ptr::eq(Arc::as_ptr(&active.session), session) => {
                        active.log = Some((log.clone(), scope));
                        tracing::info!(%channel, "Joined");
                        Ok(log)
                    }
                    _ => {
                        drop(channels);
                        self.router.unregister_scope(scope);
                        Err(JoinError::abandoned(channel, "session removed".to_string()))
                    }
                }
            }
            TransitionOutcome::Rejected { detail } => {
                self.remove_if_same(key, session);
                Err(JoinError::Rejected {
                    channel,
                    detail: detail.clone(),
                })
            }
            TransitionOutcome::SendFailed { detail } => {
                self.remove_if_same(key, session);
                Err(JoinError::SendFailed {
                    channel,
                    detail: detail.clone(),
                })
            }
            TransitionOutcome::Abandoned { reason } => {
                self.remove_if_same(key, session);
                Err(JoinError::Abandoned {
                    channel,
                    reason: reason.clone(),
                })
            }
        }
    }

    fn on_part_resolved(
        &self,
        key: &str,
        session: &ChannelSession,
        outcome: &TransitionOutcome,
    ) -> Result<SessionLog, PartError> {
        let channel = session.channel();
        match outcome {
            TransitionOutcome::Succeeded => match self.remove_if_same(key, session) {
                Some(ActiveChannel {
                    log: Some((log, scope)),
                    ..
                }) => {
                    self.router.unregister_scope(scope);
                    tracing::info!(%channel, entries = log.len(), "Parted");
                    Ok(log)
                }
                _ => Err(PartError::abandoned(channel, "session removed".to_string())),
            },
            TransitionOutcome::Rejected { detail } => Err(PartError::Rejected {
                channel,
                detail: detail.clone(),
            }),
            TransitionOutcome::SendFailed { detail } => Err(PartError::SendFailed {
                channel,
                detail: detail.clone(),
            }),
            TransitionOutcome::Abandoned { reason } => Err(PartError::Abandoned {
                channel,
                reason: reason.clone(),
            }),
        }
    }

    /// Wire the persistent subscription feeding `log`.
    fn subscribe_log(self: &Arc<Self>, scope: ScopeId, log: &SessionLog, channel: &str) {
        for kind in EventKind::ALL {
            let log = log.clone();
            let channel = channel.to_string();
            let weak: Weak<Inner> = Arc::downgrade(self);
            self.router.register_scoped(scope, kind, move |event| {
                if !event.concerns(&channel) {
                    return;
                }
                log.append(event.clone());
                if let Some(inner) = weak.upgrade() {
                    inner.check_removed(&channel, event);
                }
            });
        }
    }

    /// End the session if `event` removed us from `channel`.
    fn check_removed(&self, channel: &str, event: &Event) {
        let reason = match event {
            Event::Kick { nick, by, .. } if self.nick.is(nick) => format!("kicked by {by}"),
            Event::Kill { nick, reason, .. } if self.nick.is(nick) => {
                format!("killed: {reason}")
            }
            _ => return,
        };
        let removed = self.channels().remove(&irc_lower(channel));
        if let Some(active) = removed {
            tracing::warn!(%channel, %reason, "Removed from channel");
            self.dispose(active, &reason);
        }
    }

    /// Close a session that is no longer in the map.
    fn dispose(&self, active: ActiveChannel, reason: &str) {
        active.session.close(reason);
        if let Some((_, scope)) = active.log {
            self.router.unregister_scope(scope);
        }
    }

    fn teardown(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let drained: Vec<ActiveChannel> = self.channels().drain().map(|(_, a)| a).collect();
        for active in drained {
            self.dispose(active, reason);
        }
    }
}
