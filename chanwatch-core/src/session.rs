//! One user's membership of one channel, from join request to part.
//!
//! A transition (join or part) registers short-lived listeners on the
//! connection's [`EventRouter`], sends the command, and waits for the server.
//! The first relevant event resolves it: under the session lock the status is
//! checked and updated, the result callback is taken and every listener of the
//! transition is unregistered, all as one step. Anything arriving later finds
//! no transition to resolve. The callback itself runs after the lock is
//! released, on whichever task delivered the resolving event.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::InvariantViolation;
use crate::event::{irc_eq, Event, EventKind};
use crate::nick::OwnNick;
use crate::router::{EventRouter, RegistrationHandle, ScopeId};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Join requested, not yet confirmed.
    Pending,
    Joined,
    /// Part requested, not yet acknowledged.
    Parting,
    Parted,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Parted | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Joined => "joined",
            SessionStatus::Parting => "parting",
            SessionStatus::Parted => "parted",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a transition ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Succeeded,
    /// The server answered with an error.
    Rejected { detail: String },
    /// The command never reached the transport.
    SendFailed { detail: String },
    /// The session was closed before the server answered.
    Abandoned { reason: String },
}

impl TransitionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionKind {
    Join,
    Part,
}

type ResultCallback = Box<dyn FnOnce(&ChannelSession, &TransitionOutcome) + Send>;

struct Transition {
    kind: TransitionKind,
    generation: u64,
    registrations: Vec<RegistrationHandle>,
    on_result: ResultCallback,
}

struct SessionState {
    /// Requested name until the server confirms its own spelling.
    channel: String,
    status: SessionStatus,
    transition: Option<Transition>,
    generation: u64,
}

pub struct ChannelSession {
    requested: String,
    nick: OwnNick,
    router: EventRouter,
    scope: ScopeId,
    state: Mutex<SessionState>,
}

impl ChannelSession {
    /// `nick` is shared with the controller, so a server-assigned nick or a
    /// later rename is honoured by transitions already in flight.
    pub fn new(channel: &str, nick: impl Into<OwnNick>, router: EventRouter) -> Arc<Self> {
        let scope = router.new_scope();
        Arc::new(Self {
            requested: channel.to_string(),
            nick: nick.into(),
            router,
            scope,
            state: Mutex::new(SessionState {
                channel: channel.to_string(),
                status: SessionStatus::Pending,
                transition: None,
                generation: 0,
            }),
        })
    }

    /// Channel name, as spelled by the server once joined.
    pub fn channel(&self) -> String {
        self.lock().channel.clone()
    }

    /// Our nick as currently known.
    pub fn nick(&self) -> String {
        self.nick.get()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Scope owning this session's transition listeners.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Ask the server to join the channel.
    ///
    /// `on_result` runs exactly once: on the confirming JOIN for our nick, on
    /// the first error event, if the command cannot be sent, or if the session
    /// is closed first. JOINs by other users are ignored.
    pub async fn join<F>(
        self: &Arc<Self>,
        transport: &dyn Transport,
        on_result: F,
    ) -> Result<(), InvariantViolation>
    where
        F: FnOnce(&ChannelSession, &TransitionOutcome) + Send + 'static,
    {
        let generation = {
            let mut state = self.lock();
            if state.status != SessionStatus::Pending {
                return Err(InvariantViolation::AlreadyResolved {
                    channel: state.channel.clone(),
                    status: state.status,
                });
            }
            if state.transition.is_some() {
                return Err(InvariantViolation::TransitionInProgress {
                    channel: state.channel.clone(),
                });
            }
            state.generation += 1;
            let generation = state.generation;
            let confirm = self.listen(EventKind::Join, generation, Self::on_join_event);
            let error = self.listen(EventKind::TransportError, generation, Self::on_error_event);
            state.transition = Some(Transition {
                kind: TransitionKind::Join,
                generation,
                registrations: vec![confirm, error],
                on_result: Box::new(on_result),
            });
            generation
        };

        tracing::debug!(channel = %self.requested, nick = %self.nick, "Sending JOIN");
        if let Err(e) = transport.join(&self.requested).await {
            let outcome = TransitionOutcome::SendFailed {
                detail: format!("{e:#}"),
            };
            self.report(self.resolve(generation, outcome, None));
        }
        Ok(())
    }

    /// Ask the server to let us leave the channel.
    ///
    /// Only valid once joined. `on_result` runs exactly once: on the PART
    /// acknowledgement for our nick, on the first error event, if the command
    /// cannot be sent, or if the session is closed first. A failed part leaves
    /// the session joined.
    pub async fn part<F>(
        self: &Arc<Self>,
        transport: &dyn Transport,
        reason: Option<&str>,
        on_result: F,
    ) -> Result<(), InvariantViolation>
    where
        F: FnOnce(&ChannelSession, &TransitionOutcome) + Send + 'static,
    {
        let (generation, channel) = {
            let mut state = self.lock();
            let channel = state.channel.clone();
            match state.status {
                SessionStatus::Joined => {}
                SessionStatus::Pending => {
                    return Err(InvariantViolation::PartWhilePending { channel });
                }
                SessionStatus::Parting => {
                    return Err(InvariantViolation::TransitionInProgress { channel });
                }
                SessionStatus::Parted | SessionStatus::Failed => {
                    return Err(InvariantViolation::NotJoined { channel });
                }
            }
            state.generation += 1;
            let generation = state.generation;
            let ack = self.listen(EventKind::Part, generation, Self::on_part_event);
            let error = self.listen(EventKind::TransportError, generation, Self::on_error_event);
            state.status = SessionStatus::Parting;
            state.transition = Some(Transition {
                kind: TransitionKind::Part,
                generation,
                registrations: vec![ack, error],
                on_result: Box::new(on_result),
            });
            (generation, channel)
        };

        tracing::debug!(%channel, nick = %self.nick, "Sending PART");
        if let Err(e) = transport.part(&channel, reason).await {
            let outcome = TransitionOutcome::SendFailed {
                detail: format!("{e:#}"),
            };
            self.report(self.resolve(generation, outcome, None));
        }
        Ok(())
    }

    /// End the session. Any transition in flight resolves as abandoned, and
    /// every listener the session owns is removed.
    pub fn close(&self, reason: &str) {
        let generation = self.lock().transition.as_ref().map(|t| t.generation);
        if let Some(generation) = generation {
            let outcome = TransitionOutcome::Abandoned {
                reason: reason.to_string(),
            };
            if let Err(e) = self.resolve(generation, outcome, None) {
                tracing::trace!(channel = %self.requested, "Close found transition settled: {e}");
            }
        }
        {
            let mut state = self.lock();
            if state.status == SessionStatus::Joined {
                state.status = SessionStatus::Parted;
            }
        }
        self.router.unregister_scope(self.scope);
        tracing::info!(channel = %self.requested, %reason, "Session closed");
    }

    fn listen(
        self: &Arc<Self>,
        kind: EventKind,
        generation: u64,
        handle: fn(&ChannelSession, u64, &Event),
    ) -> RegistrationHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.router.register_scoped(self.scope, kind, move |event| {
            if let Some(session) = weak.upgrade() {
                handle(&session, generation, event);
            }
        })
    }

    fn on_join_event(&self, generation: u64, event: &Event) {
        let Event::Join { channel, nick } = event else {
            return;
        };
        if !self.nick.is(nick) || !irc_eq(channel, &self.requested) {
            tracing::trace!(%channel, %nick, "Ignoring JOIN by someone else");
            return;
        }
        self.report(self.resolve(generation, TransitionOutcome::Succeeded, Some(channel)));
    }

    fn on_part_event(&self, generation: u64, event: &Event) {
        let Event::Part { channel, nick, .. } = event else {
            return;
        };
        if !self.nick.is(nick) || !irc_eq(channel, &self.channel()) {
            return;
        }
        self.report(self.resolve(generation, TransitionOutcome::Succeeded, None));
    }

    fn on_error_event(&self, generation: u64, event: &Event) {
        let Event::TransportError { detail } = event else {
            return;
        };
        let outcome = TransitionOutcome::Rejected {
            detail: detail.clone(),
        };
        self.report(self.resolve(generation, outcome, None));
    }

    /// Settle transition `generation`, if it is still the one in flight.
    fn resolve(
        &self,
        generation: u64,
        outcome: TransitionOutcome,
        server_channel: Option<&str>,
    ) -> Result<(), InvariantViolation> {
        let on_result = {
            let mut state = self.lock();
            let current = state.transition.as_ref().map(|t| t.generation);
            if current != Some(generation) {
                return Err(InvariantViolation::AlreadyResolved {
                    channel: state.channel.clone(),
                    status: state.status,
                });
            }
            let Some(transition) = state.transition.take() else {
                return Ok(());
            };
            for handle in &transition.registrations {
                self.router.unregister(handle);
            }
            state.status = match (transition.kind, &outcome) {
                (TransitionKind::Join, TransitionOutcome::Succeeded) => SessionStatus::Joined,
                (TransitionKind::Join, _) => SessionStatus::Failed,
                (TransitionKind::Part, TransitionOutcome::Succeeded)
                | (TransitionKind::Part, TransitionOutcome::Abandoned { .. }) => {
                    SessionStatus::Parted
                }
                (TransitionKind::Part, _) => SessionStatus::Joined,
            };
            if let Some(name) = server_channel {
                state.channel = name.to_string();
            }
            tracing::info!(
                channel = %state.channel,
                status = %state.status,
                ?outcome,
                "Session transition resolved"
            );
            transition.on_result
        };
        on_result(self, &outcome);
        Ok(())
    }

    fn report(&self, result: Result<(), InvariantViolation>) {
        if let Err(e) = result {
            tracing::warn!(nick = %self.nick, "Event for settled session: {e}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.router.unregister_scope(self.scope);
    }
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ChannelSession")
            .field("channel", &state.channel)
            .field("nick", &self.nick)
            .field("status", &state.status)
            .finish()
    }
}
