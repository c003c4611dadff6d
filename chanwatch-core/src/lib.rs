//! Channel session lifecycle and event dispatch for IRC-style clients.
//!
//! A transport delivers decoded server events; the [`ClientController`]
//! dispatches them through an [`EventRouter`], drives each
//! [`ChannelSession`] through join and part, and keeps an ordered
//! [`SessionLog`] per joined channel for a front end to render.

pub mod controller;
pub mod error;
pub mod event;
pub mod log;
pub mod nick;
pub mod router;
pub mod session;
pub mod testing;
pub mod transport;

pub use controller::{ClientController, Pending, PendingJoin, PendingPart};
pub use error::{ClientError, InvariantViolation, JoinError, PartError};
pub use event::{Event, EventKind};
pub use log::SessionLog;
pub use nick::OwnNick;
pub use router::{EventRouter, RegistrationHandle, ScopeId};
pub use session::{ChannelSession, SessionStatus, TransitionOutcome};
pub use transport::Transport;
