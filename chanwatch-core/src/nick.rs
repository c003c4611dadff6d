//! The nick the server currently knows us by.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::irc_eq;

/// Shared, updatable own nick. Clones see the same value.
///
/// Starts as the requested nick; the server may assign another at
/// registration or rename us later.
#[derive(Clone, Default)]
pub struct OwnNick(Arc<Mutex<String>>);

impl OwnNick {
    pub fn new(nick: &str) -> Self {
        Self(Arc::new(Mutex::new(nick.to_string())))
    }

    pub fn get(&self) -> String {
        self.lock().clone()
    }

    pub fn set(&self, nick: &str) {
        let mut current = self.lock();
        if *current != nick {
            tracing::info!(old = %current, new = %nick, "Own nick changed");
            *current = nick.to_string();
        }
    }

    /// Whether `nick` is us, under RFC 1459 case mapping.
    pub fn is(&self, nick: &str) -> bool {
        irc_eq(nick, &self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<&str> for OwnNick {
    fn from(nick: &str) -> Self {
        Self::new(nick)
    }
}

impl fmt::Display for OwnNick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lock())
    }
}

impl fmt::Debug for OwnNick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnNick").field(&*self.lock()).finish()
    }
}
