//! Append-only, ordered record of the events seen by one channel session.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::event::Event;

/// Cheap to clone; clones share the same log.
#[derive(Clone)]
pub struct SessionLog {
    inner: Arc<LogInner>,
}

struct LogInner {
    channel: String,
    events: Mutex<Vec<Event>>,
    /// Carries the entry count after each append.
    appended: watch::Sender<usize>,
}

impl SessionLog {
    pub fn new(channel: impl Into<String>) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(LogInner {
                channel: channel.into(),
                events: Mutex::new(Vec::new()),
                appended,
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Add an event at the end of the log and notify subscribers.
    pub fn append(&self, event: Event) {
        let mut events = self.lock();
        events.push(event);
        // Sent under the lock so subscribers never see the count go backwards.
        self.inner.appended.send_replace(events.len());
    }

    /// A copy of every entry so far, in arrival order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Entries from index `start` onwards.
    pub fn since(&self, start: usize) -> Vec<Event> {
        self.lock().get(start..).map(<[Event]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Watch the entry count. The receiver wakes on every append.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.inner.appended.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.inner.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLog")
            .field("channel", &self.inner.channel)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> Event {
        Event::Message {
            from: "alice".to_string(),
            to: "#test".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn snapshot_preserves_order_and_count() {
        let log = SessionLog::new("#test");
        assert!(log.is_empty());
        log.append(msg("one"));
        log.append(msg("two"));
        log.append(msg("three"));
        assert_eq!(log.snapshot(), vec![msg("one"), msg("two"), msg("three")]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn snapshot_is_detached() {
        let log = SessionLog::new("#test");
        log.append(msg("one"));
        let mut snap = log.snapshot();
        snap.clear();
        snap.push(msg("forged"));
        assert_eq!(log.snapshot(), vec![msg("one")]);
    }

    #[test]
    fn duplicates_are_kept() {
        let log = SessionLog::new("#test");
        log.append(msg("same"));
        log.append(msg("same"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn since_returns_tail() {
        let log = SessionLog::new("#test");
        log.append(msg("one"));
        log.append(msg("two"));
        assert_eq!(log.since(1), vec![msg("two")]);
        assert!(log.since(2).is_empty());
        assert!(log.since(10).is_empty());
    }

    #[test]
    fn clones_share_entries() {
        let log = SessionLog::new("#test");
        let other = log.clone();
        other.append(msg("shared"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.channel(), "#test");
    }

    #[tokio::test]
    async fn subscribers_see_appends() {
        let log = SessionLog::new("#test");
        let mut rx = log.subscribe();
        assert_eq!(*rx.borrow_and_update(), 0);

        log.append(msg("one"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        log.append(msg("two"));
        log.append(msg("three"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 3);
    }
}
