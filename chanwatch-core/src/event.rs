//! Protocol events delivered by a transport and recorded in session logs.

use std::collections::BTreeMap;
use std::fmt;

/// Everything a transport can report about the connection.
///
/// The set is closed: routing, logging and display all match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// IRC registration complete (numeric 001). `nick` is the nick the
    /// server assigned, which may differ from the one requested.
    Registered { nick: String, server_message: String },

    /// The full message of the day, lines joined with `\n`.
    Motd { text: String },

    /// Channel membership. Maps nick to its mode prefix (`""`, `"@"`, `"+"`, ...).
    Names {
        channel: String,
        members: BTreeMap<String, String>,
    },

    /// Channel topic, either on join or after a live change.
    Topic {
        channel: String,
        text: String,
        setter: Option<String>,
    },

    /// Someone (possibly us) joined a channel.
    Join { channel: String, nick: String },

    /// Someone (possibly us) left a channel.
    Part {
        channel: String,
        nick: String,
        reason: String,
    },

    /// Someone quit the server. `channels` lists the channels we shared with them.
    Quit {
        nick: String,
        reason: String,
        channels: Vec<String>,
    },

    /// Someone was kicked from a channel.
    Kick {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    /// Someone was killed by the server.
    Kill {
        nick: String,
        reason: String,
        channels: Vec<String>,
    },

    /// A PRIVMSG from someone else.
    Message {
        from: String,
        to: String,
        text: String,
    },

    /// A PRIVMSG we sent.
    SelfMessage { to: String, text: String },

    /// A NOTICE.
    Notice {
        from: String,
        to: String,
        text: String,
    },

    /// Someone changed nick.
    NickChange {
        old: String,
        new: String,
        channels: Vec<String>,
    },

    /// We were invited to a channel.
    Invite { channel: String, from: String },

    /// The server or the transport reported an error.
    TransportError { detail: String },
}

/// Routing key for [`Event`]: one per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Registered,
    Motd,
    Names,
    Topic,
    Join,
    Part,
    Quit,
    Kick,
    Kill,
    Message,
    SelfMessage,
    Notice,
    NickChange,
    Invite,
    TransportError,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::Registered,
        EventKind::Motd,
        EventKind::Names,
        EventKind::Topic,
        EventKind::Join,
        EventKind::Part,
        EventKind::Quit,
        EventKind::Kick,
        EventKind::Kill,
        EventKind::Message,
        EventKind::SelfMessage,
        EventKind::Notice,
        EventKind::NickChange,
        EventKind::Invite,
        EventKind::TransportError,
    ];

    /// The protocol-facing event name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Registered => "registered",
            EventKind::Motd => "motd",
            EventKind::Names => "names",
            EventKind::Topic => "topic",
            EventKind::Join => "join",
            EventKind::Part => "part",
            EventKind::Quit => "quit",
            EventKind::Kick => "kick",
            EventKind::Kill => "kill",
            EventKind::Message => "message",
            EventKind::SelfMessage => "selfMessage",
            EventKind::Notice => "notice",
            EventKind::NickChange => "nick",
            EventKind::Invite => "invite",
            EventKind::TransportError => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Registered { .. } => EventKind::Registered,
            Event::Motd { .. } => EventKind::Motd,
            Event::Names { .. } => EventKind::Names,
            Event::Topic { .. } => EventKind::Topic,
            Event::Join { .. } => EventKind::Join,
            Event::Part { .. } => EventKind::Part,
            Event::Quit { .. } => EventKind::Quit,
            Event::Kick { .. } => EventKind::Kick,
            Event::Kill { .. } => EventKind::Kill,
            Event::Message { .. } => EventKind::Message,
            Event::SelfMessage { .. } => EventKind::SelfMessage,
            Event::Notice { .. } => EventKind::Notice,
            Event::NickChange { .. } => EventKind::NickChange,
            Event::Invite { .. } => EventKind::Invite,
            Event::TransportError { .. } => EventKind::TransportError,
        }
    }

    /// Whether this event belongs in the log of `channel`.
    ///
    /// Connection-wide events (registration, MOTD, invites, errors) belong to
    /// every channel log.
    pub fn concerns(&self, channel: &str) -> bool {
        match self {
            Event::Registered { .. }
            | Event::Motd { .. }
            | Event::Invite { .. }
            | Event::TransportError { .. } => true,
            Event::Names { channel: c, .. }
            | Event::Topic { channel: c, .. }
            | Event::Join { channel: c, .. }
            | Event::Part { channel: c, .. }
            | Event::Kick { channel: c, .. } => irc_eq(c, channel),
            Event::Quit { channels, .. }
            | Event::Kill { channels, .. }
            | Event::NickChange { channels, .. } => channels.iter().any(|c| irc_eq(c, channel)),
            Event::Message { to, .. } | Event::SelfMessage { to, .. } | Event::Notice { to, .. } => {
                irc_eq(to, channel)
            }
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Registered {
                nick,
                server_message,
            } => write!(f, "note: connected to server as {nick} ({server_message})"),
            Event::Motd { text } => write!(f, "motd:\n{text}"),
            Event::Names { channel, members } => {
                let names: Vec<String> = members
                    .iter()
                    .map(|(nick, mode)| format!("{mode}{nick}"))
                    .collect();
                write!(f, "{channel} has members: {}", names.join(" "))
            }
            Event::Topic {
                channel,
                text,
                setter,
            } => match setter {
                Some(nick) => write!(f, "topic at {channel} set by {nick}: {text}"),
                None => write!(f, "topic at {channel}: {text}"),
            },
            Event::Join { channel, nick } => write!(f, "{nick} joined {channel}"),
            Event::Part {
                channel,
                nick,
                reason,
            } => write!(f, "{nick} left {channel}: {reason}"),
            Event::Quit { nick, reason, .. } => write!(f, "{nick} quit: {reason}"),
            Event::Kick {
                channel,
                nick,
                by,
                reason,
            } => write!(f, "{nick} kicked from {channel} by {by}: {reason}"),
            Event::Kill { nick, reason, .. } => write!(f, "{nick} killed: {reason}"),
            Event::Message { from, to, text } => write!(f, "{from} => {to}: {text}"),
            Event::SelfMessage { to, text } => write!(f, "you => {to}: {text}"),
            Event::Notice { from, to, text } => write!(f, "[notice] {from} => {to}: {text}"),
            Event::NickChange { old, new, .. } => write!(f, "{old} is now {new}"),
            Event::Invite { channel, from } => write!(f, "invite to {channel} from {from}"),
            Event::TransportError { detail } => write!(f, "error: {detail}"),
        }
    }
}

/// Lowercase a nick or channel name using RFC 1459 case mapping.
pub fn irc_lower(name: &str) -> String {
    name.chars().map(fold_char).collect()
}

/// Compare two nicks or channel names under RFC 1459 case mapping.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().map(fold_char).eq(b.chars().map(fold_char))
}

fn fold_char(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        other => other.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let event = Event::Join {
            channel: "#test".to_string(),
            nick: "bot".to_string(),
        };
        assert_eq!(event.kind(), EventKind::Join);
        assert_eq!(event.kind().as_str(), "join");
        assert_eq!(EventKind::TransportError.to_string(), "error");
    }

    #[test]
    fn case_mapping() {
        assert!(irc_eq("#Test", "#test"));
        assert!(irc_eq("nick[away]", "NICK{AWAY}"));
        assert!(!irc_eq("#test", "#test2"));
        assert_eq!(irc_lower("Foo\\Bar"), "foo|bar");
    }

    #[test]
    fn channel_scoping() {
        let topic = Event::Topic {
            channel: "#Test".to_string(),
            text: "hello".to_string(),
            setter: Some("alice".to_string()),
        };
        assert!(topic.concerns("#test"));
        assert!(!topic.concerns("#other"));

        let quit = Event::Quit {
            nick: "alice".to_string(),
            reason: "bye".to_string(),
            channels: vec!["#a".to_string(), "#test".to_string()],
        };
        assert!(quit.concerns("#test"));
        assert!(!quit.concerns("#b"));

        let pm = Event::Message {
            from: "alice".to_string(),
            to: "bot".to_string(),
            text: "psst".to_string(),
        };
        assert!(!pm.concerns("#test"));

        let err = Event::TransportError {
            detail: "boom".to_string(),
        };
        assert!(err.concerns("#anything"));
    }

    #[test]
    fn display_lines() {
        let mut members = BTreeMap::new();
        members.insert("alice".to_string(), "@".to_string());
        members.insert("bob".to_string(), String::new());
        let names = Event::Names {
            channel: "#test".to_string(),
            members,
        };
        assert_eq!(names.to_string(), "#test has members: @alice bob");

        let kick = Event::Kick {
            channel: "#test".to_string(),
            nick: "eve".to_string(),
            by: "alice".to_string(),
            reason: "spam".to_string(),
        };
        assert_eq!(kick.to_string(), "eve kicked from #test by alice: spam");
    }
}
