//! Turns server lines into [`Event`]s.
//!
//! Some events need more than one line (MOTD, NAMES, topic plus setter) or
//! knowledge of who is where (the channel lists of QUIT, KILL and NICK), so
//! the decoder keeps a little per-connection state.

use std::collections::{BTreeMap, HashMap, HashSet};

use chanwatch_core::event::irc_lower;
use chanwatch_core::Event;

use crate::irc::WireMessage;

/// Mode prefixes that can precede a nick in a NAMES reply.
const MODE_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

#[derive(Debug, Default)]
struct Membership {
    /// Channel name as the server spells it.
    name: String,
    nicks: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct Decoder {
    own_nick: String,
    motd: Vec<String>,
    /// NAMES replies collected until 366, keyed by case-folded channel.
    names: HashMap<String, (String, BTreeMap<String, String>)>,
    /// Topic text from 332 awaiting its 333 setter line.
    topics: HashMap<String, String>,
    channels: HashMap<String, Membership>,
}

impl Decoder {
    pub fn new(nick: &str) -> Self {
        Self {
            own_nick: nick.to_string(),
            ..Default::default()
        }
    }

    /// Our nick as the server last confirmed it.
    pub fn own_nick(&self) -> &str {
        &self.own_nick
    }

    /// Case-folded names of the channels we are in.
    pub fn joined_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn decode(&mut self, msg: &WireMessage) -> Option<Event> {
        let source = msg.source_nick().unwrap_or("").to_string();
        match msg.command.as_str() {
            "001" => {
                if let Some(nick) = msg.param(0) {
                    self.own_nick = nick.to_string();
                }
                Some(Event::Registered {
                    nick: self.own_nick.clone(),
                    server_message: msg.trailing().to_string(),
                })
            }
            "375" => {
                self.motd.clear();
                None
            }
            "372" => {
                let line = msg.trailing();
                self.motd.push(line.strip_prefix("- ").unwrap_or(line).to_string());
                None
            }
            "376" => Some(Event::Motd {
                text: std::mem::take(&mut self.motd).join("\n"),
            }),
            // ERR_NOMOTD
            "422" => Some(Event::Motd {
                text: msg.trailing().to_string(),
            }),
            "353" => {
                // <me> <symbol> <channel> :<names>
                let channel = msg.param(2)?;
                let (_, members) = self
                    .names
                    .entry(irc_lower(channel))
                    .or_insert_with(|| (channel.to_string(), BTreeMap::new()));
                let mut seen = Vec::new();
                for token in msg.trailing().split_whitespace() {
                    let nick = token.trim_start_matches(MODE_PREFIXES);
                    let mode = &token[..token.len() - nick.len()];
                    members.insert(nick.to_string(), mode.to_string());
                    seen.push(nick.to_string());
                }
                for nick in seen {
                    self.add_member(channel, &nick);
                }
                None
            }
            "366" => {
                let channel = msg.param(1)?;
                let (channel, members) = self
                    .names
                    .remove(&irc_lower(channel))
                    .unwrap_or_else(|| (channel.to_string(), BTreeMap::new()));
                Some(Event::Names { channel, members })
            }
            "332" => {
                let channel = msg.param(1)?;
                self.topics.insert(irc_lower(channel), msg.trailing().to_string());
                None
            }
            "333" => {
                // <me> <channel> <setter> <time>
                let channel = msg.param(1)?;
                let setter = msg.param(2).map(|s| s.split('!').next().unwrap_or(s).to_string());
                let text = self.topics.remove(&irc_lower(channel)).unwrap_or_default();
                Some(Event::Topic {
                    channel: channel.to_string(),
                    text,
                    setter,
                })
            }
            "TOPIC" => Some(Event::Topic {
                channel: msg.param(0)?.to_string(),
                text: msg.param(1).unwrap_or("").to_string(),
                setter: Some(source),
            }),
            "JOIN" => {
                let channel = msg.param(0)?.to_string();
                if self.is_self(&source) {
                    self.channels.insert(
                        irc_lower(&channel),
                        Membership {
                            name: channel.clone(),
                            nicks: HashSet::new(),
                        },
                    );
                }
                self.add_member(&channel, &source);
                Some(Event::Join {
                    channel,
                    nick: source,
                })
            }
            "PART" => {
                let channel = msg.param(0)?.to_string();
                self.remove_member(&channel, &source);
                Some(Event::Part {
                    channel,
                    nick: source,
                    reason: msg.param(1).unwrap_or("").to_string(),
                })
            }
            "KICK" => {
                let channel = msg.param(0)?.to_string();
                let nick = msg.param(1)?.to_string();
                self.remove_member(&channel, &nick);
                Some(Event::Kick {
                    channel,
                    nick,
                    by: source,
                    reason: msg.param(2).unwrap_or("").to_string(),
                })
            }
            "QUIT" => {
                let channels = self.forget_nick(&source);
                Some(Event::Quit {
                    nick: source,
                    reason: msg.param(0).unwrap_or("").to_string(),
                    channels,
                })
            }
            "KILL" => {
                let nick = msg.param(0)?.to_string();
                let channels = self.forget_nick(&nick);
                Some(Event::Kill {
                    nick,
                    reason: msg.param(1).unwrap_or("").to_string(),
                    channels,
                })
            }
            "NICK" => {
                let new = msg.param(0)?.to_string();
                let channels = self.rename(&source, &new);
                if self.is_self(&source) {
                    self.own_nick = new.clone();
                }
                Some(Event::NickChange {
                    old: source,
                    new,
                    channels,
                })
            }
            "PRIVMSG" => Some(Event::Message {
                from: source,
                to: msg.param(0)?.to_string(),
                text: msg.param(1).unwrap_or("").to_string(),
            }),
            "NOTICE" => Some(Event::Notice {
                from: source,
                to: msg.param(0)?.to_string(),
                text: msg.param(1).unwrap_or("").to_string(),
            }),
            "INVITE" => Some(Event::Invite {
                channel: msg.param(1)?.to_string(),
                from: source,
            }),
            "ERROR" => Some(Event::TransportError {
                detail: msg.trailing().to_string(),
            }),
            _ => match msg.numeric() {
                Some(400..=599) => Some(Event::TransportError {
                    detail: format!("{}: {}", msg.command, msg.params.get(1..).unwrap_or(&[]).join(" ")),
                }),
                _ => None,
            },
        }
    }

    fn is_self(&self, nick: &str) -> bool {
        chanwatch_core::event::irc_eq(nick, &self.own_nick)
    }

    fn add_member(&mut self, channel: &str, nick: &str) {
        if let Some(m) = self.channels.get_mut(&irc_lower(channel)) {
            m.nicks.insert(irc_lower(nick));
        }
    }

    fn remove_member(&mut self, channel: &str, nick: &str) {
        let key = irc_lower(channel);
        if self.is_self(nick) {
            self.channels.remove(&key);
        } else if let Some(m) = self.channels.get_mut(&key) {
            m.nicks.remove(&irc_lower(nick));
        }
    }

    /// Remove `nick` everywhere; returns the channels it was in.
    fn forget_nick(&mut self, nick: &str) -> Vec<String> {
        let folded = irc_lower(nick);
        let mut names: Vec<String> = self
            .channels
            .values_mut()
            .filter_map(|m| m.nicks.remove(&folded).then(|| m.name.clone()))
            .collect();
        names.sort();
        if self.is_self(nick) {
            self.channels.clear();
        }
        names
    }

    fn rename(&mut self, old: &str, new: &str) -> Vec<String> {
        let old = irc_lower(old);
        let new = irc_lower(new);
        let mut names: Vec<String> = self
            .channels
            .values_mut()
            .filter_map(|m| {
                if m.nicks.remove(&old) {
                    m.nicks.insert(new.clone());
                    Some(m.name.clone())
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut Decoder, lines: &[&str]) -> Vec<Event> {
        lines
            .iter()
            .filter_map(|line| WireMessage::parse(line))
            .filter_map(|msg| decoder.decode(&msg))
            .collect()
    }

    fn joined(decoder: &mut Decoder) {
        feed(
            decoder,
            &[
                ":srv 001 bot :Welcome bot",
                ":bot!b@h JOIN #test",
                ":srv 353 bot = #test :bot @alice +carol",
                ":srv 366 bot #test :End of /NAMES list.",
            ],
        );
    }

    #[test]
    fn registration_and_motd() {
        let mut d = Decoder::new("bot");
        let events = feed(
            &mut d,
            &[
                ":srv 001 bot_ :Welcome to the network",
                ":srv 375 bot_ :- srv Message of the day -",
                ":srv 372 bot_ :- first line",
                ":srv 372 bot_ :- second line",
                ":srv 376 bot_ :End of /MOTD command.",
            ],
        );
        assert_eq!(
            events,
            vec![
                Event::Registered {
                    nick: "bot_".to_string(),
                    server_message: "Welcome to the network".to_string()
                },
                Event::Motd {
                    text: "first line\nsecond line".to_string()
                },
            ]
        );
        assert_eq!(d.own_nick(), "bot_");
    }

    #[test]
    fn names_collects_modes() {
        let mut d = Decoder::new("bot");
        let events = feed(
            &mut d,
            &[
                ":bot!b@h JOIN #test",
                ":srv 353 bot = #test :bot @alice",
                ":srv 353 bot = #test :+carol",
                ":srv 366 bot #test :End of /NAMES list.",
            ],
        );
        let mut members = BTreeMap::new();
        members.insert("bot".to_string(), String::new());
        members.insert("alice".to_string(), "@".to_string());
        members.insert("carol".to_string(), "+".to_string());
        assert_eq!(
            events[1],
            Event::Names {
                channel: "#test".to_string(),
                members
            }
        );
    }

    #[test]
    fn topic_waits_for_setter() {
        let mut d = Decoder::new("bot");
        let events = feed(
            &mut d,
            &[
                ":srv 332 bot #test :hello world",
                ":srv 333 bot #test alice!a@h 1700000000",
                ":alice!a@h TOPIC #test :new topic",
            ],
        );
        assert_eq!(
            events,
            vec![
                Event::Topic {
                    channel: "#test".to_string(),
                    text: "hello world".to_string(),
                    setter: Some("alice".to_string())
                },
                Event::Topic {
                    channel: "#test".to_string(),
                    text: "new topic".to_string(),
                    setter: Some("alice".to_string())
                },
            ]
        );
    }

    #[test]
    fn quit_lists_shared_channels() {
        let mut d = Decoder::new("bot");
        joined(&mut d);
        feed(&mut d, &[":bot!b@h JOIN #other", ":alice!a@h JOIN #other"]);

        let events = feed(&mut d, &[":alice!a@h QUIT :Client quit"]);
        assert_eq!(
            events,
            vec![Event::Quit {
                nick: "alice".to_string(),
                reason: "Client quit".to_string(),
                channels: vec!["#other".to_string(), "#test".to_string()],
            }]
        );

        let events = feed(&mut d, &[":carol!c@h QUIT :bye"]);
        assert_eq!(
            events,
            vec![Event::Quit {
                nick: "carol".to_string(),
                reason: "bye".to_string(),
                channels: vec!["#test".to_string()],
            }]
        );
    }

    #[test]
    fn nick_change_follows_membership() {
        let mut d = Decoder::new("bot");
        joined(&mut d);
        let events = feed(&mut d, &[":alice!a@h NICK :alicia", ":alicia!a@h QUIT :gone"]);
        assert_eq!(
            events[0],
            Event::NickChange {
                old: "alice".to_string(),
                new: "alicia".to_string(),
                channels: vec!["#test".to_string()],
            }
        );
        assert!(matches!(&events[1], Event::Quit { channels, .. } if channels == &vec!["#test".to_string()]));

        feed(&mut d, &[":bot!b@h NICK botty"]);
        assert_eq!(d.own_nick(), "botty");
    }

    #[test]
    fn own_part_and_kick_forget_channel() {
        let mut d = Decoder::new("bot");
        joined(&mut d);
        assert_eq!(d.joined_channels(), vec!["#test".to_string()]);

        let events = feed(&mut d, &[":bot!b@h PART #test :later"]);
        assert_eq!(
            events,
            vec![Event::Part {
                channel: "#test".to_string(),
                nick: "bot".to_string(),
                reason: "later".to_string(),
            }]
        );
        assert!(d.joined_channels().is_empty());

        joined(&mut d);
        let events = feed(&mut d, &[":alice!a@h KICK #test bot :out"]);
        assert!(matches!(&events[0], Event::Kick { by, .. } if by == "alice"));
        assert!(d.joined_channels().is_empty());
    }

    #[test]
    fn messages_and_notices() {
        let mut d = Decoder::new("bot");
        let events = feed(
            &mut d,
            &[
                ":alice!a@h PRIVMSG #test :hi",
                ":srv NOTICE * :*** Looking up your hostname",
                ":alice!a@h INVITE bot #secret",
            ],
        );
        assert_eq!(
            events,
            vec![
                Event::Message {
                    from: "alice".to_string(),
                    to: "#test".to_string(),
                    text: "hi".to_string()
                },
                Event::Notice {
                    from: "srv".to_string(),
                    to: "*".to_string(),
                    text: "*** Looking up your hostname".to_string()
                },
                Event::Invite {
                    channel: "#secret".to_string(),
                    from: "alice".to_string()
                },
            ]
        );
    }

    #[test]
    fn error_numerics_and_error_command() {
        let mut d = Decoder::new("bot");
        let events = feed(
            &mut d,
            &[
                ":srv 403 bot #nope :No such channel",
                ":srv 474 bot #banned :Cannot join channel (+b)",
                "ERROR :Closing Link: bot (Quit)",
                ":srv 318 bot alice :End of /WHOIS list.",
            ],
        );
        assert_eq!(
            events,
            vec![
                Event::TransportError {
                    detail: "403: #nope No such channel".to_string()
                },
                Event::TransportError {
                    detail: "474: #banned Cannot join channel (+b)".to_string()
                },
                Event::TransportError {
                    detail: "Closing Link: bot (Quit)".to_string()
                },
            ]
        );
    }
}
