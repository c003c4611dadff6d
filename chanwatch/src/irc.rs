//! IRC protocol lines: `[@tags] [:prefix] COMMAND params... [:trailing]`.
//!
//! Tags are accepted and skipped; chanwatch never requests capabilities that
//! would make them meaningful.

use std::borrow::Cow;
use std::fmt;

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl WireMessage {
    /// Parse a raw line. Returns `None` for blank or truncated lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        if rest.starts_with('@') {
            let end = rest.find(' ')?;
            rest = rest[end + 1..].trim_start_matches(' ');
        }

        let prefix = match rest.strip_prefix(':') {
            Some(after) => {
                let end = after.find(' ')?;
                let prefix = after[..end].to_string();
                rest = after[end + 1..].trim_start_matches(' ');
                Some(prefix)
            }
            None => None,
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    if !param.is_empty() {
                        params.push(param.to_string());
                    }
                    rest = tail;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    pub fn new(command: &str, params: &[&str]) -> Self {
        Self {
            prefix: None,
            command: command.to_ascii_uppercase(),
            params: params.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Nick part of the prefix (`nick!user@host`), or the whole prefix for servers.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }

    /// Three-digit server replies.
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// The last parameter, usually the human-readable text.
    pub fn trailing(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or("")
    }
}

/// Characters that would end the line early and let the rest be read as a
/// second command.
const LINE_BREAKS: [char; 3] = ['\r', '\n', '\0'];

fn one_line(s: &str) -> Cow<'_, str> {
    if s.contains(LINE_BREAKS) {
        Cow::Owned(s.replace(LINE_BREAKS, " "))
    } else {
        Cow::Borrowed(s)
    }
}

/// Formats as one protocol line without the CRLF terminator. Embedded CR, LF
/// and NUL are replaced by spaces.
impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", one_line(prefix))?;
        }
        write!(f, "{}", one_line(&self.command))?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let param = one_line(param);
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}
