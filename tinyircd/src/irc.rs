//! IRC wire format: line framing, message parsing and reply encoding.
//!
//! Incoming grammar:
//!   [`:`source SPACE] verb *(SPACE param) [SPACE `:` trailing]
//!
//! Outgoing lines are rendered from the same [`Message`] type and are
//! always CRLF-terminated on the wire.

use std::fmt;

/// Longest partial line kept while waiting for its terminator.
pub const MAX_LINE_LENGTH: usize = 8192;

/// A single protocol line, either decoded from a client or built for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional source (`server` or `nick!user@host`).
    pub source: Option<String>,
    /// Uppercased verb (`PRIVMSG`) or three-digit numeric (`001`).
    pub verb: String,
    /// Middle parameters in order.
    pub args: Vec<String>,
    /// Trailing parameter, if one was introduced with ` :`.
    pub trailing: Option<String>,
}

/// Why a line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedCommand {
    #[error("empty line")]
    Empty,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("source present but missing verb")]
    MissingVerb,
    #[error("invalid source {0:?}")]
    InvalidSource(String),
    #[error("invalid verb {0:?}")]
    InvalidVerb(String),
    #[error("invalid parameter {0:?}")]
    InvalidParam(String),
}

impl Message {
    /// Start a line with no source.
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            source: None,
            verb: verb.into(),
            args: Vec::new(),
            trailing: None,
        }
    }

    /// Start a line originating from `source` (a server name or hostmask).
    pub fn from_source(source: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::new(verb)
        }
    }

    /// Start a numeric reply: `:server CODE nick ...`.
    pub fn numeric(server_name: &str, reply: Reply, nick: &str) -> Self {
        Self::from_source(server_name, reply.to_string()).arg(nick)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn trailing(mut self, text: impl Into<String>) -> Self {
        self.trailing = Some(text.into());
        self
    }

    /// Decode a raw line of bytes (terminator optional).
    pub fn parse_bytes(line: &[u8]) -> Result<Self, MalformedCommand> {
        let text = std::str::from_utf8(line).map_err(|_| MalformedCommand::InvalidUtf8)?;
        Self::parse(text)
    }

    /// Parse one line of text (terminator optional).
    pub fn parse(line: &str) -> Result<Self, MalformedCommand> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(MalformedCommand::Empty);
        }

        let (source, rest) = match line.strip_prefix(':') {
            Some(after) => {
                let (source, rest) = after.split_once(' ').ok_or(MalformedCommand::MissingVerb)?;
                if source.is_empty() || source.chars().any(char::is_control) {
                    return Err(MalformedCommand::InvalidSource(source.to_owned()));
                }
                (Some(source.to_owned()), rest.trim_start_matches(' '))
            }
            None => (None, line),
        };

        let (verb, mut rest) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if verb.is_empty() {
            return Err(MalformedCommand::MissingVerb);
        }
        if !verb.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MalformedCommand::InvalidVerb(verb.to_owned()));
        }

        let mut args = Vec::new();
        let mut trailing = None;
        loop {
            let param_start = rest.trim_start_matches(' ');
            if param_start.is_empty() {
                break;
            }
            if let Some(text) = param_start.strip_prefix(':') {
                // A bare CR would end the line early for some receivers.
                if text.contains(['\0', '\r']) {
                    return Err(MalformedCommand::InvalidParam(text.to_owned()));
                }
                trailing = Some(text.to_owned());
                break;
            }
            let end = param_start.find(' ').unwrap_or(param_start.len());
            let param = &param_start[..end];
            if param.chars().any(char::is_control) {
                return Err(MalformedCommand::InvalidParam(param.to_owned()));
            }
            args.push(param.to_owned());
            rest = &param_start[end..];
        }

        Ok(Self {
            source,
            verb: verb.to_ascii_uppercase(),
            args,
            trailing,
        })
    }

    /// Trailing text if present, otherwise the middle parameter at `idx`.
    pub fn text_or_arg(&self, idx: usize) -> Option<&str> {
        self.trailing
            .as_deref()
            .or_else(|| self.args.get(idx).map(String::as_str))
    }

    /// Render for the wire, CRLF included.
    pub fn encode(&self) -> String {
        format!("{self}\r\n")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref source) = self.source {
            write!(f, ":{source} ")?;
        }
        f.write_str(&self.verb)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(ref trailing) = self.trailing {
            write!(f, " :{trailing}")?;
        }
        Ok(())
    }
}

// ── Numeric replies ──────────────────────────────────────────────

/// Numeric replies sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Reply {
    Welcome = 1,
    YourHost = 2,
    Created = 3,
    MyInfo = 4,
    ISupport = 5,
    WhoisUser = 311,
    WhoisServer = 312,
    EndOfWho = 315,
    EndOfWhois = 318,
    ListStart = 321,
    List = 322,
    ListEnd = 323,
    ChannelModeIs = 324,
    NoTopicSet = 331,
    Topic = 332,
    WhoReply = 352,
    NameReply = 353,
    EndOfNames = 366,
    Motd = 372,
    MotdStart = 375,
    EndOfMotd = 376,
    NoSuchNick = 401,
    NoSuchChannel = 403,
    UnknownCommand = 421,
    NoMotd = 422,
    ErroneousNickname = 432,
    NicknameInUse = 433,
    NotRegistered = 451,
    BadChannelName = 479,
}

impl Reply {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

// ── Line framing ─────────────────────────────────────────────────

/// The partial line in a [`LineBuffer`] grew past its limit and was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("line exceeds maximum length ({limit} bytes)")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Reassembles lines from a byte stream that may split them arbitrarily.
///
/// Lines end at LF; a CR right before it is stripped. Bytes after the last
/// LF stay buffered until the rest of the line arrives.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
    /// Set after an overflow: bytes are dropped until the next LF.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl LineBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            discarding: false,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if there is one.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>, LineTooLong> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.discarding {
                    self.buf.clear();
                } else if self.buf.len() > self.limit {
                    self.buf.clear();
                    self.discarding = true;
                    return Err(LineTooLong { limit: self.limit });
                }
                return Ok(None);
            };

            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if self.discarding {
                self.discarding = false;
                continue;
            }
            return Ok(Some(line));
        }
    }

    /// Bytes held for an incomplete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_command() {
        let msg = Message::parse("QUIT").unwrap();
        assert_eq!(msg.source, None);
        assert_eq!(msg.verb, "QUIT");
        assert!(msg.args.is_empty());
        assert_eq!(msg.trailing, None);
    }

    #[test]
    fn parse_uppercases_verb() {
        let msg = Message::parse("privmsg #rust :hi").unwrap();
        assert_eq!(msg.verb, "PRIVMSG");
        assert_eq!(msg.args, vec!["#rust"]);
        assert_eq!(msg.trailing.as_deref(), Some("hi"));
    }

    #[test]
    fn parse_with_source() {
        let msg = Message::parse(":alice!a@h PRIVMSG #rust :hello there").unwrap();
        assert_eq!(msg.source.as_deref(), Some("alice!a@h"));
        assert_eq!(msg.verb, "PRIVMSG");
        assert_eq!(msg.args, vec!["#rust"]);
        assert_eq!(msg.trailing.as_deref(), Some("hello there"));
    }

    #[test]
    fn parse_user_command() {
        let msg = Message::parse("USER alice 0 * :Alice Liddell").unwrap();
        assert_eq!(msg.args, vec!["alice", "0", "*"]);
        assert_eq!(msg.trailing.as_deref(), Some("Alice Liddell"));
    }

    #[test]
    fn parse_keeps_empty_trailing() {
        let msg = Message::parse("TOPIC #rust :").unwrap();
        assert_eq!(msg.args, vec!["#rust"]);
        assert_eq!(msg.trailing.as_deref(), Some(""));
    }

    #[test]
    fn parse_tolerates_repeated_spaces() {
        let msg = Message::parse("JOIN   #a,#b   ").unwrap();
        assert_eq!(msg.args, vec!["#a,#b"]);
        assert_eq!(msg.trailing, None);
    }

    #[test]
    fn parse_trailing_keeps_colons_and_spaces() {
        let msg = Message::parse("PRIVMSG bob :a: b :c").unwrap();
        assert_eq!(msg.trailing.as_deref(), Some("a: b :c"));
    }

    #[test]
    fn parse_strips_terminator() {
        let msg = Message::parse("PING :token\r\n").unwrap();
        assert_eq!(msg.trailing.as_deref(), Some("token"));
    }

    #[test]
    fn parse_rejects_numeric_verb() {
        assert_eq!(
            Message::parse(":server 001 alice :hi"),
            Err(MalformedCommand::InvalidVerb("001".into()))
        );
    }

    #[test]
    fn parse_rejects_source_without_verb() {
        assert_eq!(Message::parse(":alice"), Err(MalformedCommand::MissingVerb));
        assert_eq!(Message::parse(":alice "), Err(MalformedCommand::MissingVerb));
    }

    #[test]
    fn parse_rejects_control_chars_in_middle_params() {
        assert!(matches!(
            Message::parse("NICK al\x07ice"),
            Err(MalformedCommand::InvalidParam(_))
        ));
    }

    #[test]
    fn parse_rejects_bare_cr() {
        assert!(matches!(
            Message::parse("PRIVMSG bob :hi\r:evil!e@e PRIVMSG bob :spoof"),
            Err(MalformedCommand::InvalidParam(_))
        ));
        assert!(matches!(
            Message::parse(":ev\ril PRIVMSG bob :hi"),
            Err(MalformedCommand::InvalidSource(_))
        ));
    }

    #[test]
    fn parse_allows_ctcp_in_trailing() {
        let msg = Message::parse("PRIVMSG bob :\x01ACTION waves\x01").unwrap();
        assert_eq!(msg.trailing.as_deref(), Some("\x01ACTION waves\x01"));
    }

    #[test]
    fn parse_rejects_blank() {
        assert_eq!(Message::parse("   "), Err(MalformedCommand::Empty));
    }

    #[test]
    fn parse_bytes_rejects_invalid_utf8() {
        assert_eq!(
            Message::parse_bytes(b"PRIVMSG bob :\xff\xfe"),
            Err(MalformedCommand::InvalidUtf8)
        );
    }

    #[test]
    fn text_or_arg_prefers_trailing() {
        let msg = Message::parse("PRIVMSG bob hello").unwrap();
        assert_eq!(msg.text_or_arg(1), Some("hello"));
        let msg = Message::parse("PRIVMSG bob :hello world").unwrap();
        assert_eq!(msg.text_or_arg(1), Some("hello world"));
    }

    #[test]
    fn encode_numeric_reply() {
        let msg = Message::numeric("irc.test", Reply::NicknameInUse, "bob")
            .arg("alice")
            .trailing("Nickname is already in use");
        assert_eq!(
            msg.encode(),
            ":irc.test 433 bob alice :Nickname is already in use\r\n"
        );
    }

    #[test]
    fn encode_without_trailing() {
        let msg = Message::from_source("alice!a@h", "JOIN").arg("#rust");
        assert_eq!(msg.encode(), ":alice!a@h JOIN #rust\r\n");
    }

    #[test]
    fn reply_codes_are_zero_padded() {
        assert_eq!(Reply::Welcome.to_string(), "001");
        assert_eq!(Reply::BadChannelName.to_string(), "479");
    }

    #[test]
    fn line_buffer_splits_crlf_lines() {
        let mut buf = LineBuffer::default();
        buf.extend(b"NICK alice\r\nUSER a a a :Alice\r\n");
        assert_eq!(buf.next_line().unwrap().as_deref(), Some(&b"NICK alice"[..]));
        assert_eq!(buf.next_line().unwrap().as_deref(), Some(&b"USER a a a :Alice"[..]));
        assert_eq!(buf.next_line().unwrap(), None);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn line_buffer_carries_partial_tail() {
        let mut buf = LineBuffer::default();
        buf.extend(b"PRIVMSG #rust :hel");
        assert_eq!(buf.next_line().unwrap(), None);
        buf.extend(b"lo\r");
        assert_eq!(buf.next_line().unwrap(), None);
        buf.extend(b"\nPING");
        assert_eq!(
            buf.next_line().unwrap().as_deref(),
            Some(&b"PRIVMSG #rust :hello"[..])
        );
        assert_eq!(buf.pending(), 4);
    }

    #[test]
    fn line_buffer_accepts_bare_lf() {
        let mut buf = LineBuffer::default();
        buf.extend(b"PING a\nPING b\n");
        assert_eq!(buf.next_line().unwrap().as_deref(), Some(&b"PING a"[..]));
        assert_eq!(buf.next_line().unwrap().as_deref(), Some(&b"PING b"[..]));
    }

    #[test]
    fn line_buffer_drops_oversized_line_and_recovers() {
        let mut buf = LineBuffer::new(8);
        buf.extend(b"PRIVMSG #rust :way too long");
        assert_eq!(buf.next_line(), Err(LineTooLong { limit: 8 }));
        buf.extend(b" still the same line\r\nPING x\r\n");
        assert_eq!(buf.next_line().unwrap().as_deref(), Some(&b"PING x"[..]));
        assert_eq!(buf.next_line().unwrap(), None);
    }
}
