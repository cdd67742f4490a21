//! Session and channel registries.
//!
//! Both registries are owned by the dispatcher and only touched from the
//! server's event loop. Nicknames and channel names are keyed by their
//! case-folded form; the spelling a client supplied is kept for display.
//!
//! Membership is stored on both sides: a [`Channel`] lists its member
//! sessions and a [`Session`] lists the folded names of its channels.
//! [`ChannelRegistry::join`] and [`ChannelRegistry::leave`] are the only
//! places either side changes, so the two views cannot drift apart.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;
use std::time::Instant;

use rand::Rng;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{ConnectionFault, ValidationError};
use crate::irc::LineBuffer;

static NICKNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z\[\]\\`_\^\{\|\}][a-zA-Z0-9\[\]\\`_\^\{\|\}\-]{0,29}$")
        .expect("nickname pattern compiles")
});

static CHANNEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[#&][^\s,\x00-\x1f]{1,49}$").expect("channel pattern compiles")
});

pub fn is_valid_nickname(nick: &str) -> bool {
    NICKNAME_RE.is_match(nick)
}

pub fn is_valid_channel(name: &str) -> bool {
    CHANNEL_RE.is_match(name)
}

/// Whether `target` names a channel rather than a nickname.
pub fn is_channel_name(target: &str) -> bool {
    target.starts_with(['#', '&'])
}

/// Case-folded lookup key for a nickname or channel name.
pub fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Identifier the server assigns to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Queue of encoded lines drained by the connection's writer task.
pub type Outbound = mpsc::Sender<String>;

// ── Sessions ─────────────────────────────────────────────────────

/// Server-side state for one connected client.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub nick: String,
    pub user: String,
    /// Display-only host; never resolved.
    pub host: String,
    pub realname: Option<String>,
    /// NICK has succeeded at least once (the placeholder does not count).
    pub nick_set: bool,
    /// USER has been processed at least once.
    pub user_set: bool,
    pub registered: bool,
    /// Folded names of joined channels, in join order.
    pub channels: Vec<String>,
    /// Last PING sent or PONG received.
    pub last_keepalive: Instant,
    pub awaiting_pong: bool,
    pub inbound: LineBuffer,
    outbound: Outbound,
}

impl Session {
    /// A fresh, unregistered session with a random placeholder identity.
    pub fn new(id: SessionId, outbound: Outbound, now: Instant) -> Self {
        Self {
            id,
            nick: random_token('n'),
            user: random_token('u'),
            host: random_token('h'),
            realname: None,
            nick_set: false,
            user_set: false,
            registered: false,
            channels: Vec::new(),
            last_keepalive: now,
            awaiting_pong: false,
            inbound: LineBuffer::default(),
            outbound,
        }
    }

    /// `nick!user@host`
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nick)
    }

    pub fn is_member(&self, folded_channel: &str) -> bool {
        self.channels.iter().any(|c| c == folded_channel)
    }

    /// Queue an encoded line without waiting.
    pub fn send(&self, line: String) -> Result<(), ConnectionFault> {
        self.outbound.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionFault::QueueFull,
            TrySendError::Closed(_) => ConnectionFault::WriterGone,
        })
    }
}

/// A fresh placeholder nickname, for rerolling one that is already taken.
pub fn placeholder_nick() -> String {
    random_token('n')
}

fn random_token(prefix: char) -> String {
    let mut rng = rand::thread_rng();
    std::iter::once(prefix)
        .chain((0..7).map(|_| rng.gen_range(b'a'..=b'z') as char))
        .collect()
}

/// Every live session, indexed by id and by folded nickname.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    nicks: HashMap<String, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session under its current nickname.
    pub fn register(&mut self, session: Session) -> Result<(), ValidationError> {
        let key = fold(&session.nick);
        if self.nicks.contains_key(&key) {
            return Err(ValidationError::NicknameInUse(session.nick));
        }
        self.nicks.insert(key, session.id);
        self.sessions.insert(session.id, session);
        Ok(())
    }

    /// Change a session's nickname, returning the old one.
    ///
    /// A session may switch to a case variant of its own nickname.
    pub fn rename(&mut self, id: SessionId, new_nick: &str) -> Result<String, ValidationError> {
        if !is_valid_nickname(new_nick) {
            return Err(ValidationError::ErroneousNickname(new_nick.to_owned()));
        }
        let key = fold(new_nick);
        if self.nicks.get(&key).is_some_and(|&owner| owner != id) {
            return Err(ValidationError::NicknameInUse(new_nick.to_owned()));
        }
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(ValidationError::NoSuchSession(id))?;

        let old = std::mem::replace(&mut session.nick, new_nick.to_owned());
        self.nicks.remove(&fold(&old));
        self.nicks.insert(key, id);
        Ok(old)
    }

    pub fn lookup(&self, nick: &str) -> Option<&Session> {
        self.nicks
            .get(&fold(nick))
            .and_then(|id| self.sessions.get(id))
    }

    pub fn is_nick_taken(&self, nick: &str) -> bool {
        self.nicks.contains_key(&fold(nick))
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Drop a session from the table. Channel membership is the caller's
    /// job; see [`ChannelRegistry::leave`].
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        let key = fold(&session.nick);
        if self.nicks.get(&key) == Some(&id) {
            self.nicks.remove(&key);
        }
        Some(session)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ── Channels ─────────────────────────────────────────────────────

/// A named group. Exists only while it has members.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Spelling used by the member who created the channel.
    pub name: String,
    members: Vec<SessionId>,
    topic: Option<String>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            members: Vec::new(),
            topic: None,
        }
    }

    /// Members in join order.
    pub fn members(&self) -> &[SessionId] {
        &self.members
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.members.contains(&id)
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of a successful [`ChannelRegistry::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The channel did not exist and was created for this member.
    Created,
    Joined,
    /// Already a member; nothing changed.
    AlreadyMember,
}

/// All non-empty channels, keyed by folded name.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a channel up without creating it.
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&fold(name))
    }

    // Only `join` may create, so an empty channel is never observable.
    fn get_or_create(&mut self, name: &str) -> &mut Channel {
        self.channels
            .entry(fold(name))
            .or_insert_with(|| Channel::new(name))
    }

    /// Add `session` to `name`, creating the channel if needed.
    pub fn join(
        &mut self,
        session: &mut Session,
        name: &str,
    ) -> Result<JoinOutcome, ValidationError> {
        if !is_valid_channel(name) {
            return Err(ValidationError::BadChannelName(name.to_owned()));
        }
        let key = fold(name);
        if session.is_member(&key) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let created = !self.channels.contains_key(&key);
        let channel = self.get_or_create(name);
        channel.members.push(session.id);
        session.channels.push(key);

        Ok(if created {
            JoinOutcome::Created
        } else {
            JoinOutcome::Joined
        })
    }

    /// Remove `session` from `name` on both sides. An emptied channel is
    /// destroyed along with its topic. Returns whether the session was a
    /// member.
    pub fn leave(&mut self, session: &mut Session, name: &str) -> bool {
        let key = fold(name);
        let before = session.channels.len();
        session.channels.retain(|c| *c != key);
        let was_member = session.channels.len() != before;

        if let Some(channel) = self.channels.get_mut(&key) {
            channel.members.retain(|&m| m != session.id);
            if channel.members.is_empty() {
                self.channels.remove(&key);
            }
        }
        was_member
    }

    /// Set or clear (empty `text`) a channel's topic. Returns false when the
    /// channel does not exist.
    pub fn set_topic(&mut self, name: &str, text: &str) -> bool {
        match self.channels.get_mut(&fold(name)) {
            Some(channel) => {
                channel.topic = (!text.is_empty()).then(|| text.to_owned());
                true
            }
            None => false,
        }
    }

    /// Channels ordered by folded name.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u64) -> (Session, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (Session::new(SessionId(id), tx, Instant::now()), rx)
    }

    fn registry_with(n: u64) -> (SessionRegistry, Vec<mpsc::Receiver<String>>) {
        let mut reg = SessionRegistry::new();
        let mut rxs = Vec::new();
        for id in 1..=n {
            let (s, rx) = session(id);
            reg.register(s).unwrap();
            rxs.push(rx);
        }
        (reg, rxs)
    }

    /// Membership must agree from both sides, and no channel may be empty.
    fn assert_symmetric(sessions: &SessionRegistry, channels: &ChannelRegistry) {
        for ch in channels.iter() {
            assert!(!ch.is_empty(), "empty channel {} survived", ch.name);
            for &id in ch.members() {
                let s = sessions.get(id).expect("member is a live session");
                assert!(s.is_member(&fold(&ch.name)));
            }
        }
        for s in sessions.iter() {
            for name in &s.channels {
                assert!(channels.get(name).unwrap().contains(s.id));
            }
        }
    }

    #[test]
    fn placeholder_identity_shape() {
        let (s, _rx) = session(1);
        assert!(s.nick.starts_with('n') && s.nick.len() == 8);
        assert!(s.user.starts_with('u') && s.user.len() == 8);
        assert!(s.host.starts_with('h') && s.host.len() == 8);
        assert!(is_valid_nickname(&s.nick));
        assert!(!s.registered);
    }

    #[test]
    fn nickname_validation() {
        assert!(is_valid_nickname("alice"));
        assert!(is_valid_nickname("[bot]`_^{|}-9"));
        assert!(is_valid_nickname(&"a".repeat(30)));
        assert!(!is_valid_nickname(&"a".repeat(31)));
        assert!(!is_valid_nickname("9lives"));
        assert!(!is_valid_nickname("-dash"));
        assert!(!is_valid_nickname("al ice"));
        assert!(!is_valid_nickname(""));
    }

    #[test]
    fn channel_validation() {
        assert!(is_valid_channel("#rust"));
        assert!(is_valid_channel("&local"));
        assert!(is_valid_channel("#ünïcode"));
        assert!(is_valid_channel(&format!("#{}", "x".repeat(49))));
        assert!(!is_valid_channel(&format!("#{}", "x".repeat(50))));
        assert!(!is_valid_channel("#"));
        assert!(!is_valid_channel("rust"));
        assert!(!is_valid_channel("#a,b"));
        assert!(!is_valid_channel("#a b"));
        assert!(!is_valid_channel("#a\x07"));
    }

    #[test]
    fn rename_enforces_case_insensitive_uniqueness() {
        let (mut reg, _rxs) = registry_with(2);
        reg.rename(SessionId(1), "Alice").unwrap();

        let err = reg.rename(SessionId(2), "aLiCe").unwrap_err();
        assert_eq!(err, ValidationError::NicknameInUse("aLiCe".into()));
        assert_eq!(reg.lookup("alice").unwrap().id, SessionId(1));
        assert_ne!(reg.get(SessionId(2)).unwrap().nick, "aLiCe");
    }

    #[test]
    fn rename_to_own_case_variant() {
        let (mut reg, _rxs) = registry_with(1);
        reg.rename(SessionId(1), "alice").unwrap();
        let old = reg.rename(SessionId(1), "ALICE").unwrap();
        assert_eq!(old, "alice");
        assert_eq!(reg.lookup("alice").unwrap().nick, "ALICE");
    }

    #[test]
    fn rename_frees_old_nick() {
        let (mut reg, _rxs) = registry_with(2);
        reg.rename(SessionId(1), "alice").unwrap();
        reg.rename(SessionId(1), "alicia").unwrap();
        assert!(reg.lookup("alice").is_none());
        reg.rename(SessionId(2), "alice").unwrap();
        assert_eq!(reg.lookup("ALICE").unwrap().id, SessionId(2));
    }

    #[test]
    fn rename_rejects_invalid() {
        let (mut reg, _rxs) = registry_with(1);
        let before = reg.get(SessionId(1)).unwrap().nick.clone();
        assert!(matches!(
            reg.rename(SessionId(1), "#nope"),
            Err(ValidationError::ErroneousNickname(_))
        ));
        assert_eq!(reg.get(SessionId(1)).unwrap().nick, before);
    }

    #[test]
    fn remove_releases_nick() {
        let (mut reg, _rxs) = registry_with(1);
        reg.rename(SessionId(1), "alice").unwrap();
        assert!(reg.remove(SessionId(1)).is_some());
        assert!(!reg.is_nick_taken("alice"));
        assert!(reg.is_empty());
    }

    #[test]
    fn join_and_leave_keep_both_sides_in_sync() {
        let (mut sessions, _rxs) = registry_with(2);
        let mut channels = ChannelRegistry::new();

        let a = sessions.get_mut(SessionId(1)).unwrap();
        assert_eq!(channels.join(a, "#Rust").unwrap(), JoinOutcome::Created);
        let b = sessions.get_mut(SessionId(2)).unwrap();
        assert_eq!(channels.join(b, "#rust").unwrap(), JoinOutcome::Joined);
        assert_eq!(channels.get("#RUST").unwrap().name, "#Rust");
        assert_eq!(channels.get("#rust").unwrap().len(), 2);
        assert_symmetric(&sessions, &channels);

        let a = sessions.get_mut(SessionId(1)).unwrap();
        assert!(channels.leave(a, "#rust"));
        assert_symmetric(&sessions, &channels);
        assert_eq!(channels.get("#rust").unwrap().members(), &[SessionId(2)]);
    }

    #[test]
    fn rejoin_is_idempotent() {
        let (mut sessions, _rxs) = registry_with(1);
        let mut channels = ChannelRegistry::new();
        let a = sessions.get_mut(SessionId(1)).unwrap();
        channels.join(a, "#rust").unwrap();
        assert_eq!(channels.join(a, "#RUST").unwrap(), JoinOutcome::AlreadyMember);
        assert_eq!(channels.get("#rust").unwrap().len(), 1);
        assert_eq!(a.channels.len(), 1);
    }

    #[test]
    fn join_rejects_bad_name() {
        let (mut sessions, _rxs) = registry_with(1);
        let mut channels = ChannelRegistry::new();
        let a = sessions.get_mut(SessionId(1)).unwrap();
        assert!(matches!(
            channels.join(a, "rust"),
            Err(ValidationError::BadChannelName(_))
        ));
        assert!(channels.is_empty());
        assert!(a.channels.is_empty());
    }

    #[test]
    fn last_leave_destroys_channel_and_topic() {
        let (mut sessions, _rxs) = registry_with(1);
        let mut channels = ChannelRegistry::new();
        let a = sessions.get_mut(SessionId(1)).unwrap();
        channels.join(a, "#rust").unwrap();
        assert!(channels.set_topic("#rust", "ownership"));
        assert_eq!(channels.get("#rust").unwrap().topic(), Some("ownership"));

        assert!(channels.leave(a, "#rust"));
        assert!(channels.get("#rust").is_none());
        assert!(!channels.set_topic("#rust", "late"));

        assert_eq!(channels.join(a, "#rust").unwrap(), JoinOutcome::Created);
        assert_eq!(channels.get("#rust").unwrap().topic(), None);
    }

    #[test]
    fn leave_of_non_member_is_noop() {
        let (mut sessions, _rxs) = registry_with(2);
        let mut channels = ChannelRegistry::new();
        let a = sessions.get_mut(SessionId(1)).unwrap();
        channels.join(a, "#rust").unwrap();

        let b = sessions.get_mut(SessionId(2)).unwrap();
        assert!(!channels.leave(b, "#rust"));
        assert!(!channels.leave(b, "#nowhere"));
        assert_eq!(channels.get("#rust").unwrap().len(), 1);
    }

    #[test]
    fn empty_topic_clears() {
        let (mut sessions, _rxs) = registry_with(1);
        let mut channels = ChannelRegistry::new();
        let a = sessions.get_mut(SessionId(1)).unwrap();
        channels.join(a, "#rust").unwrap();
        channels.set_topic("#rust", "x");
        channels.set_topic("#rust", "");
        assert_eq!(channels.get("#rust").unwrap().topic(), None);
    }

    #[test]
    fn send_reports_closed_writer() {
        let (s, rx) = session(1);
        drop(rx);
        assert!(matches!(
            s.send("PING :x\r\n".into()),
            Err(ConnectionFault::WriterGone)
        ));
    }

    #[test]
    fn send_reports_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let s = Session::new(SessionId(1), tx, Instant::now());
        s.send("a\r\n".into()).unwrap();
        assert!(matches!(s.send("b\r\n".into()), Err(ConnectionFault::QueueFull)));
    }
}
