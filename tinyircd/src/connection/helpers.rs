//! Delivery and fan-out helpers.

use std::collections::BTreeSet;

use super::IrcHandler;
use crate::irc::{Message, Reply};
use crate::state::SessionId;

impl IrcHandler {
    /// Queue `msg` for every session in `targets`. A recipient whose queue
    /// rejects the line is remembered in `failed`; the sender is unaffected.
    pub(super) fn deliver(&mut self, targets: &[SessionId], msg: &Message) {
        let line = msg.encode();
        for &id in targets {
            let Some(session) = self.sessions.get(id) else {
                continue;
            };
            if let Err(e) = session.send(line.clone()) {
                tracing::warn!(session_id = %id, nick = %session.nick, "Send failed: {e}");
                if !self.failed.contains(&id) {
                    self.failed.push(id);
                }
            } else {
                tracing::debug!(session_id = %id, "-> {msg}");
            }
        }
    }

    pub(super) fn send_to(&mut self, id: SessionId, msg: &Message) {
        self.deliver(&[id], msg);
    }

    /// Start a numeric reply addressed to `id`'s current nickname.
    pub(super) fn numeric_to(&self, id: SessionId, reply: Reply) -> Message {
        let nick = self.sessions.get(id).map_or("*", |s| s.nick.as_str());
        Message::numeric(&self.server_name, reply, nick)
    }

    /// Current members of a channel, or nobody if it does not exist.
    pub(super) fn channel_members(&self, name: &str) -> Vec<SessionId> {
        self.channels
            .get(name)
            .map(|ch| ch.members().to_vec())
            .unwrap_or_default()
    }

    /// Everyone sharing at least one channel with `id`, each listed once,
    /// `id` itself excluded.
    pub(super) fn co_members(&self, id: SessionId) -> Vec<SessionId> {
        let Some(session) = self.sessions.get(id) else {
            return Vec::new();
        };
        let set: BTreeSet<SessionId> = session
            .channels
            .iter()
            .filter_map(|name| self.channels.get(name))
            .flat_map(|ch| ch.members().iter().copied())
            .filter(|&member| member != id)
            .collect();
        set.into_iter().collect()
    }

    /// `nick!user@host` of a live session.
    pub(super) fn hostmask_of(&self, id: SessionId) -> Option<String> {
        self.sessions.get(id).map(|s| s.hostmask())
    }
}
