//! PRIVMSG routing.

use super::IrcHandler;
use crate::irc::{Message, Reply};
use crate::state::{self, SessionId};

impl IrcHandler {
    pub(super) fn handle_privmsg(&mut self, id: SessionId, msg: &Message) {
        let (Some(targets), Some(text)) = (msg.args.first(), msg.text_or_arg(1)) else {
            return;
        };
        let Some(mask) = self.hostmask_of(id) else {
            return;
        };

        for target in targets.split(',').filter(|t| !t.is_empty()) {
            if state::is_channel_name(target) {
                // Non-members get nothing back, not even a hint the channel exists.
                let Some(channel) = self.channels.get(target).filter(|ch| ch.contains(id)) else {
                    tracing::debug!(session_id = %id, %target, "Dropping PRIVMSG from non-member");
                    continue;
                };
                let line = Message::from_source(mask.as_str(), "PRIVMSG")
                    .arg(channel.name.as_str())
                    .trailing(text);
                let recipients: Vec<SessionId> = channel
                    .members()
                    .iter()
                    .copied()
                    .filter(|&member| member != id)
                    .collect();
                self.deliver(&recipients, &line);
            } else if let Some(recipient) = self.sessions.lookup(target) {
                let line = Message::from_source(mask.as_str(), "PRIVMSG")
                    .arg(recipient.nick.as_str())
                    .trailing(text);
                let recipient = recipient.id;
                self.send_to(recipient, &line);
            } else {
                let reply = self
                    .numeric_to(id, Reply::NoSuchNick)
                    .arg(target)
                    .trailing("No such nick/channel");
                self.send_to(id, &reply);
            }
        }
    }
}
