//! Channel verbs: JOIN, PART, TOPIC, LIST, MODE.

use super::IrcHandler;
use crate::irc::{Message, Reply};
use crate::state::{self, JoinOutcome, SessionId};

/// Upper bound on the nick list carried by one 353 line.
const NAMES_CHUNK: usize = 400;

impl IrcHandler {
    pub(super) fn handle_join(&mut self, id: SessionId, msg: &Message) {
        let Some(list) = msg.args.first().cloned().or_else(|| msg.trailing.clone()) else {
            return;
        };

        for name in list.split(',').filter(|n| !n.is_empty()) {
            let Some(session) = self.sessions.get_mut(id) else {
                return;
            };
            let outcome = match self.channels.join(session, name) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::debug!(session_id = %id, "JOIN rejected: {e}");
                    let reply = self
                        .numeric_to(id, Reply::BadChannelName)
                        .arg(name)
                        .trailing("Bad channel name");
                    self.send_to(id, &reply);
                    continue;
                }
            };

            if outcome != JoinOutcome::AlreadyMember {
                let Some(mask) = self.hostmask_of(id) else {
                    return;
                };
                let chan_name = self
                    .channels
                    .get(name)
                    .map_or_else(|| name.to_owned(), |ch| ch.name.clone());
                tracing::info!(session_id = %id, channel = %chan_name, ?outcome, "Joined channel");
                let join = Message::from_source(mask, "JOIN").arg(chan_name);
                let members = self.channel_members(name);
                self.deliver(&members, &join);
            }
            self.send_topic(id, name);
            self.send_names(id, name);
        }
    }

    pub(super) fn handle_part(&mut self, id: SessionId, msg: &Message) {
        let Some(list) = msg.args.first().cloned() else {
            return;
        };

        for name in list.split(',').filter(|n| !n.is_empty()) {
            // Unknown channel or not a member: nothing to report.
            let Some(chan_name) = self
                .channels
                .get(name)
                .filter(|ch| ch.contains(id))
                .map(|ch| ch.name.clone())
            else {
                continue;
            };
            let Some(session) = self.sessions.get_mut(id) else {
                return;
            };
            let mask = session.hostmask();
            self.channels.leave(session, name);
            tracing::info!(session_id = %id, channel = %chan_name, "Left channel");

            let mut part = Message::from_source(mask, "PART").arg(chan_name);
            if let Some(reason) = msg.trailing.as_deref().filter(|r| !r.is_empty()) {
                part = part.trailing(reason);
            }
            let mut targets = vec![id];
            targets.extend(self.channel_members(name));
            self.deliver(&targets, &part);
        }
    }

    pub(super) fn handle_topic(&mut self, id: SessionId, msg: &Message) {
        let Some(name) = msg.args.first() else {
            return;
        };
        let Some(channel) = self.channels.get(name) else {
            let reply = self
                .numeric_to(id, Reply::NoSuchChannel)
                .arg(name.as_str())
                .trailing("No such channel");
            self.send_to(id, &reply);
            return;
        };
        let chan_name = channel.name.clone();
        if !channel.contains(id) {
            let reply = self
                .numeric_to(id, Reply::NoSuchChannel)
                .arg(chan_name)
                .trailing("You're not on that channel");
            self.send_to(id, &reply);
            return;
        }

        match msg.text_or_arg(1) {
            Some(text) => {
                self.channels.set_topic(name, text);
                let Some(mask) = self.hostmask_of(id) else {
                    return;
                };
                tracing::info!(session_id = %id, channel = %chan_name, "Topic set");
                let change = Message::from_source(mask, "TOPIC").arg(chan_name).trailing(text);
                let members = self.channel_members(name);
                self.deliver(&members, &change);
            }
            None => self.send_topic(id, name),
        }
    }

    pub(super) fn handle_list(&mut self, id: SessionId) {
        let mut lines = vec![
            self.numeric_to(id, Reply::ListStart)
                .arg("Channel")
                .trailing("Users  Name"),
        ];
        for channel in self.channels.iter() {
            lines.push(
                self.numeric_to(id, Reply::List)
                    .arg(channel.name.as_str())
                    .arg(channel.len().to_string())
                    .trailing(channel.topic().unwrap_or_default()),
            );
        }
        lines.push(self.numeric_to(id, Reply::ListEnd).trailing("End of /LIST"));
        for line in &lines {
            self.send_to(id, line);
        }
    }

    /// Modes are not stored; channels always report `+nt`.
    pub(super) fn handle_mode(&mut self, id: SessionId, msg: &Message) {
        let Some(target) = msg.args.first() else {
            return;
        };
        if !state::is_channel_name(target) {
            return;
        }
        let reply = match self.channels.get(target) {
            Some(channel) => self
                .numeric_to(id, Reply::ChannelModeIs)
                .arg(channel.name.as_str())
                .arg("+nt"),
            None => self
                .numeric_to(id, Reply::NoSuchChannel)
                .arg(target.as_str())
                .trailing("No such channel"),
        };
        self.send_to(id, &reply);
    }

    /// 332 with the topic, or 331 when none is set.
    pub(super) fn send_topic(&mut self, id: SessionId, name: &str) {
        let Some(channel) = self.channels.get(name) else {
            return;
        };
        let reply = match channel.topic() {
            Some(topic) => self
                .numeric_to(id, Reply::Topic)
                .arg(channel.name.as_str())
                .trailing(topic),
            None => self
                .numeric_to(id, Reply::NoTopicSet)
                .arg(channel.name.as_str())
                .trailing("No topic is set"),
        };
        self.send_to(id, &reply);
    }

    /// The member list as 353 lines, then 366.
    pub(super) fn send_names(&mut self, id: SessionId, name: &str) {
        let Some(channel) = self.channels.get(name) else {
            return;
        };
        let chan_name = channel.name.clone();
        let nicks: Vec<&str> = channel
            .members()
            .iter()
            .filter_map(|&member| self.sessions.get(member))
            .map(|s| s.nick.as_str())
            .collect();

        let mut lines = Vec::new();
        let mut chunk = String::new();
        for nick in nicks {
            if !chunk.is_empty() && chunk.len() + 1 + nick.len() > NAMES_CHUNK {
                lines.push(std::mem::take(&mut chunk));
            }
            if !chunk.is_empty() {
                chunk.push(' ');
            }
            chunk.push_str(nick);
        }
        if !chunk.is_empty() {
            lines.push(chunk);
        }

        let mut replies: Vec<Message> = lines
            .into_iter()
            .map(|list| {
                self.numeric_to(id, Reply::NameReply)
                    .arg("=")
                    .arg(chan_name.as_str())
                    .trailing(list)
            })
            .collect();
        replies.push(
            self.numeric_to(id, Reply::EndOfNames)
                .arg(chan_name)
                .trailing("End of /NAMES list"),
        );
        for reply in &replies {
            self.send_to(id, reply);
        }
    }
}
