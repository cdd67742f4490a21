//! Read-only queries: WHOIS and WHO.

use super::IrcHandler;
use crate::irc::{Message, Reply};
use crate::state::{self, Session, SessionId};

impl IrcHandler {
    pub(super) fn handle_whois(&mut self, id: SessionId, msg: &Message) {
        // `WHOIS server nick` puts the nick last.
        let Some(query) = msg.args.last().cloned().or_else(|| msg.trailing.clone()) else {
            return;
        };

        let mut lines = Vec::new();
        match self.sessions.lookup(&query) {
            Some(target) => {
                lines.push(
                    self.numeric_to(id, Reply::WhoisUser)
                        .arg(target.nick.as_str())
                        .arg(target.user.as_str())
                        .arg(target.host.as_str())
                        .arg("*")
                        .trailing(target.realname()),
                );
                lines.push(
                    self.numeric_to(id, Reply::WhoisServer)
                        .arg(target.nick.as_str())
                        .arg(self.server_name.as_str())
                        .trailing(self.network_name.as_str()),
                );
            }
            None => lines.push(
                self.numeric_to(id, Reply::NoSuchNick)
                    .arg(query.as_str())
                    .trailing("No such nick/channel"),
            ),
        }
        lines.push(
            self.numeric_to(id, Reply::EndOfWhois)
                .arg(query)
                .trailing("End of /WHOIS list"),
        );
        for line in &lines {
            self.send_to(id, line);
        }
    }

    pub(super) fn handle_who(&mut self, id: SessionId, msg: &Message) {
        let Some(target) = msg.args.first().cloned().or_else(|| msg.trailing.clone()) else {
            return;
        };

        let mut lines = Vec::new();
        if state::is_channel_name(&target) {
            if let Some(channel) = self.channels.get(&target) {
                for member in channel.members() {
                    if let Some(session) = self.sessions.get(*member) {
                        lines.push(self.who_reply(id, &channel.name, session));
                    }
                }
            }
        } else if let Some(session) = self.sessions.lookup(&target) {
            let channel = session
                .channels
                .first()
                .and_then(|name| self.channels.get(name))
                .map_or("*", |ch| ch.name.as_str());
            lines.push(self.who_reply(id, channel, session));
        }
        lines.push(
            self.numeric_to(id, Reply::EndOfWho)
                .arg(target)
                .trailing("End of /WHO list"),
        );
        for line in &lines {
            self.send_to(id, line);
        }
    }

    fn who_reply(&self, id: SessionId, channel: &str, session: &Session) -> Message {
        self.numeric_to(id, Reply::WhoReply)
            .arg(channel)
            .arg(session.user.as_str())
            .arg(session.host.as_str())
            .arg(self.server_name.as_str())
            .arg(session.nick.as_str())
            .arg("H")
            .trailing(format!("0 {}", session.realname()))
    }
}
