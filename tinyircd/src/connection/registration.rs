//! Registration: CAP, NICK, USER, the welcome burst and the MOTD.

use super::IrcHandler;
use crate::error::ValidationError;
use crate::irc::{Message, Reply};
use crate::state::SessionId;

impl IrcHandler {
    /// Capability negotiation is not supported: `CAP LS` gets a fixed ACK,
    /// other subcommands are ignored.
    pub(super) fn handle_cap(&mut self, id: SessionId, msg: &Message) {
        if !msg.args.first().is_some_and(|sub| sub.eq_ignore_ascii_case("LS")) {
            return;
        }
        let ack = Message::from_source(self.server_name.as_str(), "CAP")
            .arg("*")
            .arg("ACK");
        self.send_to(id, &ack);
    }

    pub(super) fn handle_nick(&mut self, id: SessionId, msg: &Message) {
        let Some(new_nick) = msg.args.first().cloned().or_else(|| msg.trailing.clone()) else {
            return;
        };
        let Some(old_mask) = self.hostmask_of(id) else {
            return;
        };

        let old_nick = match self.sessions.rename(id, &new_nick) {
            Ok(old) => old,
            Err(e) => {
                tracing::debug!(session_id = %id, "NICK rejected: {e}");
                let reply = match e {
                    ValidationError::ErroneousNickname(nick) => self
                        .numeric_to(id, Reply::ErroneousNickname)
                        .arg(nick)
                        .trailing("Erroneous nickname"),
                    ValidationError::NicknameInUse(nick) => self
                        .numeric_to(id, Reply::NicknameInUse)
                        .arg(nick)
                        .trailing("Nickname is already in use"),
                    _ => return,
                };
                self.send_to(id, &reply);
                return;
            }
        };

        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        session.nick_set = true;

        if session.registered {
            if old_nick == new_nick {
                return;
            }
            tracing::info!(session_id = %id, old = %old_nick, new = %new_nick, "Nick changed");
            let change = Message::from_source(old_mask, "NICK").arg(new_nick);
            let mut targets = vec![id];
            targets.extend(self.co_members(id));
            self.deliver(&targets, &change);
        } else {
            self.try_complete_registration(id);
        }
    }

    pub(super) fn handle_user(&mut self, id: SessionId, msg: &Message) {
        let Some(user) = msg.args.first().cloned() else {
            return;
        };
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        // The hostmask is fixed once co-members have seen it.
        if session.registered {
            return;
        }
        session.user = user;
        if let Some(realname) = msg.trailing.as_deref().filter(|r| !r.is_empty()) {
            session.realname = Some(realname.to_owned());
        }
        session.user_set = true;
        self.try_complete_registration(id);
    }

    /// Promote the session once both NICK and USER have been seen, then
    /// send the welcome burst and the MOTD.
    pub(super) fn try_complete_registration(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.registered || !session.nick_set || !session.user_set {
            return;
        }
        session.registered = true;
        let hostmask = session.hostmask();
        tracing::info!(session_id = %id, %hostmask, "Client registered");

        let burst = [
            self.numeric_to(id, Reply::Welcome)
                .trailing(format!("Welcome to {}, {hostmask}", self.network_name)),
            self.numeric_to(id, Reply::YourHost).trailing(format!(
                "Your host is {}, running version {}",
                self.server_name, self.version
            )),
            self.numeric_to(id, Reply::Created)
                .trailing(format!("This server was created {}", self.created)),
            self.numeric_to(id, Reply::MyInfo)
                .arg(self.server_name.as_str())
                .arg(self.version),
            self.numeric_to(id, Reply::ISupport)
                .arg(format!("NETWORK={}", self.network_name))
                .arg("CHANTYPES=#&")
                .arg("NICKLEN=30")
                .arg("CHANNELLEN=50")
                .trailing("are supported by this server"),
        ];
        for line in &burst {
            self.send_to(id, line);
        }
        self.send_motd(id);
    }

    pub(super) fn send_motd(&mut self, id: SessionId) {
        if self.motd.is_empty() {
            let reply = self
                .numeric_to(id, Reply::NoMotd)
                .trailing("MOTD File is missing");
            self.send_to(id, &reply);
            return;
        }

        let mut lines = vec![
            self.numeric_to(id, Reply::MotdStart)
                .trailing(format!("- {} Message of the day -", self.server_name)),
        ];
        for text in &self.motd {
            lines.push(self.numeric_to(id, Reply::Motd).trailing(format!("- {text}")));
        }
        lines.push(
            self.numeric_to(id, Reply::EndOfMotd)
                .trailing("End of /MOTD command"),
        );
        for line in &lines {
            self.send_to(id, line);
        }
    }
}
