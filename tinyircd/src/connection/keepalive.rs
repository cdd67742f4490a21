//! PING/PONG and stale-connection detection.

use std::time::Instant;

use super::IrcHandler;
use crate::irc::Message;
use crate::state::SessionId;

impl IrcHandler {
    pub(super) fn handle_ping(&mut self, id: SessionId, msg: &Message) {
        let token = msg
            .text_or_arg(0)
            .map_or_else(|| self.server_name.clone(), str::to_owned);
        let pong = Message::from_source(self.server_name.as_str(), "PONG")
            .arg(self.server_name.as_str())
            .trailing(token);
        self.send_to(id, &pong);
    }

    pub(super) fn handle_pong(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.awaiting_pong = false;
            session.last_keepalive = Instant::now();
        }
    }

    /// PING every session idle for `ping_interval`; drop those that left a
    /// PING unanswered for `ping_timeout`. A zero interval turns keepalive
    /// off, a zero timeout keeps pinging but never drops anyone.
    pub(super) fn check_keepalive(&mut self, now: Instant) {
        if self.ping_interval.is_zero() {
            return;
        }

        let mut due = Vec::new();
        let mut stale = Vec::new();
        for session in self.sessions.iter() {
            let idle = now.saturating_duration_since(session.last_keepalive);
            if session.awaiting_pong && !self.ping_timeout.is_zero() {
                if idle >= self.ping_timeout {
                    stale.push((session.id, session.nick.clone()));
                }
            } else if idle >= self.ping_interval {
                due.push(session.id);
            }
        }

        let ping = Message::new("PING").trailing(self.server_name.as_str());
        for id in due {
            if let Some(session) = self.sessions.get_mut(id) {
                session.awaiting_pong = true;
                session.last_keepalive = now;
            }
            self.send_to(id, &ping);
        }

        for (id, nick) in stale {
            tracing::info!(session_id = %id, %nick, "Ping timeout");
            let error = Message::new("ERROR").trailing(format!("Closing link: {nick} (Ping timeout)"));
            self.send_to(id, &error);
            self.disconnect(id, "Ping timeout");
        }
    }
}
