//! IRC protocol handler.
//!
//! [`IrcHandler`] owns the session and channel registries and implements
//! [`Handler`] for the multiplexer. Each complete input line is decoded and
//! dispatched to one verb handler, which runs to completion before the next
//! line is looked at.
//!
//! The verb handlers are split into submodules:
//! - [`registration`]: CAP, NICK, USER, welcome burst and MOTD
//! - [`channel`]: JOIN, PART, TOPIC, LIST, MODE
//! - [`messaging`]: PRIVMSG
//! - [`queries`]: WHOIS, WHO
//! - [`keepalive`]: PING, PONG and stale-connection detection
//! - [`helpers`]: delivery and fan-out

mod channel;
mod helpers;
mod keepalive;
mod messaging;
mod queries;
mod registration;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::irc::{Message, Reply};
use crate::server::Handler;
use crate::state::{self, ChannelRegistry, Outbound, Session, SessionId, SessionRegistry};

/// The IRC state machine: registries plus the per-verb handlers.
pub struct IrcHandler {
    server_name: String,
    network_name: String,
    version: &'static str,
    created: String,
    motd: Vec<String>,
    ping_interval: Duration,
    ping_timeout: Duration,
    sessions: SessionRegistry,
    channels: ChannelRegistry,
    /// Recipients whose outbound queue failed during the current command.
    failed: Vec<SessionId>,
    /// Sessions dropped since the multiplexer last asked.
    closed: Vec<SessionId>,
}

impl IrcHandler {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            server_name: config.server_name.clone(),
            network_name: config.network_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            created: chrono::Utc::now()
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string(),
            motd: config.motd.clone(),
            ping_interval: config.ping_interval(),
            ping_timeout: config.ping_timeout(),
            sessions: SessionRegistry::new(),
            channels: ChannelRegistry::new(),
            failed: Vec::new(),
            closed: Vec::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    fn dispatch(&mut self, id: SessionId, msg: Message) {
        let Some(registered) = self.sessions.get(id).map(|s| s.registered) else {
            return;
        };

        match msg.verb.as_str() {
            "CAP" => self.handle_cap(id, &msg),
            "NICK" => self.handle_nick(id, &msg),
            "USER" => self.handle_user(id, &msg),
            "PING" => self.handle_ping(id, &msg),
            "PONG" => self.handle_pong(id),
            "QUIT" => self.handle_quit(id, &msg),
            _ if !registered => {
                let reply = self
                    .numeric_to(id, Reply::NotRegistered)
                    .trailing("You have not registered");
                self.send_to(id, &reply);
            }
            "MOTD" => self.send_motd(id),
            "JOIN" => self.handle_join(id, &msg),
            "PART" => self.handle_part(id, &msg),
            "TOPIC" => self.handle_topic(id, &msg),
            "PRIVMSG" => self.handle_privmsg(id, &msg),
            "LIST" => self.handle_list(id),
            "WHOIS" => self.handle_whois(id, &msg),
            "WHO" => self.handle_who(id, &msg),
            "MODE" => self.handle_mode(id, &msg),
            other => {
                let reply = self
                    .numeric_to(id, Reply::UnknownCommand)
                    .arg(other)
                    .trailing("Unknown command");
                self.send_to(id, &reply);
            }
        }
    }

    fn handle_quit(&mut self, id: SessionId, msg: &Message) {
        let reason = msg.text_or_arg(0).unwrap_or_default().to_owned();
        let Some(nick) = self.sessions.get(id).map(|s| s.nick.clone()) else {
            return;
        };
        let error = Message::new("ERROR").trailing(format!("Closing link: {nick} (Quit: {reason})"));
        self.send_to(id, &error);
        self.disconnect(id, &reason);
    }

    /// Forget a session: leave every channel it is in, tell each co-member
    /// once, and hand the id back to the multiplexer for closing.
    fn disconnect(&mut self, id: SessionId, reason: &str) {
        let neighbours = self.co_members(id);
        let Some(mut session) = self.sessions.remove(id) else {
            return;
        };
        for name in session.channels.clone() {
            self.channels.leave(&mut session, &name);
        }

        let hostmask = session.hostmask();
        let quit = Message::from_source(hostmask.as_str(), "QUIT").trailing(format!("Quit: {reason}"));
        self.deliver(&neighbours, &quit);
        self.closed.push(id);
        tracing::info!(session_id = %id, %hostmask, reason, "Client disconnected");
    }

    /// Disconnect everyone whose delivery failed, including failures caused
    /// by the resulting QUIT broadcasts.
    fn flush_failures(&mut self) {
        while let Some(id) = self.failed.pop() {
            self.disconnect(id, "Write error");
        }
    }
}

impl Handler for IrcHandler {
    fn create_session(&mut self, id: SessionId, peer: SocketAddr, outbound: Outbound) {
        let mut session = Session::new(id, outbound, Instant::now());
        while self.sessions.is_nick_taken(&session.nick) {
            session.nick = state::placeholder_nick();
        }
        let nick = session.nick.clone();
        if let Err(e) = self.sessions.register(session) {
            tracing::warn!(session_id = %id, %peer, "Failed to register session: {e}");
            self.closed.push(id);
            return;
        }
        tracing::debug!(session_id = %id, %peer, %nick, "Session created");
    }

    fn handle(&mut self, id: SessionId, bytes: &[u8]) {
        let mut lines = Vec::new();
        {
            let Some(session) = self.sessions.get_mut(id) else {
                return;
            };
            session.inbound.extend(bytes);
            loop {
                match session.inbound.next_line() {
                    Ok(Some(line)) => lines.push(line),
                    Ok(None) => break,
                    Err(e) => tracing::warn!(session_id = %id, "Dropping input: {e}"),
                }
            }
        }

        for raw in lines {
            // A QUIT earlier in this read ends the session.
            if !self.sessions.contains(id) {
                break;
            }
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match Message::parse_bytes(&raw) {
                Ok(msg) => {
                    tracing::debug!(session_id = %id, "<- {msg}");
                    self.dispatch(id, msg);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %id,
                        line = %String::from_utf8_lossy(&raw),
                        "Failed to parse command: {e}"
                    );
                }
            }
        }
        self.flush_failures();
    }

    fn disconnected(&mut self, id: SessionId, reason: &str) {
        self.disconnect(id, reason);
        self.flush_failures();
    }

    fn housekeeping(&mut self, now: Instant) {
        self.check_keepalive(now);
        self.flush_failures();
    }

    fn take_closed(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.closed)
    }
}
