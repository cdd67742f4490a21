//! Server configuration, resolved from the command line and environment.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;

pub const DEFAULT_PORT: u16 = 6667;

/// Column at which MOTD lines are wrapped.
pub const MOTD_WIDTH: usize = 70;

static LISTEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<host>[^:]*?)(:(?P<port>[0-9]+))?$").expect("listen pattern compiles")
});

#[derive(Debug, Clone, Parser)]
#[command(name = "tinyircd", version, about = "Small single-process IRC relay server")]
pub struct ServerConfig {
    /// Address to listen on: <host>[:<port>]. An empty host binds all interfaces.
    #[arg(default_value = "localhost:6667")]
    pub listen: String,

    /// Text file holding the message of the day.
    pub motd_file: Option<PathBuf>,

    /// Name the server uses as the source of its replies.
    #[arg(long, env = "TINYIRCD_SERVER_NAME", default_value = "tinyircd")]
    pub server_name: String,

    /// Network name advertised in the welcome burst.
    #[arg(long, env = "TINYIRCD_NETWORK_NAME", default_value = "tinynet")]
    pub network_name: String,

    /// Listen backlog.
    #[arg(long, default_value_t = 5)]
    pub max_pending_clients: u32,

    /// Largest single read from a client socket, in bytes.
    #[arg(long, default_value_t = 512)]
    pub max_message_size: usize,

    /// Seconds between keepalive PINGs.
    #[arg(long, default_value_t = 60)]
    pub ping_interval: u64,

    /// Seconds to wait for a PONG before dropping the client.
    #[arg(long, default_value_t = 60)]
    pub ping_timeout: u64,

    /// Longest the event loop sleeps before running housekeeping, in seconds.
    #[arg(long, default_value_t = 30)]
    pub poll_timeout: u64,

    /// Message of the day, already wrapped. Filled from `motd_file`.
    #[arg(skip)]
    pub motd: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("localhost:{DEFAULT_PORT}"),
            motd_file: None,
            server_name: "tinyircd".to_string(),
            network_name: "tinynet".to_string(),
            max_pending_clients: 5,
            max_message_size: 512,
            ping_interval: 60,
            ping_timeout: 60,
            poll_timeout: 30,
            motd: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Split `listen` into host and port.
    pub fn bind_address(&self) -> Result<(String, u16)> {
        let caps = LISTEN_RE
            .captures(&self.listen)
            .with_context(|| format!("Couldn't parse listen address {:?}", self.listen))?;
        let host = match caps.name("host").map(|m| m.as_str()) {
            Some("") | None => "0.0.0.0".to_string(),
            Some(h) => h.to_string(),
        };
        let port = match caps.name("port") {
            Some(p) => p
                .as_str()
                .parse()
                .with_context(|| format!("Invalid port {:?}", p.as_str()))?,
            None => DEFAULT_PORT,
        };
        Ok((host, port))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout.max(1))
    }

    /// Read `motd_file` (if set) into `motd`.
    pub fn load_motd(&mut self) -> Result<()> {
        if let Some(ref path) = self.motd_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read MOTD file {}", path.display()))?;
            self.motd = wrap_motd(&content);
        }
        Ok(())
    }
}

/// Wrap MOTD text at [`MOTD_WIDTH`] columns. Empty lines are kept;
/// whitespace-only lines vanish.
pub fn wrap_motd(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            out.push(String::new());
        } else {
            out.extend(wrap_line(line, MOTD_WIDTH));
        }
    }
    out
}

fn wrap_line(line: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in line.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        // Words wider than a line are broken up.
        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}
