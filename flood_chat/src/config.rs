// src/config.rs
// Node settings, seed list parsing and startup validation

use std::fmt;
use std::io::{BufRead, Write};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::ChatError;
use crate::peer::LinkSettings;
use crate::protocol::FIELD_DELIMITER;

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// A statically configured peer to dial at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPeer {
    pub host: String,
    pub port: u16,
}

impl SeedPeer {
    pub fn parse(s: &str) -> Result<Self, ChatError> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ChatError::Config(format!("invalid peer format: '{}' (expected host:port)", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ChatError::Config(format!("invalid peer format: '{}' (missing host)", s)));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ChatError::Config(format!("invalid peer port in '{}'", s)))?;
        if port == 0 {
            return Err(ChatError::Config(format!("invalid peer port in '{}'", s)));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SeedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse a comma-separated `host:port` list. Blank entries are ignored;
/// entries that do not parse are returned separately so the caller can report
/// them without giving up on the rest.
pub fn parse_seed_list(list: &str) -> (Vec<SeedPeer>, Vec<String>) {
    let mut seeds = Vec::new();
    let mut invalid = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match SeedPeer::parse(entry) {
            Ok(seed) => {
                if !seeds.contains(&seed) {
                    seeds.push(seed);
                }
            }
            Err(_) => invalid.push(entry.to_string()),
        }
    }
    (seeds, invalid)
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub nickname: String,
    pub bind_host: String,
    /// 0 asks the OS for an ephemeral port.
    pub listen_port: u16,
    pub seeds: Vec<SeedPeer>,
    pub link: LinkSettings,
    /// Forget message ids after this long. `None` keeps them forever.
    pub seen_retention: Option<Duration>,
    /// Keep retrying a seed with exponential backoff for up to this long.
    /// `None` makes a single attempt.
    pub connect_retry: Option<Duration>,
}

impl NodeConfig {
    pub fn new(nickname: impl Into<String>, listen_port: u16) -> Self {
        Self {
            nickname: nickname.into(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            listen_port,
            seeds: Vec::new(),
            link: LinkSettings::default(),
            seen_retention: None,
            connect_retry: None,
        }
    }

    pub fn with_seeds(mut self, seeds: Vec<SeedPeer>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn listen_addr(&self) -> String {
        if self.bind_host.contains(':') {
            format!("[{}]:{}", self.bind_host, self.listen_port)
        } else {
            format!("{}:{}", self.bind_host, self.listen_port)
        }
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        let nick = self.nickname.trim();
        if nick.is_empty() {
            validation.add_error("nickname must not be empty".into());
        }
        if self.nickname.contains(FIELD_DELIMITER) {
            validation.add_error(format!("nickname '{}' must not contain '{}'", self.nickname, FIELD_DELIMITER));
        }
        if self.nickname.contains(['\n', '\r']) {
            validation.add_error("nickname must not contain line breaks".into());
        }

        if self.listen_port == 0 {
            validation.add_error("listen port must be in 1-65535".into());
        }

        if self.seeds.is_empty() {
            validation.add_warning("no seed peers configured - node will wait for inbound peers".into());
        }
        for seed in &self.seeds {
            if seed.port == self.listen_port && is_loopback_host(&seed.host) {
                validation.add_warning(format!("seed {} points at this node's own listener", seed));
            }
        }

        if self.link.outbound_queue == 0 {
            validation.add_error("outbound queue must hold at least one frame".into());
        }
        if self.link.max_frame_len < 64 {
            validation.add_error(format!("max frame length {} is too small", self.link.max_frame_len));
        }

        match self.seen_retention {
            None => validation.add_warning(
                "seen-message set is unbounded - memory grows with every message for the session".into(),
            ),
            Some(d) if d < Duration::from_secs(60) => validation.add_warning(format!(
                "seen retention of {}s is short - slow paths may redeliver old messages",
                d.as_secs()
            )),
            Some(_) => {}
        }

        validation
    }
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "localhost" | "::1" | "0.0.0.0")
}

/// Validation result for configuration checks
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    fn new() -> Self {
        Self {
            valid: true,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn add_warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    fn add_error(&mut self, msg: String) {
        self.errors.push(msg);
        self.valid = false;
    }

    pub fn print_summary(&self) {
        for w in &self.warnings {
            warn!("config: {}", w);
        }
        for e in &self.errors {
            error!("config: {}", e);
        }
        if self.valid && self.warnings.is_empty() {
            info!("configuration validation passed");
        }
    }

    pub fn into_result(self) -> Result<(), ChatError> {
        if self.valid {
            Ok(())
        } else {
            Err(ChatError::Config(self.errors.join("; ")))
        }
    }
}

/// Values the operator may leave out on the command line.
#[derive(Debug, Default, Clone)]
pub struct PartialConfig {
    pub nickname: Option<String>,
    pub listen_port: Option<u16>,
    pub peers: Option<String>,
}

/// Ask for whatever is missing, one line per question.
pub fn prompt_missing<R: BufRead, W: Write>(
    partial: PartialConfig,
    input: &mut R,
    out: &mut W,
) -> Result<(String, u16, Vec<SeedPeer>), ChatError> {
    let nickname = match partial.nickname {
        Some(n) => n,
        None => ask(input, out, "Enter your nickname: ")?,
    };
    let listen_port = match partial.listen_port {
        Some(p) => p,
        None => {
            let answer = ask(input, out, "Enter your listening port: ")?;
            answer
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ChatError::Config(format!("invalid port: '{}'", answer)))?
        }
    };
    let peers = match partial.peers {
        Some(p) => p,
        None => ask(
            input,
            out,
            "Enter known peers (format ip:port, comma separated) or leave blank: ",
        )?,
    };
    let (seeds, invalid) = parse_seed_list(&peers);
    for entry in invalid {
        writeln!(out, "Invalid peer format: {}", entry)?;
    }
    Ok((nickname, listen_port, seeds))
}

fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> Result<String, ChatError> {
    write!(out, "{}", question)?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(ChatError::Config("input closed before configuration was complete".into()));
    }
    Ok(line.trim().to_string())
}
