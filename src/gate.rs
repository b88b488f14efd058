//! Request gate: caller network check, bot token sanity check and update
//! payload decoding.  Every check returns a [`HaltReason`] on failure and
//! nothing past the first failure runs.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::HaltReason;

/// Length of a well-formed bot token.
pub const BOT_TOKEN_LEN: usize = 46;

/// Address ranges the chat platform delivers webhooks from.
pub const DEFAULT_ALLOWED_RANGES: &[&str] = &["149.154.160.0/20", "91.108.4.0/22"];

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR range '{0}'")]
pub struct CidrParseError(pub String);

impl Ipv4Cidr {
    pub fn new(network: Ipv4Addr, prefix: u8) -> Option<Self> {
        (prefix <= 32).then_some(Self { network, prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        // A zero prefix would overflow the shift.
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// True iff `addr` shares this range's network prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        (u32::from(addr) & mask) == (u32::from(self.network) & mask)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let err = || CidrParseError(raw.to_string());
        let (net, prefix) = raw.split_once('/').ok_or_else(err)?;
        let network: Ipv4Addr = net.parse().map_err(|_| err())?;
        let prefix: u8 = prefix.parse().map_err(|_| err())?;
        Ipv4Cidr::new(network, prefix).ok_or_else(err)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Convenience form of [`Ipv4Cidr::contains`] over textual inputs.  Returns
/// false when either side fails to parse.
pub fn ip_in_range(ip: &str, range: &str) -> bool {
    match (ip.parse::<Ipv4Addr>(), range.parse::<Ipv4Cidr>()) {
        (Ok(addr), Ok(cidr)) => cidr.contains(addr),
        _ => false,
    }
}

/// Maps a peer address onto the IPv4 space.  IPv4-mapped IPv6 peers are
/// unwrapped; any other IPv6 peer has no IPv4 form.
fn as_ipv4(addr: IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

/// One inbound chat message, reduced to what the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingUpdate {
    pub chat_id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

/// Decides whether a delivery may proceed.
#[derive(Debug, Clone)]
pub struct RequestGate {
    allowed: Vec<Ipv4Cidr>,
}

impl RequestGate {
    pub fn new(allowed: Vec<Ipv4Cidr>) -> Self {
        Self { allowed }
    }

    pub fn allowed_ranges(&self) -> &[Ipv4Cidr] {
        &self.allowed
    }

    pub fn check_origin(&self, caller: IpAddr) -> Result<(), HaltReason> {
        let Some(addr) = as_ipv4(caller) else {
            return Err(HaltReason::Unauthorized);
        };
        if self.allowed.iter().any(|range| range.contains(addr)) {
            Ok(())
        } else {
            Err(HaltReason::Unauthorized)
        }
    }

    /// Static sanity check of the configured token, not per-request auth.
    pub fn check_bot_token(&self, token: &str) -> Result<(), HaltReason> {
        if token.is_empty() || token.chars().count() != BOT_TOKEN_LEN {
            return Err(HaltReason::InvalidBotToken);
        }
        Ok(())
    }

    pub fn parse_update(&self, body: &[u8]) -> Result<IncomingUpdate, HaltReason> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(HaltReason::MalformedUpdate("empty request body".into()));
        }
        let raw: RawUpdate = serde_json::from_slice(body).map_err(|e| {
            HaltReason::MalformedUpdate(format!("failed to parse update JSON: {}", e))
        })?;
        let message = raw
            .message
            .ok_or_else(|| HaltReason::MalformedUpdate("no message in update".into()))?;
        let text = message
            .text
            .ok_or_else(|| HaltReason::MalformedUpdate("message has no text".into()))?;
        Ok(IncomingUpdate {
            chat_id: message.chat.id,
            text,
        })
    }
}
