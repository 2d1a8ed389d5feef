//! STOMP frame data model.
//! A frame is a command, an ordered multi-valued header list, and a payload,
//! terminated on the wire by a NUL octet.

mod decoder;
mod encoder;

pub use decoder::{DecodeOutcome, StompDecoder};
pub use encoder::{encode, encoded_heartbeat};

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Name of the header carrying the payload length in bytes.
pub const CONTENT_LENGTH: &str = "content-length";
/// CONNECT header listing the STOMP versions the client accepts.
pub const ACCEPT_VERSION: &str = "accept-version";
/// CONNECTED header naming the negotiated STOMP version.
pub const VERSION: &str = "version";
/// Heart-beat negotiation header.
pub const HEART_BEAT: &str = "heart-beat";
/// ERROR header carrying a human-readable failure description.
pub const MESSAGE: &str = "message";
/// CONNECT header naming the client login.
pub const LOGIN: &str = "login";
/// MESSAGE header naming the subscription the frame is delivered on.
pub const SUBSCRIPTION: &str = "subscription";
/// CONNECTED header naming the authenticated user on the session.
pub const USER_NAME: &str = "user-name";
/// Destination header on SEND/MESSAGE/SUBSCRIBE frames.
pub const DESTINATION: &str = "destination";

/// A STOMP command verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Error => "ERROR",
        }
    }

    /// Whether the STOMP specification permits a body for this command.
    pub fn is_body_allowed(&self) -> bool {
        matches!(self, Command::Send | Command::Message | Command::Error)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SEND" => Ok(Command::Send),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ACK" => Ok(Command::Ack),
            "NACK" => Ok(Command::Nack),
            "BEGIN" => Ok(Command::Begin),
            "COMMIT" => Ok(Command::Commit),
            "ABORT" => Ok(Command::Abort),
            "DISCONNECT" => Ok(Command::Disconnect),
            "ERROR" => Ok(Command::Error),
            other => Err(ProtocolError::MalformedFrame(format!(
                "{} is not a valid STOMP command",
                other
            ))),
        }
    }
}

/// Ordered multi-valued header list.
///
/// Insertion order is preserved for deterministic re-encoding. Duplicate
/// names are legal; lookups return the first occurrence, which wins per the
/// STOMP specification. Names are case-sensitive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing values for the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single decoded or to-be-encoded STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// CONNECTED frame for a completed handshake. `version` is omitted when
    /// the client sent no `accept-version` header (STOMP 1.0).
    pub fn connected(version: Option<&str>) -> Self {
        let mut frame = Frame::new(Command::Connected);
        if let Some(v) = version {
            frame.headers.push(VERSION, v);
        }
        // No heart-beats are generated in simple-broker mode.
        frame.headers.push(HEART_BEAT, "0,0");
        frame
    }

    /// ERROR frame carrying a failure description in the `message` header.
    pub fn error(description: &str) -> Self {
        Frame::new(Command::Error).with_header(MESSAGE, description)
    }

    /// Internal DISCONNECT synthesized when a transport closes.
    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Set of versions from the `accept-version` header, empty when absent.
    pub fn accept_versions(&self) -> Vec<&str> {
        self.headers
            .get(ACCEPT_VERSION)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for (name, value) in self.headers.iter() {
            write!(f, " {}={}", name, value)?;
        }
        match std::str::from_utf8(&self.payload) {
            Ok(s) if !s.is_empty() => write!(f, " payload={:?}", s),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tokens_round_trip() {
        for cmd in [
            Command::Connect,
            Command::Connected,
            Command::Send,
            Command::Subscribe,
            Command::Unsubscribe,
            Command::Message,
            Command::Receipt,
            Command::Ack,
            Command::Nack,
            Command::Begin,
            Command::Commit,
            Command::Abort,
            Command::Disconnect,
            Command::Error,
        ] {
            assert_eq!(cmd.as_str().parse::<Command>().unwrap(), cmd);
        }
        assert!("FOO".parse::<Command>().is_err());
    }

    #[test]
    fn body_allowed_table() {
        assert!(Command::Send.is_body_allowed());
        assert!(Command::Message.is_body_allowed());
        assert!(Command::Error.is_body_allowed());
        assert!(!Command::Connect.is_body_allowed());
        assert!(!Command::Subscribe.is_body_allowed());
        assert!(!Command::Disconnect.is_body_allowed());
    }

    #[test]
    fn duplicate_headers_first_wins() {
        let mut headers = Headers::new();
        headers.push("destination", "/queue/a");
        headers.push("destination", "/queue/b");
        assert_eq!(headers.get("destination"), Some("/queue/a"));
        assert_eq!(
            headers.get_all("destination").collect::<Vec<_>>(),
            vec!["/queue/a", "/queue/b"]
        );
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn accept_versions_parsing() {
        let frame = Frame::new(Command::Connect).with_header(ACCEPT_VERSION, "1.1, 1.2");
        assert_eq!(frame.accept_versions(), vec!["1.1", "1.2"]);
        assert!(Frame::new(Command::Connect).accept_versions().is_empty());
    }
}
