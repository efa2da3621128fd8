// src/protocol.rs
//! Wire envelope for chat messages.
//!
//! A frame is one line of UTF-8 text: `MSG|<id>|<sender>|<text>`. The split
//! stops after the third `|`, so `<text>` may itself contain pipes. Message
//! identity is the `id` field alone.

use std::fmt;

use uuid::Uuid;

use crate::error::ProtocolError;

pub const KIND_MSG: &str = "MSG";
pub const FIELD_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    id: String,
    sender: String,
    text: String,
}

impl ChatMessage {
    /// Build a message from its parts, rejecting values that would not survive
    /// a round trip over the wire.
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let msg = Self {
            id: id.into(),
            sender: sender.into(),
            text: text.into(),
        };
        if msg.id.is_empty() {
            return Err(ProtocolError::EmptyId);
        }
        check_field("id", &msg.id, true)?;
        check_field("sender", &msg.sender, true)?;
        check_field("text", &msg.text, false)?;
        Ok(msg)
    }

    /// A locally originated message with a fresh random id.
    pub fn local(sender: &str, text: &str) -> Result<Self, ProtocolError> {
        Self::new(Uuid::new_v4().to_string(), sender, text)
    }

    /// Parse one frame (without its newline).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let parts: Vec<&str> = line.splitn(4, FIELD_DELIMITER).collect();
        if parts.len() != 4 {
            return Err(ProtocolError::MissingFields(parts.len()));
        }
        if parts[0] != KIND_MSG {
            return Err(ProtocolError::WrongKind(excerpt(parts[0], 16)));
        }
        if parts[1].is_empty() {
            return Err(ProtocolError::EmptyId);
        }
        Ok(Self {
            id: parts[1].to_string(),
            sender: parts[2].to_string(),
            text: parts[3].to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Wire form without the trailing newline.
    pub fn encode(&self) -> String {
        format!(
            "{KIND_MSG}{d}{}{d}{}{d}{}",
            self.id,
            self.sender,
            self.text,
            d = FIELD_DELIMITER
        )
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, self.text)
    }
}

fn check_field(name: &'static str, value: &str, forbid_pipe: bool) -> Result<(), ProtocolError> {
    if value.contains(['\n', '\r']) {
        return Err(ProtocolError::LineTerminator(name));
    }
    if forbid_pipe && value.contains(FIELD_DELIMITER) {
        return Err(ProtocolError::ForbiddenDelimiter(name));
    }
    Ok(())
}

/// Shorten untrusted text for log lines.
pub fn excerpt(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_frame() {
        let m = ChatMessage::parse("MSG|id1|alice|hello").unwrap();
        assert_eq!(m.id(), "id1");
        assert_eq!(m.sender(), "alice");
        assert_eq!(m.text(), "hello");
        assert_eq!(m.to_string(), "alice: hello");
    }

    #[test]
    fn text_keeps_internal_pipes() {
        let m = ChatMessage::parse("MSG|id2|bob|a|b||c").unwrap();
        assert_eq!(m.text(), "a|b||c");
        assert_eq!(m.encode(), "MSG|id2|bob|a|b||c");
    }

    #[test]
    fn rejects_too_few_fields() {
        assert_eq!(
            ChatMessage::parse("MSG|onlytwoparts"),
            Err(ProtocolError::MissingFields(2))
        );
        assert_eq!(ChatMessage::parse(""), Err(ProtocolError::MissingFields(1)));
    }

    #[test]
    fn rejects_wrong_kind() {
        // the classic typo: MSQ instead of MSG
        assert!(matches!(
            ChatMessage::parse("MSQ|id|alice|hi"),
            Err(ProtocolError::WrongKind(_))
        ));
        assert!(matches!(
            ChatMessage::parse("msg|id|alice|hi"),
            Err(ProtocolError::WrongKind(_))
        ));
    }

    #[test]
    fn rejects_empty_id() {
        assert_eq!(ChatMessage::parse("MSG||alice|hi"), Err(ProtocolError::EmptyId));
    }

    #[test]
    fn empty_text_is_valid() {
        let m = ChatMessage::parse("MSG|x|alice|").unwrap();
        assert_eq!(m.text(), "");
    }

    #[test]
    fn strips_carriage_return() {
        let m = ChatMessage::parse("MSG|id|alice|hi\r").unwrap();
        assert_eq!(m.text(), "hi");
    }

    #[test]
    fn local_messages_get_unique_ids() {
        let a = ChatMessage::local("alice", "hi").unwrap();
        let b = ChatMessage::local("alice", "hi").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(ChatMessage::parse(&a.encode()).unwrap(), a);
    }

    #[test]
    fn local_rejects_unencodable_fields() {
        assert_eq!(
            ChatMessage::local("al|ice", "hi"),
            Err(ProtocolError::ForbiddenDelimiter("sender"))
        );
        assert_eq!(
            ChatMessage::local("alice", "two\nlines"),
            Err(ProtocolError::LineTerminator("text"))
        );
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("héllo world", 5), "héllo...");
        assert_eq!(excerpt("short", 16), "short");
    }
}
