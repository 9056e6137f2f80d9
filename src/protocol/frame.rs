//! Inbound frame decoding

use std::fmt;

use super::{BackendRecord, Command, DecodeError, RecordKind, TargetLayout, TargetRecord};

/// A decoded line of free-form trace text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    /// Raw id of the record the backend formatted into this line.
    pub record: u8,
    /// The printable line.
    pub text: String,
}

impl TextLine {
    /// Create a text line.
    pub fn new(record: u8, text: impl Into<String>) -> Self {
        Self {
            record,
            text: text.into(),
        }
    }
}

impl fmt::Display for TextLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Body of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Decoded free-form text.
    Text(TextLine),
    /// Kind-specific bytes left for the consumer to interpret.
    Raw(Vec<u8>),
}

/// One inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender's sequence counter (diagnostics only).
    pub seq: u8,
    /// Record kind.
    pub kind: RecordKind,
    /// Kind-specific payload.
    pub payload: Payload,
}

impl Frame {
    /// Decode a received datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let [seq, kind_byte, body @ ..] = bytes else {
            return Err(DecodeError::TooShort { len: bytes.len() });
        };

        let kind =
            RecordKind::from_u8(*kind_byte).ok_or(DecodeError::UnknownKind { kind: *kind_byte })?;

        let payload = if kind.is_text() {
            let [record, text @ ..] = body else {
                return Err(DecodeError::Malformed {
                    kind: *kind_byte,
                    detail: "text record without record id".to_owned(),
                });
            };
            let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            Payload::Text(TextLine {
                record: *record,
                text: String::from_utf8_lossy(&text[..end]).into_owned(),
            })
        } else {
            Payload::Raw(body.to_vec())
        };

        Ok(Self {
            seq: *seq,
            kind,
            payload,
        })
    }

    /// Build a text frame.
    pub fn text(seq: u8, line: TextLine) -> Self {
        Self {
            seq,
            kind: RecordKind::Target(TargetRecord::Text),
            payload: Payload::Text(line),
        }
    }

    /// Build a frame with a raw payload.
    pub fn raw(seq: u8, kind: impl Into<RecordKind>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            kind: kind.into(),
            payload: Payload::Raw(payload.into()),
        }
    }

    /// Serialize the frame into datagram bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.seq, self.kind.as_u8()];
        match &self.payload {
            Payload::Text(line) => {
                buf.push(line.record);
                buf.extend_from_slice(line.text.as_bytes());
                buf.push(0);
            }
            Payload::Raw(bytes) => buf.extend_from_slice(bytes),
        }
        buf
    }

    /// The text line, if this is a text frame.
    pub fn text_line(&self) -> Option<&TextLine> {
        match &self.payload {
            Payload::Text(line) => Some(line),
            Payload::Raw(_) => None,
        }
    }

    /// Raw payload bytes, empty for text frames.
    pub fn bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Raw(bytes) => bytes,
            Payload::Text(_) => &[],
        }
    }

    /// Interpret a backend echo of a backend-resolved command.
    pub fn echoed_command(&self, layout: &TargetLayout) -> Result<Option<Command>, DecodeError> {
        match self.kind {
            RecordKind::Backend(kind) => Command::from_echo(kind, self.bytes(), layout),
            _ => Ok(None),
        }
    }

    /// True for the backend's attach acknowledgement.
    pub fn is_attach_ack(&self) -> bool {
        self.kind == RecordKind::Backend(BackendRecord::Attach)
    }
}
