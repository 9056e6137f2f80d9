//! Wire codec for the QSPY datagram protocol
//!
//! Stateless translation between typed commands/records and raw datagrams.
//!
//! ```text
//! outbound: [seq:u8][opcode:u8][opcode-specific payload]
//! inbound:  [seq:u8][kind:u8][kind-specific payload]
//! ```
//!
//! Inbound kinds below 128 are target trace records; kinds at or above 128
//! are backend control records. Only the free-form text record is decoded at
//! this layer; everything else is handed on as raw bytes.

use thiserror::Error;

pub mod command;
pub mod filter;
pub mod frame;
pub mod layout;
pub mod record;

pub use command::{
    Channels, Command, CommandRef, Event, EventTarget, ObjectKind, ObjectRef, RxOpcode, Signal,
};
pub use filter::{FilterGroup, GlobalFilterSet, LocalFilter};
pub use frame::{Frame, Payload, TextLine};
pub use layout::{TargetInfo, TargetLayout};
pub use record::{BackendRecord, RecordKind, TargetRecord};

/// First kind value reserved for backend control records.
pub const BACKEND_KIND_BASE: u8 = 128;

/// First application-specific target record.
pub const FIRST_USER_RECORD: u8 = 70;

/// Largest datagram the backend sends.
pub const MAX_DATAGRAM: usize = 1024;

/// Errors raised while encoding an outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Numeric value wider than the field the target was built with.
    #[error("{field} {value:#x} does not fit in {width} bytes")]
    FieldOverflow {
        /// Name of the field.
        field: &'static str,
        /// Value that was rejected.
        value: u64,
        /// Field width in bytes.
        width: u8,
    },
}

/// Errors raised while decoding an inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Datagram shorter than the two-byte header.
    #[error("frame too short: {len} bytes")]
    TooShort {
        /// Received length.
        len: usize,
    },

    /// Kind byte outside the known ranges.
    #[error("unknown record kind {kind}")]
    UnknownKind {
        /// Offending kind byte.
        kind: u8,
    },

    /// Payload does not match the layout of its kind.
    #[error("malformed record (kind {kind}): {detail}")]
    Malformed {
        /// Offending kind byte.
        kind: u8,
        /// What was wrong.
        detail: String,
    },
}
