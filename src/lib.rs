//! QUTest client – drive an instrumented target through a QSPY backend
//!
//! This crate implements the client side of the QSPY UDP protocol:
//! - A stateless wire codec for outbound commands and inbound trace records
//! - A background receiver that routes control records and queues trace text
//! - An expect engine that matches trace lines against patterns with a deadline
//! - Session and target lifecycle with timeout-bound attach and reset
//! - Acknowledged command verbs (post, publish, dispatch, filters, tick, ...)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Wire codec: commands, records, frames and filters
pub mod protocol;

/// Sessions, lifecycle and the expect engine
pub mod session;

// Re-export key types for convenience
pub use protocol::{Command, Frame, GlobalFilterSet, ObjectKind, RecordKind, TargetLayout};
pub use session::{Session, SessionConfig, SessionError, SessionResult, SessionState, TargetState};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// UDP port QSPY listens on for front-end clients
pub const DEFAULT_PORT: u16 = 7701;
