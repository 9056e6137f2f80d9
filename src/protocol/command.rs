//! Outbound commands and their wire encoding
//!
//! Every command that references an object, signal, function or user command
//! has two encodings. When all references are numeric the packet goes
//! straight to the target (`QS_RX_*` opcodes). When any reference is symbolic
//! the packet is addressed to the backend (`QSPY_SEND_*` opcodes) with a zero
//! placeholder in the numeric slot and the name appended as a null-terminated
//! string, which the backend resolves from its dictionaries.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::layout::{put_uint, take_uint};
use super::{BackendRecord, DecodeError, EncodeError, GlobalFilterSet, LocalFilter, TargetLayout};

/// Opcodes understood directly by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RxOpcode {
    Info = 0,
    Command = 1,
    Reset = 2,
    Tick = 3,
    Peek = 4,
    Poke = 5,
    Fill = 6,
    TestSetup = 7,
    TestTeardown = 8,
    TestProbe = 9,
    GlbFilter = 10,
    LocFilter = 11,
    AoFilter = 12,
    CurrObj = 13,
    Continue = 14,
    Reserved = 15,
    Event = 16,
}

/// Bit set of output channels requested at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channels(pub u8);

impl Channels {
    /// Binary (raw record) channel.
    pub const BINARY: Channels = Channels(1);
    /// Formatted text channel.
    pub const TEXT: Channels = Channels(2);
}

impl Default for Channels {
    fn default() -> Self {
        Channels::TEXT
    }
}

/// Kind of target object a reference designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    /// State machine.
    Sm = 0,
    /// Active object.
    Ao = 1,
    /// Memory pool.
    Mp = 2,
    /// Event queue.
    Eq = 3,
    /// Time event.
    Te = 4,
    /// Application-specific object.
    Ap = 5,
    /// Active object and its state machine.
    SmAo = 6,
}

impl ObjectKind {
    /// Look up the kind carried by a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        let kind = match value {
            0 => ObjectKind::Sm,
            1 => ObjectKind::Ao,
            2 => ObjectKind::Mp,
            3 => ObjectKind::Eq,
            4 => ObjectKind::Te,
            5 => ObjectKind::Ap,
            6 => ObjectKind::SmAo,
            _ => return None,
        };
        Some(kind)
    }
}

/// A target object, either by address or by dictionary name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
    /// Raw address on the target.
    Addr(u64),
    /// Name resolved by the backend.
    Name(String),
}

/// An event signal, either numeric or by dictionary name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Numeric signal id.
    Id(u32),
    /// Name resolved by the backend.
    Name(String),
}

/// A user command, either numeric or by dictionary name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandRef {
    /// Numeric command id.
    Id(u8),
    /// Name resolved by the backend.
    Name(String),
}

macro_rules! symbolic_from {
    ($ty:ident, $num_variant:ident, $num:ty) => {
        impl From<$num> for $ty {
            fn from(value: $num) -> Self {
                $ty::$num_variant(value)
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                $ty::Name(value.to_owned())
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                $ty::Name(value)
            }
        }

        impl $ty {
            /// True when the reference must be resolved by the backend.
            pub fn is_symbolic(&self) -> bool {
                matches!(self, $ty::Name(_))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $ty::$num_variant(value) => write!(f, "{value:#x}"),
                    $ty::Name(name) => f.write_str(name),
                }
            }
        }
    };
}

symbolic_from!(ObjectRef, Addr, u64);
symbolic_from!(Signal, Id, u32);
symbolic_from!(CommandRef, Id, u8);

/// How an injected event is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTarget {
    /// Publish to all subscribers.
    Publish,
    /// Post to the active object of the given priority (1..=252).
    Priority(u8),
    /// Post to the current active object.
    Post,
    /// Trigger the initial transition of the current state machine.
    Init,
    /// Dispatch synchronously to the current state machine.
    Dispatch,
}

impl EventTarget {
    /// Wire value of the priority/dispatch-mode byte.
    pub fn to_wire(self) -> u8 {
        match self {
            EventTarget::Publish => 0,
            EventTarget::Priority(prio) => prio,
            EventTarget::Post => 253,
            EventTarget::Init => 254,
            EventTarget::Dispatch => 255,
        }
    }

    /// Interpret a priority/dispatch-mode byte.
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => EventTarget::Publish,
            253 => EventTarget::Post,
            254 => EventTarget::Init,
            255 => EventTarget::Dispatch,
            prio => EventTarget::Priority(prio),
        }
    }
}

/// An event injected into the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Delivery mode.
    pub target: EventTarget,
    /// Signal of the event.
    pub signal: Signal,
    /// Raw event parameters, packed the way the target expects them.
    pub params: Vec<u8>,
}

impl Event {
    /// Create an event without parameters.
    pub fn new(target: EventTarget, signal: impl Into<Signal>) -> Self {
        Self {
            target,
            signal: signal.into(),
            params: Vec::new(),
        }
    }

    /// Attach raw parameter bytes.
    pub fn with_params(mut self, params: impl Into<Vec<u8>>) -> Self {
        self.params = params.into();
        self
    }
}

/// Every packet the client can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Attach to the backend on the given channels.
    Attach(Channels),
    /// Detach from the backend.
    Detach,
    /// Reset the target.
    Reset,
    /// Resume a paused target.
    Continue,
    /// Clock tick at the given rate.
    Tick(u8),
    /// Replace the global filter.
    GlobalFilter(GlobalFilterSet),
    /// Set the local filter.
    LocalFilter(LocalFilter),
    /// Select the current object for later post/dispatch/tick.
    CurrentObject {
        /// Kind of the object.
        kind: ObjectKind,
        /// The object.
        object: ObjectRef,
    },
    /// Inject an event.
    Event(Event),
    /// Execute a user command with three parameters.
    UserCommand {
        /// Command to run.
        command: CommandRef,
        /// Command parameters.
        params: [u32; 3],
    },
    /// Queue a test probe for a function.
    TestProbe {
        /// Function the probe is for.
        function: ObjectRef,
        /// Probe data word.
        data: u32,
    },
    /// Arbitrary payload sent after the sequence byte.
    Raw(Vec<u8>),
}

impl Command {
    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Attach(_) => "attach",
            Command::Detach => "detach",
            Command::Reset => "reset",
            Command::Continue => "continue",
            Command::Tick(_) => "tick",
            Command::GlobalFilter(_) => "global-filter",
            Command::LocalFilter(_) => "local-filter",
            Command::CurrentObject { .. } => "current-object",
            Command::Event(_) => "event",
            Command::UserCommand { .. } => "command",
            Command::TestProbe { .. } => "test-probe",
            Command::Raw(_) => "raw",
        }
    }

    /// True when the encoding is addressed to the backend for name resolution.
    pub fn is_backend_resolved(&self) -> bool {
        match self {
            Command::LocalFilter(filter) => filter.object.is_symbolic(),
            Command::CurrentObject { object, .. } => object.is_symbolic(),
            Command::Event(event) => event.signal.is_symbolic(),
            Command::UserCommand { command, .. } => command.is_symbolic(),
            Command::TestProbe { function, .. } => function.is_symbolic(),
            _ => false,
        }
    }

    /// Encode the command body (everything after the sequence byte).
    ///
    /// Fails when a signal, address or parameter length does not fit the
    /// field widths of `layout`.
    pub fn encode(&self, layout: &TargetLayout) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(16);
        match self {
            Command::Attach(channels) => {
                buf.push(BackendRecord::Attach.as_u8());
                buf.push(channels.0);
            }
            Command::Detach => buf.push(BackendRecord::Detach.as_u8()),
            Command::Reset => buf.push(RxOpcode::Reset as u8),
            Command::Continue => buf.push(RxOpcode::Continue as u8),
            Command::Tick(rate) => {
                buf.push(RxOpcode::Tick as u8);
                buf.push(*rate);
            }
            Command::GlobalFilter(filter) => {
                buf.push(RxOpcode::GlbFilter as u8);
                buf.push(16);
                for word in filter.words() {
                    buf.extend_from_slice(&word.to_le_bytes());
                }
            }
            Command::LocalFilter(filter) => encode_object(
                &mut buf,
                layout,
                RxOpcode::LocFilter,
                BackendRecord::SendLocFilter,
                filter.kind,
                &filter.object,
            )?,
            Command::CurrentObject { kind, object } => encode_object(
                &mut buf,
                layout,
                RxOpcode::CurrObj,
                BackendRecord::SendCurrObj,
                *kind,
                object,
            )?,
            Command::Event(event) => {
                let (opcode, sig, name) = match &event.signal {
                    Signal::Id(id) => (RxOpcode::Event as u8, u64::from(*id), None),
                    Signal::Name(name) => (BackendRecord::SendEvent.as_u8(), 0, Some(name)),
                };
                buf.push(opcode);
                buf.push(event.target.to_wire());
                put_uint(&mut buf, "signal", sig, layout.signal)?;
                put_uint(
                    &mut buf,
                    "event size",
                    event.params.len() as u64,
                    layout.event_size,
                )?;
                buf.extend_from_slice(&event.params);
                if let Some(name) = name {
                    put_str(&mut buf, name);
                }
            }
            Command::UserCommand { command, params } => {
                let (opcode, id, name) = match command {
                    CommandRef::Id(id) => (RxOpcode::Command as u8, *id, None),
                    CommandRef::Name(name) => (BackendRecord::SendCommand.as_u8(), 0, Some(name)),
                };
                buf.push(opcode);
                buf.push(id);
                for param in params {
                    buf.extend_from_slice(&param.to_le_bytes());
                }
                if let Some(name) = name {
                    put_str(&mut buf, name);
                }
            }
            Command::TestProbe { function, data } => {
                let (opcode, addr, name) = match function {
                    ObjectRef::Addr(addr) => (RxOpcode::TestProbe as u8, *addr, None),
                    ObjectRef::Name(name) => (BackendRecord::SendTestProbe.as_u8(), 0, Some(name)),
                };
                buf.push(opcode);
                buf.extend_from_slice(&data.to_le_bytes());
                put_uint(&mut buf, "function pointer", addr, layout.fun_ptr)?;
                if let Some(name) = name {
                    put_str(&mut buf, name);
                }
            }
            Command::Raw(bytes) => buf.extend_from_slice(bytes),
        }
        Ok(buf)
    }

    /// Parse the payload of a backend record echoing a backend-resolved command.
    ///
    /// Returns `Ok(None)` for backend kinds that carry no command.
    pub fn from_echo(
        kind: BackendRecord,
        payload: &[u8],
        layout: &TargetLayout,
    ) -> Result<Option<Self>, DecodeError> {
        let malformed = |detail: &str| DecodeError::Malformed {
            kind: kind.as_u8(),
            detail: detail.to_owned(),
        };
        let mut cursor = payload;

        let command = match kind {
            BackendRecord::Attach => {
                let channels = take_u8(&mut cursor).unwrap_or(Channels::TEXT.0);
                Command::Attach(Channels(channels))
            }
            BackendRecord::Detach => Command::Detach,
            BackendRecord::SendLocFilter | BackendRecord::SendCurrObj => {
                let kind_byte =
                    take_u8(&mut cursor).ok_or_else(|| malformed("missing object kind"))?;
                let object_kind =
                    ObjectKind::from_u8(kind_byte).ok_or_else(|| malformed("unknown object kind"))?;
                take_uint(&mut cursor, layout.obj_ptr)
                    .ok_or_else(|| malformed("missing object pointer"))?;
                let name = take_str(&mut cursor).ok_or_else(|| malformed("missing object name"))?;
                if kind == BackendRecord::SendLocFilter {
                    Command::LocalFilter(LocalFilter::new(object_kind, name))
                } else {
                    Command::CurrentObject {
                        kind: object_kind,
                        object: ObjectRef::Name(name),
                    }
                }
            }
            BackendRecord::SendEvent => {
                let target = take_u8(&mut cursor).ok_or_else(|| malformed("missing priority"))?;
                take_uint(&mut cursor, layout.signal).ok_or_else(|| malformed("missing signal"))?;
                let len = take_uint(&mut cursor, layout.event_size)
                    .ok_or_else(|| malformed("missing event size"))?;
                let len = usize::try_from(len).map_err(|_| malformed("event size overflow"))?;
                if cursor.len() < len {
                    return Err(malformed("event parameters truncated"));
                }
                let (params, rest) = cursor.split_at(len);
                cursor = rest;
                let name = take_str(&mut cursor).ok_or_else(|| malformed("missing signal name"))?;
                Command::Event(Event {
                    target: EventTarget::from_wire(target),
                    signal: Signal::Name(name),
                    params: params.to_vec(),
                })
            }
            BackendRecord::SendCommand => {
                take_u8(&mut cursor).ok_or_else(|| malformed("missing command id"))?;
                let mut params = [0u32; 3];
                for param in &mut params {
                    let value =
                        take_uint(&mut cursor, 4).ok_or_else(|| malformed("missing parameter"))?;
                    *param = value as u32;
                }
                let name = take_str(&mut cursor).ok_or_else(|| malformed("missing command name"))?;
                Command::UserCommand {
                    command: CommandRef::Name(name),
                    params,
                }
            }
            BackendRecord::SendTestProbe => {
                let data =
                    take_uint(&mut cursor, 4).ok_or_else(|| malformed("missing probe data"))?;
                take_uint(&mut cursor, layout.fun_ptr)
                    .ok_or_else(|| malformed("missing function pointer"))?;
                let name = take_str(&mut cursor).ok_or_else(|| malformed("missing function name"))?;
                Command::TestProbe {
                    function: ObjectRef::Name(name),
                    data: data as u32,
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(command))
    }
}

fn encode_object(
    buf: &mut Vec<u8>,
    layout: &TargetLayout,
    direct: RxOpcode,
    resolved: BackendRecord,
    kind: ObjectKind,
    object: &ObjectRef,
) -> Result<(), EncodeError> {
    match object {
        ObjectRef::Addr(addr) => {
            buf.push(direct as u8);
            buf.push(kind as u8);
            put_uint(buf, "object pointer", *addr, layout.obj_ptr)?;
        }
        ObjectRef::Name(name) => {
            buf.push(resolved.as_u8());
            buf.push(kind as u8);
            put_uint(buf, "object pointer", 0, layout.obj_ptr)?;
            put_str(buf, name);
        }
    }
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

fn take_u8(bytes: &mut &[u8]) -> Option<u8> {
    let (&first, rest) = bytes.split_first()?;
    *bytes = rest;
    Some(first)
}

fn take_str(bytes: &mut &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0)?;
    let value = String::from_utf8_lossy(&bytes[..end]).into_owned();
    *bytes = &bytes[end + 1..];
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> TargetLayout {
        TargetLayout::default()
    }

    #[test]
    fn numeric_current_object_goes_to_target() {
        let cmd = Command::CurrentObject {
            kind: ObjectKind::SmAo,
            object: ObjectRef::Addr(0x2000_0010),
        };
        assert_eq!(cmd.encode(&layout()).unwrap(), vec![13, 6, 0x10, 0x00, 0x00, 0x20]);
        assert!(!cmd.is_backend_resolved());
    }

    #[test]
    fn symbolic_current_object_goes_to_backend() {
        let cmd = Command::CurrentObject {
            kind: ObjectKind::SmAo,
            object: "l_philo<2>".into(),
        };
        let mut expected = vec![137, 6, 0, 0, 0, 0];
        expected.extend_from_slice(b"l_philo<2>\0");
        assert_eq!(cmd.encode(&layout()).unwrap(), expected);
        assert!(cmd.is_backend_resolved());
    }

    #[test]
    fn event_encoding_places_params_before_name() {
        let cmd = Command::Event(Event::new(EventTarget::Post, "EAT_SIG").with_params(vec![2]));
        let mut expected = vec![135, 253, 0, 0, 1, 0, 2];
        expected.extend_from_slice(b"EAT_SIG\0");
        assert_eq!(cmd.encode(&layout()).unwrap(), expected);

        let direct = Command::Event(Event::new(EventTarget::Dispatch, 7u32));
        assert_eq!(direct.encode(&layout()).unwrap(), vec![16, 255, 7, 0, 0, 0]);
    }

    #[test]
    fn global_filter_is_length_prefixed() {
        let cmd = Command::GlobalFilter(GlobalFilterSet::from_words([1, 2, 3, 4]));
        assert_eq!(
            cmd.encode(&layout()).unwrap(),
            vec![10, 16, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0]
        );
    }

    #[test]
    fn user_command_and_probe_layouts() {
        let cmd = Command::UserCommand {
            command: CommandRef::Id(3),
            params: [1, 2, 3],
        };
        assert_eq!(
            cmd.encode(&layout()).unwrap(),
            vec![1, 3, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]
        );

        let probe = Command::TestProbe {
            function: ObjectRef::Addr(0x0800_1234),
            data: 0xDEAD_BEEF,
        };
        assert_eq!(
            probe.encode(&layout()).unwrap(),
            vec![9, 0xEF, 0xBE, 0xAD, 0xDE, 0x34, 0x12, 0x00, 0x08]
        );
    }

    #[test]
    fn simple_commands() {
        let attach = Command::Attach(Channels::TEXT);
        assert_eq!(attach.encode(&layout()).unwrap(), vec![128, 2]);
        assert_eq!(Command::Detach.encode(&layout()).unwrap(), vec![129]);
        assert_eq!(Command::Reset.encode(&layout()).unwrap(), vec![2]);
        assert_eq!(Command::Continue.encode(&layout()).unwrap(), vec![14]);
        assert_eq!(Command::Tick(1).encode(&layout()).unwrap(), vec![3, 1]);
    }

    #[test]
    fn wide_object_pointers_follow_layout() {
        let wide = TargetLayout {
            obj_ptr: 8,
            ..TargetLayout::default()
        };
        let cmd = Command::LocalFilter(LocalFilter::new(ObjectKind::Ao, 0x1u64));
        assert_eq!(cmd.encode(&wide).unwrap(), vec![11, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn values_wider_than_their_field_are_rejected() {
        let signal = Command::Event(Event::new(EventTarget::Post, 0x1_0005u32));
        assert_eq!(
            signal.encode(&layout()),
            Err(EncodeError::FieldOverflow {
                field: "signal",
                value: 0x1_0005,
                width: 2,
            })
        );

        let object = Command::CurrentObject {
            kind: ObjectKind::Ao,
            object: ObjectRef::Addr(0x1_0000_0000),
        };
        assert!(matches!(
            object.encode(&layout()),
            Err(EncodeError::FieldOverflow { field: "object pointer", .. })
        ));

        let probe = Command::TestProbe {
            function: ObjectRef::Addr(0x1_0000_0000),
            data: 0,
        };
        assert!(matches!(
            probe.encode(&layout()),
            Err(EncodeError::FieldOverflow { field: "function pointer", .. })
        ));

        let params = Command::Event(
            Event::new(EventTarget::Post, "BIG_SIG").with_params(vec![0u8; 0x1_0000]),
        );
        assert_eq!(
            params.encode(&layout()),
            Err(EncodeError::FieldOverflow {
                field: "event size",
                value: 0x1_0000,
                width: 2,
            })
        );

        let wide = TargetLayout {
            obj_ptr: 8,
            ..TargetLayout::default()
        };
        assert!(object.encode(&wide).is_ok());
    }

    #[test]
    fn echo_of_truncated_event_is_malformed() {
        let err = Command::from_echo(BackendRecord::SendEvent, &[253, 0], &layout()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { kind: 135, .. }));
    }
}
