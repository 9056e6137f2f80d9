//! Socket ownership and the background receiver
//!
//! The receiver thread is the only reader of the socket. Each datagram is
//! decoded and routed: built-in handlers flip lifecycle state, text lines go
//! to the [`TextQueue`], caller-registered kinds go to their closure and
//! everything else is dropped with a debug log.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::config::SessionConfig;
use super::error::SessionResult;
use super::expect::TextQueue;
use super::lifecycle::{Lifecycle, SessionState, TargetState};
use crate::protocol::{
    BackendRecord, Command, Frame, MAX_DATAGRAM, Payload, RecordKind, TargetInfo, TargetLayout,
    TargetRecord,
};

/// Closure receiving frames of a registered record kind.
///
/// Runs on the receiver thread and must return promptly.
pub type Handler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// State shared between the session and its receiver thread.
pub(crate) struct Shared {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) queue: TextQueue,
    handlers: RwLock<HashMap<RecordKind, Handler>>,
    layout: TargetLayout,
    mismatch: Mutex<Option<TargetLayout>>,
    target_info: Mutex<Option<TargetInfo>>,
}

impl Shared {
    pub(crate) fn new(layout: TargetLayout) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            queue: TextQueue::new(),
            handlers: RwLock::new(HashMap::new()),
            layout,
            mismatch: Mutex::new(None),
            target_info: Mutex::new(None),
        }
    }

    /// Kinds the receiver always handles itself.
    pub(crate) fn is_builtin(kind: RecordKind) -> bool {
        kind.is_text()
            || kind == RecordKind::Target(TargetRecord::TargetInfo)
            || kind == RecordKind::Backend(BackendRecord::Attach)
    }

    /// Route additional record kinds to `handler`. Built-in kinds are refused.
    pub(crate) fn register(&self, kind: RecordKind, handler: Handler) -> bool {
        if Self::is_builtin(kind) {
            return false;
        }
        self.handlers.write().insert(kind, handler);
        true
    }

    pub(crate) fn unregister(&self, kind: RecordKind) -> bool {
        self.handlers.write().remove(&kind).is_some()
    }

    /// Layout reported by a target that disagrees with the configuration.
    pub(crate) fn layout_mismatch(&self) -> Option<TargetLayout> {
        *self.mismatch.lock()
    }

    pub(crate) fn target_info(&self) -> Option<TargetInfo> {
        self.target_info.lock().clone()
    }

    pub(crate) fn configured_layout(&self) -> TargetLayout {
        self.layout
    }

    /// Deliver one decoded frame.
    pub(crate) fn dispatch(&self, frame: Frame) {
        if frame.is_attach_ack() {
            if self
                .lifecycle
                .transition_session(SessionState::Attaching, SessionState::Attached)
            {
                tracing::debug!(seq = frame.seq, "attach acknowledged");
            }
            return;
        }

        match frame.kind {
            RecordKind::Target(TargetRecord::TargetInfo) => self.on_target_info(&frame),
            _ => match frame.payload {
                Payload::Text(line) => self.queue.push(line),
                Payload::Raw(_) => {
                    let handler = self.handlers.read().get(&frame.kind).cloned();
                    match handler {
                        Some(handler) => handler(&frame),
                        None => tracing::debug!(
                            seq = frame.seq,
                            kind = %frame.kind,
                            "dropping record without handler"
                        ),
                    }
                }
            },
        }
    }

    fn on_target_info(&self, frame: &Frame) {
        let info = match TargetInfo::parse(frame.bytes()) {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed target info");
                return;
            }
        };

        if info.layout != self.layout {
            tracing::warn!(
                configured = %self.layout,
                reported = %info.layout,
                "target layout mismatch"
            );
            *self.mismatch.lock() = Some(info.layout);
        }

        tracing::debug!(
            version = info.version,
            reset = info.is_reset,
            "target info received"
        );
        *self.target_info.lock() = Some(info);
        self.lifecycle.set_target(TargetState::Up);
    }
}

/// A connected socket plus the receiver thread reading from it.
pub(crate) struct Link {
    socket: Arc<UdpSocket>,
    seq: AtomicU8,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    /// Bind, connect to the backend and start the receiver.
    pub(crate) fn open(config: &SessionConfig, shared: Arc<Shared>) -> SessionResult<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", config.local_port.unwrap_or(0)))?;
        socket.connect(config.endpoint())?;
        socket.set_read_timeout(Some(config.poll_interval()))?;
        let socket = Arc::new(socket);

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let socket = Arc::clone(&socket);
            let stop = Arc::clone(&stop);
            let poll = config.poll_interval();
            thread::Builder::new()
                .name("qutest-receiver".to_owned())
                .spawn(move || receive_loop(&socket, &shared, &stop, poll))?
        };

        tracing::debug!(
            local = ?socket.local_addr().ok(),
            peer = %config.endpoint(),
            "receiver started"
        );

        Ok(Self {
            socket,
            seq: AtomicU8::new(0),
            stop,
            reader: Some(reader),
        })
    }

    /// Encode and send a command with the next sequence number.
    pub(crate) fn send(&self, command: &Command, layout: &TargetLayout) -> SessionResult<()> {
        let body = command.encode(layout)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        let mut packet = Vec::with_capacity(body.len() + 1);
        packet.push(seq);
        packet.extend_from_slice(&body);

        tracing::debug!(
            seq,
            command = command.name(),
            bytes = %hex(&packet),
            "send"
        );
        self.socket.send(&packet)?;
        Ok(())
    }

    /// Stop the receiver and wait for it to exit.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::warn!("receiver thread panicked");
            }
            tracing::debug!("receiver stopped");
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: &UdpSocket, shared: &Shared, stop: &AtomicBool, poll: Duration) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut last_seq: Option<u8> = None;

    while !stop.load(Ordering::Acquire) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            // ICMP unreachable from a backend that is not up yet
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!("backend unreachable");
                continue;
            }
            Err(err) => {
                tracing::warn!(error = %err, "receive failed");
                thread::sleep(poll);
                continue;
            }
        };

        let frame = match Frame::decode(&buf[..len]) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, len, "dropping malformed frame");
                continue;
            }
        };

        if let Some(prev) = last_seq {
            let expected = prev.wrapping_add(1);
            if frame.seq != expected {
                tracing::debug!(expected, received = frame.seq, "inbound sequence gap");
            }
        }
        last_seq = Some(frame.seq);

        tracing::debug!(seq = frame.seq, kind = %frame.kind, len, "recv");
        shared.dispatch(frame);
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TextLine;
    use std::sync::atomic::AtomicUsize;

    fn shared() -> Shared {
        Shared::new(TargetLayout::default())
    }

    #[test]
    fn attach_ack_only_completes_a_pending_attach() {
        let shared = shared();
        shared.dispatch(Frame::raw(0, BackendRecord::Attach, Vec::<u8>::new()));
        assert_eq!(shared.lifecycle.session(), SessionState::Detached);

        shared.lifecycle.set_session(SessionState::Attaching);
        shared.dispatch(Frame::raw(1, BackendRecord::Attach, Vec::<u8>::new()));
        assert_eq!(shared.lifecycle.session(), SessionState::Attached);
    }

    #[test]
    fn target_info_brings_target_up() {
        let shared = shared();
        shared.lifecycle.set_target(TargetState::Resetting);
        let info = TargetInfo::default();
        shared.dispatch(Frame::raw(0, TargetRecord::TargetInfo, info.to_payload()));
        assert_eq!(shared.lifecycle.target(), TargetState::Up);
        assert_eq!(shared.target_info(), Some(info));
        assert!(shared.layout_mismatch().is_none());
    }

    #[test]
    fn target_info_with_other_layout_latches_mismatch() {
        let shared = shared();
        let mut info = TargetInfo::default();
        info.layout.obj_ptr = 8;
        shared.dispatch(Frame::raw(0, TargetRecord::TargetInfo, info.to_payload()));
        assert_eq!(shared.layout_mismatch(), Some(info.layout));
    }

    #[test]
    fn text_goes_to_queue_and_other_records_to_handlers() {
        let shared = shared();
        shared.dispatch(Frame::text(0, TextLine::new(0, "hello")));
        assert_eq!(shared.queue.len(), 1);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        assert!(shared.register(
            RecordKind::Target(TargetRecord::ObjDict),
            Arc::new(move |_: &Frame| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        shared.dispatch(Frame::raw(1, TargetRecord::ObjDict, vec![1u8, 2]));
        shared.dispatch(Frame::raw(2, TargetRecord::FunDict, vec![1u8, 2]));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(shared.queue.len(), 1);
    }

    #[test]
    fn builtin_kinds_cannot_be_displaced() {
        let shared = shared();
        let noop: Handler = Arc::new(|_: &Frame| {});
        assert!(!shared.register(RecordKind::Target(TargetRecord::Text), Arc::clone(&noop)));
        assert!(!shared.register(RecordKind::Target(TargetRecord::TargetInfo), Arc::clone(&noop)));
        assert!(!shared.register(RecordKind::Backend(BackendRecord::Attach), noop));
    }

    #[test]
    fn hex_formats_bytes() {
        assert_eq!(hex(&[0x00, 0x80, 0xff]), "00 80 FF");
        assert_eq!(hex(&[]), "");
    }
}
