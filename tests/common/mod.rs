//! Scripted stand-in for the QSPY backend.
//!
//! Binds an ephemeral UDP port on 127.0.0.1, records every packet the client
//! sends and answers with whatever frames the responder returns.

#![allow(dead_code)]

use parking_lot::Mutex;
use qutest::SessionConfig;
use qutest::protocol::{BackendRecord, Frame, TargetInfo, TargetRecord, TextLine};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub struct FakeBackend {
    socket: Arc<UdpSocket>,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    seq: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FakeBackend {
    /// Start a backend that answers each client packet with `responder`.
    pub fn start<F>(mut responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Frame> + Send + 'static,
    {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let peer = Arc::new(Mutex::new(None));
        let received = Arc::new(Mutex::new(Vec::new()));
        let seq = Arc::new(AtomicU8::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let socket = Arc::clone(&socket);
            let peer = Arc::clone(&peer);
            let received = Arc::clone(&received);
            let seq = Arc::clone(&seq);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut buf = [0u8; 1024];
                while !stop.load(Ordering::SeqCst) {
                    let Ok((len, from)) = socket.recv_from(&mut buf) else {
                        continue;
                    };
                    *peer.lock() = Some(from);
                    let packet = buf[..len].to_vec();
                    received.lock().push(packet.clone());
                    for frame in responder(&packet) {
                        transmit(&socket, &seq, from, frame);
                    }
                }
            })
        };

        Self {
            socket,
            peer,
            received,
            seq,
            stop,
            thread: Some(thread),
        }
    }

    /// A backend that behaves like QSPY with a healthy target behind it.
    pub fn qspy() -> Self {
        Self::start(qspy_responder)
    }

    /// A backend that never answers.
    pub fn silent() -> Self {
        Self::start(|_| Vec::new())
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    /// Session configuration pointing at this backend with short timeouts.
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".to_owned(),
            port: self.port(),
            attach_timeout_ms: 1000,
            reset_timeout_ms: 1000,
            expect_timeout_ms: 500,
            detach_grace_ms: 10,
            poll_interval_ms: 10,
            ..SessionConfig::default()
        }
    }

    /// Push an unsolicited frame to the attached client.
    pub fn send_frame(&self, frame: Frame) {
        let peer = self.peer.lock().expect("no client has contacted the backend");
        transmit(&self.socket, &self.seq, peer, frame);
    }

    /// Push an unsolicited trace line to the attached client.
    pub fn send_text(&self, text: &str) {
        self.send_frame(Frame::text(0, TextLine::new(0, text)));
    }

    /// Every packet received so far.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().clone()
    }

    /// Opcode byte of every packet received so far.
    pub fn opcodes(&self) -> Vec<u8> {
        self.received.lock().iter().map(|p| p[1]).collect()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn transmit(socket: &UdpSocket, seq: &AtomicU8, to: SocketAddr, mut frame: Frame) {
    frame.seq = seq.fetch_add(1, Ordering::SeqCst);
    socket.send_to(&frame.encode(), to).unwrap();
}

pub fn ack(rx: &str) -> Frame {
    text(&format!("           Trg-Ack  QS_RX_{rx}"))
}

pub fn text(line: &str) -> Frame {
    Frame::text(0, TextLine::new(0, line))
}

pub fn attach_ack() -> Frame {
    Frame::raw(0, BackendRecord::Attach, Vec::<u8>::new())
}

pub fn target_info(info: &TargetInfo) -> Frame {
    Frame::raw(0, TargetRecord::TargetInfo, info.to_payload())
}

/// Name of the ack QSPY prints for a client opcode, if the target acks it.
pub fn ack_name(opcode: u8) -> Option<&'static str> {
    let name = match opcode {
        1 | 138 => "COMMAND",
        3 => "TICK",
        9 | 139 => "TEST_PROBE",
        10 => "GLB_FILTER",
        11 | 136 => "LOC_FILTER",
        13 | 137 => "CURR_OBJ",
        14 => "TEST_CONTINUE",
        16 | 135 => "EVENT",
        _ => return None,
    };
    Some(name)
}

/// Acks attach, answers reset with target info and acks every target command.
/// Events are followed by a `Trg-Done` line.
pub fn qspy_responder(packet: &[u8]) -> Vec<Frame> {
    let opcode = packet[1];
    match opcode {
        128 => vec![attach_ack()],
        2 => vec![target_info(&TargetInfo::default())],
        16 | 135 => vec![
            ack("EVENT"),
            text("0000000100 Trg-Done QS_RX_EVENT"),
        ],
        _ => ack_name(opcode).map(ack).into_iter().collect(),
    }
}

/// Poll `done` until it holds or two seconds pass.
pub fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}
