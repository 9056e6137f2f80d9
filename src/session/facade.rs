//! Acknowledged command verbs
//!
//! Each verb sends one command and then consumes the target's
//! acknowledgement line. A verb either observes its ack or fails with
//! `ExpectTimeout`/`ExpectMismatch`.

use super::{Session, SessionResult};
use crate::protocol::{
    Command, CommandRef, Event, EventTarget, GlobalFilterSet, LocalFilter, ObjectKind, ObjectRef,
    Signal,
};

/// Blank timestamp column the backend prints in front of control lines.
const ACK_INDENT: &str = "           ";

/// Line printed when the target pauses on a test point.
pub(crate) const PAUSE_LINE: &str = "           TstPause";

fn ack(rx: &str) -> String {
    format!("{ACK_INDENT}Trg-Ack  QS_RX_{rx}")
}

impl Session {
    fn send_acked(&mut self, command: Command, rx: &str) -> SessionResult<()> {
        self.send(&command)?;
        self.expect(&ack(rx))
    }

    /// Select the current object for later post, dispatch and tick verbs.
    pub fn current_obj(
        &mut self,
        kind: ObjectKind,
        object: impl Into<ObjectRef>,
    ) -> SessionResult<()> {
        let command = Command::CurrentObject {
            kind,
            object: object.into(),
        };
        self.send_acked(command, "CURR_OBJ")
    }

    /// Restrict trace output to one object.
    pub fn loc_filter(
        &mut self,
        kind: ObjectKind,
        object: impl Into<ObjectRef>,
    ) -> SessionResult<()> {
        let filter = LocalFilter::new(kind, object);
        self.send_acked(Command::LocalFilter(filter), "LOC_FILTER")
    }

    /// Replace the global filter.
    pub fn glb_filter(&mut self, filters: GlobalFilterSet) -> SessionResult<()> {
        self.send_acked(Command::GlobalFilter(filters), "GLB_FILTER")
    }

    /// Inject an event with an explicit delivery mode and parameters.
    pub fn event(&mut self, event: Event) -> SessionResult<()> {
        self.send_acked(Command::Event(event), "EVENT")
    }

    /// Post an event with raw parameter bytes to the current active object.
    pub fn post(&mut self, signal: impl Into<Signal>, params: &[u8]) -> SessionResult<()> {
        self.event(Event::new(EventTarget::Post, signal).with_params(params))
    }

    /// Publish an event to all subscribers.
    pub fn publish(&mut self, signal: impl Into<Signal>, params: &[u8]) -> SessionResult<()> {
        self.event(Event::new(EventTarget::Publish, signal).with_params(params))
    }

    /// Dispatch an event synchronously to the current state machine.
    pub fn dispatch(&mut self, signal: impl Into<Signal>, params: &[u8]) -> SessionResult<()> {
        self.event(Event::new(EventTarget::Dispatch, signal).with_params(params))
    }

    /// Trigger the initial transition of the current state machine.
    ///
    /// Pass signal `0` and no parameters when the target ignores the event.
    pub fn init(&mut self, signal: impl Into<Signal>, params: &[u8]) -> SessionResult<()> {
        self.event(Event::new(EventTarget::Init, signal).with_params(params))
    }

    /// Clock tick at `rate`.
    pub fn tick(&mut self, rate: u8) -> SessionResult<()> {
        self.send_acked(Command::Tick(rate), "TICK")
    }

    /// Run a user command on the target.
    pub fn command(
        &mut self,
        command: impl Into<CommandRef>,
        params: [u32; 3],
    ) -> SessionResult<()> {
        let command = Command::UserCommand {
            command: command.into(),
            params,
        };
        self.send_acked(command, "COMMAND")
    }

    /// Queue a test probe value for `function`.
    pub fn probe(&mut self, function: impl Into<ObjectRef>, data: u32) -> SessionResult<()> {
        let command = Command::TestProbe {
            function: function.into(),
            data,
        };
        self.send_acked(command, "TEST_PROBE")
    }

    /// Resume a target paused on a test point.
    pub fn resume(&mut self) -> SessionResult<()> {
        self.send_acked(Command::Continue, "TEST_CONTINUE")
    }

    /// Expect the target to report a test pause.
    pub fn expect_pause(&mut self) -> SessionResult<()> {
        self.expect(PAUSE_LINE)
    }
}
