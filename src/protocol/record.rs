//! Record kind catalogue
//!
//! Inbound kinds below [`BACKEND_KIND_BASE`] originate on the target; kinds at
//! or above it are produced by the backend itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BACKEND_KIND_BASE, FIRST_USER_RECORD};

macro_rules! record_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident = $value:literal => $label:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        #[allow(missing_docs)]
        pub enum $name {
            $( $variant = $value, )+
        }

        impl $name {
            /// Look up the variant carried by a raw discriminator.
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Canonical diagnostic name of the record.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }

            /// Raw discriminator value.
            pub fn as_u8(self) -> u8 {
                self as u8
            }
        }
    };
}

record_enum! {
    /// Records emitted by the instrumented target.
    TargetRecord {
        Text = 0 => "QS_TEXT",
        StateEntry = 1 => "QS_QEP_STATE_ENTRY",
        StateExit = 2 => "QS_QEP_STATE_EXIT",
        StateInit = 3 => "QS_QEP_STATE_INIT",
        InitTran = 4 => "QS_QEP_INIT_TRAN",
        InternTran = 5 => "QS_QEP_INTERN_TRAN",
        Tran = 6 => "QS_QEP_TRAN",
        Ignored = 7 => "QS_QEP_IGNORED",
        Dispatch = 8 => "QS_QEP_DISPATCH",
        Unhandled = 9 => "QS_QEP_UNHANDLED",
        ActiveDefer = 10 => "QS_QF_ACTIVE_DEFER",
        ActiveRecall = 11 => "QS_QF_ACTIVE_RECALL",
        ActiveSubscribe = 12 => "QS_QF_ACTIVE_SUBSCRIBE",
        ActiveUnsubscribe = 13 => "QS_QF_ACTIVE_UNSUBSCRIBE",
        ActivePostFifo = 14 => "QS_QF_ACTIVE_POST_FIFO",
        ActivePostLifo = 15 => "QS_QF_ACTIVE_POST_LIFO",
        ActiveGet = 16 => "QS_QF_ACTIVE_GET",
        ActiveGetLast = 17 => "QS_QF_ACTIVE_GET_LAST",
        ActiveRecallAttempt = 18 => "QS_QF_ACTIVE_RECALL_ATTEMPT",
        EqueuePostFifo = 19 => "QS_QF_EQUEUE_POST_FIFO",
        EqueuePostLifo = 20 => "QS_QF_EQUEUE_POST_LIFO",
        EqueueGet = 21 => "QS_QF_EQUEUE_GET",
        EqueueGetLast = 22 => "QS_QF_EQUEUE_GET_LAST",
        Reserved23 = 23 => "QS_QF_RESERVED2",
        MpoolGet = 24 => "QS_QF_MPOOL_GET",
        MpoolPut = 25 => "QS_QF_MPOOL_PUT",
        Publish = 26 => "QS_QF_PUBLISH",
        NewRef = 27 => "QS_QF_NEW_REF",
        New = 28 => "QS_QF_NEW",
        GcAttempt = 29 => "QS_QF_GC_ATTEMPT",
        Gc = 30 => "QS_QF_GC",
        Tick = 31 => "QS_QF_TICK",
        TimeEvtArm = 32 => "QS_QF_TIMEEVT_ARM",
        TimeEvtAutoDisarm = 33 => "QS_QF_TIMEEVT_AUTO_DISARM",
        TimeEvtDisarmAttempt = 34 => "QS_QF_TIMEEVT_DISARM_ATTEMPT",
        TimeEvtDisarm = 35 => "QS_QF_TIMEEVT_DISARM",
        TimeEvtRearm = 36 => "QS_QF_TIMEEVT_REARM",
        TimeEvtPost = 37 => "QS_QF_TIMEEVT_POST",
        DeleteRef = 38 => "QS_QF_DELETE_REF",
        CritEntry = 39 => "QS_QF_CRIT_ENTRY",
        CritExit = 40 => "QS_QF_CRIT_EXIT",
        IsrEntry = 41 => "QS_QF_ISR_ENTRY",
        IsrExit = 42 => "QS_QF_ISR_EXIT",
        IntDisable = 43 => "QS_QF_INT_DISABLE",
        IntEnable = 44 => "QS_QF_INT_ENABLE",
        ActivePostAttempt = 45 => "QS_QF_ACTIVE_POST_ATTEMPT",
        EqueuePostAttempt = 46 => "QS_QF_EQUEUE_POST_ATTEMPT",
        MpoolGetAttempt = 47 => "QS_QF_MPOOL_GET_ATTEMPT",
        MutexLock = 48 => "QS_MUTEX_LOCK",
        MutexUnlock = 49 => "QS_MUTEX_UNLOCK",
        SchedLock = 50 => "QS_SCHED_LOCK",
        SchedUnlock = 51 => "QS_SCHED_UNLOCK",
        SchedNext = 52 => "QS_SCHED_NEXT",
        SchedIdle = 53 => "QS_SCHED_IDLE",
        SchedResume = 54 => "QS_SCHED_RESUME",
        TranHist = 55 => "QS_QEP_TRAN_HIST",
        TranEp = 56 => "QS_QEP_TRAN_EP",
        TranXp = 57 => "QS_QEP_TRAN_XP",
        TestPaused = 58 => "QS_TEST_PAUSED",
        TestProbeGet = 59 => "QS_TEST_PROBE_GET",
        SigDict = 60 => "QS_SIG_DICT",
        ObjDict = 61 => "QS_OBJ_DICT",
        FunDict = 62 => "QS_FUN_DICT",
        UsrDict = 63 => "QS_USR_DICT",
        TargetInfo = 64 => "QS_TARGET_INFO",
        TargetDone = 65 => "QS_TARGET_DONE",
        RxStatus = 66 => "QS_RX_STATUS",
        Reserved67 = 67 => "QS_MSC_RESERVED1",
        PeekData = 68 => "QS_PEEK_DATA",
        AssertFail = 69 => "QS_ASSERT_FAIL",
    }
}

record_enum! {
    /// Packets interpreted by (or produced by) the backend.
    BackendRecord {
        Attach = 128 => "QSPY_ATTACH",
        Detach = 129 => "QSPY_DETACH",
        SaveDict = 130 => "QSPY_SAVE_DICT",
        ScreenOut = 131 => "QSPY_SCREEN_OUT",
        BinOut = 132 => "QSPY_BIN_OUT",
        MatlabOut = 133 => "QSPY_MATLAB_OUT",
        MscgenOut = 134 => "QSPY_MSCGEN_OUT",
        SendEvent = 135 => "QSPY_SEND_EVENT",
        SendLocFilter = 136 => "QSPY_SEND_LOC_FILTER",
        SendCurrObj = 137 => "QSPY_SEND_CURR_OBJ",
        SendCommand = 138 => "QSPY_SEND_COMMAND",
        SendTestProbe = 139 => "QSPY_SEND_TEST_PROBE",
    }
}

/// Kind discriminator carried by every inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// A predefined target trace record.
    Target(TargetRecord),
    /// An application-specific record (`70..=127`).
    User(u8),
    /// A backend control record (`>= 128`).
    Backend(BackendRecord),
}

impl RecordKind {
    /// Classify a raw kind byte. Returns `None` for undefined backend values.
    pub fn from_u8(value: u8) -> Option<Self> {
        if value >= BACKEND_KIND_BASE {
            BackendRecord::from_u8(value).map(RecordKind::Backend)
        } else if value >= FIRST_USER_RECORD {
            Some(RecordKind::User(value))
        } else {
            TargetRecord::from_u8(value).map(RecordKind::Target)
        }
    }

    /// Raw discriminator value.
    pub fn as_u8(self) -> u8 {
        match self {
            RecordKind::Target(record) => record.as_u8(),
            RecordKind::User(value) => value,
            RecordKind::Backend(record) => record.as_u8(),
        }
    }

    /// True for kinds produced by the backend rather than the target.
    pub fn is_backend(self) -> bool {
        matches!(self, RecordKind::Backend(_))
    }

    /// True for the free-form text record the expect engine consumes.
    pub fn is_text(self) -> bool {
        self == RecordKind::Target(TargetRecord::Text)
    }
}

impl From<TargetRecord> for RecordKind {
    fn from(record: TargetRecord) -> Self {
        RecordKind::Target(record)
    }
}

impl From<BackendRecord> for RecordKind {
    fn from(record: BackendRecord) -> Self {
        RecordKind::Backend(record)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Target(record) => f.write_str(record.name()),
            RecordKind::User(value) => match value.checked_sub(FIRST_USER_RECORD) {
                Some(offset) => write!(f, "QS_USER+{offset}"),
                None => write!(f, "QS_USER({value})"),
            },
            RecordKind::Backend(record) => f.write_str(record.name()),
        }
    }
}
