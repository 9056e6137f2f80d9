//! Global and local trace filters

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use super::{ObjectKind, ObjectRef, RecordKind};

/// Named groups of target records, selectable as a unit in the global filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterGroup {
    /// Every maskable record.
    All,
    /// State machine records.
    Sm,
    /// Active object records.
    Ao,
    /// Framework records (publish, new, gc, tick, critical sections).
    Qf,
    /// Time event records.
    Te,
    /// Raw event queue records.
    Eq,
    /// Memory pool records.
    Mp,
    /// Scheduler records.
    Sc,
    /// User records 70..=79.
    U0,
    /// User records 80..=89.
    U1,
    /// User records 90..=99.
    U2,
    /// User records 100..=109.
    U3,
    /// User records 110..=124.
    U4,
    /// All user records.
    Ua,
}

impl FilterGroup {
    /// Record ranges covered by the group.
    pub fn records(self) -> &'static [RangeInclusive<u8>] {
        const ALL: &[RangeInclusive<u8>] = &[0..=127];
        const SM: &[RangeInclusive<u8>] = &[1..=9, 55..=57];
        const AO: &[RangeInclusive<u8>] = &[10..=18, 45..=45];
        const EQ: &[RangeInclusive<u8>] = &[19..=22, 46..=46];
        const MP: &[RangeInclusive<u8>] = &[24..=25, 47..=47];
        const QF: &[RangeInclusive<u8>] = &[26..=31, 38..=44];
        const TE: &[RangeInclusive<u8>] = &[32..=37];
        const SC: &[RangeInclusive<u8>] = &[48..=54];
        const U0: &[RangeInclusive<u8>] = &[70..=79];
        const U1: &[RangeInclusive<u8>] = &[80..=89];
        const U2: &[RangeInclusive<u8>] = &[90..=99];
        const U3: &[RangeInclusive<u8>] = &[100..=109];
        const U4: &[RangeInclusive<u8>] = &[110..=124];
        const UA: &[RangeInclusive<u8>] = &[70..=124];

        match self {
            FilterGroup::All => ALL,
            FilterGroup::Sm => SM,
            FilterGroup::Ao => AO,
            FilterGroup::Eq => EQ,
            FilterGroup::Mp => MP,
            FilterGroup::Qf => QF,
            FilterGroup::Te => TE,
            FilterGroup::Sc => SC,
            FilterGroup::U0 => U0,
            FilterGroup::U1 => U1,
            FilterGroup::U2 => U2,
            FilterGroup::U3 => U3,
            FilterGroup::U4 => U4,
            FilterGroup::Ua => UA,
        }
    }

    /// Parse a group name as used on the command line (`SM`, `ao`, `ON`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        let group = match name.to_ascii_uppercase().as_str() {
            "ALL" | "ON" => FilterGroup::All,
            "SM" => FilterGroup::Sm,
            "AO" => FilterGroup::Ao,
            "QF" => FilterGroup::Qf,
            "TE" => FilterGroup::Te,
            "EQ" => FilterGroup::Eq,
            "MP" => FilterGroup::Mp,
            "SC" => FilterGroup::Sc,
            "U0" => FilterGroup::U0,
            "U1" => FilterGroup::U1,
            "U2" => FilterGroup::U2,
            "U3" => FilterGroup::U3,
            "U4" => FilterGroup::U4,
            "UA" => FilterGroup::Ua,
            _ => return None,
        };
        Some(group)
    }
}

/// 128-bit mask of forwarded trace records, sent as four 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlobalFilterSet {
    words: [u32; 4],
}

impl GlobalFilterSet {
    /// A filter that forwards nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A filter that forwards every record.
    pub fn all() -> Self {
        Self {
            words: [u32::MAX; 4],
        }
    }

    /// Build directly from the four wire words.
    pub fn from_words(words: [u32; 4]) -> Self {
        Self { words }
    }

    /// The four wire words, lowest record numbers first.
    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    /// Enable every record of `group`.
    pub fn with(mut self, group: FilterGroup) -> Self {
        for range in group.records() {
            for record in range.clone() {
                self.set(record, true);
            }
        }
        self
    }

    /// Disable every record of `group`.
    pub fn without(mut self, group: FilterGroup) -> Self {
        for range in group.records() {
            for record in range.clone() {
                self.set(record, false);
            }
        }
        self
    }

    /// Enable a single record kind. Backend kinds are not filterable and are ignored.
    pub fn with_record(mut self, kind: RecordKind) -> Self {
        if !kind.is_backend() {
            self.set(kind.as_u8(), true);
        }
        self
    }

    /// True if `record` would be forwarded.
    pub fn contains(&self, record: u8) -> bool {
        record < 128 && self.words[usize::from(record / 32)] & (1 << (record % 32)) != 0
    }

    fn set(&mut self, record: u8, on: bool) {
        if record >= 128 {
            return;
        }
        let word = &mut self.words[usize::from(record / 32)];
        let bit = 1u32 << (record % 32);
        if on {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }
}

impl FromIterator<FilterGroup> for GlobalFilterSet {
    fn from_iter<I: IntoIterator<Item = FilterGroup>>(iter: I) -> Self {
        iter.into_iter()
            .fold(GlobalFilterSet::empty(), GlobalFilterSet::with)
    }
}

/// Restricts trace output to a single object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFilter {
    /// Kind of the filtered object.
    pub kind: ObjectKind,
    /// The object, by address or dictionary name.
    pub object: ObjectRef,
}

impl LocalFilter {
    /// Create a local filter for `object`.
    pub fn new(kind: ObjectKind, object: impl Into<ObjectRef>) -> Self {
        Self {
            kind,
            object: object.into(),
        }
    }
}
