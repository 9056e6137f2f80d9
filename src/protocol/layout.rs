//! Target field widths and the target-info record
//!
//! Numeric fields on the wire are little-endian with widths fixed by the
//! target build. The widths configured here must match what the target
//! reports in `QS_TARGET_INFO`; otherwise every later decode misaligns.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DecodeError, EncodeError, TargetRecord};

/// Byte widths of the port-specific numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetLayout {
    /// Signal width.
    pub signal: u8,
    /// Event-size width.
    pub event_size: u8,
    /// Event queue counter width.
    pub queue_ctr: u8,
    /// Time event counter width.
    pub time_evt_ctr: u8,
    /// Memory pool block size width.
    pub pool_blk: u8,
    /// Memory pool counter width.
    pub pool_ctr: u8,
    /// Object pointer width.
    pub obj_ptr: u8,
    /// Function pointer width.
    pub fun_ptr: u8,
    /// Timestamp width.
    pub timestamp: u8,
}

impl Default for TargetLayout {
    fn default() -> Self {
        Self {
            signal: 2,
            event_size: 2,
            queue_ctr: 1,
            time_evt_ctr: 2,
            pool_blk: 2,
            pool_ctr: 2,
            obj_ptr: 4,
            fun_ptr: 4,
            timestamp: 4,
        }
    }
}

impl fmt::Display for TargetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sig={} evt={} eq={} te={} blk={} pool={} obj={} fun={} ts={}",
            self.signal,
            self.event_size,
            self.queue_ctr,
            self.time_evt_ctr,
            self.pool_blk,
            self.pool_ctr,
            self.obj_ptr,
            self.fun_ptr,
            self.timestamp
        )
    }
}

/// Decoded `QS_TARGET_INFO` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    /// True when the record was produced by a target reset.
    pub is_reset: bool,
    /// Framework version reported by the target.
    pub version: u16,
    /// Field widths the target was built with.
    pub layout: TargetLayout,
    /// Maximum number of active objects.
    pub max_active: u8,
    /// Maximum number of event pools.
    pub max_event_pools: u8,
    /// Number of clock tick rates.
    pub max_tick_rates: u8,
    /// Build time as (hour, minute, second).
    pub build_time: (u8, u8, u8),
    /// Build date as (year within century, month, day).
    pub build_date: (u8, u8, u8),
}

const TARGET_INFO_LEN: usize = 16;

impl TargetInfo {
    /// Parse the payload of a target-info frame.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < TARGET_INFO_LEN {
            return Err(DecodeError::Malformed {
                kind: TargetRecord::TargetInfo.as_u8(),
                detail: format!(
                    "target info needs {TARGET_INFO_LEN} bytes, got {}",
                    payload.len()
                ),
            });
        }

        let lo = |b: u8| b & 0x0F;
        let hi = |b: u8| b >> 4;

        let layout = TargetLayout {
            signal: lo(payload[3]),
            event_size: hi(payload[3]),
            queue_ctr: lo(payload[4]),
            time_evt_ctr: hi(payload[4]),
            pool_blk: lo(payload[5]),
            pool_ctr: hi(payload[5]),
            obj_ptr: lo(payload[6]),
            fun_ptr: hi(payload[6]),
            timestamp: payload[7],
        };

        Ok(Self {
            is_reset: payload[0] != 0,
            version: u16::from_le_bytes([payload[1], payload[2]]),
            layout,
            max_active: payload[8],
            max_event_pools: lo(payload[9]),
            max_tick_rates: hi(payload[9]),
            build_time: (payload[12], payload[11], payload[10]),
            build_date: (payload[15], payload[14], payload[13]),
        })
    }

    /// Serialize into the payload layout accepted by [`TargetInfo::parse`].
    pub fn to_payload(&self) -> Vec<u8> {
        let pack = |lo: u8, hi: u8| (lo & 0x0F) | (hi << 4);
        let l = &self.layout;
        let mut buf = Vec::with_capacity(TARGET_INFO_LEN);
        buf.push(u8::from(self.is_reset));
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(pack(l.signal, l.event_size));
        buf.push(pack(l.queue_ctr, l.time_evt_ctr));
        buf.push(pack(l.pool_blk, l.pool_ctr));
        buf.push(pack(l.obj_ptr, l.fun_ptr));
        buf.push(l.timestamp);
        buf.push(self.max_active);
        buf.push(pack(self.max_event_pools, self.max_tick_rates));
        let (hour, minute, second) = self.build_time;
        buf.extend_from_slice(&[second, minute, hour]);
        let (year, month, day) = self.build_date;
        buf.extend_from_slice(&[day, month, year]);
        buf
    }
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self {
            is_reset: true,
            version: 0x0632,
            layout: TargetLayout::default(),
            max_active: 32,
            max_event_pools: 3,
            max_tick_rates: 1,
            build_time: (0, 0, 0),
            build_date: (0, 1, 1),
        }
    }
}

/// Append `value` as a little-endian integer of `width` bytes.
///
/// Values that need more than `width` bytes are rejected, never truncated.
pub(crate) fn put_uint(
    buf: &mut Vec<u8>,
    field: &'static str,
    value: u64,
    width: u8,
) -> Result<(), EncodeError> {
    let bytes = value.to_le_bytes();
    let len = usize::from(width).min(bytes.len());
    if bytes[len..].iter().any(|&b| b != 0) {
        return Err(EncodeError::FieldOverflow {
            field,
            value,
            width,
        });
    }
    buf.extend_from_slice(&bytes[..len]);
    Ok(())
}

/// Read a little-endian integer of `width` bytes from the front of `bytes`.
pub(crate) fn take_uint(bytes: &mut &[u8], width: u8) -> Option<u64> {
    let width = usize::from(width);
    if width > 8 || bytes.len() < width {
        return None;
    }
    let (head, tail) = bytes.split_at(width);
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(head);
    *bytes = tail;
    Some(u64::from_le_bytes(raw))
}
