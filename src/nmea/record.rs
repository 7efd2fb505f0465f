//! # Record Model
//!
//! The canonical decoded reading plus the device identifier partition.
//!
//! ## Device identifiers
//!
//! One 32-bit namespace is split by acquisition transport so that ids never
//! collide without a registry:
//!
//! | Range | Transport |
//! |---|---|
//! | `[0, 2^16)` | bus-attached (address based) |
//! | `[2^16, 2^17)` | serial / line oriented |
//! | `[2^17, 2^32)` | reserved |
//!
//! Transports assign ids inside their range; the engine does not check it.

use std::collections::BTreeMap;
use std::ops::Range;

use super::protocol::{FIELD_DEVICE_ID, TYPE_MALFORMED};

/// Field name → value map of one reading
pub type FieldMap = BTreeMap<String, f64>;

/// Ids of serial / line oriented devices
pub const SERIAL_DEVICE_IDS: Range<u64> = (1 << 16)..(1 << 17);

/// Device id carried by rollup records (inside the reserved range)
pub const AGGREGATE_DEVICE_ID: u32 = u32::MAX;

/// One decoded observation
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Whole seconds since the epoch (raw) or rollup bucket id (rollup)
    pub timestamp: i64,

    /// Reading type, doubles as the target collection name
    pub kind: String,

    /// Type specific fields, always including `deviceid`
    pub fields: FieldMap,
}

impl Record {
    /// Creates a record with only the synthetic `deviceid` field set
    pub fn new(timestamp: i64, kind: impl Into<String>, device_id: u32) -> Self {
        let mut fields = FieldMap::new();
        fields.insert(FIELD_DEVICE_ID.to_string(), f64::from(device_id));
        Self {
            timestamp,
            kind: kind.into(),
            fields,
        }
    }

    /// Creates a `MALFORMED` record for a failed decode
    pub fn malformed(timestamp: i64, device_id: u32) -> Self {
        Self::new(timestamp, TYPE_MALFORMED, device_id)
    }

    /// Device id carried in the field map
    ///
    /// Values outside `u32` saturate, a missing field reads as 0.
    pub fn device_id(&self) -> u32 {
        self.fields
            .get(FIELD_DEVICE_ID)
            .map(|id| *id as u32)
            .unwrap_or_default()
    }

    /// Inserts or replaces a field
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.fields.insert(name.into(), value);
    }

    /// Looks up a field
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn is_malformed(&self) -> bool {
        self.kind == TYPE_MALFORMED
    }
}
