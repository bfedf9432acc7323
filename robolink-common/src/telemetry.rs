use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Highest unit id addressable on a Modbus network.
pub const MAX_SLOT_ID: u8 = 247;

/// Fieldbus device slot (Modbus unit id, 1-247).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotId(u8);

impl SlotId {
    /// Create a slot id, rejecting the broadcast address and reserved ids.
    pub fn new(id: u8) -> Result<Self> {
        if id == 0 || id > MAX_SLOT_ID {
            return Err(Error::InvalidSlot(format!(
                "{} (must be 1-{})",
                id, MAX_SLOT_ID
            )));
        }
        Ok(Self(id))
    }

    /// Raw unit id.
    pub fn get(self) -> u8 {
        self.0
    }

    /// All slots from 1 up to and including `count`.
    pub fn range(count: u8) -> impl Iterator<Item = SlotId> {
        (1..=count.min(MAX_SLOT_ID)).map(SlotId)
    }
}

impl TryFrom<u8> for SlotId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl From<SlotId> for u8 {
    fn from(slot: SlotId) -> u8 {
        slot.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slave_{}", self.0)
    }
}

impl FromStr for SlotId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id = s
            .strip_prefix("slave_")
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| Error::InvalidSlot(s.to_string()))?;
        Self::new(id)
    }
}

/// Operating mode reported by a machine controller.
///
/// Records keep the raw code; this is only an interpretation for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineMode {
    Running,
    Stopped,
    Fault,
}

impl MachineMode {
    /// Interpret a raw mode code, if it is one of the known codes.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(MachineMode::Running),
            1 => Some(MachineMode::Stopped),
            2 => Some(MachineMode::Fault),
            _ => None,
        }
    }

    /// Raw code for this mode.
    pub fn code(self) -> u16 {
        match self {
            MachineMode::Running => 0,
            MachineMode::Stopped => 1,
            MachineMode::Fault => 2,
        }
    }
}

impl fmt::Display for MachineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineMode::Running => write!(f, "running"),
            MachineMode::Stopped => write!(f, "stopped"),
            MachineMode::Fault => write!(f, "fault"),
        }
    }
}

/// One device's telemetry for one poll cycle.
///
/// `device_name` is the identity key the sink upserts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Device name (unique across the controller network).
    pub device_name: String,

    /// Whether the machine reports itself as switched on.
    pub is_active: bool,

    /// Raw operating mode code.
    pub mode: u16,

    /// Cycles completed in the current session.
    pub cycles_current: u32,

    /// Cycles completed over the machine's lifetime.
    pub cycles_total: u32,

    /// Overall equipment effectiveness.
    pub oee: f64,
}

impl TelemetryRecord {
    /// Interpret the raw mode code.
    pub fn mode_kind(&self) -> Option<MachineMode> {
        MachineMode::from_code(self.mode)
    }
}

/// Records produced by one poll cycle, keyed by slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollBatch {
    records: BTreeMap<SlotId, TelemetryRecord>,
}

impl PollBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot's record, returning any record previously stored for that slot.
    pub fn insert(&mut self, slot: SlotId, record: TelemetryRecord) -> Option<TelemetryRecord> {
        self.records.insert(slot, record)
    }

    /// Record for a slot.
    pub fn get(&self, slot: SlotId) -> Option<&TelemetryRecord> {
        self.records.get(&slot)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cycle produced no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Slots present in the batch, ascending.
    pub fn slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.records.keys().copied()
    }

    /// Iterate over `(slot, record)` pairs in slot order.
    pub fn iter(&self) -> btree_map::Iter<'_, SlotId, TelemetryRecord> {
        self.records.iter()
    }

    /// Device names reported by more than one slot.
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for record in self.records.values() {
            *seen.entry(record.device_name.as_str()).or_default() += 1;
        }
        seen.into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name)
            .collect()
    }
}

impl<'a> IntoIterator for &'a PollBatch {
    type Item = (&'a SlotId, &'a TelemetryRecord);
    type IntoIter = btree_map::Iter<'a, SlotId, TelemetryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> TelemetryRecord {
        TelemetryRecord {
            device_name: name.to_string(),
            is_active: true,
            mode: 0,
            cycles_current: 10,
            cycles_total: 1000,
            oee: 87.0,
        }
    }

    #[test]
    fn test_slot_display_and_parse() {
        let slot = SlotId::new(3).unwrap();
        assert_eq!(slot.to_string(), "slave_3");
        assert_eq!("slave_3".parse::<SlotId>().unwrap(), slot);
        assert!("slave_x".parse::<SlotId>().is_err());
        assert!("3".parse::<SlotId>().is_err());
    }

    #[test]
    fn test_slot_bounds() {
        assert!(SlotId::new(0).is_err());
        assert!(SlotId::new(1).is_ok());
        assert!(SlotId::new(247).is_ok());
        assert!(SlotId::new(248).is_err());
    }

    #[test]
    fn test_slot_range() {
        let slots: Vec<u8> = SlotId::range(3).map(SlotId::get).collect();
        assert_eq!(slots, vec![1, 2, 3]);
        assert_eq!(SlotId::range(0).count(), 0);
    }

    #[test]
    fn test_slot_deserialize_rejects_zero() {
        assert!(serde_json::from_str::<SlotId>("0").is_err());
        assert_eq!(serde_json::from_str::<SlotId>("7").unwrap().get(), 7);
    }

    #[test]
    fn test_machine_mode() {
        assert_eq!(MachineMode::from_code(0), Some(MachineMode::Running));
        assert_eq!(MachineMode::from_code(2), Some(MachineMode::Fault));
        assert_eq!(MachineMode::from_code(9), None);
        assert_eq!(MachineMode::Stopped.code(), 1);
        assert_eq!(MachineMode::Fault.to_string(), "fault");
    }

    #[test]
    fn test_batch_ordering() {
        let mut batch = PollBatch::new();
        batch.insert(SlotId::new(3).unwrap(), record("103"));
        batch.insert(SlotId::new(1).unwrap(), record("101"));

        let keys: Vec<String> = batch.slots().map(|s| s.to_string()).collect();
        assert_eq!(keys, vec!["slave_1", "slave_3"]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_duplicate_names() {
        let mut batch = PollBatch::new();
        batch.insert(SlotId::new(1).unwrap(), record("7"));
        batch.insert(SlotId::new(2).unwrap(), record("7"));
        batch.insert(SlotId::new(3).unwrap(), record("8"));

        assert_eq!(batch.duplicate_names(), vec!["7"]);
    }
}
