//! Register block layout shared by every controller slot.

use std::collections::BTreeMap;
use std::fmt;

use robolink_common::TelemetryRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest holding-register count a single Modbus read may request.
pub const MAX_BLOCK_LEN: u16 = 125;

/// Register map errors.
#[derive(Debug, Error, PartialEq)]
pub enum RegisterMapError {
    #[error("Register map is missing field '{0}'")]
    MissingField(Field),
    #[error("Fields '{first}' and '{second}' share offset {offset}")]
    DuplicateOffset {
        offset: u16,
        first: Field,
        second: Field,
    },
    #[error("Offset {offset} of field '{field}' exceeds the 125-word read limit")]
    OffsetTooLarge { field: Field, offset: u16 },
    #[error("Expected {expected} registers, got {actual}")]
    BlockLength { expected: usize, actual: usize },
    #[error("Field '{field}' cannot hold {value}")]
    OutOfRange { field: Field, value: String },
}

/// Telemetry fields carried by the register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    IsActive,
    Mode,
    CyclesCurrent,
    CyclesTotal,
    Oee,
}

impl Field {
    /// Every field, in standard-map order.
    pub const ALL: [Field; 6] = [
        Field::Name,
        Field::IsActive,
        Field::Mode,
        Field::CyclesCurrent,
        Field::CyclesTotal,
        Field::Oee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::IsActive => "is_active",
            Field::Mode => "mode",
            Field::CyclesCurrent => "cycles_current",
            Field::CyclesTotal => "cycles_total",
            Field::Oee => "oee",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field to word-offset mapping within a device's register block.
///
/// Every field has exactly one offset; the block starts at address 0 and
/// spans up to the highest offset. Unmapped words in between are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegisterOffsets", into = "RegisterOffsets")]
pub struct RegisterMap {
    offsets: [u16; 6],
    len: u16,
}

impl RegisterMap {
    /// The layout every controller ships with: six consecutive words.
    pub fn standard() -> Self {
        Self {
            offsets: [0, 1, 2, 3, 4, 5],
            len: 6,
        }
    }

    /// Build a map from explicit offsets.
    pub fn new(entries: impl IntoIterator<Item = (Field, u16)>) -> Result<Self, RegisterMapError> {
        let mut offsets: [Option<u16>; 6] = [None; 6];
        for (field, offset) in entries {
            if offset >= MAX_BLOCK_LEN {
                return Err(RegisterMapError::OffsetTooLarge { field, offset });
            }
            offsets[field.index()] = Some(offset);
        }

        let mut resolved = [0u16; 6];
        let mut by_offset: BTreeMap<u16, Field> = BTreeMap::new();
        for field in Field::ALL {
            let offset = offsets[field.index()].ok_or(RegisterMapError::MissingField(field))?;
            if let Some(first) = by_offset.insert(offset, field) {
                return Err(RegisterMapError::DuplicateOffset {
                    offset,
                    first,
                    second: field,
                });
            }
            resolved[field.index()] = offset;
        }

        let len = resolved.iter().copied().max().unwrap_or(0) + 1;
        Ok(Self {
            offsets: resolved,
            len,
        })
    }

    /// Number of words to read per device (N).
    pub fn block_len(&self) -> u16 {
        self.len
    }

    /// Word offset of a field.
    pub fn offset(&self, field: Field) -> u16 {
        self.offsets[field.index()]
    }

    fn word(&self, words: &[u16], field: Field) -> u16 {
        words[self.offset(field) as usize]
    }

    /// Decode one device's register block.
    ///
    /// The block must be exactly [`block_len`](Self::block_len) words.
    /// `oee` is the raw word multiplied by `oee_scale`.
    pub fn decode(&self, words: &[u16], oee_scale: f64) -> Result<TelemetryRecord, RegisterMapError> {
        if words.len() != self.len as usize {
            return Err(RegisterMapError::BlockLength {
                expected: self.len as usize,
                actual: words.len(),
            });
        }

        Ok(TelemetryRecord {
            device_name: self.word(words, Field::Name).to_string(),
            is_active: self.word(words, Field::IsActive) != 0,
            mode: self.word(words, Field::Mode),
            cycles_current: u32::from(self.word(words, Field::CyclesCurrent)),
            cycles_total: u32::from(self.word(words, Field::CyclesTotal)),
            oee: f64::from(self.word(words, Field::Oee)) * oee_scale,
        })
    }

    /// Lay a record back out as a register block.
    ///
    /// Inverse of [`decode`](Self::decode) for records decoded from a
    /// canonical block (`is_active` as 0/1, unmapped words zero).
    pub fn encode(&self, record: &TelemetryRecord, oee_scale: f64) -> Result<Vec<u16>, RegisterMapError> {
        let mut words = vec![0u16; self.len as usize];

        let name: u16 = record
            .device_name
            .parse()
            .map_err(|_| RegisterMapError::OutOfRange {
                field: Field::Name,
                value: record.device_name.clone(),
            })?;
        let oee = record.oee / oee_scale;
        if !(0.0..=f64::from(u16::MAX)).contains(&oee) {
            return Err(RegisterMapError::OutOfRange {
                field: Field::Oee,
                value: record.oee.to_string(),
            });
        }

        let narrow = |field: Field, value: u32| {
            u16::try_from(value).map_err(|_| RegisterMapError::OutOfRange {
                field,
                value: value.to_string(),
            })
        };

        let values = [
            (Field::Name, name),
            (Field::IsActive, u16::from(record.is_active)),
            (Field::Mode, record.mode),
            (
                Field::CyclesCurrent,
                narrow(Field::CyclesCurrent, record.cycles_current)?,
            ),
            (
                Field::CyclesTotal,
                narrow(Field::CyclesTotal, record.cycles_total)?,
            ),
            (Field::Oee, oee.round() as u16),
        ];
        for (field, value) in values {
            words[self.offset(field) as usize] = value;
        }
        Ok(words)
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::standard()
    }
}

/// Configuration form of a [`RegisterMap`]: one named offset per field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterOffsets {
    pub name: u16,
    pub is_active: u16,
    pub mode: u16,
    pub cycles_current: u16,
    pub cycles_total: u16,
    pub oee: u16,
}

impl TryFrom<RegisterOffsets> for RegisterMap {
    type Error = RegisterMapError;

    fn try_from(o: RegisterOffsets) -> Result<Self, Self::Error> {
        Self::new([
            (Field::Name, o.name),
            (Field::IsActive, o.is_active),
            (Field::Mode, o.mode),
            (Field::CyclesCurrent, o.cycles_current),
            (Field::CyclesTotal, o.cycles_total),
            (Field::Oee, o.oee),
        ])
    }
}

impl From<RegisterMap> for RegisterOffsets {
    fn from(map: RegisterMap) -> Self {
        Self {
            name: map.offset(Field::Name),
            is_active: map.offset(Field::IsActive),
            mode: map.offset(Field::Mode),
            cycles_current: map.offset(Field::CyclesCurrent),
            cycles_total: map.offset(Field::CyclesTotal),
            oee: map.offset(Field::Oee),
        }
    }
}
