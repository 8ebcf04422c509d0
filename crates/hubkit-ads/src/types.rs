//! PLC data types, decoded values and device states

use hubkit_core::traits::EntityValue;
use hubkit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default buffer size of a STRING variable (80 characters plus NUL)
pub const STRING_SIZE: usize = 81;

/// PLC data type tag
///
/// Serialized with the PLC spelling (`BOOL`, `DATE_AND_TIME`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdsType {
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "BYTE")]
    Byte,
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "UINT")]
    UInt,
    #[serde(rename = "SINT")]
    SInt,
    #[serde(rename = "USINT")]
    USInt,
    #[serde(rename = "DINT")]
    DInt,
    #[serde(rename = "UDINT")]
    UDInt,
    #[serde(rename = "WORD")]
    Word,
    #[serde(rename = "DWORD")]
    DWord,
    #[serde(rename = "REAL")]
    Real,
    #[serde(rename = "LREAL")]
    LReal,
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "TIME")]
    Time,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "DATE_AND_TIME")]
    DateAndTime,
    #[serde(rename = "TOD")]
    Tod,
}

impl AdsType {
    /// All known types
    pub const ALL: [AdsType; 17] = [
        AdsType::Bool,
        AdsType::Byte,
        AdsType::Int,
        AdsType::UInt,
        AdsType::SInt,
        AdsType::USInt,
        AdsType::DInt,
        AdsType::UDInt,
        AdsType::Word,
        AdsType::DWord,
        AdsType::Real,
        AdsType::LReal,
        AdsType::String,
        AdsType::Time,
        AdsType::Date,
        AdsType::DateAndTime,
        AdsType::Tod,
    ];

    /// PLC spelling of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            AdsType::Bool => "BOOL",
            AdsType::Byte => "BYTE",
            AdsType::Int => "INT",
            AdsType::UInt => "UINT",
            AdsType::SInt => "SINT",
            AdsType::USInt => "USINT",
            AdsType::DInt => "DINT",
            AdsType::UDInt => "UDINT",
            AdsType::Word => "WORD",
            AdsType::DWord => "DWORD",
            AdsType::Real => "REAL",
            AdsType::LReal => "LREAL",
            AdsType::String => "STRING",
            AdsType::Time => "TIME",
            AdsType::Date => "DATE",
            AdsType::DateAndTime => "DATE_AND_TIME",
            AdsType::Tod => "TOD",
        }
    }

    /// Size in bytes of a value of this type
    pub fn size(&self) -> usize {
        match self {
            AdsType::Bool | AdsType::Byte | AdsType::SInt | AdsType::USInt => 1,
            AdsType::Int | AdsType::UInt | AdsType::Word => 2,
            AdsType::DInt
            | AdsType::UDInt
            | AdsType::DWord
            | AdsType::Real
            | AdsType::Time
            | AdsType::Date
            | AdsType::DateAndTime
            | AdsType::Tod => 4,
            AdsType::LReal => 8,
            AdsType::String => STRING_SIZE,
        }
    }

    /// Whether values of this type decode to integers
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            AdsType::Byte
                | AdsType::Int
                | AdsType::UInt
                | AdsType::SInt
                | AdsType::USInt
                | AdsType::DInt
                | AdsType::UDInt
                | AdsType::Word
                | AdsType::DWord
                | AdsType::Time
                | AdsType::Date
                | AdsType::DateAndTime
                | AdsType::Tod
        )
    }

    /// Inclusive integer range of this type, `None` for non-integers
    pub fn int_range(&self) -> Option<(i64, i64)> {
        Some(match self {
            AdsType::Byte | AdsType::USInt => (0, u8::MAX as i64),
            AdsType::SInt => (i8::MIN as i64, i8::MAX as i64),
            AdsType::Int => (i16::MIN as i64, i16::MAX as i64),
            AdsType::UInt | AdsType::Word => (0, u16::MAX as i64),
            AdsType::DInt => (i32::MIN as i64, i32::MAX as i64),
            AdsType::UDInt
            | AdsType::DWord
            | AdsType::Time
            | AdsType::Date
            | AdsType::DateAndTime
            | AdsType::Tod => (0, u32::MAX as i64),
            _ => return None,
        })
    }
}

impl FromStr for AdsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim();
        AdsType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| Error::invalid_input(format!("Unknown ADS type: {}", s)))
    }
}

impl std::fmt::Display for AdsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded PLC value
#[derive(Debug, Clone, PartialEq)]
pub enum AdsValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Bytes of a type we cannot decode
    Raw(Vec<u8>),
}

impl AdsValue {
    /// Boolean view (non-zero integers are true)
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AdsValue::Bool(b) => Some(*b),
            AdsValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Numeric view
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AdsValue::Int(i) => Some(*i as f64),
            AdsValue::Float(f) => Some(*f),
            AdsValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl From<&AdsValue> for EntityValue {
    fn from(value: &AdsValue) -> Self {
        match value {
            AdsValue::Bool(b) => EntityValue::Bool(*b),
            AdsValue::Int(i) => EntityValue::Int(*i),
            AdsValue::Float(f) => EntityValue::Float(*f),
            AdsValue::Text(s) => EntityValue::Text(s.clone()),
            AdsValue::Raw(_) => EntityValue::Unknown,
        }
    }
}

impl std::fmt::Display for AdsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdsValue::Bool(b) => write!(f, "{}", b),
            AdsValue::Int(i) => write!(f, "{}", i),
            AdsValue::Float(v) => write!(f, "{}", v),
            AdsValue::Text(s) => f.write_str(s),
            AdsValue::Raw(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// ADS device state as reported by ReadState
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsState {
    Invalid = 0,
    Idle = 1,
    Reset = 2,
    Init = 3,
    Start = 4,
    Run = 5,
    Stop = 6,
    SaveConfig = 7,
    LoadConfig = 8,
    PowerFailure = 9,
    PowerGood = 10,
    Error = 11,
    Shutdown = 12,
    Suspend = 13,
    Resume = 14,
    Config = 15,
    Reconfig = 16,
}

impl AdsState {
    /// Map a raw state code; out-of-range codes are `Invalid`
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => AdsState::Idle,
            2 => AdsState::Reset,
            3 => AdsState::Init,
            4 => AdsState::Start,
            5 => AdsState::Run,
            6 => AdsState::Stop,
            7 => AdsState::SaveConfig,
            8 => AdsState::LoadConfig,
            9 => AdsState::PowerFailure,
            10 => AdsState::PowerGood,
            11 => AdsState::Error,
            12 => AdsState::Shutdown,
            13 => AdsState::Suspend,
            14 => AdsState::Resume,
            15 => AdsState::Config,
            16 => AdsState::Reconfig,
            _ => AdsState::Invalid,
        }
    }

    /// Raw state code
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Whether the PLC runtime is running
    pub fn is_running(&self) -> bool {
        *self == AdsState::Run
    }
}

impl std::fmt::Display for AdsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_round_trip_through_str() {
        for ty in AdsType::ALL {
            assert_eq!(ty.as_str().parse::<AdsType>().unwrap(), ty);
        }
        assert_eq!("date_and_time".parse::<AdsType>().unwrap(), AdsType::DateAndTime);
        assert!("STRUCT".parse::<AdsType>().is_err());
    }

    #[test]
    fn test_type_serde_uses_plc_spelling() {
        let json = serde_json::to_string(&AdsType::DateAndTime).unwrap();
        assert_eq!(json, "\"DATE_AND_TIME\"");
        let ty: AdsType = serde_json::from_str("\"LREAL\"").unwrap();
        assert_eq!(ty, AdsType::LReal);
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(AdsState::from_code(5), AdsState::Run);
        assert!(AdsState::from_code(5).is_running());
        assert_eq!(AdsState::from_code(16), AdsState::Reconfig);
        assert_eq!(AdsState::from_code(99), AdsState::Invalid);
        assert_eq!(AdsState::Stop.code(), 6);
    }
}
