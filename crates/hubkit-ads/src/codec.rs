//! Binary codec for PLC values
//!
//! Every PLC type has a fixed little-endian layout:
//!
//! | Type                                | Layout            |
//! |-------------------------------------|-------------------|
//! | BOOL                                | 1 byte, non-zero  |
//! | BYTE, USINT / SINT                  | u8 / i8           |
//! | INT / UINT, WORD                    | i16 / u16         |
//! | DINT / UDINT, DWORD                 | i32 / u32         |
//! | TIME, DATE, DATE_AND_TIME, TOD      | u32               |
//! | REAL / LREAL                        | f32 / f64         |
//! | STRING                              | bytes up to NUL   |
//!
//! Buffers longer than the type are accepted; only the leading bytes are used.

use crate::types::{AdsType, AdsValue, STRING_SIZE};
use hubkit_core::{Error, Result};
use tracing::warn;

fn take<const N: usize>(ty: AdsType, bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            Error::decode(format!(
                "{} needs {} bytes, got {}",
                ty,
                N,
                bytes.len()
            ))
        })
}

/// Decode a buffer holding a value of `ty`
///
/// # Errors
///
/// `Error::Decode` if the buffer is shorter than the type.
pub fn decode(ty: AdsType, bytes: &[u8]) -> Result<AdsValue> {
    Ok(match ty {
        AdsType::Bool => AdsValue::Bool(take::<1>(ty, bytes)?[0] != 0),
        AdsType::Byte | AdsType::USInt => AdsValue::Int(take::<1>(ty, bytes)?[0] as i64),
        AdsType::SInt => AdsValue::Int(i8::from_le_bytes(take(ty, bytes)?) as i64),
        AdsType::Int => AdsValue::Int(i16::from_le_bytes(take(ty, bytes)?) as i64),
        AdsType::UInt | AdsType::Word => AdsValue::Int(u16::from_le_bytes(take(ty, bytes)?) as i64),
        AdsType::DInt => AdsValue::Int(i32::from_le_bytes(take(ty, bytes)?) as i64),
        AdsType::UDInt
        | AdsType::DWord
        | AdsType::Time
        | AdsType::Date
        | AdsType::DateAndTime
        | AdsType::Tod => AdsValue::Int(u32::from_le_bytes(take(ty, bytes)?) as i64),
        AdsType::Real => AdsValue::Float(f32::from_le_bytes(take(ty, bytes)?) as f64),
        AdsType::LReal => AdsValue::Float(f64::from_le_bytes(take(ty, bytes)?)),
        AdsType::String => {
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            AdsValue::Text(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
    })
}

/// Decode a buffer whose type is given as a PLC tag string
///
/// Unknown tags are not an error: the bytes are returned as
/// [`AdsValue::Raw`] and a warning is logged.
pub fn decode_tagged(tag: &str, bytes: &[u8]) -> Result<AdsValue> {
    match tag.parse::<AdsType>() {
        Ok(ty) => decode(ty, bytes),
        Err(_) => {
            warn!("No decoder for PLC type {}; keeping {} raw bytes", tag, bytes.len());
            Ok(AdsValue::Raw(bytes.to_vec()))
        }
    }
}

fn int_in_range(ty: AdsType, value: &AdsValue) -> Result<i64> {
    let n = match value {
        AdsValue::Int(i) => *i,
        AdsValue::Bool(b) => *b as i64,
        AdsValue::Float(f) if f.fract() == 0.0 => *f as i64,
        // Time types arrive from service calls as text
        AdsValue::Text(s) => s.trim().parse::<i64>().map_err(|_| {
            Error::invalid_input(format!("Cannot write {:?} as {}", s, ty))
        })?,
        other => {
            return Err(Error::invalid_input(format!(
                "Cannot write {:?} as {}",
                other, ty
            )));
        }
    };

    if let Some((min, max)) = ty.int_range() {
        if n < min || n > max {
            return Err(Error::invalid_input(format!(
                "Value {} out of range for {} ({}..={})",
                n, ty, min, max
            )));
        }
    }
    Ok(n)
}

/// Encode a value as `ty`
///
/// # Errors
///
/// `Error::InvalidInput` if the value does not fit the type (wrong kind,
/// integer out of range, string longer than 80 bytes).
pub fn encode(ty: AdsType, value: &AdsValue) -> Result<Vec<u8>> {
    Ok(match ty {
        AdsType::Bool => {
            let b = value.as_bool().ok_or_else(|| {
                Error::invalid_input(format!("Cannot write {:?} as BOOL", value))
            })?;
            vec![b as u8]
        }
        AdsType::Byte | AdsType::USInt => vec![int_in_range(ty, value)? as u8],
        AdsType::SInt => (int_in_range(ty, value)? as i8).to_le_bytes().to_vec(),
        AdsType::Int => (int_in_range(ty, value)? as i16).to_le_bytes().to_vec(),
        AdsType::UInt | AdsType::Word => (int_in_range(ty, value)? as u16).to_le_bytes().to_vec(),
        AdsType::DInt => (int_in_range(ty, value)? as i32).to_le_bytes().to_vec(),
        AdsType::UDInt
        | AdsType::DWord
        | AdsType::Time
        | AdsType::Date
        | AdsType::DateAndTime
        | AdsType::Tod => (int_in_range(ty, value)? as u32).to_le_bytes().to_vec(),
        AdsType::Real => {
            let f = value.as_f64().ok_or_else(|| {
                Error::invalid_input(format!("Cannot write {:?} as REAL", value))
            })?;
            (f as f32).to_le_bytes().to_vec()
        }
        AdsType::LReal => {
            let f = value.as_f64().ok_or_else(|| {
                Error::invalid_input(format!("Cannot write {:?} as LREAL", value))
            })?;
            f.to_le_bytes().to_vec()
        }
        AdsType::String => {
            let AdsValue::Text(s) = value else {
                return Err(Error::invalid_input(format!(
                    "Cannot write {:?} as STRING",
                    value
                )));
            };
            if s.len() >= STRING_SIZE {
                return Err(Error::invalid_input(format!(
                    "String of {} bytes does not fit STRING({})",
                    s.len(),
                    STRING_SIZE - 1
                )));
            }
            let mut buf = vec![0u8; STRING_SIZE];
            buf[..s.len()].copy_from_slice(s.as_bytes());
            buf
        }
    })
}
