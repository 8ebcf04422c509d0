//! Conversion of service call text into typed PLC values

use crate::types::{AdsType, AdsValue};
use hubkit_core::{Error, Result};

/// Convert the text of a `write_data_by_name` call into a value of `ty`
///
/// BOOL is lenient: `true`, `1` and `yes` (any case, surrounding whitespace
/// ignored) are true, everything else is false. STRING and the time types
/// pass the text through unchanged.
///
/// # Errors
///
/// `Error::InvalidInput` if a numeric type cannot be parsed.
pub fn convert_value(ty: AdsType, text: &str) -> Result<AdsValue> {
    match ty {
        AdsType::Bool => {
            let normalized = text.trim().to_ascii_lowercase();
            Ok(AdsValue::Bool(matches!(
                normalized.as_str(),
                "true" | "1" | "yes"
            )))
        }
        AdsType::Byte
        | AdsType::Int
        | AdsType::UInt
        | AdsType::SInt
        | AdsType::USInt
        | AdsType::DInt
        | AdsType::UDInt
        | AdsType::Word
        | AdsType::DWord => text
            .trim()
            .parse::<i64>()
            .map(AdsValue::Int)
            .map_err(|_| Error::invalid_input(format!("Invalid value for {}: {}", ty, text))),
        AdsType::Real | AdsType::LReal => text
            .trim()
            .parse::<f64>()
            .map(AdsValue::Float)
            .map_err(|_| Error::invalid_input(format!("Invalid value for {}: {}", ty, text))),
        AdsType::String | AdsType::Time | AdsType::Date | AdsType::DateAndTime | AdsType::Tod => {
            Ok(AdsValue::Text(text.to_string()))
        }
    }
}
