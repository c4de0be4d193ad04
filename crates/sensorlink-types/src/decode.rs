//! Decoding of instrument payloads into scalar values.
//!
//! Instruments publish a single number per notification. The layout varies
//! by vendor, so the format is part of the sensor configuration rather than
//! hard-coded per device.

use core::fmt;
use core::str::FromStr;

use bytes::Buf;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Binary layout of a scalar payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum PayloadFormat {
    U8,
    I8,
    #[default]
    U16Le,
    I16Le,
    U16Be,
    I16Be,
    U32Le,
    I32Le,
    F32Le,
    F32Be,
    /// Decimal number as ASCII text, e.g. `b"21.75"`.
    Ascii,
}

impl PayloadFormat {
    /// Number of bytes consumed, or `None` for variable-length formats.
    pub fn width(&self) -> Option<usize> {
        match self {
            PayloadFormat::U8 | PayloadFormat::I8 => Some(1),
            PayloadFormat::U16Le
            | PayloadFormat::I16Le
            | PayloadFormat::U16Be
            | PayloadFormat::I16Be => Some(2),
            PayloadFormat::U32Le
            | PayloadFormat::I32Le
            | PayloadFormat::F32Le
            | PayloadFormat::F32Be => Some(4),
            PayloadFormat::Ascii => None,
        }
    }

    /// Decode the leading value of `data`.
    ///
    /// Trailing bytes beyond the format width are ignored.
    ///
    /// ```
    /// use sensorlink_types::PayloadFormat;
    ///
    /// assert_eq!(PayloadFormat::U16Le.decode(&[0x20, 0x03]).unwrap(), 800.0);
    /// assert_eq!(PayloadFormat::I8.decode(&[0xFF]).unwrap(), -1.0);
    /// ```
    pub fn decode(&self, data: &[u8]) -> ParseResult<f64> {
        if let Some(width) = self.width()
            && data.len() < width
        {
            return Err(ParseError::InsufficientBytes {
                expected: width,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let value = match self {
            PayloadFormat::U8 => f64::from(buf.get_u8()),
            PayloadFormat::I8 => f64::from(buf.get_i8()),
            PayloadFormat::U16Le => f64::from(buf.get_u16_le()),
            PayloadFormat::I16Le => f64::from(buf.get_i16_le()),
            PayloadFormat::U16Be => f64::from(buf.get_u16()),
            PayloadFormat::I16Be => f64::from(buf.get_i16()),
            PayloadFormat::U32Le => f64::from(buf.get_u32_le()),
            PayloadFormat::I32Le => f64::from(buf.get_i32_le()),
            PayloadFormat::F32Le => f64::from(buf.get_f32_le()),
            PayloadFormat::F32Be => f64::from(buf.get_f32()),
            PayloadFormat::Ascii => parse_ascii(data)?,
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(ParseError::InvalidValue(format!("non-finite value {value}")))
        }
    }
}

fn parse_ascii(data: &[u8]) -> ParseResult<f64> {
    let text = core::str::from_utf8(data)
        .map_err(|e| ParseError::InvalidValue(format!("payload is not UTF-8: {e}")))?;
    let text = text.trim_end_matches('\0').trim();
    if text.is_empty() {
        return Err(ParseError::InsufficientBytes {
            expected: 1,
            actual: 0,
        });
    }
    text.parse::<f64>()
        .map_err(|_| ParseError::InvalidValue(format!("'{text}' is not a number")))
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayloadFormat::U8 => "u8",
            PayloadFormat::I8 => "i8",
            PayloadFormat::U16Le => "u16le",
            PayloadFormat::I16Le => "i16le",
            PayloadFormat::U16Be => "u16be",
            PayloadFormat::I16Be => "i16be",
            PayloadFormat::U32Le => "u32le",
            PayloadFormat::I32Le => "i32le",
            PayloadFormat::F32Le => "f32le",
            PayloadFormat::F32Be => "f32be",
            PayloadFormat::Ascii => "ascii",
        };
        f.write_str(s)
    }
}

impl FromStr for PayloadFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "u8" => Ok(PayloadFormat::U8),
            "i8" => Ok(PayloadFormat::I8),
            "u16le" | "u16" => Ok(PayloadFormat::U16Le),
            "i16le" | "i16" => Ok(PayloadFormat::I16Le),
            "u16be" => Ok(PayloadFormat::U16Be),
            "i16be" => Ok(PayloadFormat::I16Be),
            "u32le" | "u32" => Ok(PayloadFormat::U32Le),
            "i32le" | "i32" => Ok(PayloadFormat::I32Le),
            "f32le" | "f32" => Ok(PayloadFormat::F32Le),
            "f32be" => Ok(PayloadFormat::F32Be),
            "ascii" | "text" => Ok(PayloadFormat::Ascii),
            _ => Err(ParseError::UnknownFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_integers() {
        assert_eq!(PayloadFormat::U8.decode(&[200]).unwrap(), 200.0);
        assert_eq!(PayloadFormat::I16Le.decode(&[0x18, 0xFC]).unwrap(), -1000.0);
        assert_eq!(PayloadFormat::U16Be.decode(&[0x03, 0x20]).unwrap(), 800.0);
        assert_eq!(PayloadFormat::I16Be.decode(&[0xFF, 0xFE]).unwrap(), -2.0);
        assert_eq!(
            PayloadFormat::U32Le.decode(&[0x01, 0x00, 0x01, 0x00]).unwrap(),
            65537.0
        );
        assert_eq!(
            PayloadFormat::I32Le.decode(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            -1.0
        );
    }

    #[test]
    fn test_decode_floats() {
        let le = 21.5f32.to_le_bytes();
        let be = 21.5f32.to_be_bytes();
        assert_eq!(PayloadFormat::F32Le.decode(&le).unwrap(), 21.5);
        assert_eq!(PayloadFormat::F32Be.decode(&be).unwrap(), 21.5);
    }

    #[test]
    fn test_decode_rejects_nan() {
        let nan = f32::NAN.to_le_bytes();
        let err = PayloadFormat::F32Le.decode(&nan).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue(_)));
    }

    #[test]
    fn test_decode_short_payload() {
        let err = PayloadFormat::U32Le.decode(&[1, 2]).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientBytes {
                expected: 4,
                actual: 2
            }
        );
        assert!(err.to_string().contains("requires 4 bytes"));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(PayloadFormat::U8.decode(&[7, 99, 99]).unwrap(), 7.0);
    }

    #[test]
    fn test_decode_ascii() {
        assert_eq!(PayloadFormat::Ascii.decode(b" 21.75\0").unwrap(), 21.75);
        assert!(PayloadFormat::Ascii.decode(b"abc").is_err());
        assert!(matches!(
            PayloadFormat::Ascii.decode(b"\0"),
            Err(ParseError::InsufficientBytes { .. })
        ));
    }

    #[test]
    fn test_format_names_round_trip() {
        for format in [
            PayloadFormat::U8,
            PayloadFormat::I16Le,
            PayloadFormat::F32Be,
            PayloadFormat::Ascii,
        ] {
            assert_eq!(format.to_string().parse::<PayloadFormat>().unwrap(), format);
        }
        assert_eq!("U16_LE".parse::<PayloadFormat>().unwrap(), PayloadFormat::U16Le);
        assert!("u64".parse::<PayloadFormat>().is_err());
    }
}
