//! Typed value conversion between domain types and [`WireValue`].
//!
//! Every channel is typed at the Rust level; the wire carries untyped record
//! values. `EpicsCodec` is the seam between the two. Decoding is fallible
//! (`EpicsError::Conversion`); encoding is total because the typed side
//! already constrains the value space.

use crate::error::{EpicsError, EpicsResult};
use crate::transport::WireValue;

/// Encode/decode pair mapping a typed value to its wire representation.
pub trait EpicsCodec:
    Sized + Clone + Send + Sync + std::fmt::Debug + PartialEq + 'static
{
    /// Encode into the wire representation used by the channel's record type.
    fn encode(&self) -> WireValue;

    /// Decode from a wire value read off the channel.
    fn decode(value: &WireValue) -> EpicsResult<Self>;
}

impl EpicsCodec for f64 {
    fn encode(&self) -> WireValue {
        WireValue::Double(*self)
    }

    fn decode(value: &WireValue) -> EpicsResult<Self> {
        match value {
            WireValue::Double(v) => Ok(*v),
            WireValue::Int(v) => Ok(f64::from(*v)),
            WireValue::Str(s) => s
                .parse()
                .map_err(|_| EpicsError::Conversion(format!("not a double: {s:?}"))),
            WireValue::Enum(v) => Ok(f64::from(*v)),
        }
    }
}

impl EpicsCodec for i32 {
    fn encode(&self) -> WireValue {
        WireValue::Int(*self)
    }

    fn decode(value: &WireValue) -> EpicsResult<Self> {
        match value {
            WireValue::Int(v) => Ok(*v),
            WireValue::Enum(v) => Ok(i32::from(*v)),
            WireValue::Str(s) => s
                .parse()
                .map_err(|_| EpicsError::Conversion(format!("not an integer: {s:?}"))),
            WireValue::Double(v) => Err(EpicsError::Conversion(format!(
                "refusing lossy double-to-int conversion of {v}"
            ))),
        }
    }
}

impl EpicsCodec for String {
    fn encode(&self) -> WireValue {
        WireValue::Str(self.clone())
    }

    fn decode(value: &WireValue) -> EpicsResult<Self> {
        Ok(value.to_string())
    }
}

/// Binary-record convention: index 0 = Off, 1 = On; string records carry the
/// state name.
impl EpicsCodec for bool {
    fn encode(&self) -> WireValue {
        WireValue::Enum(u16::from(*self))
    }

    fn decode(value: &WireValue) -> EpicsResult<Self> {
        match value {
            WireValue::Enum(v) => Ok(*v != 0),
            WireValue::Int(v) => Ok(*v != 0),
            WireValue::Str(s) => match s.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => Ok(true),
                "off" | "false" | "0" => Ok(false),
                other => Err(EpicsError::Conversion(format!(
                    "not a binary state: {other:?}"
                ))),
            },
            WireValue::Double(v) => {
                Err(EpicsError::Conversion(format!("not a binary state: {v}")))
            }
        }
    }
}

/// On/off state of a binary guide record.
///
/// Written as the state name string, the convention the telescope control
/// database uses for guide enable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOnOff {
    /// Record off.
    Off,
    /// Record on.
    On,
}

impl BinaryOnOff {
    /// State name as written to the record.
    pub fn as_token(self) -> &'static str {
        match self {
            BinaryOnOff::Off => "Off",
            BinaryOnOff::On => "On",
        }
    }

    /// Build from a plain flag.
    pub fn from_bool(on: bool) -> Self {
        if on {
            BinaryOnOff::On
        } else {
            BinaryOnOff::Off
        }
    }
}

impl std::fmt::Display for BinaryOnOff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

impl EpicsCodec for BinaryOnOff {
    fn encode(&self) -> WireValue {
        WireValue::Str(self.as_token().to_string())
    }

    fn decode(value: &WireValue) -> EpicsResult<Self> {
        bool::decode(value).map(BinaryOnOff::from_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_decodes_from_numeric_and_string() {
        assert_eq!(f64::decode(&WireValue::Double(123.456)).unwrap(), 123.456);
        assert_eq!(f64::decode(&WireValue::Int(7)).unwrap(), 7.0);
        assert_eq!(f64::decode(&WireValue::Str("1.5".into())).unwrap(), 1.5);
        assert!(f64::decode(&WireValue::Str("angle".into())).is_err());
    }

    #[test]
    fn int_refuses_lossy_double() {
        assert!(i32::decode(&WireValue::Double(1.5)).is_err());
        assert_eq!(i32::decode(&WireValue::Enum(4)).unwrap(), 4);
    }

    #[test]
    fn binary_on_off_round_trips_state_names() {
        assert_eq!(
            BinaryOnOff::On.encode(),
            WireValue::Str("On".into())
        );
        assert_eq!(
            BinaryOnOff::decode(&WireValue::Str("off".into())).unwrap(),
            BinaryOnOff::Off
        );
        assert_eq!(
            BinaryOnOff::decode(&WireValue::Enum(1)).unwrap(),
            BinaryOnOff::On
        );
        assert!(BinaryOnOff::decode(&WireValue::Str("maybe".into())).is_err());
    }
}
