use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{Access, AddressRange, DeviceId, RawType, RegisterClass, UnitId};

/// Polling period used when a point doesn't configure one
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Sub-register field of a 16-bit register
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct BitField {
    /// index of the least significant bit of the field
    pub offset: u8,
    /// number of bits in the field
    pub length: u8,
}

/// One logical value on a device
///
/// The number of registers a point occupies is not stored. It is derived from the
/// register class and the raw type by [`PointSpec::quantity`].
#[derive(Clone, Debug, PartialEq)]
pub struct PointSpec {
    /// device the point belongs to
    pub device: DeviceId,
    /// name of the point, unique per device
    pub name: String,
    /// slave address of the device on the link
    pub unit: UnitId,
    /// storage category
    pub class: RegisterClass,
    /// 0-based protocol address of the first register or bit
    pub address: u16,
    /// wire type
    pub raw_type: RawType,
    /// swap the two bytes inside every register
    pub byte_swap: bool,
    /// reverse the register order of multi-register values
    pub word_swap: bool,
    /// optional sub-register field
    pub bits: Option<BitField>,
    /// optional divisor applied after decoding
    pub scale: Option<f64>,
    /// polling period
    pub period: Duration,
    /// access mode
    pub access: Access,
}

/// Textual per-point configuration as handed in by the configuration loader
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase", default))]
pub struct PointConfig {
    /// device the point belongs to
    pub device_id: String,
    /// point name
    pub name: String,
    /// slave address of the device
    pub unit_id: u8,
    /// `0x` hex, `d`-suffixed decimal, 5-digit Modbus notation or plain decimal
    pub start_address: StartAddress,
    /// `COIL`, `DISCRETE_INPUT`, `INPUT_REGISTER` or `HOLDING_REGISTER`
    #[cfg_attr(feature = "serialization", serde(alias = "registerType"))]
    pub register_class: String,
    /// raw type name, e.g. `uint16` or `float32`
    pub raw_type: String,
    /// register count of `string` points, ignored for other types
    pub quantity: Option<u16>,
    /// first bit of a sub-register field
    pub bit: Option<u8>,
    /// length of a sub-register field, 0 or missing means no field
    pub bit_len: Option<u8>,
    /// swap bytes inside registers
    pub byte_swap: bool,
    /// reverse register order
    pub word_swap: bool,
    /// divisor applied after decoding
    pub scale: Option<f64>,
    /// polling period text, e.g. `500ms` or `1m30s`
    pub duration: Option<String>,
    /// `R`, `W` or `RW`, missing means `RW`
    pub access: Option<String>,
}

/// Start address as it appears in configuration, either a number or text
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(untagged))]
pub enum StartAddress {
    /// numeric address, taken as is
    Number(u16),
    /// textual address, see [`parse_address`]
    Text(String),
}

impl Default for StartAddress {
    fn default() -> Self {
        StartAddress::Text(String::new())
    }
}

impl From<&str> for StartAddress {
    fn from(value: &str) -> Self {
        StartAddress::Text(value.to_string())
    }
}

impl From<u16> for StartAddress {
    fn from(value: u16) -> Self {
        StartAddress::Number(value)
    }
}

impl PointSpec {
    /// Create a read/write point with no swaps, no bit field, no scale and the default period
    pub fn new(
        device: impl Into<DeviceId>,
        name: impl Into<String>,
        unit: UnitId,
        class: RegisterClass,
        address: u16,
        raw_type: RawType,
    ) -> Self {
        Self {
            device: device.into(),
            name: name.into(),
            unit,
            class,
            address,
            raw_type,
            byte_swap: false,
            word_swap: false,
            bits: None,
            scale: None,
            period: DEFAULT_POLL_PERIOD,
            access: Access::ReadWrite,
        }
    }

    /// Set the polling period
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the access mode
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Set a sub-register bit field
    pub fn with_bits(mut self, offset: u8, length: u8) -> Self {
        self.bits = Some(BitField { offset, length });
        self
    }

    /// Set the decode divisor
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set the byte and word swap flags
    pub fn with_swaps(mut self, byte_swap: bool, word_swap: bool) -> Self {
        self.byte_swap = byte_swap;
        self.word_swap = word_swap;
        self
    }

    /// Number of registers (or bits) the point occupies
    pub fn quantity(&self) -> u16 {
        if self.class.is_bit() {
            1
        } else {
            self.raw_type.registers()
        }
    }

    /// Address range occupied by the point
    pub fn range(&self) -> Result<AddressRange, ConfigError> {
        AddressRange::try_from(self.address, self.quantity()).map_err(|_| {
            ConfigError::BadQuantity {
                start: self.address,
                quantity: self.quantity() as u32,
            }
        })
    }

    /// Check the invariants that cannot be expressed in the field types
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.as_str().is_empty() || self.name.is_empty() {
            return Err(ConfigError::MissingName);
        }

        if self.class.is_bit() && matches!(self.raw_type, RawType::String(_)) {
            return Err(ConfigError::RawTypeNotAllowed {
                class: self.class,
                raw_type: self.raw_type,
            });
        }

        self.range()?;

        if let Some(bits) = self.bits {
            let fits = bits.length > 0 && (bits.offset as u16 + bits.length as u16) <= 16;
            if self.class.is_bit() || !self.raw_type.is_16_bit() || !fits {
                return Err(ConfigError::BadBitField {
                    offset: bits.offset,
                    length: bits.length,
                    raw_type: self.raw_type,
                });
            }
        }

        if let Some(scale) = self.scale {
            if !scale.is_finite() || scale == 0.0 {
                return Err(ConfigError::BadScale);
            }
        }

        if self.period.is_zero() {
            return Err(ConfigError::BadDuration("0s".to_string()));
        }

        Ok(())
    }
}

impl TryFrom<PointConfig> for PointSpec {
    type Error = ConfigError;

    fn try_from(config: PointConfig) -> Result<Self, Self::Error> {
        let address = match &config.start_address {
            StartAddress::Number(x) => *x,
            StartAddress::Text(x) => parse_address(x)?,
        };
        let class: RegisterClass = config.register_class.parse()?;
        let raw_type = RawType::parse(&config.raw_type, config.quantity)?;
        let period = match config.duration.as_deref() {
            None => DEFAULT_POLL_PERIOD,
            Some(text) => parse_duration(text)?,
        };
        let access = match config.access.as_deref() {
            None | Some("") => Access::ReadWrite,
            Some(text) => text.parse()?,
        };
        let bits = match config.bit_len {
            None | Some(0) => None,
            Some(length) => Some(BitField {
                offset: config.bit.unwrap_or(0),
                length,
            }),
        };

        let spec = PointSpec {
            device: DeviceId::new(config.device_id),
            name: config.name,
            unit: UnitId::new(config.unit_id),
            class,
            address,
            raw_type,
            byte_swap: config.byte_swap,
            word_swap: config.word_swap,
            bits,
            scale: config.scale,
            period,
            access,
        };

        spec.validate()?;
        Ok(spec)
    }
}

/// Parse a register address into its 0-based protocol form
///
/// * `0x` prefix: hexadecimal
/// * `d` suffix: decimal
/// * exactly five digits: Modbus notation where `0xxxx`, `1xxxx`, `3xxxx` and `4xxxx`
///   are 1-based offsets into the coil, discrete input, input register and holding
///   register tables. The first and last value of each table (`x0000`, `x9999`+1) are rejected.
/// * anything else: plain decimal
pub fn parse_address(text: &str) -> Result<u16, ConfigError> {
    let text = text.trim();
    let bad = || ConfigError::BadAddress(text.to_string());

    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16).map_err(|_| bad());
    }

    if let Some(decimal) = text.strip_suffix('d') {
        return decimal.parse::<u16>().map_err(|_| bad());
    }

    if text.len() == 5 {
        let value: u32 = text.parse().map_err(|_| bad())?;
        return match value {
            1..=9999 => Ok((value - 1) as u16),
            10001..=19999 => Ok((value - 10001) as u16),
            30001..=39999 => Ok((value - 30001) as u16),
            40001..=49999 => Ok((value - 40001) as u16),
            _ => Err(bad()),
        };
    }

    text.parse::<u16>().map_err(|_| bad())
}

/// Parse a duration such as `500ms`, `1.5s`, `2m` or `1h30m`
///
/// Supported units are `ns`, `us`, `ms`, `s`, `m` and `h`. Every number needs a unit
/// and the total must be positive.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let original = text;
    let bad = || ConfigError::BadDuration(original.to_string());

    let mut rest = text.trim();
    if rest.is_empty() {
        return Err(bad());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(bad)?;
        let number = &rest[..number_len];
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(bad()),
        };
        rest = &rest[unit_len..];

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(bad());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| bad())?
        };
        let mut nanos = whole.checked_mul(unit_nanos).ok_or_else(bad)?;
        let mut scale = unit_nanos;
        for digit in fraction.chars() {
            let digit = digit.to_digit(10).ok_or_else(bad)? as u128;
            scale /= 10;
            nanos += digit * scale;
        }
        total = total.checked_add(nanos).ok_or_else(bad)?;
    }

    let total = u64::try_from(total).map_err(|_| bad())?;
    let total = Duration::from_nanos(total);

    if total.is_zero() {
        return Err(bad());
    }

    Ok(total)
}

/// Two points on the same unit and register class whose address ranges overlap
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Overlap {
    /// index of the first point
    pub first: usize,
    /// index of the second point
    pub second: usize,
}

/// Find points that decode overlapping registers
///
/// Bit-field views of the same 16-bit register with disjoint fields are not reported,
/// they are the normal way to map several flags onto one register.
pub fn find_overlaps(points: &[PointSpec]) -> Vec<Overlap> {
    let mut overlaps = Vec::new();
    for (first, a) in points.iter().enumerate() {
        let Ok(range_a) = a.range() else { continue };
        for (offset, b) in points[first + 1..].iter().enumerate() {
            if a.unit != b.unit || a.class != b.class {
                continue;
            }
            let Ok(range_b) = b.range() else { continue };
            if !range_a.overlaps(range_b) || disjoint_bit_fields(a, b) {
                continue;
            }
            overlaps.push(Overlap {
                first,
                second: first + 1 + offset,
            });
        }
    }
    overlaps
}

fn disjoint_bit_fields(a: &PointSpec, b: &PointSpec) -> bool {
    match (a.bits, b.bits) {
        (Some(x), Some(y)) if a.address == b.address => {
            let x_end = x.offset as u16 + x.length as u16;
            let y_end = y.offset as u16 + y.length as u16;
            x_end <= y.offset as u16 || y_end <= x.offset as u16
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(name: &str, address: u16, raw_type: RawType) -> PointSpec {
        PointSpec::new(
            "dev",
            name,
            UnitId::new(1),
            RegisterClass::HoldingRegister,
            address,
            raw_type,
        )
    }

    #[test]
    fn parses_hex_addresses() {
        assert_eq!(parse_address("0x10"), Ok(16));
        assert_eq!(parse_address("0xFFFF"), Ok(u16::MAX));
        assert!(parse_address("0x10000").is_err());
        assert!(parse_address("0xZZ").is_err());
    }

    #[test]
    fn parses_decimal_suffix_addresses() {
        assert_eq!(parse_address("40001d"), Ok(40001));
        assert!(parse_address("70000d").is_err());
    }

    #[test]
    fn parses_five_digit_modbus_notation() {
        assert_eq!(parse_address("00001"), Ok(0));
        assert_eq!(parse_address("10001"), Ok(0));
        assert_eq!(parse_address("30010"), Ok(9));
        assert_eq!(parse_address("40001"), Ok(0));
        assert_eq!(parse_address("49999"), Ok(9998));
    }

    #[test]
    fn rejects_five_digit_table_boundaries() {
        for text in ["00000", "10000", "20001", "30000", "40000", "50000", "65535"] {
            assert_eq!(
                parse_address(text),
                Err(ConfigError::BadAddress(text.to_string())),
                "{text}"
            );
        }
    }

    #[test]
    fn parses_plain_decimal_addresses() {
        assert_eq!(parse_address("0"), Ok(0));
        assert_eq!(parse_address("1234"), Ok(1234));
        assert_eq!(parse_address("123456"), Err(ConfigError::BadAddress("123456".into())));
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("1s"), Ok(Duration::from_secs(1)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_bad_durations() {
        for text in ["", "10", "s", "1x", "0s", "-1s"] {
            assert!(parse_duration(text).is_err(), "{text}");
        }
    }

    #[test]
    fn quantity_follows_raw_type_width() {
        assert_eq!(holding("a", 0, RawType::Int16).quantity(), 1);
        assert_eq!(holding("a", 0, RawType::Float32).quantity(), 2);
        assert_eq!(holding("a", 0, RawType::Float64).quantity(), 4);
        assert_eq!(holding("a", 0, RawType::String(6)).quantity(), 6);

        let coil = PointSpec::new(
            "dev",
            "c",
            UnitId::new(1),
            RegisterClass::Coil,
            3,
            RawType::Uint16,
        );
        assert_eq!(coil.quantity(), 1);
    }

    #[test]
    fn point_config_is_converted() {
        let config = PointConfig {
            device_id: "meter-1".to_string(),
            name: "voltage".to_string(),
            unit_id: 3,
            start_address: "40011".into(),
            register_class: "HOLDING_REGISTER".to_string(),
            raw_type: "FLOAT32".to_string(),
            word_swap: true,
            scale: Some(10.0),
            duration: Some("5s".to_string()),
            access: Some("R".to_string()),
            ..Default::default()
        };

        let spec = PointSpec::try_from(config).unwrap();
        assert_eq!(spec.device, DeviceId::new("meter-1"));
        assert_eq!(spec.unit, UnitId::new(3));
        assert_eq!(spec.address, 10);
        assert_eq!(spec.raw_type, RawType::Float32);
        assert_eq!(spec.quantity(), 2);
        assert_eq!(spec.period, Duration::from_secs(5));
        assert_eq!(spec.access, Access::Read);
        assert!(spec.word_swap);
        assert_eq!(spec.scale, Some(10.0));
    }

    #[test]
    fn point_config_defaults_period_and_access() {
        let config = PointConfig {
            device_id: "d".to_string(),
            name: "p".to_string(),
            start_address: 7.into(),
            register_class: "coil".to_string(),
            raw_type: "bool".to_string(),
            ..Default::default()
        };

        let spec = PointSpec::try_from(config).unwrap();
        assert_eq!(spec.period, DEFAULT_POLL_PERIOD);
        assert_eq!(spec.access, Access::ReadWrite);
        assert_eq!(spec.address, 7);
    }

    #[test]
    fn point_config_reports_unknown_register_class() {
        let config = PointConfig {
            device_id: "d".to_string(),
            name: "p".to_string(),
            start_address: 0.into(),
            register_class: "FIFO".to_string(),
            raw_type: "uint16".to_string(),
            ..Default::default()
        };
        assert_eq!(
            PointSpec::try_from(config),
            Err(ConfigError::UnknownRegisterClass("FIFO".to_string()))
        );
    }

    #[test]
    fn bit_fields_require_16_bit_registers() {
        assert!(holding("a", 0, RawType::Uint16).with_bits(4, 4).validate().is_ok());
        assert!(holding("a", 0, RawType::Uint16).with_bits(12, 5).validate().is_err());
        assert!(holding("a", 0, RawType::Uint16).with_bits(0, 0).validate().is_err());
        assert!(holding("a", 0, RawType::Uint32).with_bits(0, 1).validate().is_err());
    }

    #[test]
    fn range_must_fit_address_space() {
        assert_eq!(
            holding("a", u16::MAX, RawType::Uint32).validate(),
            Err(ConfigError::BadQuantity {
                start: u16::MAX,
                quantity: 2
            })
        );
        assert!(holding("a", u16::MAX, RawType::Uint16).validate().is_ok());
    }

    #[test]
    fn zero_scale_is_rejected() {
        assert_eq!(
            holding("a", 0, RawType::Uint16).with_scale(0.0).validate(),
            Err(ConfigError::BadScale)
        );
    }

    #[test]
    fn strings_are_not_allowed_on_bits() {
        let spec = PointSpec::new(
            "d",
            "p",
            UnitId::new(1),
            RegisterClass::DiscreteInput,
            0,
            RawType::String(2),
        );
        assert!(matches!(
            spec.validate(),
            Err(ConfigError::RawTypeNotAllowed { .. })
        ));
    }

    #[test]
    fn overlapping_points_are_reported() {
        let points = vec![
            holding("a", 0, RawType::Uint32),
            holding("b", 1, RawType::Uint16),
            holding("c", 2, RawType::Uint16),
        ];
        assert_eq!(find_overlaps(&points), vec![Overlap { first: 0, second: 1 }]);
    }

    #[test]
    fn disjoint_bit_fields_are_not_overlaps() {
        let points = vec![
            holding("lo", 5, RawType::Uint16).with_bits(0, 4),
            holding("hi", 5, RawType::Uint16).with_bits(4, 4),
            holding("mid", 5, RawType::Uint16).with_bits(2, 4),
        ];
        assert_eq!(
            find_overlaps(&points),
            vec![
                Overlap { first: 0, second: 2 },
                Overlap { first: 1, second: 2 },
            ]
        );
    }

    #[test]
    fn different_units_never_overlap() {
        let mut other = holding("b", 0, RawType::Uint16);
        other.unit = UnitId::new(2);
        let points = vec![holding("a", 0, RawType::Uint16), other];
        assert!(find_overlaps(&points).is_empty());
    }
}
