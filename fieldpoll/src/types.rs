use std::str::FromStr;
use std::time::SystemTime;

use crate::error::{ConfigError, InvalidRequest};

/// Slave address on a shared link, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

/// Identifier of a logical device in the device model
///
/// Several devices may share one [`UnitId`] and one device may span several task groups.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(String);

/// Start and count tuple describing a contiguous block of registers or bits
///
/// Cannot be constructed with a zero count or a range that overflows the 16-bit address space
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

/// Protocol-level storage category that determines access semantics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum RegisterClass {
    /// single read/write bits
    Coil,
    /// single read-only bits
    DiscreteInput,
    /// read-only 16-bit registers
    InputRegister,
    /// read/write 16-bit registers
    HoldingRegister,
}

/// Wire type of a point value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase"))]
pub enum RawType {
    /// a single bit or a non-zero register
    Bool,
    /// unsigned 16-bit integer
    Uint16,
    /// signed 16-bit integer
    Int16,
    /// unsigned 32-bit integer
    Uint32,
    /// signed 32-bit integer
    Int32,
    /// IEEE-754 single precision
    Float32,
    /// unsigned 64-bit integer
    Uint64,
    /// signed 64-bit integer
    Int64,
    /// IEEE-754 double precision
    Float64,
    /// text stored in the given number of registers, two bytes per register
    String(u16),
}

/// Access mode of a point
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum Access {
    /// polled, never written
    #[cfg_attr(feature = "serialization", serde(rename = "R"))]
    Read,
    /// written on demand, never polled
    #[cfg_attr(feature = "serialization", serde(rename = "W"))]
    Write,
    /// polled and writable
    #[cfg_attr(feature = "serialization", serde(rename = "RW"))]
    ReadWrite,
}

/// Typed value of a point, decoded once at the codec boundary
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(untagged))]
pub enum PointValue {
    /// boolean value
    Bool(bool),
    /// any integer value
    Int(i64),
    /// any floating point value, including scaled values
    Float(f64),
    /// text
    Text(String),
    /// bytes that are not valid text
    Bytes(Vec<u8>),
}

/// A decoded point value as it is forwarded downstream
#[derive(Clone, Debug, PartialEq)]
pub struct PointSample {
    /// device the point belongs to
    pub device: DeviceId,
    /// name of the point
    pub point: String,
    /// decoded value
    pub value: PointValue,
    /// declared wire type the value was decoded from
    pub raw_type: RawType,
    /// time at which the value was decoded
    pub timestamp: SystemTime,
}

/// Values carried on the wire for a contiguous block of addresses
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterValues {
    /// coil or discrete input states
    Bits(Vec<bool>),
    /// 16-bit register values
    Words(Vec<u16>),
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

impl DeviceId {
    /// Create a new device id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AddressRange {
    /// Create a new address range
    pub fn try_from(start: u16, count: u16) -> Result<Self, InvalidRequest> {
        if count == 0 {
            return Err(InvalidRequest::CountOfZero);
        }

        let max_start = u16::MAX - (count - 1);

        if start > max_start {
            return Err(InvalidRequest::AddressOverflow(start, count));
        }

        Ok(Self { start, count })
    }

    /// One past the last address of the range
    pub fn end(self) -> u32 {
        self.start as u32 + self.count as u32
    }

    /// Number of addresses covered by the smallest range that contains both ranges
    pub fn union_span(self, other: AddressRange) -> u32 {
        let start = std::cmp::min(self.start, other.start) as u32;
        let end = std::cmp::max(self.end(), other.end());
        end - start
    }

    /// Smallest range that contains both ranges
    pub(crate) fn union(self, other: AddressRange) -> AddressRange {
        let start = std::cmp::min(self.start, other.start);
        AddressRange {
            start,
            count: self.union_span(other) as u16,
        }
    }

    /// True if the two ranges share at least one address
    pub fn overlaps(self, other: AddressRange) -> bool {
        (self.start as u32) < other.end() && (other.start as u32) < self.end()
    }

    /// Converts to std::ops::Range
    pub fn to_std_range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        let end = start + (self.count as usize);
        start..end
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

impl RegisterClass {
    /// True for coils and discrete inputs
    pub fn is_bit(self) -> bool {
        match self {
            RegisterClass::Coil | RegisterClass::DiscreteInput => true,
            RegisterClass::InputRegister | RegisterClass::HoldingRegister => false,
        }
    }

    /// True for the classes that accept writes
    pub fn is_writable(self) -> bool {
        match self {
            RegisterClass::Coil | RegisterClass::HoldingRegister => true,
            RegisterClass::DiscreteInput | RegisterClass::InputRegister => false,
        }
    }

    /// Configuration name of the class
    pub fn name(self) -> &'static str {
        match self {
            RegisterClass::Coil => "COIL",
            RegisterClass::DiscreteInput => "DISCRETE_INPUT",
            RegisterClass::InputRegister => "INPUT_REGISTER",
            RegisterClass::HoldingRegister => "HOLDING_REGISTER",
        }
    }
}

impl std::fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegisterClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COIL" => Ok(RegisterClass::Coil),
            "DISCRETE_INPUT" => Ok(RegisterClass::DiscreteInput),
            "INPUT_REGISTER" => Ok(RegisterClass::InputRegister),
            "HOLDING_REGISTER" => Ok(RegisterClass::HoldingRegister),
            _ => Err(ConfigError::UnknownRegisterClass(s.to_string())),
        }
    }
}

impl RawType {
    /// Number of 16-bit registers occupied by a value of this type
    pub fn registers(self) -> u16 {
        match self {
            RawType::Bool | RawType::Uint16 | RawType::Int16 => 1,
            RawType::Uint32 | RawType::Int32 | RawType::Float32 => 2,
            RawType::Uint64 | RawType::Int64 | RawType::Float64 => 4,
            RawType::String(registers) => registers,
        }
    }

    /// True for the 16-bit types that support bit fields
    pub fn is_16_bit(self) -> bool {
        matches!(self, RawType::Uint16 | RawType::Int16)
    }

    /// Parse a raw type name, using `string_registers` for `string` (a missing value means 1)
    pub fn parse(name: &str, string_registers: Option<u16>) -> Result<Self, ConfigError> {
        let raw = match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => RawType::Bool,
            "uint16" => RawType::Uint16,
            "int16" => RawType::Int16,
            "uint32" => RawType::Uint32,
            "int32" => RawType::Int32,
            "float32" | "float" => RawType::Float32,
            "uint64" => RawType::Uint64,
            "int64" => RawType::Int64,
            "float64" | "double" => RawType::Float64,
            "string" => match string_registers {
                None | Some(0) => RawType::String(1),
                Some(x) => RawType::String(x),
            },
            _ => return Err(ConfigError::UnsupportedRawType(name.to_string())),
        };
        Ok(raw)
    }
}

impl std::fmt::Display for RawType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawType::Bool => f.write_str("bool"),
            RawType::Uint16 => f.write_str("uint16"),
            RawType::Int16 => f.write_str("int16"),
            RawType::Uint32 => f.write_str("uint32"),
            RawType::Int32 => f.write_str("int32"),
            RawType::Float32 => f.write_str("float32"),
            RawType::Uint64 => f.write_str("uint64"),
            RawType::Int64 => f.write_str("int64"),
            RawType::Float64 => f.write_str("float64"),
            RawType::String(registers) => write!(f, "string({registers})"),
        }
    }
}

impl Access {
    /// True if the point participates in automatic polling
    pub fn is_readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    /// True if the point accepts writes
    pub fn is_writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

impl Default for Access {
    fn default() -> Self {
        Access::ReadWrite
    }
}

impl FromStr for Access {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R" => Ok(Access::Read),
            "W" => Ok(Access::Write),
            "RW" => Ok(Access::ReadWrite),
            _ => Err(ConfigError::UnknownAccess(s.to_string())),
        }
    }
}

impl PointValue {
    /// Name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            PointValue::Bool(_) => "bool",
            PointValue::Int(_) => "int",
            PointValue::Float(_) => "float",
            PointValue::Text(_) => "text",
            PointValue::Bytes(_) => "bytes",
        }
    }
}

impl std::fmt::Display for PointValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointValue::Bool(x) => write!(f, "{x}"),
            PointValue::Int(x) => write!(f, "{x}"),
            PointValue::Float(x) => write!(f, "{x}"),
            PointValue::Text(x) => write!(f, "\"{x}\""),
            PointValue::Bytes(x) => {
                for (i, byte) in x.iter().enumerate() {
                    if i != 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
        }
    }
}

impl RegisterValues {
    /// Number of addresses covered by the values
    pub fn len(&self) -> usize {
        match self {
            RegisterValues::Bits(x) => x.len(),
            RegisterValues::Words(x) => x.len(),
        }
    }

    /// True if there are no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
