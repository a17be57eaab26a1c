use crate::decode::AppDecodeLevel;
use crate::error::{InvalidRequest, ResponseError};
use crate::types::{AddressRange, RegisterClass, RegisterValues, UnitId};

/// Read a contiguous block of bits or registers from one unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    /// slave address
    pub unit: UnitId,
    /// register class to read
    pub class: RegisterClass,
    /// addresses to read
    pub range: AddressRange,
}

/// Write a contiguous block of bits or registers on one unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRequest {
    /// slave address
    pub unit: UnitId,
    /// register class to write, coils or holding registers
    pub class: RegisterClass,
    /// first address written
    pub start: u16,
    /// values written starting at `start`
    pub values: RegisterValues,
}

/// A single link transaction as seen by a [`Transport`](crate::Transport)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// read request
    Read(ReadRequest),
    /// write request
    Write(WriteRequest),
}

/// Reply to a [`Request`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// bits returned by a coil or discrete input read
    Bits(Vec<bool>),
    /// registers returned by an input or holding register read
    Registers(Vec<u16>),
    /// a write was acknowledged
    Written,
}

/// Borrowed wire values of a single point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterSlice<'a> {
    /// bit values
    Bits(&'a [bool]),
    /// register values
    Words(&'a [u16]),
}

impl ReadRequest {
    /// Create a read request
    pub fn new(unit: UnitId, class: RegisterClass, range: AddressRange) -> Self {
        Self { unit, class, range }
    }
}

impl WriteRequest {
    /// Addresses covered by the write
    pub fn range(&self) -> Result<AddressRange, InvalidRequest> {
        let count = u16::try_from(self.values.len())
            .map_err(|_| InvalidRequest::AddressOverflow(self.start, u16::MAX))?;
        AddressRange::try_from(self.start, count)
    }
}

impl Request {
    /// Unit addressed by the request
    pub fn unit(&self) -> UnitId {
        match self {
            Request::Read(x) => x.unit,
            Request::Write(x) => x.unit,
        }
    }

    /// Register class addressed by the request
    pub fn class(&self) -> RegisterClass {
        match self {
            Request::Read(x) => x.class,
            Request::Write(x) => x.class,
        }
    }

    /// Check the request before anything is sent on the link
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        match self {
            Request::Read(_) => Ok(()),
            Request::Write(x) => {
                if x.values.is_empty() {
                    return Err(InvalidRequest::EmptyWrite);
                }
                let kind_matches = match &x.values {
                    RegisterValues::Bits(_) => x.class == RegisterClass::Coil,
                    RegisterValues::Words(_) => x.class == RegisterClass::HoldingRegister,
                };
                if !kind_matches {
                    return Err(InvalidRequest::UnsupportedClass(x.class));
                }
                x.range()?;
                Ok(())
            }
        }
    }

    pub(crate) fn display(&self, level: AppDecodeLevel) -> RequestDisplay<'_> {
        RequestDisplay {
            request: self,
            level,
        }
    }
}

impl Response {
    /// Check that the response answers the request, dropping padding bits of bit reads
    pub fn check(self, request: &Request) -> Result<Response, ResponseError> {
        match (request, self) {
            (Request::Read(req), Response::Bits(mut bits)) if req.class.is_bit() => {
                let expected = req.range.count as usize;
                if bits.len() < expected {
                    return Err(ResponseError::CountMismatch {
                        expected,
                        actual: bits.len(),
                    });
                }
                bits.truncate(expected);
                Ok(Response::Bits(bits))
            }
            (Request::Read(req), Response::Registers(words)) if !req.class.is_bit() => {
                let expected = req.range.count as usize;
                if words.len() != expected {
                    return Err(ResponseError::CountMismatch {
                        expected,
                        actual: words.len(),
                    });
                }
                Ok(Response::Registers(words))
            }
            (Request::Write(_), Response::Written) => Ok(Response::Written),
            _ => Err(ResponseError::KindMismatch),
        }
    }

    /// Values of `count` addresses starting `offset` addresses into the response
    ///
    /// The slice is shortened if the response doesn't contain enough values.
    pub fn slice(&self, offset: usize, count: usize) -> RegisterSlice<'_> {
        fn window<T>(values: &[T], offset: usize, count: usize) -> &[T] {
            let start = std::cmp::min(offset, values.len());
            let end = std::cmp::min(start.saturating_add(count), values.len());
            &values[start..end]
        }

        match self {
            Response::Bits(x) => RegisterSlice::Bits(window(x, offset, count)),
            Response::Registers(x) => RegisterSlice::Words(window(x, offset, count)),
            Response::Written => RegisterSlice::Words(&[]),
        }
    }

    pub(crate) fn display(&self, level: AppDecodeLevel) -> ResponseDisplay<'_> {
        ResponseDisplay {
            response: self,
            level,
        }
    }
}

impl RegisterSlice<'_> {
    /// Number of values in the slice
    pub fn len(&self) -> usize {
        match self {
            RegisterSlice::Bits(x) => x.len(),
            RegisterSlice::Words(x) => x.len(),
        }
    }

    /// True if the slice is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) struct RequestDisplay<'a> {
    request: &'a Request,
    level: AppDecodeLevel,
}

pub(crate) struct ResponseDisplay<'a> {
    response: &'a Response,
    level: AppDecodeLevel,
}

impl std::fmt::Display for RequestDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.request {
            Request::Read(x) => write!(f, "READ {} unit: {} {}", x.class, x.unit, x.range),
            Request::Write(x) => {
                write!(
                    f,
                    "WRITE {} unit: {} start: {:#06X} qty: {}",
                    x.class,
                    x.unit,
                    x.start,
                    x.values.len()
                )?;
                if self.level.data_values() {
                    format_values(f, &x.values)?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for ResponseDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.response {
            Response::Bits(x) => {
                write!(f, "BITS qty: {}", x.len())?;
                if self.level.data_values() {
                    format_values(f, &RegisterValues::Bits(x.clone()))?;
                }
                Ok(())
            }
            Response::Registers(x) => {
                write!(f, "REGISTERS qty: {}", x.len())?;
                if self.level.data_values() {
                    for (i, value) in x.iter().enumerate() {
                        write!(f, "\n[{i}] {value:#06X}")?;
                    }
                }
                Ok(())
            }
            Response::Written => f.write_str("WRITTEN"),
        }
    }
}

fn format_values(f: &mut std::fmt::Formatter<'_>, values: &RegisterValues) -> std::fmt::Result {
    match values {
        RegisterValues::Bits(x) => {
            for (i, value) in x.iter().enumerate() {
                write!(f, "\n[{i}] {value}")?;
            }
        }
        RegisterValues::Words(x) => {
            for (i, value) in x.iter().enumerate() {
                write!(f, "\n[{i}] {value:#06X}")?;
            }
        }
    }
    Ok(())
}
