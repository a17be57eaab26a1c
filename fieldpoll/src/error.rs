use crate::types::{AddressRange, RawType, RegisterClass};

/// The task processing a connection has shut down
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("the connection task has shut down")]
pub struct Shutdown;

/// Errors that occur while building [`PointSpec`](crate::PointSpec) values from configuration
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The start address could not be parsed
    #[error("invalid register address: {0}")]
    BadAddress(String),
    /// The register class is not one of the four known classes
    #[error("unknown register class: {0}")]
    UnknownRegisterClass(String),
    /// The raw type is not supported
    #[error("unsupported raw type: {0}")]
    UnsupportedRawType(String),
    /// The access mode is not `R`, `W` or `RW`
    #[error("unknown access mode: {0}")]
    UnknownAccess(String),
    /// The polling duration could not be parsed
    #[error("invalid duration: {0}")]
    BadDuration(String),
    /// The raw type cannot be stored in the register class
    #[error("raw type {raw_type} is not allowed for {class}")]
    RawTypeNotAllowed {
        /// register class of the point
        class: RegisterClass,
        /// configured raw type
        raw_type: RawType,
    },
    /// The bit field is out of bounds or not applicable to the raw type
    #[error("invalid bit field (offset = {offset}, length = {length}) for raw type {raw_type}")]
    BadBitField {
        /// first bit of the field
        offset: u8,
        /// number of bits in the field
        length: u8,
        /// configured raw type
        raw_type: RawType,
    },
    /// The point quantity is zero or overflows the address space
    #[error("start == {start} and quantity == {quantity} do not describe a valid register range")]
    BadQuantity {
        /// start address
        start: u16,
        /// register count
        quantity: u32,
    },
    /// A zero scale would divide by zero
    #[error("scale must be a finite non-zero number")]
    BadScale,
    /// The device id or point name is empty
    #[error("point is missing a device id or name")]
    MissingName,
}

/// Errors that result from a malformed request
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    /// Request contains a count of zero
    #[error("request contains a count of zero")]
    CountOfZero,
    /// Start and count would overflow the 16-bit address space
    #[error("start == {0} and count == {1} would overflow the representation of u16")]
    AddressOverflow(u16, u16),
    /// A write request carries no values
    #[error("write request contains no values")]
    EmptyWrite,
    /// The register class does not support the operation
    #[error("{0} does not support this operation")]
    UnsupportedClass(RegisterClass),
}

/// Errors that occur while validating a response against its request
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// The response kind doesn't match the request (bits vs. registers vs. ack)
    #[error("response kind does not match the request")]
    KindMismatch,
    /// The response carries fewer values than requested
    #[error("expected {expected} values but received {actual}")]
    CountMismatch {
        /// requested count
        expected: usize,
        /// received count
        actual: usize,
    },
}

/// Errors that can be produced by a link transaction
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// The link could not be opened (connect or port open failed)
    #[error("unable to open the link: {0}")]
    Open(std::io::ErrorKind),
    /// An I/O error occurred on an open link
    #[error("i/o error: {0}")]
    Io(std::io::ErrorKind),
    /// No response was received within the configured timeout
    #[error("timeout occurred before receiving a response from the device")]
    ResponseTimeout,
    /// The device answered with a protocol exception
    #[error("device replied with exception code {0:#04X}")]
    Exception(u8),
    /// The frame codec rejected the received bytes
    #[error("bad frame: {0}")]
    BadFrame(String),
    /// The response does not fit the request
    #[error("bad response: {0}")]
    BadResponse(#[from] ResponseError),
    /// The request is malformed
    #[error("bad request: {0}")]
    BadRequest(#[from] InvalidRequest),
    /// The link is closing and accepts no new transactions
    #[error("the link is closing")]
    Closed,
    /// The connection task has shut down
    #[error("the connection task has shut down")]
    Shutdown,
}

impl RequestError {
    /// True if the error is a symptom of the transport (worth another attempt)
    ///
    /// Device exceptions are definitive answers and a closing link never recovers.
    pub fn is_transport(&self) -> bool {
        match self {
            RequestError::Open(_)
            | RequestError::Io(_)
            | RequestError::ResponseTimeout
            | RequestError::BadFrame(_)
            | RequestError::BadResponse(_) => true,
            RequestError::Exception(_)
            | RequestError::BadRequest(_)
            | RequestError::Closed
            | RequestError::Shutdown => false,
        }
    }

    /// True if the error was caused by a failed open of the link
    pub fn is_open_failure(&self) -> bool {
        matches!(self, RequestError::Open(_))
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

/// Errors that occur when a point value cannot be decoded from the wire values
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The wire slice is shorter than the point requires
    #[error("point requires {required} values but only {available} are available")]
    InsufficientValues {
        /// count required by the point
        required: usize,
        /// count present in the slice
        available: usize,
    },
    /// Registers were expected but bits were received, or vice versa
    #[error("wire values do not match the register class {0}")]
    ClassMismatch(RegisterClass),
}

/// Errors that occur while encoding a value for a write
///
/// Encoding errors are terminal for the write command and are never retried.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EncodingError {
    /// The value variant cannot be converted to the raw type
    #[error("cannot encode a {found} value as {raw_type}")]
    TypeMismatch {
        /// target raw type
        raw_type: RawType,
        /// name of the supplied variant
        found: &'static str,
    },
    /// The value doesn't fit the width of the raw type
    #[error("value {value} is out of range for {raw_type}")]
    OutOfRange {
        /// target raw type
        raw_type: RawType,
        /// textual form of the rejected value
        value: String,
    },
    /// Text could not be parsed as a number
    #[error("'{0}' is not a number")]
    NotANumber(String),
    /// The string doesn't fit the configured register count
    #[error("string of {len} bytes does not fit in {registers} registers")]
    StringTooLong {
        /// length of the string in bytes
        len: usize,
        /// registers available
        registers: u16,
    },
    /// The value doesn't fit the bit field
    #[error("value {value} does not fit in {length} bits")]
    BitFieldOverflow {
        /// rejected value
        value: i64,
        /// number of bits available
        length: u8,
    },
    /// A bit field write requires the current register value
    #[error("bit field write requires the current register value")]
    MissingCurrentValue,
}

/// Errors returned to the caller of [`Connection::write`](crate::Connection::write)
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum WriteError {
    /// The write contains no points
    #[error("write request contains no points")]
    Empty,
    /// No point with this name exists on the device
    #[error("device {device} has no point named {point}")]
    UnknownPoint {
        /// device id
        device: String,
        /// point name
        point: String,
    },
    /// The point is configured read-only
    #[error("point {0} is read-only")]
    NotWritable(String),
    /// Discrete inputs and input registers cannot be written
    #[error("unsupported write register class: {0}")]
    UnsupportedRegisterClass(RegisterClass),
    /// The value could not be encoded (terminal, never retried)
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    /// The transaction failed after exhausting all attempts
    #[error("write to {range} failed: {error}")]
    Request {
        /// registers targeted by the failed command
        range: AddressRange,
        /// error of the final attempt
        error: RequestError,
    },
    /// The connection has been closed or its task has shut down
    #[error("the connection is closed")]
    Closed,
}
