use crate::exception::ExceptionCode;
use crate::types::AddressRange;

/// The ways a register request can fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// I/O error on the underlying stream or serial port
    Io(std::io::ErrorKind),
    /// timeout occurred before receiving a response from the device
    ResponseTimeout,
    /// unrecoverable framing issue in the received data
    BadFrame(FrameParseError),
    /// the response frame was well-formed but its contents were invalid
    BadResponse(AduParseError),
    /// the device returned a Modbus exception
    Exception(ExceptionCode),
    /// the request was rejected before ever reaching the wire
    BadRequest(InvalidRequest),
    /// bug in the library itself while writing to a buffer
    Internal(InternalError),
    /// the task processing requests has been shut down
    Shutdown,
}

impl RequestError {
    /// transport-level failures are eligible for a retry, everything else is definite
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RequestError::Io(_)
                | RequestError::ResponseTimeout
                | RequestError::BadFrame(_)
                | RequestError::BadResponse(_)
        )
    }
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "I/O error: {kind}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response from the device")
            }
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::Exception(ex) => write!(f, "device exception: {ex}"),
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::Shutdown => f.write_str("the request processing task has been shut down"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

/// errors that occur while parsing a frame off a stream (TCP or serial)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// received TCP frame with the length field set to zero
    MbapLengthZero,
    /// received TCP frame with length that exceeds the maximum allowed size (actual, max)
    MbapLengthTooBig(usize, usize),
    /// received TCP frame with a non-Modbus protocol id
    UnknownProtocolId(u16),
    /// received RTU frame with a function code the parser cannot size
    UnknownFunctionCode(u8),
    /// received RTU frame that exceeds the maximum ADU size (actual, max)
    FrameLengthTooBig(usize, usize),
    /// CRC validation failed (received, expected)
    CrcValidationFailure(u16, u16),
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received TCP frame with the length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::UnknownFunctionCode(fc) => {
                write!(f, "received frame with unknown function code: {fc:#04X}")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "received frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "CRC validation failure, received {received:#06X} but expected {expected:#06X}"
            ),
        }
    }
}

/// errors that occur while interpreting a well-framed response PDU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// response is too short to be valid
    InsufficientBytes,
    /// response contains extra trailing bytes
    TrailingBytes(usize),
    /// byte count doesn't match what is expected based on the request (expected, actual)
    ByteCountMismatch(usize, usize),
    /// a parameter expected to be echoed in the reply did not match
    ReplyEchoMismatch,
    /// the response came from a different unit than the one addressed (actual, expected)
    UnitIdMismatch(u8, u8),
    /// an unknown response function code was received (actual, expected, expected error)
    UnknownResponseFunction(u8, u8, u8),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("response is too short to be valid"),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "response contains {remaining} extra trailing bytes")
            }
            AduParseError::ByteCountMismatch(expected, actual) => write!(
                f,
                "byte count ({actual}) doesn't match what is expected based on the request ({expected})"
            ),
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnitIdMismatch(actual, expected) => write!(
                f,
                "response from unit {actual} while expecting a response from unit {expected}"
            ),
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}. Expected {expected} or {error}"
            ),
        }
    }
}

/// errors that result from bad request parameters, caught before anything reaches the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// request contains a count of zero
    CountOfZero,
    /// start and count would overflow the u16 address space
    AddressOverflow(AddressRange),
    /// the count exceeds the maximum allowed for the request type (count, max)
    CountTooBigForType(u16, u16),
    /// the count of values exceeds the representation of u16
    CountTooBigForU16(usize),
}

impl std::error::Error for InvalidRequest {}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRequest::AddressOverflow(range) => write!(
                f,
                "start == {} and count == {} would overflow the representation of u16",
                range.start, range.count
            ),
            InvalidRequest::CountTooBigForType(count, max) => write!(
                f,
                "the request count of {count} exceeds maximum allowed count of {max} for this type"
            ),
            InvalidRequest::CountTooBigForU16(count) => write!(
                f,
                "the requested count of objects exceeds the maximum value of u16: {count}"
            ),
        }
    }
}

/// errors that indicate bugs in the library itself, e.g. writing past the end of a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// attempted to write more bytes than allowed (requested, remaining)
    InsufficientWriteSpace(usize, usize),
    /// attempted to read more bytes than present (requested, remaining)
    InsufficientBytesForRead(usize, usize),
    /// cursor seek operation exceeded the bounds of the underlying buffer
    BadSeekOperation,
    /// the calculated ADU size exceeds what is allowed by the spec
    AduTooBig(usize),
    /// byte count would exceed the maximum size of u8
    BadByteCount(usize),
    /// the broker completed a transaction with a response of the wrong kind
    UnexpectedResponseType,
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace(requested, remaining) => write!(
                f,
                "attempted to write {requested} bytes with {remaining} bytes remaining"
            ),
            InternalError::InsufficientBytesForRead(requested, remaining) => write!(
                f,
                "attempted to read {requested} bytes with only {remaining} remaining"
            ),
            InternalError::BadSeekOperation => {
                f.write_str("cursor seek operation exceeded the bounds of the underlying buffer")
            }
            InternalError::AduTooBig(size) => write!(
                f,
                "ADU length of {size} exceeds the maximum allowed length"
            ),
            InternalError::BadByteCount(count) => write!(
                f,
                "byte count would exceed maximum size of u8: {count}"
            ),
            InternalError::UnexpectedResponseType => {
                f.write_str("transaction completed with a response of the wrong kind")
            }
        }
    }
}
