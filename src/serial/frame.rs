use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, FrameParser};
use crate::common::function::FunctionCode;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::types::{RegisterRequest, UnitId};

pub(crate) mod constants {
    pub(crate) const UNIT_ID_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        UNIT_ID_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH + CRC_LENGTH;
}

/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(UnitId, usize),          // unit id, length of the rest
    ReadToOffsetForLength(UnitId, usize), // unit id, offset of the byte count
}

#[derive(Clone, Copy)]
enum LengthMode {
    /// The length is always the same (without function code)
    Fixed(usize),
    /// You need to read X more bytes. The last byte contains the number of extra bytes to read after that
    Offset(usize),
    /// Unknown function code, can't determine the size
    Unknown,
}

/// Incremental parser for RTU response frames received from the field device
pub(crate) struct RtuResponseParser {
    state: ParseState,
}

impl RtuResponseParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Start,
        }
    }

    // Returns how to calculate the length of the body
    fn length_mode(function_code: u8) -> LengthMode {
        // exception replies carry a single exception code byte
        if function_code & 0x80 != 0 {
            return LengthMode::Fixed(1);
        }

        let function_code = match FunctionCode::get(function_code) {
            Some(code) => code,
            None => return LengthMode::Unknown,
        };

        match function_code {
            FunctionCode::ReadHoldingRegisters => LengthMode::Offset(1),
            FunctionCode::ReadInputRegisters => LengthMode::Offset(1),
            FunctionCode::WriteSingleRegister => LengthMode::Fixed(4),
            FunctionCode::WriteMultipleRegisters => LengthMode::Fixed(4),
        }
    }
}

impl FrameParser for RtuResponseParser {
    fn max_frame_size(&self) -> usize {
        constants::MAX_FRAME_LENGTH
    }

    fn parse(&mut self, cursor: &mut ReadBuffer) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if cursor.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(cursor.read_u8()?);

                // We don't consume the function code to avoid an unnecessary copy of the receive buffer later on
                let raw_function_code = cursor.peek_at(0)?;

                self.state = match Self::length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(unit_id, length),
                    LengthMode::Offset(offset) => {
                        ParseState::ReadToOffsetForLength(unit_id, offset)
                    }
                    LengthMode::Unknown => {
                        return Err(RequestError::BadFrame(
                            FrameParseError::UnknownFunctionCode(raw_function_code),
                        ))
                    }
                };

                self.parse(cursor)
            }
            ParseState::ReadToOffsetForLength(unit_id, offset) => {
                if cursor.len() < constants::FUNCTION_CODE_LENGTH + offset {
                    return Ok(None);
                }

                // Get the complete size
                let extra_bytes_to_read =
                    cursor.peek_at(constants::FUNCTION_CODE_LENGTH + offset - 1)? as usize;
                self.state = ParseState::ReadFullBody(unit_id, offset + extra_bytes_to_read);

                self.parse(cursor)
            }
            ParseState::ReadFullBody(unit_id, length) => {
                if constants::FUNCTION_CODE_LENGTH + length
                    > crate::common::frame::constants::MAX_ADU_LENGTH
                {
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        constants::FUNCTION_CODE_LENGTH + length,
                        crate::common::frame::constants::MAX_ADU_LENGTH,
                    )));
                }

                if cursor.len() < constants::FUNCTION_CODE_LENGTH + length + constants::CRC_LENGTH {
                    return Ok(None);
                }

                let frame = {
                    let data = cursor.read(constants::FUNCTION_CODE_LENGTH + length)?;
                    let mut frame = Frame::new(FrameHeader::new_rtu_header(unit_id));
                    frame.set(data);
                    frame
                };
                let received_crc = cursor.read_u16_le()?;

                let expected_crc = {
                    let mut digest = CRC.digest();
                    digest.update(&[unit_id.value]);
                    digest.update(frame.payload());
                    digest.finalize()
                };

                if received_crc != expected_crc {
                    return Err(RequestError::BadFrame(
                        FrameParseError::CrcValidationFailure(received_crc, expected_crc),
                    ));
                }

                self.state = ParseState::Start;
                Ok(Some(frame))
            }
        }
    }
}

/// Format a complete RTU request ADU (unit id + PDU + CRC) into the cursor
pub(crate) fn format_request(
    cursor: &mut WriteCursor,
    unit_id: UnitId,
    request: &RegisterRequest,
) -> Result<(), RequestError> {
    cursor.write_u8(unit_id.value)?;
    cursor.write_u8(request.function().get_value())?;

    match request {
        RegisterRequest::ReadHolding(range) | RegisterRequest::ReadInput(range) => {
            cursor.write_u16_be(range.start)?;
            cursor.write_u16_be(range.count)?;
        }
        RegisterRequest::WriteMultiple(write) => {
            cursor.write_u16_be(write.range.start)?;
            cursor.write_u16_be(write.range.count)?;
            let byte_count = write.values.len() * 2;
            let byte_count = u8::try_from(byte_count)
                .map_err(|_| InternalError::BadByteCount(byte_count))?;
            cursor.write_u8(byte_count)?;
            for value in write.values.iter() {
                cursor.write_u16_be(*value)?;
            }
        }
    }

    let crc = CRC.checksum(cursor.written());
    cursor.write_u16_le(crc)?;
    Ok(())
}
