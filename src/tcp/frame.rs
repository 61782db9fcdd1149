use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, FrameParser, TxId};
use crate::common::traits::Serialize;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    // cannot be < 1 b/c of the unit identifier
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize =
        crate::common::frame::constants::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    adu_length: usize,
    unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    Header(MbapHeader),
}

/// Incremental parser for MBAP frames received from TCP clients
pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<MbapHeader, RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()? as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::MbapLengthZero.into());
        }

        Ok(MbapHeader {
            tx_id,
            adu_length: length - 1,
            unit_id,
        })
    }

    fn parse_body(header: &MbapHeader, cursor: &mut ReadBuffer) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new_tcp_header(header.unit_id, header.tx_id));
        frame.set(cursor.read(header.adu_length)?);
        Ok(frame)
    }
}

impl FrameParser for MbapParser {
    fn max_frame_size(&self) -> usize {
        constants::MAX_FRAME_LENGTH
    }

    fn parse(&mut self, cursor: &mut ReadBuffer) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header) => {
                if cursor.len() < header.adu_length {
                    return Ok(None);
                }

                let frame = Self::parse_body(&header, cursor)?;
                self.state = ParseState::Begin;
                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                self.state = ParseState::Header(Self::parse_header(cursor)?);
                self.parse(cursor)
            }
        }
    }
}

/// Formats reply PDUs into MBAP frames, reusing one buffer per session
pub(crate) struct MbapFormatter {
    buffer: [u8; constants::MAX_FRAME_LENGTH],
}

impl MbapFormatter {
    pub(crate) fn new() -> Self {
        Self {
            buffer: [0; constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        msg: &dyn Serialize,
    ) -> Result<&[u8], RequestError> {
        let mut cursor = WriteCursor::new(self.buffer.as_mut());
        let tx_id = match header.tx_id {
            Some(tx_id) => tx_id,
            None => return Err(InternalError::UnexpectedResponseType.into()),
        };
        cursor.write_u16_be(tx_id.to_u16())?;
        cursor.write_u16_be(0)?;
        cursor.seek_from_current(2)?; // write the length later
        cursor.write_u8(header.unit_id.value)?;

        let adu_length: usize = {
            let start = cursor.position();
            msg.serialize(&mut cursor)?;
            cursor.position() - start
        };

        {
            // write the resulting length
            let length = u16::try_from(adu_length + 1)
                .map_err(|_| InternalError::AduTooBig(adu_length))?;
            cursor.seek_from_start(4)?;
            cursor.write_u16_be(length)?;
        }

        let total_length = constants::HEADER_LENGTH + adu_length;
        Ok(&self.buffer[..total_length])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::FramedReader;

    use tokio::io::AsyncWriteExt;

    const SIMPLE_FRAME: &[u8] = &[
        0x00, 0x07, // tx id
        0x00, 0x00, // protocol id
        0x00, 0x03, // length
        0x2A, // unit id
        0x03, 0x04, // pdu
    ];

    struct RawPdu(&'static [u8]);

    impl Serialize for RawPdu {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            for byte in self.0 {
                cursor.write_u8(*byte)?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn parses_frame_arriving_in_one_chunk() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(SIMPLE_FRAME).await.unwrap();

        let mut reader = FramedReader::new(MbapParser::new());
        let frame = reader.next_frame(&mut rx).await.unwrap();
        assert_eq!(frame.header.tx_id, Some(TxId::new(0x0007)));
        assert_eq!(frame.header.unit_id, UnitId::new(0x2A));
        assert_eq!(frame.payload(), &[0x03, 0x04]);
    }

    #[tokio::test]
    async fn parses_frame_arriving_byte_by_byte() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let mut reader = FramedReader::new(MbapParser::new());

        let writer = tokio::spawn(async move {
            for byte in SIMPLE_FRAME {
                tx.write_all(&[*byte]).await.unwrap();
            }
            tx
        });

        let frame = reader.next_frame(&mut rx).await.unwrap();
        assert_eq!(frame.payload(), &[0x03, 0x04]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn parses_two_frames_from_one_chunk() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let mut bytes = SIMPLE_FRAME.to_vec();
        bytes.extend_from_slice(SIMPLE_FRAME);
        tx.write_all(&bytes).await.unwrap();

        let mut reader = FramedReader::new(MbapParser::new());
        for _ in 0..2 {
            let frame = reader.next_frame(&mut rx).await.unwrap();
            assert_eq!(frame.payload(), &[0x03, 0x04]);
        }
    }

    #[tokio::test]
    async fn rejects_frame_with_non_modbus_protocol_id() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let mut bytes = SIMPLE_FRAME.to_vec();
        bytes[3] = 0x01;
        tx.write_all(&bytes).await.unwrap();

        let mut reader = FramedReader::new(MbapParser::new());
        let err = reader.next_frame(&mut rx).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::BadFrame(FrameParseError::UnknownProtocolId(1))
        );
    }

    #[tokio::test]
    async fn rejects_frame_with_zero_length() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let mut bytes = SIMPLE_FRAME.to_vec();
        bytes[5] = 0x00;
        tx.write_all(&bytes).await.unwrap();

        let mut reader = FramedReader::new(MbapParser::new());
        let err = reader.next_frame(&mut rx).await.unwrap_err();
        assert_eq!(err, RequestError::BadFrame(FrameParseError::MbapLengthZero));
    }

    #[test]
    fn formats_a_reply_with_the_echoed_header() {
        let mut formatter = MbapFormatter::new();
        let header = FrameHeader::new_tcp_header(UnitId::new(0x2A), TxId::new(0x0007));
        let bytes = formatter.format(header, &RawPdu(&[0x03, 0x04])).unwrap();
        assert_eq!(bytes, SIMPLE_FRAME);
    }
}
