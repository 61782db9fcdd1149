use tokio::io::AsyncRead;

use crate::common::buffer::ReadBuffer;
use crate::error::RequestError;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
}

/// Monotonic transaction identifier. Used on the wire by MBAP and for
/// correlating log spans on the serial side.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    pub(crate) fn next(&mut self) -> TxId {
        let ret = self.value;
        self.value = self.value.wrapping_add(1);
        TxId::new(ret)
    }
}

impl Default for TxId {
    fn default() -> Self {
        TxId::new(0)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    /// present for MBAP frames, absent for RTU frames
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_tcp_header(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: Some(tx_id),
        }
    }

    pub(crate) fn new_rtu_header(unit_id: UnitId) -> Self {
        FrameHeader { unit_id, tx_id: None }
    }
}

/// A complete received frame: header plus the raw PDU (function code + body)
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        if src.len() > self.pdu.len() {
            return false;
        }
        self.pdu[0..src.len()].copy_from_slice(src);
        self.length = src.len();
        true
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[0..self.length]
    }
}

/// Defines an interface for parsing frames (TCP or RTU) from a stream of bytes
pub(crate) trait FrameParser {
    fn max_frame_size(&self) -> usize;

    /// Parse bytes using the provided buffer. Advancing the buffer always implies
    /// that the bytes are consumed and can be discarded.
    ///
    /// `Err` implies the input data is invalid
    /// `Ok(None)` implies that more data is required to complete parsing
    /// `Ok(Some(..))` contains a fully parsed frame and has advanced the buffer appropriately
    fn parse(&mut self, cursor: &mut ReadBuffer) -> Result<Option<Frame>, RequestError>;
}

pub(crate) struct FramedReader<T>
where
    T: FrameParser,
{
    parser: T,
    buffer: ReadBuffer,
}

impl<T: FrameParser> FramedReader<T> {
    pub(crate) fn new(parser: T) -> Self {
        let size = parser.max_frame_size();
        Self {
            parser,
            buffer: ReadBuffer::new(size),
        }
    }

    pub(crate) async fn next_frame<IO>(&mut self, io: &mut IO) -> Result<Frame, RequestError>
    where
        IO: AsyncRead + Unpin,
    {
        loop {
            match self.parser.parse(&mut self.buffer)? {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io).await?;
                }
            }
        }
    }
}
