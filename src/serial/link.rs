use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::SerialPort;

use crate::broker::RegisterLink;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::frame::{Frame, FramedReader};
use crate::error::{AduParseError, RequestError};
use crate::exception::ExceptionCode;
use crate::serial::frame::{constants, format_request, RtuResponseParser};
use crate::serial::SerialSettings;
use crate::types::{RegisterRequest, RegisterResponse, UnitId};

/// Talks Modbus RTU to a single field device over a serial port.
///
/// The port is opened for the duration of one transaction and closed
/// afterwards, with any stale bytes discarded before the request goes
/// out. This keeps a wedged port from poisoning subsequent requests.
pub struct RtuLink {
    path: String,
    settings: SerialSettings,
    slave: UnitId,
    timeout: Duration,
}

impl RtuLink {
    /// create a link to the device with address `slave` behind the port at `path`
    pub fn new(path: String, settings: SerialSettings, slave: UnitId, timeout: Duration) -> Self {
        Self {
            path,
            settings,
            slave,
            timeout,
        }
    }

    async fn transact<IO>(
        &self,
        io: &mut IO,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, RequestError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        // the deadline covers the whole exchange, including the request write
        let deadline = Instant::now() + self.timeout;

        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        let mut cursor = WriteCursor::new(&mut buffer);
        format_request(&mut cursor, self.slave, request)?;

        let bytes = cursor.written();
        tracing::trace!("serial tx: {}", crate::common::Bytes(bytes));

        let mut reader = FramedReader::new(RtuResponseParser::new());

        let frame = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(RequestError::ResponseTimeout);
            }
            result = async {
                io.write_all(bytes).await?;
                reader.next_frame(io).await
            } => result?,
        };

        tracing::trace!("serial rx: {}", crate::common::Bytes(frame.payload()));

        if frame.header.unit_id != self.slave {
            return Err(AduParseError::UnitIdMismatch(
                frame.header.unit_id.value,
                self.slave.value,
            )
            .into());
        }

        parse_response(request, &frame)
    }
}

#[async_trait::async_trait]
impl RegisterLink for RtuLink {
    async fn execute(
        &mut self,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, RequestError> {
        let mut stream = crate::serial::open(&self.path, self.settings).map_err(|err| {
            tracing::warn!("unable to open {}: {}", self.path, err);
            RequestError::Io(std::io::Error::from(err).kind())
        })?;

        // discard any stale bytes left over from an aborted transaction
        stream
            .clear(tokio_serial::ClearBuffer::All)
            .map_err(|err| RequestError::Io(std::io::Error::from(err).kind()))?;

        // dropping the stream closes the port regardless of the outcome
        self.transact(&mut stream, request).await
    }
}

fn parse_response(
    request: &RegisterRequest,
    frame: &Frame,
) -> Result<RegisterResponse, RequestError> {
    let mut cursor = ReadCursor::new(frame.payload());
    let function = request.function();

    let received_function = cursor.read_u8()?;
    if received_function != function.get_value() {
        if received_function == function.as_error() {
            let code = ExceptionCode::from(cursor.read_u8()?);
            cursor.expect_empty()?;
            return Err(RequestError::Exception(code));
        }
        return Err(AduParseError::UnknownResponseFunction(
            received_function,
            function.get_value(),
            function.as_error(),
        )
        .into());
    }

    match request {
        RegisterRequest::ReadHolding(range) | RegisterRequest::ReadInput(range) => {
            let byte_count = cursor.read_u8()? as usize;
            let expected = 2 * (range.count as usize);
            if byte_count != expected {
                return Err(AduParseError::ByteCountMismatch(expected, byte_count).into());
            }
            let mut values = Vec::with_capacity(range.count as usize);
            for _ in 0..range.count {
                values.push(cursor.read_u16_be()?);
            }
            cursor.expect_empty()?;
            Ok(RegisterResponse::Registers(values))
        }
        RegisterRequest::WriteMultiple(write) => {
            let start = cursor.read_u16_be()?;
            let count = cursor.read_u16_be()?;
            cursor.expect_empty()?;
            if start != write.range.start || count != write.range.count {
                return Err(AduParseError::ReplyEchoMismatch.into());
            }
            Ok(RegisterResponse::WriteEcho(write.range))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressRange, WriteMultiple};

    use tokio::io::{AsyncReadExt, DuplexStream};

    fn test_link() -> RtuLink {
        RtuLink::new(
            "/dev/null".to_string(),
            SerialSettings::default(),
            UnitId::new(0x11),
            Duration::from_millis(400),
        )
    }

    async fn respond_with(io: &mut DuplexStream, request_len: usize, response: &[u8]) {
        let mut request = vec![0u8; request_len];
        io.read_exact(&mut request).await.unwrap();
        io.write_all(response).await.unwrap();
    }

    #[tokio::test]
    async fn read_holding_registers_round_trip() {
        let (mut gateway, mut device) = tokio::io::duplex(256);
        let link = test_link();
        let request = RegisterRequest::ReadHolding(AddressRange::try_read(0x6B, 3).unwrap());

        let device_task = tokio::spawn(async move {
            respond_with(
                &mut device,
                8,
                &[0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD],
            )
            .await;
            device
        });

        let response = link.transact(&mut gateway, &request).await.unwrap();
        assert_eq!(
            response,
            RegisterResponse::Registers(vec![0xAE41, 0x5652, 0x4340])
        );
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn write_multiple_registers_round_trip() {
        let (mut gateway, mut device) = tokio::io::duplex(256);
        let link = test_link();
        let request =
            RegisterRequest::WriteMultiple(WriteMultiple::try_new(1, vec![0x000A, 0x0102]).unwrap());

        let device_task = tokio::spawn(async move {
            respond_with(
                &mut device,
                13,
                &[0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x12, 0x98],
            )
            .await;
            device
        });

        let response = link.transact(&mut gateway, &request).await.unwrap();
        assert_eq!(
            response,
            RegisterResponse::WriteEcho(AddressRange { start: 1, count: 2 })
        );
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn exception_reply_surfaces_as_exception_error() {
        let (mut gateway, mut device) = tokio::io::duplex(256);
        let link = test_link();
        let request = RegisterRequest::ReadHolding(AddressRange::try_read(0x6B, 3).unwrap());

        let device_task = tokio::spawn(async move {
            respond_with(&mut device, 8, &[0x11, 0x83, 0x02, 0xC1, 0x34]).await;
            device
        });

        let err = link.transact(&mut gateway, &request).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::Exception(ExceptionCode::IllegalDataAddress)
        );
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn response_from_wrong_unit_is_a_parse_error() {
        let (mut gateway, mut device) = tokio::io::duplex(256);
        let link = test_link();
        let request = RegisterRequest::ReadHolding(AddressRange::try_read(0x6B, 3).unwrap());

        let device_task = tokio::spawn(async move {
            respond_with(
                &mut device,
                8,
                &[0x12, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x5D, 0x5D],
            )
            .await;
            device
        });

        let err = link.transact(&mut gateway, &request).await.unwrap_err();
        assert_eq!(
            err,
            RequestError::BadResponse(AduParseError::UnitIdMismatch(0x12, 0x11))
        );
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn reply_echo_mismatch_is_a_parse_error() {
        let (mut gateway, mut device) = tokio::io::duplex(256);
        let link = test_link();
        let request =
            RegisterRequest::WriteMultiple(WriteMultiple::try_new(1, vec![0x000A, 0x0102]).unwrap());

        let device_task = tokio::spawn(async move {
            respond_with(
                &mut device,
                13,
                &[0x11, 0x10, 0x00, 0x02, 0x00, 0x02, 0xE2, 0x98],
            )
            .await;
            device
        });

        let err = link.transact(&mut gateway, &request).await.unwrap_err();
        assert_eq!(err, RequestError::BadResponse(AduParseError::ReplyEchoMismatch));
        device_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_request_write_is_bounded_by_the_deadline() {
        // nobody drains the device side, so the 8-byte request cannot
        // finish writing into the 1-byte pipe
        let (mut gateway, _device) = tokio::io::duplex(1);
        let link = test_link();
        let request = RegisterRequest::ReadHolding(AddressRange::try_read(0, 1).unwrap());

        let err = link.transact(&mut gateway, &request).await.unwrap_err();
        assert_eq!(err, RequestError::ResponseTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_causes_response_timeout() {
        let (mut gateway, _device) = tokio::io::duplex(256);
        let link = test_link();
        let request = RegisterRequest::ReadHolding(AddressRange::try_read(0, 1).unwrap());

        let err = link.transact(&mut gateway, &request).await.unwrap_err();
        assert_eq!(err, RequestError::ResponseTimeout);
    }
}
