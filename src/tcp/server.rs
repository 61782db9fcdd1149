use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::bank::RegisterBank;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::frame::{FrameHeader, FramedReader};
use crate::common::function::FunctionCode;
use crate::common::traits::Serialize;
use crate::error::{InternalError, RequestError};
use crate::exception::ExceptionCode;
use crate::tcp::frame::{MbapFormatter, MbapParser};

/// Accepts Modbus TCP connections and spawns a session per client
pub struct ServerTask {
    addr: SocketAddr,
    bank: RegisterBank,
}

impl ServerTask {
    /// create a server that answers requests out of `bank`
    pub fn new(addr: SocketAddr, bank: RegisterBank) -> Self {
        Self { addr, bank }
    }

    /// bind the listener and accept connections until an I/O error occurs
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        loop {
            let (socket, addr) = listener.accept().await?;
            tracing::info!("accepted connection from: {}", addr);

            let bank = self.bank.clone();
            tokio::spawn(async move {
                if let Err(err) = SessionTask::new(socket, bank).run().await {
                    tracing::info!("session from {} ended: {}", addr, err);
                }
            });
        }
    }
}

struct SessionTask<IO> {
    io: IO,
    bank: RegisterBank,
    reader: FramedReader<MbapParser>,
    writer: MbapFormatter,
}

impl<IO> SessionTask<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn new(io: IO, bank: RegisterBank) -> Self {
        Self {
            io,
            bank,
            reader: FramedReader::new(MbapParser::new()),
            writer: MbapFormatter::new(),
        }
    }

    async fn run(&mut self) -> Result<(), RequestError> {
        loop {
            self.run_one().await?;
        }
    }

    async fn reply(
        &mut self,
        header: FrameHeader,
        msg: &dyn Serialize,
    ) -> Result<(), RequestError> {
        let bytes = self.writer.format(header, msg)?;
        self.io.write_all(bytes).await?;
        Ok(())
    }

    async fn run_one(&mut self) -> Result<(), RequestError> {
        // any I/O or framing error closes the session
        let frame = self.reader.next_frame(&mut self.io).await?;
        let header = frame.header;
        let mut cursor = ReadCursor::new(frame.payload());

        // a function-code-less PDU cannot be answered, so it ends the session
        let raw_function = match cursor.read_u8() {
            Err(err) => {
                tracing::warn!("received request without a function code");
                return Err(err.into());
            }
            Ok(value) => value,
        };

        let function = match FunctionCode::get(raw_function) {
            Some(function) => function,
            None => {
                tracing::warn!("received unsupported function code: {:#04X}", raw_function);
                return self
                    .reply(
                        header,
                        &ExceptionResponse::new(raw_function | 0x80, ExceptionCode::IllegalFunction),
                    )
                    .await;
            }
        };

        match function {
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                let (start, count) = match parse_two_u16(&mut cursor) {
                    Ok(fields) => fields,
                    Err(_) => {
                        return self.reject(header, function, ExceptionCode::IllegalDataValue).await;
                    }
                };
                let result = match function {
                    FunctionCode::ReadHoldingRegisters => {
                        self.bank.read_holding(start, count).await
                    }
                    _ => self.bank.read_input(start, count).await,
                };
                match result {
                    Ok(values) => self.reply(header, &ReadResponse::new(function, values)).await,
                    Err(err) => self.reject(header, function, exception_for(&err)).await,
                }
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = match parse_two_u16(&mut cursor) {
                    Ok(fields) => fields,
                    Err(_) => {
                        return self.reject(header, function, ExceptionCode::IllegalDataValue).await;
                    }
                };
                match self.bank.write_holding(address, [value]).await {
                    Ok(_) => {
                        self.reply(header, &EchoResponse::new(function, address, value))
                            .await
                    }
                    Err(err) => self.reject(header, function, exception_for(&err)).await,
                }
            }
            FunctionCode::WriteMultipleRegisters => {
                let values = match parse_write_multiple(&mut cursor) {
                    Ok(fields) => fields,
                    Err(_) => {
                        return self.reject(header, function, ExceptionCode::IllegalDataValue).await;
                    }
                };
                let (start, count, values) = values;
                match self.bank.write_holding(start, values).await {
                    Ok(_) => {
                        self.reply(header, &EchoResponse::new(function, start, count))
                            .await
                    }
                    Err(err) => self.reject(header, function, exception_for(&err)).await,
                }
            }
        }
    }

    async fn reject(
        &mut self,
        header: FrameHeader,
        function: FunctionCode,
        code: ExceptionCode,
    ) -> Result<(), RequestError> {
        tracing::warn!("replying to {} with exception: {}", function, code);
        self.reply(header, &ExceptionResponse::new(function.as_error(), code))
            .await
    }
}

fn parse_two_u16(cursor: &mut ReadCursor) -> Result<(u16, u16), RequestError> {
    let first = cursor.read_u16_be()?;
    let second = cursor.read_u16_be()?;
    cursor.expect_empty()?;
    Ok((first, second))
}

fn parse_write_multiple(cursor: &mut ReadCursor) -> Result<(u16, u16, Vec<u16>), RequestError> {
    let start = cursor.read_u16_be()?;
    let count = cursor.read_u16_be()?;
    let byte_count = cursor.read_u8()? as usize;
    if byte_count != 2 * (count as usize) {
        return Err(crate::error::AduParseError::ByteCountMismatch(
            2 * (count as usize),
            byte_count,
        )
        .into());
    }
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(cursor.read_u16_be()?);
    }
    cursor.expect_empty()?;
    Ok((start, count, values))
}

/// how a failed bank transaction is reported back to the TCP client
fn exception_for(err: &RequestError) -> ExceptionCode {
    match err {
        RequestError::Exception(ex) => *ex,
        RequestError::BadRequest(_) => ExceptionCode::IllegalDataAddress,
        RequestError::Shutdown | RequestError::Internal(_) => ExceptionCode::ServerDeviceFailure,
        // transport failures towards the device, after the retry was spent
        RequestError::Io(_)
        | RequestError::ResponseTimeout
        | RequestError::BadFrame(_)
        | RequestError::BadResponse(_) => ExceptionCode::GatewayTargetDeviceFailedToRespond,
    }
}

struct ReadResponse {
    function: FunctionCode,
    values: Vec<u16>,
}

impl ReadResponse {
    fn new(function: FunctionCode, values: Vec<u16>) -> Self {
        Self { function, values }
    }
}

impl Serialize for ReadResponse {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function.get_value())?;
        let byte_count = self.values.len() * 2;
        let byte_count =
            u8::try_from(byte_count).map_err(|_| InternalError::BadByteCount(byte_count))?;
        cursor.write_u8(byte_count)?;
        for value in self.values.iter() {
            cursor.write_u16_be(*value)?;
        }
        Ok(())
    }
}

struct EchoResponse {
    function: FunctionCode,
    first: u16,
    second: u16,
}

impl EchoResponse {
    fn new(function: FunctionCode, first: u16, second: u16) -> Self {
        Self {
            function,
            first,
            second,
        }
    }
}

impl Serialize for EchoResponse {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function.get_value())?;
        cursor.write_u16_be(self.first)?;
        cursor.write_u16_be(self.second)?;
        Ok(())
    }
}

struct ExceptionResponse {
    function: u8,
    code: ExceptionCode,
}

impl ExceptionResponse {
    fn new(function: u8, code: ExceptionCode) -> Self {
        Self { function, code }
    }
}

impl Serialize for ExceptionResponse {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function)?;
        cursor.write_u8(self.code.into())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, RegisterLink};
    use crate::types::{RegisterRequest, RegisterResponse};

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, DuplexStream};

    struct MockLink {
        responses: VecDeque<Result<RegisterResponse, RequestError>>,
        log: Arc<Mutex<Vec<RegisterRequest>>>,
    }

    #[async_trait::async_trait]
    impl RegisterLink for MockLink {
        async fn execute(
            &mut self,
            request: &RegisterRequest,
        ) -> Result<RegisterResponse, RequestError> {
            self.log.lock().unwrap().push(request.clone());
            self.responses.pop_front().unwrap()
        }
    }

    struct Fixture {
        client: DuplexStream,
        log: Arc<Mutex<Vec<RegisterRequest>>>,
    }

    fn spawn_session(responses: Vec<Result<RegisterResponse, RequestError>>) -> Fixture {
        let log = Arc::new(Mutex::new(Vec::new()));
        let link = MockLink {
            responses: responses.into(),
            log: log.clone(),
        };
        let (broker, _handle) = Broker::spawn(link, 16);
        let (client, server) = tokio::io::duplex(512);
        tokio::spawn(async move {
            let _ = SessionTask::new(server, RegisterBank::new(broker)).run().await;
        });
        Fixture { client, log }
    }

    async fn exchange(fixture: &mut Fixture, request: &[u8], response_len: usize) -> Vec<u8> {
        fixture.client.write_all(request).await.unwrap();
        let mut response = vec![0u8; response_len];
        fixture.client.read_exact(&mut response).await.unwrap();
        response
    }

    const READ_HOLDING_REQUEST: &[u8] = &[
        0x00, 0x01, // tx id
        0x00, 0x00, // protocol id
        0x00, 0x06, // length
        0x11, // unit id
        0x03, // function code
        0x00, 0x6B, // starting address
        0x00, 0x03, // qty of registers
    ];

    #[tokio::test]
    async fn answers_read_holding_registers() {
        let mut fixture = spawn_session(vec![Ok(RegisterResponse::Registers(vec![
            0xAE41, 0x5652, 0x4340,
        ]))]);

        let response = exchange(&mut fixture, READ_HOLDING_REQUEST, 15).await;
        assert_eq!(
            response,
            &[
                0x00, 0x01, // tx id
                0x00, 0x00, // protocol id
                0x00, 0x09, // length
                0x11, // unit id
                0x03, // function code
                0x06, // byte count
                0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, // values
            ]
        );
    }

    #[tokio::test]
    async fn answers_write_multiple_registers_with_an_echo() {
        let mut fixture = spawn_session(vec![Ok(RegisterResponse::WriteEcho(
            crate::types::AddressRange::try_write(1, 2).unwrap(),
        ))]);

        let request = &[
            0x00, 0x02, // tx id
            0x00, 0x00, // protocol id
            0x00, 0x0B, // length
            0x11, // unit id
            0x10, // function code
            0x00, 0x01, // starting address
            0x00, 0x02, // qty of registers
            0x04, // byte count
            0x00, 0x0A, 0x01, 0x02, // values
        ];

        let response = exchange(&mut fixture, request, 12).await;
        assert_eq!(
            response,
            &[
                0x00, 0x02, // tx id
                0x00, 0x00, // protocol id
                0x00, 0x06, // length
                0x11, // unit id
                0x10, // function code
                0x00, 0x01, // starting address
                0x00, 0x02, // qty of registers
            ]
        );
    }

    #[tokio::test]
    async fn unsupported_function_code_yields_illegal_function() {
        let mut fixture = spawn_session(vec![]);

        let request = &[
            0x00, 0x03, // tx id
            0x00, 0x00, // protocol id
            0x00, 0x02, // length
            0x11, // unit id
            0x2B, // unsupported function code
        ];

        let response = exchange(&mut fixture, request, 9).await;
        assert_eq!(
            response,
            &[
                0x00, 0x03, // tx id
                0x00, 0x00, // protocol id
                0x00, 0x03, // length
                0x11, // unit id
                0xAB, // function code | 0x80
                0x01, // illegal function
            ]
        );
        assert!(fixture.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_range_is_rejected_without_a_device_transaction() {
        let mut fixture = spawn_session(vec![]);

        let request = &[
            0x00, 0x04, // tx id
            0x00, 0x00, // protocol id
            0x00, 0x06, // length
            0x11, // unit id
            0x03, // function code
            0x00, 0x00, // starting address
            0x00, 0x7E, // qty of registers, above the modbus limit of 125
        ];

        let response = exchange(&mut fixture, request, 9).await;
        assert_eq!(
            response,
            &[
                0x00, 0x04, // tx id
                0x00, 0x00, // protocol id
                0x00, 0x03, // length
                0x11, // unit id
                0x83, // function code | 0x80
                0x02, // illegal data address
            ]
        );
        assert!(fixture.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_transport_retries_become_a_gateway_exception() {
        let mut fixture = spawn_session(vec![
            Err(RequestError::ResponseTimeout),
            Err(RequestError::ResponseTimeout),
        ]);

        let response = exchange(&mut fixture, READ_HOLDING_REQUEST, 9).await;
        assert_eq!(
            response,
            &[
                0x00, 0x01, // tx id
                0x00, 0x00, // protocol id
                0x00, 0x03, // length
                0x11, // unit id
                0x83, // function code | 0x80
                0x0B, // gateway target device failed to respond
            ]
        );
        // the timeout was retried exactly once
        assert_eq!(fixture.log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn device_exception_is_forwarded_unchanged() {
        let mut fixture = spawn_session(vec![Err(RequestError::Exception(
            ExceptionCode::IllegalDataAddress,
        ))]);

        let response = exchange(&mut fixture, READ_HOLDING_REQUEST, 9).await;
        assert_eq!(response[7], 0x83);
        assert_eq!(response[8], 0x02);
        // protocol exceptions are never retried
        assert_eq!(fixture.log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_future_can_be_spawned_on_the_multithreaded_runtime() {
        fn require_send<T: Send>(_: &T) {}

        let log = Arc::new(Mutex::new(Vec::new()));
        let link = MockLink {
            responses: VecDeque::new(),
            log,
        };
        let (broker, _handle) = Broker::spawn(link, 16);
        let (_client, server) = tokio::io::duplex(64);

        let mut session = SessionTask::new(server, RegisterBank::new(broker));
        require_send(&session.run());
    }

    #[tokio::test]
    async fn frame_without_a_function_code_closes_the_session() {
        let mut fixture = spawn_session(vec![]);

        let request = &[
            0x00, 0x06, // tx id
            0x00, 0x00, // protocol id
            0x00, 0x01, // length, unit id only
            0x11, // unit id
        ];

        fixture.client.write_all(request).await.unwrap();

        // the session drops its end without replying
        let mut buffer = [0u8; 1];
        let read = fixture.client.read(&mut buffer).await.unwrap();
        assert_eq!(read, 0);
        assert!(fixture.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_single_register_round_trip() {
        let mut fixture = spawn_session(vec![Ok(RegisterResponse::WriteEcho(
            crate::types::AddressRange::try_write(1, 1).unwrap(),
        ))]);

        let request = &[
            0x00, 0x05, // tx id
            0x00, 0x00, // protocol id
            0x00, 0x06, // length
            0x11, // unit id
            0x06, // function code
            0x00, 0x01, // address
            0x00, 0x03, // value
        ];

        let response = exchange(&mut fixture, request, 12).await;
        assert_eq!(&response[7..], &[0x06, 0x00, 0x01, 0x00, 0x03]);

        let expected = RegisterRequest::WriteMultiple(
            crate::types::WriteMultiple::try_new(1, vec![3]).unwrap(),
        );
        assert_eq!(*fixture.log.lock().unwrap(), vec![expected]);
    }
}
