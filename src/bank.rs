use crate::broker::Broker;
use crate::error::{InternalError, RequestError};
use crate::types::{AddressRange, RegisterRequest, RegisterResponse, WriteMultiple};

/// Typed access to the device's register map, on top of the broker queue.
///
/// Validation happens here, so a bad range never occupies the serial bus.
/// Values arriving from the TCP side are reduced to 16 bits before they
/// are turned into a write request.
#[derive(Clone)]
pub struct RegisterBank {
    broker: Broker,
}

impl RegisterBank {
    /// create a bank that performs its transactions through `broker`
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// read `count` holding registers starting at `start`
    pub async fn read_holding(&self, start: u16, count: u16) -> Result<Vec<u16>, RequestError> {
        let range = AddressRange::try_read(start, count)?;
        self.read(RegisterRequest::ReadHolding(range)).await
    }

    /// read `count` input registers starting at `start`
    pub async fn read_input(&self, start: u16, count: u16) -> Result<Vec<u16>, RequestError> {
        let range = AddressRange::try_read(start, count)?;
        self.read(RegisterRequest::ReadInput(range)).await
    }

    /// write a contiguous block of holding registers starting at `start`,
    /// masking each value to its low 16 bits
    pub async fn write_holding<I>(&self, start: u16, values: I) -> Result<AddressRange, RequestError>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        let values: Vec<u16> = values
            .into_iter()
            .map(|x| (x.into() & 0xFFFF) as u16)
            .collect();
        let request = RegisterRequest::WriteMultiple(WriteMultiple::try_new(start, values)?);
        match self.broker.submit(request).await? {
            RegisterResponse::WriteEcho(range) => Ok(range),
            RegisterResponse::Registers(_) => Err(InternalError::UnexpectedResponseType.into()),
        }
    }

    async fn read(&self, request: RegisterRequest) -> Result<Vec<u16>, RequestError> {
        match self.broker.submit(request).await? {
            RegisterResponse::Registers(values) => Ok(values),
            RegisterResponse::WriteEcho(_) => Err(InternalError::UnexpectedResponseType.into()),
        }
    }
}
