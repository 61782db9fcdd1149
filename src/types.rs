use crate::common::function::FunctionCode;
use crate::constants::limits;
use crate::error::InvalidRequest;

/// Modbus unit identifier, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

impl UnitId {
    /// create a new UnitId from a raw value
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

/// Start and count tuple used when making register requests.
/// Cannot be constructed with an invalid start/count combination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// starting address of the range
    pub start: u16,
    /// count of registers in the range
    pub count: u16,
}

impl AddressRange {
    fn validate(start: u16, count: u16, max_count: u16) -> Result<Self, InvalidRequest> {
        if count == 0 {
            return Err(InvalidRequest::CountOfZero);
        }
        if count > max_count {
            return Err(InvalidRequest::CountTooBigForType(count, max_count));
        }
        // start + count - 1 must not overflow the u16 address space
        if start.checked_add(count - 1).is_none() {
            return Err(InvalidRequest::AddressOverflow(AddressRange { start, count }));
        }
        Ok(Self { start, count })
    }

    /// create a validated range for a read holding/input registers request
    pub fn try_read(start: u16, count: u16) -> Result<Self, InvalidRequest> {
        Self::validate(start, count, limits::MAX_READ_REGISTERS_COUNT)
    }

    /// create a validated range for a write multiple registers request
    pub fn try_write(start: u16, count: u16) -> Result<Self, InvalidRequest> {
        Self::validate(start, count, limits::MAX_WRITE_REGISTERS_COUNT)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

/// Collection of values and a validated range to write them to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteMultiple {
    /// validated range matching the number of values
    pub range: AddressRange,
    /// values to write, one per address in the range
    pub values: Vec<u16>,
}

impl WriteMultiple {
    /// create a WriteMultiple, validating the count against the values
    pub fn try_new(start: u16, values: Vec<u16>) -> Result<Self, InvalidRequest> {
        let count =
            u16::try_from(values.len()).map_err(|_| InvalidRequest::CountTooBigForU16(values.len()))?;
        let range = AddressRange::try_write(start, count)?;
        Ok(Self { range, values })
    }
}

/// A single logical register transaction to be performed on the serial bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterRequest {
    /// read a range of holding registers (function code 3)
    ReadHolding(AddressRange),
    /// read a range of input registers (function code 4)
    ReadInput(AddressRange),
    /// write multiple holding registers (function code 16)
    WriteMultiple(WriteMultiple),
}

impl RegisterRequest {
    pub(crate) fn function(&self) -> FunctionCode {
        match self {
            RegisterRequest::ReadHolding(_) => FunctionCode::ReadHoldingRegisters,
            RegisterRequest::ReadInput(_) => FunctionCode::ReadInputRegisters,
            RegisterRequest::WriteMultiple(_) => FunctionCode::WriteMultipleRegisters,
        }
    }
}

impl std::fmt::Display for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RegisterRequest::ReadHolding(range) => write!(f, "read holding {range}"),
            RegisterRequest::ReadInput(range) => write!(f, "read input {range}"),
            RegisterRequest::WriteMultiple(write) => write!(f, "write multiple {}", write.range),
        }
    }
}

/// The successful outcome of a register transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterResponse {
    /// register values returned by a read request
    Registers(Vec<u16>),
    /// echo of the range acknowledged by a write request
    WriteEcho(AddressRange),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_count_of_zero() {
        assert_eq!(AddressRange::try_read(0, 0), Err(InvalidRequest::CountOfZero));
    }

    #[test]
    fn rejects_read_count_above_modbus_limit() {
        assert!(AddressRange::try_read(0, 125).is_ok());
        assert_eq!(
            AddressRange::try_read(0, 126),
            Err(InvalidRequest::CountTooBigForType(126, 125))
        );
    }

    #[test]
    fn rejects_write_count_above_modbus_limit() {
        assert!(AddressRange::try_write(0, 123).is_ok());
        assert_eq!(
            AddressRange::try_write(0, 124),
            Err(InvalidRequest::CountTooBigForType(124, 123))
        );
    }

    #[test]
    fn rejects_address_space_overflow() {
        assert!(AddressRange::try_read(0xFFFF, 1).is_ok());
        assert_eq!(
            AddressRange::try_read(0xFFFF, 2),
            Err(InvalidRequest::AddressOverflow(AddressRange {
                start: 0xFFFF,
                count: 2
            }))
        );
    }

    #[test]
    fn write_multiple_count_always_matches_values() {
        let write = WriteMultiple::try_new(10, vec![1, 2, 3]).unwrap();
        assert_eq!(write.range, AddressRange { start: 10, count: 3 });
    }
}
