pub(crate) mod frame;
mod link;

pub use link::*;

use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

/// Serial port settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    /// baud rate of the port
    pub baud_rate: u32,
    /// number of bits per character
    pub data_bits: DataBits,
    /// types of checksum parity
    pub parity: Parity,
    /// number of stop bits
    pub stop_bits: StopBits,
    /// flow control modes
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

pub(crate) fn open(path: &str, settings: SerialSettings) -> Result<SerialStream, tokio_serial::Error> {
    let builder = tokio_serial::new(path, settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .flow_control(settings.flow_control);

    SerialStream::open(&builder)
}
