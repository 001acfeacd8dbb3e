//! Byte-stream abstraction the driver talks through.
//!
//! The sensor link is a plain duplex UART with no framing of its own, so the
//! contract is deliberately small: write raw bytes, ask how many unread
//! bytes are pending, read some of them. The driver owns all timing and
//! frame assembly on top of this.

use std::io;

/// Duplex byte stream carrying sensor frames.
///
/// Implementations must not frame, escape or buffer across calls in any way
/// the caller can observe. The driver never closes or reconfigures the
/// underlying stream.
pub trait Transport {
    /// Writes all bytes of `data` to the stream.
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Number of received bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Reads up to `buf.len()` pending bytes, returning how many were read.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[cfg(feature = "serialport")]
impl Transport for Box<dyn serialport::SerialPort> {
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, data)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        serialport::SerialPort::bytes_to_read(self.as_mut()).map_err(io::Error::from)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }
}

/// Opens `port` with the sensor's fixed line settings (9600 8N1).
///
/// The [`serialport`] read timeout is kept short; the driver enforces the
/// real response deadline itself and polls for pending bytes instead of
/// blocking in the OS read.
#[cfg(feature = "serialport")]
pub fn open(port: &str) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
    serialport::new(port, 9600)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(std::time::Duration::from_millis(50))
        .open()
}
