//! I/O traits for the serial link to the mount
//!
//! The LX200 protocol is byte-oriented (single-byte acknowledgements,
//! `#`-terminated strings), so the abstraction is a raw byte port rather
//! than a line reader. The traits enable mockall-based testing without
//! real hardware.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A byte-stream connection to the mount
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait MountPort: Send {
    /// Write the given bytes and flush them to the device
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read a single byte, honoring the configured read timeout.
    ///
    /// Returns `MountError::Timeout` if nothing arrives in time.
    async fn read_byte(&mut self) -> Result<u8>;

    /// Read exactly `count` bytes, honoring the read timeout per byte
    async fn read_exact(&mut self, count: usize) -> Result<Vec<u8>>;

    /// Discard any unread input bytes
    async fn flush_input(&mut self) -> Result<()>;
}

/// Trait for opening mount port connections
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait MountPortFactory: Send + Sync {
    /// Open the device at `port` with the given baud rate and read timeout
    async fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn MountPort>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_port_round_trip() {
        let mut port = MockMountPort::new();
        port.expect_write_all()
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));
        port.expect_read_byte()
            .times(1)
            .returning(|| Box::pin(async { Ok(b'1') }));

        port.write_all(b":AL#").await.unwrap();
        assert_eq!(port.read_byte().await.unwrap(), b'1');
    }
}
