//! Serial port implementation using tokio-serial
//!
//! Concrete [`MountPort`] backed by a `SerialStream`, with the per-byte
//! read timeout enforced in software so a silent mount surfaces as a
//! `Timeout` error rather than a hung future.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::error::{MountError, Result};
use crate::io::{MountPort, MountPortFactory};

/// Mount port backed by tokio-serial
pub struct TokioMountPort {
    stream: SerialStream,
    timeout: Duration,
}

impl TokioMountPort {
    pub fn new(stream: SerialStream, timeout: Duration) -> Self {
        Self { stream, timeout }
    }
}

#[async_trait]
impl MountPort for TokioMountPort {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| MountError::SerialPort(format!("Failed to write: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| MountError::SerialPort(format!("Failed to flush: {}", e)))?;
        Ok(())
    }

    async fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        match tokio::time::timeout(self.timeout, self.stream.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf[0]),
            Ok(Err(e)) => Err(MountError::Io(e)),
            Err(_) => Err(MountError::Timeout("serial read timed out".to_string())),
        }
    }

    async fn read_exact(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        let per_read = self.timeout;
        match tokio::time::timeout(per_read * count as u32, self.stream.read_exact(&mut buf)).await
        {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) => Err(MountError::Io(e)),
            Err(_) => Err(MountError::Timeout(format!(
                "serial read of {count} bytes timed out"
            ))),
        }
    }

    async fn flush_input(&mut self) -> Result<()> {
        self.stream
            .clear(ClearBuffer::Input)
            .map_err(|e| MountError::SerialPort(format!("Failed to clear input: {}", e)))
    }
}

/// Mount port factory using tokio-serial
#[derive(Debug, Default, Clone)]
pub struct TokioMountPortFactory;

impl TokioMountPortFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MountPortFactory for TokioMountPortFactory {
    async fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn MountPort>> {
        debug!(
            "Opening serial port {} at {} baud with {:?} timeout",
            port, baud_rate, timeout
        );

        let stream = tokio_serial::new(port, baud_rate)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| MountError::SerialPort(format!("Failed to open {}: {}", port, e)))?;

        debug!("Serial port {} opened successfully", port);

        Ok(Box::new(TokioMountPort::new(stream, timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_nonexistent_port_fails() {
        let factory = TokioMountPortFactory::new();
        let result = factory
            .open("/dev/nonexistent_port_12345", 9600, Duration::from_secs(1))
            .await;
        match result {
            Err(MountError::SerialPort(msg)) => {
                assert!(msg.contains("/dev/nonexistent_port_12345"), "got: {}", msg);
            }
            Err(other) => panic!("Expected SerialPort error, got {:?}", other),
            Ok(_) => panic!("Expected error opening nonexistent port"),
        }
    }
}
