//! Error types for the mount daemon

/// Errors that can occur when talking to the mount
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Not connected to mount")]
    NotConnected,

    #[error("Serial port error: {0}")]
    SerialPort(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dome notification failed: {0}")]
    Dome(String),
}

impl MountError {
    /// True for faults that mean the serial link itself is gone, as opposed
    /// to a recoverable protocol-level failure of a single command.
    pub fn is_link_fault(&self) -> bool {
        matches!(
            self,
            MountError::Io(_) | MountError::SerialPort(_) | MountError::NotConnected
        )
    }
}

/// Result type alias for mount operations
pub type Result<T> = std::result::Result<T, MountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_faults_are_classified() {
        assert!(MountError::NotConnected.is_link_fault());
        assert!(MountError::SerialPort("gone".into()).is_link_fault());
        assert!(!MountError::Timeout("read".into()).is_link_fault());
        assert!(!MountError::InvalidResponse("junk".into()).is_link_fault());
    }

    #[test]
    fn display_includes_detail() {
        let err = MountError::InvalidResponse("expected ack".to_string());
        assert_eq!(err.to_string(), "Invalid response: expected ack");
    }
}
