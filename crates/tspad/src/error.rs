use thiserror::Error;

/// Errors raised when checking synthesized TS data
#[derive(Error, Debug)]
pub enum TsPadError {
    #[error("Invalid packet size: expected multiple of 188 bytes, got {0}")]
    InvalidPacketSize(usize),

    #[error("Invalid sync byte: expected 0x47, got 0x{0:02x}")]
    InvalidSyncByte(u8),

    #[error("Unexpected PID: expected 0x1FFF, got 0x{0:04x}")]
    UnexpectedPid(u16),
}
