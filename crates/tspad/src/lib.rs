//! Transport Stream (TS) null-packet synthesis
//!
//! This crate generates protocol-valid MPEG-TS null packets. Muxers insert
//! null packets to hold a constant bitrate; here they serve as keep-alive
//! padding for clients whose producer has gone quiet, so the connection
//! carries decodable (ignorable) bytes instead of silence.

pub mod error;
pub mod packet;

pub use error::TsPadError;
pub use packet::{NullPacketGenerator, PID_NULL, SYNC_BYTE, TS_PACKET_SIZE, check_packets};

/// Result type for TS padding operations
pub type Result<T> = std::result::Result<T, TsPadError>;
