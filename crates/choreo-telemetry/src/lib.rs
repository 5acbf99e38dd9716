//! Choreo Telemetry - Motion controller link handling
//!
//! This crate decodes the controller's `<key:value,...>` status frames from a
//! byte stream, publishes them in idle windows from a background reader task,
//! and paces command issuance on those windows.

pub mod frame;
pub mod reader;
pub mod session;

pub use frame::{
    decode_frame, AxisTuple, FrameDecodeError, IdleWindow, ParserState, ParserStats,
    StatusRecord, TelemetryParser, TelemetryValue,
};
pub use reader::{spawn_reader, LinkFault, ReaderConfig, ReaderHandle, TelemetryReader};
pub use session::MotionSession;
