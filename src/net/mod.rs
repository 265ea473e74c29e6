//! Upstream network subsystem.
//!
//! # Data Flow
//! ```text
//! connection.rs run loop
//!     → transport.rs Connector::connect (websocket, connect timeout)
//!     → FrameStream::next_frame (raw bytes)
//!     → frame.rs parse_frame (type, timestamp, staleness)
//!     → ingest router → channel queue (enqueue timeout, drop on full)
//! ```
//!
//! # Design Decisions
//! - The transport is a trait seam so tests drive the loop without sockets
//! - Invalid or stale frames are protocol errors: counted, never forwarded
//! - The read loop never blocks longer than the enqueue timeout

pub mod connection;
pub mod frame;
pub mod transport;

pub use connection::{ConnectionManager, RunOutcome};
pub use frame::{parse_frame, Message, ProtocolError};
pub use transport::{ConnectError, Connector, FrameStream, TransportError, WsConnector};
