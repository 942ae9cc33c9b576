//! Raw packet ingestion.
//!
//! Turns vectored reads from a tun-like descriptor into reassembled packets
//! with minimal copying and allocation, and feeds them to the virtual stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ readv ┌──────────────┐ consume(n) ┌──────────┐
//! │ raw fd (tun) │──────▶│  BufferPool  │───────────▶│  Packet  │
//! └──────────────┘       │ 128 256 ...  │            └────┬─────┘
//!        ▲               └──────────────┘                 │ version nibble
//!        │ writev                                         ▼
//! ┌──────┴───────┐                             ┌────────────────────┐
//! │  FdEndpoint  │◀──── outbound packets ──────│  virtual stack     │
//! └──────────────┘                             │ (NetworkDispatcher)│
//!                                              └────────────────────┘
//! ```

mod buffer;
mod dispatcher;
mod endpoint;
mod packet;

pub use buffer::{BufferPool, DEFAULT_BUFFER_SIZES};
pub use dispatcher::{NetworkDispatcher, ReadvDispatcher, StopFd, StopHandle};
pub use endpoint::{EndpointOptions, FdEndpoint, DEFAULT_MTU};
pub use packet::Packet;
