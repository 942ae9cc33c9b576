//! # tunmitm
//!
//! Transparent interception engine for user-space network stacks.
//!
//! Raw IP packets are read from a TUN-like descriptor into a graduated
//! buffer pool and handed to a virtual stack. Every TCP connection and UDP
//! association the stack terminates is intercepted, optionally redirected,
//! dialed out over the host network and bridged byte-for-byte.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    TUN device / raw descriptor                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        link: readv dispatcher + graduated buffer pool           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              Virtual network stack (external, stack)            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   intercept: TCP / UDP interceptors, socket tuning, redirect    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │      forward: dialer + bidirectional forwarding sessions        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Host network                           │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]        // ioctl numbers
#![allow(clippy::cast_possible_truncation)]  // Byte counts fit their targets
#![allow(clippy::cast_sign_loss)]            // Checked syscall returns
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::redundant_pub_crate)]       // Explicit visibility
#![allow(clippy::future_not_send)]           // Async internals
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use
#![allow(clippy::ignored_unit_patterns)]     // Ok(_) vs Ok(()) is stylistic

pub mod config;
pub mod error;
pub mod event;
pub mod forward;
pub mod intercept;
pub mod link;
pub mod stack;
pub mod tun;
pub mod types;

pub use config::Config;
pub use error::{Error, Result, StackError};
pub use event::{Event, EventSink};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, StackError};
    pub use crate::event::{Event, EventSink};
    pub use crate::forward::{Dial, Dialer, EstablishHandler, Redirector};
    pub use crate::intercept::{InterceptorBuilder, TcpInterceptor, UdpInterceptor};
    pub use crate::link::{FdEndpoint, NetworkDispatcher, Packet, ReadvDispatcher};
    pub use crate::stack::{
        SocketOptions, StackEndpoint, TcpForwarderRequest, TransportOptions, UdpForwarderRequest,
    };
    pub use crate::types::*;
}
