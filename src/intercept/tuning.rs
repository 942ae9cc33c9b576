//! Socket option tuning for intercepted endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stack::{SocketOptions, StackResult, TransportOptions};
use crate::types::Network;

/// Maximum number of TCP keepalive packets to send before giving up and
/// killing the connection if no response is obtained from the other end.
pub const DEFAULT_KEEPALIVE_COUNT: u32 = 9;

/// Time a connection must remain idle before the first keepalive packet.
pub const DEFAULT_KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Interval between keepalive packets once the idle time is reached.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Socket tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Enable TCP keepalive.
    #[serde(default = "default_keepalive")]
    pub keepalive: bool,

    /// Idle time before the first keepalive.
    #[serde(default = "default_keepalive_idle", with = "humantime_serde")]
    pub keepalive_idle: Duration,

    /// Interval between keepalives.
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Unanswered keepalives before giving up.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,
}

fn default_keepalive() -> bool {
    true
}
fn default_keepalive_idle() -> Duration {
    DEFAULT_KEEPALIVE_IDLE
}
fn default_keepalive_interval() -> Duration {
    DEFAULT_KEEPALIVE_INTERVAL
}
fn default_keepalive_count() -> u32 {
    DEFAULT_KEEPALIVE_COUNT
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            keepalive: default_keepalive(),
            keepalive_idle: default_keepalive_idle(),
            keepalive_interval: default_keepalive_interval(),
            keepalive_count: default_keepalive_count(),
        }
    }
}

/// Applies [`TuningConfig`] to freshly created endpoints.
///
/// Tuning runs once, synchronously, before any data is read from or written
/// to the endpoint.
#[derive(Debug, Clone, Default)]
pub struct SocketTuner {
    config: TuningConfig,
}

impl SocketTuner {
    pub fn new(config: TuningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    /// Apply keepalive and buffer sizes to a TCP endpoint.
    ///
    /// Stops at the first keepalive option the endpoint rejects.
    pub fn tune_tcp<E>(&self, stack: &dyn TransportOptions, ep: &mut E) -> StackResult<()>
    where
        E: SocketOptions + ?Sized,
    {
        if self.config.keepalive {
            ep.set_keepalive(true);
            ep.set_keepalive_idle(self.config.keepalive_idle)?;
            ep.set_keepalive_interval(self.config.keepalive_interval)?;
            ep.set_keepalive_count(self.config.keepalive_count)?;
        }

        self.tune_buffers(Network::Tcp, stack, ep);
        Ok(())
    }

    /// Apply the stack's default send and receive buffer sizes for
    /// `network`.
    ///
    /// A range the stack cannot report leaves that buffer untouched.
    pub fn tune_buffers<E>(&self, network: Network, stack: &dyn TransportOptions, ep: &mut E)
    where
        E: SocketOptions + ?Sized,
    {
        let (send, receive) = stack.buffer_size_ranges(network);

        if let Ok(range) = send {
            ep.set_send_buffer_size(range.default);
        }

        if let Ok(range) = receive {
            ep.set_receive_buffer_size(range.default);
        }
    }
}
