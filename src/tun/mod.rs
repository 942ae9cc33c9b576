//! TUN device acquisition.
//!
//! Opens a layer-3 TUN interface and hands back its file descriptor so it
//! can be attached to an [`FdEndpoint`](crate::link::FdEndpoint).
//! Interface addressing and routes are left to the caller.
//!
//! ## Platform Support
//!
//! - **Linux**: Uses `/dev/net/tun` with `ioctl(TUNSETIFF)`
//! - Other platforms: the caller supplies an already-open descriptor
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tunmitm::link::{EndpointOptions, FdEndpoint};
//! use tunmitm::EventSink;
//!
//! # fn example() -> tunmitm::Result<()> {
//! let device = tunmitm::tun::open("tun0")?;
//! let endpoint = FdEndpoint::new(
//!     vec![device.into_fd()],
//!     EndpointOptions::default(),
//!     EventSink::default(),
//! )?;
//! # drop(endpoint);
//! # Ok(())
//! # }
//! ```

mod device;

pub use device::{TunDevice, MAX_NAME_LEN};

#[cfg(target_os = "linux")]
pub use device::open;
