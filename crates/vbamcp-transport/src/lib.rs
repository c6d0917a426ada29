//! Child-process transport for stdio tool servers.
//!
//! Owns one child process at a time: spawns it, pumps its stdout and stderr
//! line by line to a [`ChildObserver`], serializes writes to its stdin, and
//! reports its exit. There is no automatic restart.
//!
//! This is the lowest layer of vbamcp. The RPC client builds on the
//! [`ChildTransport`] type provided here.

pub mod child;
pub mod config;
pub mod error;
pub mod observer;

pub use child::ChildTransport;
pub use config::LaunchConfig;
pub use error::{Result, TransportError};
pub use observer::{ChildObserver, ExitInfo, LineSink};
