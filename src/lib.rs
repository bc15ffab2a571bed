//! Thread-safe producer/consumer port for streaming audio sample blocks based on Rust.
//! error : includes port error types.
//! port : includes the port, its options, and copying transfers.
//! window : includes zero-copy locked windows into a port.

//! # License
//! The library is offered under GPLv3.0 license for non-commercial use.
//! If you want to use mkaudioport for closed source project, please email to minjaekim@mkaudio.company for agreement and support.

/// includes mirrored circular storage.
mod buffer;
/// includes port error types.
pub mod error;
/// includes the producer/consumer port.
pub mod port;
/// includes locked producer and consumer windows.
pub mod window;

pub use error::{PortError, PortResult};
pub use port::{Port, PortOptions, Role, Transfer};
pub use window::{ConsumerWindow, ProducerWindow};
