//! Error types for port creation and contract violations.

use std::alloc::LayoutError;

use thiserror::Error;

use crate::port::Role;

/// Port error types.
///
/// Creation failures are returned to the caller. The remaining variants describe
/// caller contract violations; the port reports them by panicking with the
/// variant's message.
#[derive(Debug, Error)]
pub enum PortError
{
    /// The port was created with a capacity of zero elements.
    #[error("port capacity cannot be zero")]
    ZeroCapacity,
    /// The element type has a size of zero bytes.
    #[error("port element size cannot be zero")]
    ZeroElementSize,
    /// The mirrored storage does not fit in the address space.
    #[error("port storage layout error: {0}")]
    Layout(#[from] LayoutError),
    /// A lock asked for more elements than the port can ever hold.
    #[error("lock requested for {requested} elements, exceeding port capacity {capacity}")]
    LockExceedsCapacity
    {
        requested : usize,
        capacity : usize,
    },
    /// A window committed more elements than it locked.
    #[error("commit of {committed} elements exceeds locked window of {locked}")]
    CommitExceedsWindow
    {
        committed : usize,
        locked : usize,
    },
    /// A thread entered a role it already holds.
    #[error("{role} role is already held by this thread")]
    RoleReentered
    {
        role : Role,
    },
}

/// Result type for port operations.
pub type PortResult<T> = Result<T, PortError>;
