//! Locked windows into a port's storage.
//!
//! A window is the zero-copy view returned by `Port::producer_lock` and `Port::consumer_lock`.
//! It keeps its side of the port exclusive for as long as it lives, so the slice it hands
//! out can never outlive the exclusion. Committing, explicitly or by dropping the window,
//! publishes the elements to the other side and releases the side.

use std::ops::{Deref, DerefMut};

use crate::error::PortError;
use crate::port::{Role, RoleGuard};

/// Writable window over free slots of a port.
///
/// Dereferences to `&mut [T]` of exactly the locked length, even when the slots wrap
/// past the end of the port. Dropping the window commits all of it; use `commit` to
/// publish only a prefix.
#[must_use = "dropping a window immediately commits it"]
pub struct ProducerWindow<'a, T : Copy + Default + Send>
{
    exclusive : RoleGuard<'a, T>,
    start : usize,
    len : usize,
    open : bool,
}

impl<'a, T : Copy + Default + Send> ProducerWindow<'a, T>
{
    pub(crate) fn new(exclusive : RoleGuard<'a, T>, start : usize, len : usize) -> Self
    {
        Self { exclusive, start, len, open: true }
    }

    /// Publish the first `n` elements of the window and release the producer side.
    ///
    /// # Panics
    /// If `n` is larger than the window.
    pub fn commit(mut self, n : usize) { self.finish(n); }

    fn finish(&mut self, n : usize)
    {
        self.open = false;
        let port = self.exclusive.port;
        if n > self.len
        {
            port.violation(PortError::CommitExceedsWindow { committed: n, locked: self.len });
        }
        port.commit_window(Role::Producer, self.start, n);
    }
}

impl<T : Copy + Default + Send> Deref for ProducerWindow<'_, T>
{
    type Target = [T];

    fn deref(&self) -> &[T]
    {
        unsafe { self.exclusive.port.storage().window(self.start, self.len) }
    }
}

impl<T : Copy + Default + Send> DerefMut for ProducerWindow<'_, T>
{
    fn deref_mut(&mut self) -> &mut [T]
    {
        unsafe { self.exclusive.port.storage().window_mut(self.start, self.len) }
    }
}

impl<T : Copy + Default + Send> Drop for ProducerWindow<'_, T>
{
    fn drop(&mut self)
    {
        if self.open { self.finish(self.len); }
    }
}

/// Read-only window over committed elements of a port.
///
/// Dereferences to `&[T]` in FIFO order. Dropping the window releases all of it; use
/// `commit` to release only a prefix and leave the rest for the next read.
#[must_use = "dropping a window immediately releases it"]
pub struct ConsumerWindow<'a, T : Copy + Default + Send>
{
    exclusive : RoleGuard<'a, T>,
    start : usize,
    len : usize,
    open : bool,
}

impl<'a, T : Copy + Default + Send> ConsumerWindow<'a, T>
{
    pub(crate) fn new(exclusive : RoleGuard<'a, T>, start : usize, len : usize) -> Self
    {
        Self { exclusive, start, len, open: true }
    }

    /// Release the first `n` elements of the window back to the producer.
    ///
    /// # Panics
    /// If `n` is larger than the window.
    pub fn commit(mut self, n : usize) { self.finish(n); }

    fn finish(&mut self, n : usize)
    {
        self.open = false;
        let port = self.exclusive.port;
        if n > self.len
        {
            port.violation(PortError::CommitExceedsWindow { committed: n, locked: self.len });
        }
        port.commit_window(Role::Consumer, self.start, n);
    }
}

impl<T : Copy + Default + Send> Deref for ConsumerWindow<'_, T>
{
    type Target = [T];

    fn deref(&self) -> &[T]
    {
        unsafe { self.exclusive.port.storage().window(self.start, self.len) }
    }
}

impl<T : Copy + Default + Send> Drop for ConsumerWindow<'_, T>
{
    fn drop(&mut self)
    {
        if self.open { self.finish(self.len); }
    }
}
