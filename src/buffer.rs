use std::alloc::Layout;
use std::cell::UnsafeCell;

use crate::error::{PortError, PortResult};

/// Circular storage with a mirrored tail. Holds `len` canonical slots followed by `len - 1` slack slots,
/// so any run of up to `len` elements starting inside the canonical region is contiguous in memory.
///
/// The canonical region `[0, len)` is the only source of truth between operations.
/// The slack region `[len, 2 * len - 1)` only ever holds a copy of the wrapped head of a window.
pub(crate) struct MirrorBuffer<T>
{
    buffer : Box<[UnsafeCell<T>]>,
    len : usize
}

// Slots are only reached through the unsafe accessors below; the port guarantees
// that concurrent callers touch disjoint slot ranges.
unsafe impl<T : Send> Sync for MirrorBuffer<T> {}

impl<T : Copy + Default> MirrorBuffer<T>
{
    /// New MirrorBuffer with canonical length. Fails for zero length or zero-sized elements.
    #[inline]
    pub(crate) fn new(len : usize) -> PortResult<Self>
    {
        if len == 0 { return Err(PortError::ZeroCapacity); }
        if size_of::<T>() == 0 { return Err(PortError::ZeroElementSize); }

        // 2 * len - 1, checked against the allocator's limits before filling.
        let allocated = len.checked_mul(2).map(|x| x - 1).unwrap_or(usize::MAX);
        Layout::array::<T>(allocated)?;

        let buffer = (0..allocated).map(|_| UnsafeCell::new(T::default())).collect();
        Ok(Self { buffer, len })
    }
    /// Returns the canonical length of the buffer.
    #[inline]
    pub(crate) fn len(&self) -> usize { self.len }

    #[inline]
    fn slot(&self, index : usize) -> *mut T
    {
        debug_assert!(index <= self.buffer.len());
        unsafe { UnsafeCell::raw_get(self.buffer.as_ptr()).add(index) }
    }

    /// Contiguous read-only view of `n` slots starting at `start`.
    ///
    /// # Safety
    /// `start < len` and `n <= len`. No other thread may write the viewed slots while the view lives.
    #[inline]
    pub(crate) unsafe fn window(&self, start : usize, n : usize) -> &[T]
    {
        debug_assert!(start < self.len && n <= self.len);
        unsafe { std::slice::from_raw_parts(self.slot(start), n) }
    }
    /// Contiguous mutable view of `n` slots starting at `start`.
    ///
    /// # Safety
    /// `start < len` and `n <= len`. The caller must be the only accessor of the viewed slots while the view lives.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn window_mut(&self, start : usize, n : usize) -> &mut [T]
    {
        debug_assert!(start < self.len && n <= self.len);
        unsafe { std::slice::from_raw_parts_mut(self.slot(start), n) }
    }
    /// Copies `source` into the canonical region starting at `start`, wrapping past the end.
    ///
    /// # Safety
    /// `start < len`, `source.len() <= len`, and the written slots must be owned by the caller.
    #[inline]
    pub(crate) unsafe fn write_wrapped(&self, start : usize, source : &[T])
    {
        let n = source.len();
        let lower = n.min(self.len - start);
        unsafe
        {
            std::ptr::copy_nonoverlapping(source.as_ptr(), self.slot(start), lower);
            std::ptr::copy_nonoverlapping(source.as_ptr().add(lower), self.slot(0), n - lower);
        }
    }
    /// Copies slots from the canonical region starting at `start` into `target`, wrapping past the end.
    ///
    /// # Safety
    /// `start < len`, `target.len() <= len`, and no other thread may write the read slots.
    #[inline]
    pub(crate) unsafe fn read_wrapped(&self, start : usize, target : &mut [T])
    {
        let n = target.len();
        let lower = n.min(self.len - start);
        unsafe
        {
            std::ptr::copy_nonoverlapping(self.slot(start), target.as_mut_ptr(), lower);
            std::ptr::copy_nonoverlapping(self.slot(0), target.as_mut_ptr().add(lower), n - lower);
        }
    }
    /// Moves whatever part of the window `[start, start + n)` landed in the slack back to the canonical head.
    ///
    /// # Safety
    /// Same ownership rules as `window_mut` for the window and for the canonical head it folds onto.
    #[inline]
    pub(crate) unsafe fn fold_slack(&self, start : usize, n : usize)
    {
        if start + n <= self.len { return; }
        let overflow = start + n - self.len;
        unsafe { std::ptr::copy_nonoverlapping(self.slot(self.len), self.slot(0), overflow); }
    }
    /// Mirrors the canonical head into the slack so the window `[start, start + n)` reads contiguously.
    ///
    /// # Safety
    /// The mirrored head slots must not be written by another thread, and no other window may use the slack.
    #[inline]
    pub(crate) unsafe fn mirror_head(&self, start : usize, n : usize)
    {
        if start + n <= self.len { return; }
        let overflow = start + n - self.len;
        unsafe { std::ptr::copy_nonoverlapping(self.slot(0), self.slot(self.len), overflow); }
    }
    /// Reads a single canonical slot.
    ///
    /// # Safety
    /// `index < len` and no other thread may be writing the slot.
    #[inline]
    pub(crate) unsafe fn get(&self, index : usize) -> T
    {
        debug_assert!(index < self.len);
        unsafe { *self.slot(index) }
    }
}
