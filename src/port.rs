//! Thread-safe producer/consumer port.
//!
//! A `Port` is a fixed-capacity circular buffer shared between one producer and one consumer,
//! typically two stages of a processing chain running on separate threads. Each side can move
//! samples in one of two ways:
//!
//! * Locked access hands out a window directly into the port's storage. The window is a guard:
//!   it holds the side's exclusive access until it is committed or dropped, and committing
//!   publishes the elements to the other side.
//! * Copying access transfers elements from or into a caller buffer.
//!
//! Both ways block while the port has no room (producer) or no data (consumer).
//! `signal_eom` wakes every blocked caller; from then on every transfer returns
//! immediately with `Transfer::eom` set until `clear_eom` is called.
//!
//! ```
//! use std::sync::Arc;
//! use mkaudioport::port::Port;
//!
//! let port = Arc::new(Port::<f32>::new(256).unwrap());
//! let sink = port.clone();
//!
//! let consumer = std::thread::spawn(move ||
//! {
//!     let mut block = [0.0; 64];
//!     let transfer = sink.consume(&mut block);
//!     (transfer.count, block[63])
//! });
//!
//! if let Some(mut window) = port.producer_lock(64)
//! {
//!     for (i, sample) in window.iter_mut().enumerate() { *sample = i as f32; }
//!     window.commit(64);
//! }
//!
//! assert_eq!(consumer.join().unwrap(), (64, 63.0));
//! ```

use std::fmt;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::buffer::MirrorBuffer;
use crate::error::{PortError, PortResult};
use crate::window::{ConsumerWindow, ProducerWindow};

/// Producer or consumer side of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role
{
    /// The side that writes elements into the port.
    Producer,
    /// The side that reads elements out of the port.
    Consumer,
}

impl Role
{
    fn opposite(self) -> Self
    {
        match self
        {
            Role::Producer => Role::Consumer,
            Role::Consumer => Role::Producer,
        }
    }
}

impl fmt::Display for Role
{
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self
        {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        };
        write!(f, "{}", name)
    }
}

/// Port construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOptions
{
    /// Number of elements the port can hold.
    pub capacity : usize,
    /// Name attached to every log event of the port.
    pub label : String,
}

impl Default for PortOptions
{
    fn default() -> Self
    {
        Self
        {
            capacity: 1024,
            label: String::from("port"),
        }
    }
}

/// Outcome of a copying transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer
{
    /// Number of elements moved.
    pub count : usize,
    /// Whether end-of-stream was observed.
    pub eom : bool,
}

struct Side
{
    exclusive : Mutex<()>,
    ready : Condvar,
}

impl Side
{
    fn new() -> Self
    {
        Self { exclusive: Mutex::new(()), ready: Condvar::new() }
    }
}

struct State
{
    write_index : usize,
    read_index : usize,
    available_to_write : usize,
    available_to_read : usize,
    eom : bool,

    producer_waiting : bool,
    consumer_waiting : bool,
    producer_holder : Option<ThreadId>,
    consumer_holder : Option<ThreadId>,
}

impl State
{
    fn available(&self, role : Role) -> usize
    {
        match role
        {
            Role::Producer => self.available_to_write,
            Role::Consumer => self.available_to_read,
        }
    }

    fn index(&self, role : Role) -> usize
    {
        match role
        {
            Role::Producer => self.write_index,
            Role::Consumer => self.read_index,
        }
    }

    fn waiting(&mut self, role : Role) -> &mut bool
    {
        match role
        {
            Role::Producer => &mut self.producer_waiting,
            Role::Consumer => &mut self.consumer_waiting,
        }
    }

    fn holder(&mut self, role : Role) -> &mut Option<ThreadId>
    {
        match role
        {
            Role::Producer => &mut self.producer_holder,
            Role::Consumer => &mut self.consumer_holder,
        }
    }
}

/// Exclusive hold on one side of a port. Released on drop.
pub(crate) struct RoleGuard<'a, T : Copy + Default + Send>
{
    pub(crate) port : &'a Port<T>,
    role : Role,
    _exclusive : MutexGuard<'a, ()>,
}

impl<T : Copy + Default + Send> Drop for RoleGuard<'_, T>
{
    fn drop(&mut self)
    {
        *self.port.state.lock().holder(self.role) = None;
    }
}

/// Fixed-capacity circular buffer for one producer and one consumer.
///
/// Share it between threads with `Arc`. Calls into the same side from several threads are
/// serialized, but the port is still meant for a single logical producer and a single
/// logical consumer.
///
/// Blocking calls wait indefinitely until room or data shows up, or until `signal_eom`.
pub struct Port<T : Copy + Default + Send>
{
    storage : MirrorBuffer<T>,
    state : Mutex<State>,
    producer : Side,
    consumer : Side,
    label : String,
}

impl<T : Copy + Default + Send> Port<T>
{
    /// Create a port holding `capacity` elements.
    ///
    /// Fails if `capacity` is zero or `T` is zero-sized.
    pub fn new(capacity : usize) -> PortResult<Self>
    {
        Self::with_options(PortOptions { capacity, ..PortOptions::default() })
    }

    /// Create a port from options.
    pub fn with_options(options : PortOptions) -> PortResult<Self>
    {
        let storage = MirrorBuffer::new(options.capacity)?;
        debug!(port = %options.label, capacity = options.capacity, element_size = size_of::<T>(), "port created");

        Ok(Self
        {
            storage,
            state: Mutex::new(State
            {
                write_index: 0,
                read_index: 0,
                available_to_write: options.capacity,
                available_to_read: 0,
                eom: false,
                producer_waiting: false,
                consumer_waiting: false,
                producer_holder: None,
                consumer_holder: None,
            }),
            producer: Side::new(),
            consumer: Side::new(),
            label: options.label,
        })
    }

    /// Number of elements the port holds.
    pub fn capacity(&self) -> usize { self.storage.len() }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize { size_of::<T>() }

    /// Name used in log events.
    pub fn label(&self) -> &str { &self.label }

    /// Free slots the producer can currently fill.
    pub fn available_to_write(&self) -> usize { self.state.lock().available_to_write }

    /// Committed elements the consumer can currently read.
    pub fn available_to_read(&self) -> usize { self.state.lock().available_to_read }

    /// Whether end-of-stream is currently signalled.
    pub fn is_eom(&self) -> bool { self.state.lock().eom }

    // ==========================================
    // Producer
    // ==========================================

    /// Lock a window of `n` free slots for writing.
    ///
    /// Blocks until `n` slots are free. Returns `None` if end-of-stream is signalled.
    /// The window keeps the producer side exclusive until it is committed or dropped.
    /// A producer lock of `k` and a consumer lock of `m` with `k + m > capacity` can wait on
    /// each other forever.
    ///
    /// # Panics
    /// If `n` exceeds the capacity, or if the calling thread already holds the producer side.
    pub fn producer_lock(&self, n : usize) -> Option<ProducerWindow<'_, T>>
    {
        self.check_lock(n);
        let exclusive = self.enter(Role::Producer);
        let mut state = self.state.lock();
        self.reserve(Role::Producer, &mut state, n)?;
        let start = state.write_index;
        drop(state);

        Some(ProducerWindow::new(exclusive, start, n))
    }

    /// Write all of `source`, blocking as needed.
    ///
    /// Stops early on end-of-stream; `count` then reports what was written before it.
    pub fn produce(&self, source : &[T]) -> Transfer
    {
        let mut count = 0;
        while count < source.len()
        {
            let transfer = self.produce_available(&source[count..]);
            count += transfer.count;
            if transfer.eom { return Transfer { count, eom: true }; }
        }
        Transfer { count, eom: self.is_eom() }
    }

    /// Write as much of `source` as fits right now.
    ///
    /// Blocks only while the port is full.
    pub fn produce_available(&self, source : &[T]) -> Transfer
    {
        if source.is_empty() { return Transfer { count: 0, eom: self.is_eom() }; }

        let _exclusive = self.enter(Role::Producer);
        let mut state = self.state.lock();
        let Some(available) = self.reserve(Role::Producer, &mut state, 1) else
        {
            return Transfer { count: 0, eom: true };
        };

        let n = available.min(source.len());
        unsafe { self.storage.write_wrapped(state.write_index, &source[..n]); }
        self.commit(Role::Producer, &mut state, n);

        Transfer { count: n, eom: false }
    }

    // ==========================================
    // Consumer
    // ==========================================

    /// Lock a window of `n` committed elements for reading.
    ///
    /// Blocks until `n` elements are available. Returns `None` if end-of-stream is signalled.
    /// The window keeps the consumer side exclusive until it is committed or dropped.
    /// A consumer lock of `m` and a producer lock of `k` with `k + m > capacity` can wait on
    /// each other forever.
    ///
    /// # Panics
    /// If `n` exceeds the capacity, or if the calling thread already holds the consumer side.
    pub fn consumer_lock(&self, n : usize) -> Option<ConsumerWindow<'_, T>>
    {
        self.check_lock(n);
        let exclusive = self.enter(Role::Consumer);
        let mut state = self.state.lock();
        self.reserve(Role::Consumer, &mut state, n)?;
        let start = state.read_index;
        unsafe { self.storage.mirror_head(start, n); }
        drop(state);

        Some(ConsumerWindow::new(exclusive, start, n))
    }

    /// Fill all of `target`, blocking as needed.
    ///
    /// Stops early on end-of-stream; `count` then reports what was read before it.
    pub fn consume(&self, target : &mut [T]) -> Transfer
    {
        let mut count = 0;
        while count < target.len()
        {
            let transfer = self.consume_available(&mut target[count..]);
            count += transfer.count;
            if transfer.eom { return Transfer { count, eom: true }; }
        }
        Transfer { count, eom: self.is_eom() }
    }

    /// Read as many elements into `target` as are available right now.
    ///
    /// Blocks only while the port is empty.
    pub fn consume_available(&self, target : &mut [T]) -> Transfer
    {
        if target.is_empty() { return Transfer { count: 0, eom: self.is_eom() }; }

        let _exclusive = self.enter(Role::Consumer);
        let mut state = self.state.lock();
        let Some(available) = self.reserve(Role::Consumer, &mut state, 1) else
        {
            return Transfer { count: 0, eom: true };
        };

        let n = available.min(target.len());
        unsafe { self.storage.read_wrapped(state.read_index, &mut target[..n]); }
        self.commit(Role::Consumer, &mut state, n);

        Transfer { count: n, eom: false }
    }

    // ==========================================
    // End of stream
    // ==========================================

    /// Signal end-of-stream and wake every blocked caller on both sides.
    pub fn signal_eom(&self)
    {
        let mut state = self.state.lock();
        state.eom = true;
        self.producer.ready.notify_all();
        self.consumer.ready.notify_all();
        debug!(port = %self.label, "end of stream signalled");
    }

    /// Clear end-of-stream so transfers resume.
    pub fn clear_eom(&self)
    {
        let mut state = self.state.lock();
        if state.eom { debug!(port = %self.label, "end of stream cleared"); }
        state.eom = false;
    }

    // ==========================================
    // Internals
    // ==========================================

    pub(crate) fn storage(&self) -> &MirrorBuffer<T> { &self.storage }

    fn side(&self, role : Role) -> &Side
    {
        match role
        {
            Role::Producer => &self.producer,
            Role::Consumer => &self.consumer,
        }
    }

    pub(crate) fn violation(&self, error : PortError) -> !
    {
        error!(port = %self.label, %error, "port contract violated");
        panic!("{}", error);
    }

    fn check_lock(&self, n : usize)
    {
        if n > self.capacity()
        {
            self.violation(PortError::LockExceedsCapacity { requested: n, capacity: self.capacity() });
        }
    }

    /// Take exclusive hold of one side.
    fn enter(&self, role : Role) -> RoleGuard<'_, T>
    {
        let current = thread::current().id();
        let reentered = *self.state.lock().holder(role) == Some(current);
        if reentered { self.violation(PortError::RoleReentered { role }); }

        let exclusive = self.side(role).exclusive.lock();
        *self.state.lock().holder(role) = Some(current);

        RoleGuard { port: self, role, _exclusive: exclusive }
    }

    /// Wait until `role` has at least `n` slots to work with.
    ///
    /// Returns the slots available, or `None` once end-of-stream is signalled.
    fn reserve(&self, role : Role, state : &mut MutexGuard<'_, State>, n : usize) -> Option<usize>
    {
        while state.available(role) < n && !state.eom
        {
            *state.waiting(role) = true;
            trace!(port = %self.label, %role, requested = n, available = state.available(role), "waiting");
            self.side(role).ready.wait(state);
        }
        *state.waiting(role) = false;

        if state.eom
        {
            trace!(port = %self.label, %role, "aborted by end of stream");
            return None;
        }
        Some(state.available(role))
    }

    /// Publish `n` elements from `role` to the other side.
    fn commit(&self, role : Role, state : &mut State, n : usize)
    {
        let capacity = self.capacity();
        match role
        {
            Role::Producer =>
            {
                state.write_index = (state.write_index + n) % capacity;
                state.available_to_write -= n;
                state.available_to_read += n;
            }
            Role::Consumer =>
            {
                state.read_index = (state.read_index + n) % capacity;
                state.available_to_read -= n;
                state.available_to_write += n;
            }
        }
        trace!(port = %self.label, %role, count = n, index = state.index(role), "committed");

        let other = role.opposite();
        if *state.waiting(other)
        {
            trace!(port = %self.label, role = %other, "waking");
            self.side(other).ready.notify_one();
        }
    }

    /// Commit a locked window that started at `start`.
    pub(crate) fn commit_window(&self, role : Role, start : usize, n : usize)
    {
        let mut state = self.state.lock();
        if role == Role::Producer { unsafe { self.storage.fold_slack(start, n); } }
        self.commit(role, &mut state, n);
    }
}

impl<T : Copy + Default + Send + fmt::Debug> Port<T>
{
    /// Print the occupied slots to stdout.
    pub fn print(&self) { print!("{}", self); }
}

impl<T : Copy + Default + Send + fmt::Debug> fmt::Display for Port<T>
{
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let state = self.state.lock();
        writeln!(f, "{}: [{} @ {} bytes]", self.label, self.capacity(), self.element_size())?;
        for offset in 0..state.available_to_read
        {
            let index = (state.read_index + offset) % self.capacity();
            let value = unsafe { self.storage.get(index) };
            writeln!(f, "  {:3}:  {:?}", index, value)?;
        }
        Ok(())
    }
}

impl<T : Copy + Default + Send> Drop for Port<T>
{
    fn drop(&mut self)
    {
        self.signal_eom();
        debug!(port = %self.label, "port destroyed");
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn port(capacity : usize) -> Port<i32>
    {
        Port::new(capacity).unwrap()
    }

    #[test]
    fn creation_validates_arguments()
    {
        assert!(matches!(Port::<i32>::new(0), Err(PortError::ZeroCapacity)));
        assert!(matches!(Port::<()>::new(8), Err(PortError::ZeroElementSize)));

        let port = port(8);
        assert_eq!(port.capacity(), 8);
        assert_eq!(port.element_size(), 4);
        assert_eq!(port.available_to_write(), 8);
        assert_eq!(port.available_to_read(), 0);
        assert!(!port.is_eom());
    }

    #[test]
    fn options_carry_label_and_capacity()
    {
        let defaults = PortOptions::default();
        assert_eq!(defaults.capacity, 1024);

        let port = Port::<f64>::with_options(PortOptions { capacity: 16, label: String::from("mixer") }).unwrap();
        assert_eq!(port.capacity(), 16);
        assert_eq!(port.label(), "mixer");
    }

    #[test]
    fn wraparound_sequence()
    {
        let port = port(8);
        let mut r = [0; 5];

        assert_eq!(port.produce(&[0, 1, 2, 3]), Transfer { count: 4, eom: false });
        port.consume(&mut r[..2]);
        assert_eq!(r[..2], [0, 1]);

        port.produce(&[4, 0, 1]);
        port.consume(&mut r[..4]);
        assert_eq!(r[..4], [2, 3, 4, 0]);

        port.produce(&[2, 3, 4]);
        port.consume(&mut r[..4]);
        assert_eq!(r[..4], [1, 2, 3, 4]);

        port.produce(&[0, 1, 2, 3, 4]);
        assert_eq!(port.consume(&mut r), Transfer { count: 5, eom: false });
        assert_eq!(r, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn wraparound_with_leftover_element()
    {
        let port = port(8);
        let w = [0, 1, 2, 3, 4];
        let mut r = [0; 5];

        port.produce(&w[..4]);
        port.consume(&mut r[..2]);
        assert_eq!(r[..2], [0, 1]);

        port.produce(&w[..3]);
        port.consume(&mut r[..4]);
        assert_eq!(r[..4], [2, 3, 0, 1]);

        port.produce(&w[2..]);
        port.consume(&mut r[..4]);
        assert_eq!(r[..4], [2, 2, 3, 4]);

        port.produce(&w);
        port.consume(&mut r);
        assert_eq!(r, w);
    }

    #[test]
    fn consume_available_takes_what_is_there()
    {
        let port = port(20);
        let w = [0, 1, 2, 3, 4];
        let mut r = [0; 5];

        port.produce(&w[..4]);
        assert_eq!(port.consume_available(&mut r).count, 4);
        assert_eq!(r[..4], [0, 1, 2, 3]);

        port.produce(&w);
        port.produce(&w);
        assert_eq!(port.consume_available(&mut r[..3]).count, 3);
        assert_eq!(r[..3], [0, 1, 2]);

        assert_eq!(port.consume_available(&mut r).count, 5);
        assert_eq!(r, [3, 4, 0, 1, 2]);

        assert_eq!(port.consume_available(&mut r).count, 2);
        assert_eq!(r[..2], [3, 4]);
    }

    #[test]
    fn produce_available_fills_what_is_free()
    {
        let port = port(8);
        let w = [0, 1, 2, 3, 4];
        let mut r = [0; 8];

        assert_eq!(port.produce_available(&w[..4]).count, 4);
        port.consume(&mut r[..4]);
        assert_eq!(r[..4], [0, 1, 2, 3]);

        assert_eq!(port.produce_available(&w).count, 5);
        assert_eq!(port.produce_available(&w).count, 3);
        port.consume(&mut r[..3]);
        assert_eq!(r[..3], [0, 1, 2]);

        assert_eq!(port.produce_available(&w).count, 3);
        port.consume(&mut r);
        assert_eq!(r, [3, 4, 0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn counts_always_sum_to_capacity()
    {
        let port = port(6);
        let mut r = [0; 6];
        for chunk in [1, 4, 2, 6, 3, 5]
        {
            let written = port.produce_available(&[7; 6][..chunk]).count;
            assert_eq!(port.available_to_write() + port.available_to_read(), 6);
            port.consume(&mut r[..written]);
            assert_eq!(port.available_to_write() + port.available_to_read(), 6);
        }
    }

    #[test]
    fn locked_windows_wrap_contiguously()
    {
        let port = port(8);
        port.produce(&[0; 6]);
        port.consume(&mut [0; 6]);

        let mut window = port.producer_lock(5).unwrap();
        assert_eq!(window.len(), 5);
        window.copy_from_slice(&[10, 11, 12, 13, 14]);
        window.commit(5);
        assert_eq!(port.available_to_read(), 5);

        let window = port.consumer_lock(5).unwrap();
        assert_eq!(&*window, &[10, 11, 12, 13, 14]);
        window.commit(5);

        port.produce(&[1, 2, 3]);
        let mut r = [0; 3];
        port.consume(&mut r);
        assert_eq!(r, [1, 2, 3]);
    }

    #[test]
    fn partial_commit_publishes_only_committed_elements()
    {
        let port = port(4);
        port.produce(&[0; 3]);
        port.consume(&mut [0; 3]);

        let mut window = port.producer_lock(4).unwrap();
        window[..2].copy_from_slice(&[5, 6]);
        window.commit(2);
        assert_eq!(port.available_to_read(), 2);
        assert_eq!(port.available_to_write(), 2);

        let window = port.consumer_lock(2).unwrap();
        assert_eq!(window[0], 5);
        window.commit(1);

        let mut r = [0; 1];
        port.consume(&mut r);
        assert_eq!(r, [6]);
    }

    #[test]
    fn dropping_a_window_commits_it_whole()
    {
        let port = port(4);
        {
            let mut window = port.producer_lock(3).unwrap();
            window.fill(9);
        }
        assert_eq!(port.available_to_read(), 3);
        {
            let _window = port.consumer_lock(3).unwrap();
        }
        assert_eq!(port.available_to_read(), 0);
        assert_eq!(port.available_to_write(), 4);
    }

    #[test]
    fn end_of_stream_aborts_every_call()
    {
        let port = port(4);
        port.produce(&[1, 2]);
        port.signal_eom();

        assert!(port.is_eom());
        assert_eq!(port.produce(&[3]), Transfer { count: 0, eom: true });
        assert_eq!(port.produce_available(&[3]), Transfer { count: 0, eom: true });
        assert_eq!(port.consume(&mut [0; 2]), Transfer { count: 0, eom: true });
        assert_eq!(port.consume_available(&mut [0; 2]), Transfer { count: 0, eom: true });
        assert!(port.producer_lock(1).is_none());
        assert!(port.consumer_lock(1).is_none());

        port.clear_eom();
        let mut r = [0; 2];
        assert_eq!(port.consume(&mut r), Transfer { count: 2, eom: false });
        assert_eq!(r, [1, 2]);
    }

    #[test]
    fn clearing_a_clear_flag_changes_nothing()
    {
        let port = port(4);
        port.produce(&[1]);
        port.clear_eom();
        assert!(!port.is_eom());
        assert_eq!(port.available_to_read(), 1);
        assert_eq!(port.available_to_write(), 3);
    }

    #[test]
    fn display_lists_occupied_slots_in_order()
    {
        let port = Port::<i32>::with_options(PortOptions { capacity: 4, label: String::from("dump") }).unwrap();
        port.produce(&[1, 2, 3]);
        port.consume(&mut [0; 2]);
        port.produce(&[4, 5]);

        let dump = port.to_string();
        let lines : Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "dump: [4 @ 4 bytes]");
        assert_eq!(lines[1..], ["    2:  3", "    3:  4", "    0:  5"]);
    }

    #[test]
    #[should_panic(expected = "exceeding port capacity")]
    fn producer_lock_beyond_capacity_panics()
    {
        port(4).producer_lock(5);
    }

    #[test]
    #[should_panic(expected = "exceeding port capacity")]
    fn consumer_lock_beyond_capacity_panics()
    {
        port(4).consumer_lock(5);
    }

    #[test]
    #[should_panic(expected = "exceeds locked window")]
    fn over_commit_panics()
    {
        let port = port(4);
        let window = port.producer_lock(2).unwrap();
        window.commit(3);
    }

    #[test]
    #[should_panic(expected = "producer role is already held by this thread")]
    fn relocking_producer_on_same_thread_panics()
    {
        let port = port(4);
        let _window = port.producer_lock(1).unwrap();
        port.producer_lock(1);
    }

    #[test]
    #[should_panic(expected = "consumer role is already held by this thread")]
    fn copying_while_holding_consumer_window_panics()
    {
        let port = port(4);
        port.produce(&[1, 2]);
        let _window = port.consumer_lock(1).unwrap();
        port.consume_available(&mut [0; 1]);
    }

    #[test]
    fn role_is_released_after_window_is_done()
    {
        let port = port(4);
        port.producer_lock(2).unwrap().commit(2);
        port.producer_lock(2).unwrap().commit(2);
        assert_eq!(port.available_to_read(), 4);
    }
}
