//! A bounded pool of reusable connections.
//!
//! The pool is agnostic to the connection type it manages: implementors of
//! the [`ManageConnection`] trait provide the origin-specific logic to open
//! one. Connections are handed out LIFO so the most recently used socket is
//! reused first, the pool grows lazily up to its upper bound, and callers
//! beyond the bound park on a rendezvous until a connection is returned or
//! their deadline passes.

use std::error;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::TryStreamExt;
use log::{debug, trace};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// A trait which provides connection-specific functionality.
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// The connection type this manager deals with.
    type Connection: Send + 'static;
    /// The error type returned by failed connection attempts.
    type Error: Send + 'static;

    /// Attempts to open a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
}

/// The pool's error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorrowError<E> {
    /// Opening a new connection for the caller failed.
    Connect(E),
    /// The caller's deadline passed before a connection became available.
    TimedOut,
}

impl<E> fmt::Display for BorrowError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BorrowError::Connect(ref err) => write!(f, "{}", err),
            BorrowError::TimedOut => f.write_str("timed out waiting for a pooled connection"),
        }
    }
}

impl<E> error::Error for BorrowError<E>
where
    E: error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            BorrowError::Connect(ref err) => Some(err),
            BorrowError::TimedOut => None,
        }
    }
}

/// Inclusive bounds on the number of connections a pool manages.
///
/// `min` connections are opened eagerly when the pool is built; the pool
/// grows on demand up to `max` and never beyond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    min: u32,
    max: u32,
}

impl PoolSize {
    /// Constructs a new `PoolSize`.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn new(min: u32, max: u32) -> PoolSize {
        assert!(min <= max, "pool min must be no larger than max");
        PoolSize { min, max }
    }

    /// The number of connections opened eagerly.
    pub fn min(&self) -> u32 {
        self.min
    }

    /// The upper bound on pooled plus borrowed connections.
    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Default for PoolSize {
    fn default() -> PoolSize {
        PoolSize { min: 5, max: 10 }
    }
}

/// Information about the current state of a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    /// The number of connections currently lent out.
    pub borrowed: u32,
    /// The number of idle connections available for reuse.
    pub idle: u32,
    /// The number of callers parked inside [`Pool::borrow`].
    pub waiting: u32,
}

/// The pool data that must be protected by a lock.
struct PoolInternals<C> {
    idle: Vec<C>,
    borrowed: u32,
    pending: u32,
    waiting: u32,
}

impl<C> PoolInternals<C> {
    fn occupancy(&self) -> u32 {
        self.borrowed + self.pending + self.idle.len() as u32
    }
}

/// The guts of a `Pool`.
struct SharedPool<M>
where
    M: ManageConnection,
{
    size: PoolSize,
    manager: M,
    internals: Mutex<PoolInternals<M::Connection>>,
    vacancy: Notify,
}

/// A bounded pool of connections produced by a [`ManageConnection`].
pub struct Pool<M>
where
    M: ManageConnection,
{
    inner: Arc<SharedPool<M>>,
}

impl<M> Clone for Pool<M>
where
    M: ManageConnection,
{
    fn clone(&self) -> Pool<M> {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for Pool<M>
where
    M: ManageConnection,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Pool")
            .field("size", &self.inner.size)
            .field("borrowed", &state.borrowed)
            .field("idle", &state.idle)
            .field("waiting", &state.waiting)
            .finish()
    }
}

/// Unwinds the waiting counter on every exit path out of `borrow`.
struct WaitCount<'a, M>
where
    M: ManageConnection,
{
    shared: &'a SharedPool<M>,
    parked: u32,
}

impl<'a, M> Drop for WaitCount<'a, M>
where
    M: ManageConnection,
{
    fn drop(&mut self) {
        if self.parked > 0 {
            let mut locked = self.shared.internals.lock().unwrap();
            locked.waiting -= self.parked;
        }
    }
}

/// Releases a reserved growth slot if `borrow` is dropped mid-connect.
struct PendingSlot<'a, M>
where
    M: ManageConnection,
{
    shared: &'a SharedPool<M>,
    armed: bool,
}

impl<'a, M> Drop for PendingSlot<'a, M>
where
    M: ManageConnection,
{
    fn drop(&mut self) {
        if self.armed {
            let mut locked = self.shared.internals.lock().unwrap();
            locked.pending -= 1;
        }
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Builds a pool and eagerly opens its minimum number of connections.
    ///
    /// Any failure while opening them aborts construction with the
    /// manager's error; connections opened before the failure are dropped.
    pub async fn new(size: PoolSize, manager: M) -> Result<Pool<M>, M::Error> {
        let connects: FuturesUnordered<_> = (0..size.min()).map(|_| manager.connect()).collect();
        let idle: Vec<M::Connection> = connects.try_collect().await?;

        debug!("pool initialized with {} idle connections", idle.len());
        let internals = PoolInternals {
            idle,
            borrowed: 0,
            pending: 0,
            waiting: 0,
        };

        Ok(Pool {
            inner: Arc::new(SharedPool {
                size,
                manager,
                internals: Mutex::new(internals),
                vacancy: Notify::new(),
            }),
        })
    }

    /// Acquires a connection, blocking until one is available, the pool can
    /// grow, or `deadline` passes.
    ///
    /// Wakeups race with fresh callers by design; a woken waiter re-checks
    /// availability and may park again, so FIFO fairness is not guaranteed.
    pub async fn borrow(&self, deadline: Instant) -> Result<M::Connection, BorrowError<M::Error>> {
        let mut wait = WaitCount {
            shared: &self.inner,
            parked: 0,
        };

        loop {
            enum Step<C> {
                Ready(C),
                Grow,
                Park,
            }

            let step = {
                let mut locked = self.inner.internals.lock().unwrap();

                if let Some(conn) = locked.idle.pop() {
                    locked.borrowed += 1;
                    trace!("reusing idle connection ({} idle left)", locked.idle.len());
                    Step::Ready(conn)
                } else if locked.occupancy() < self.inner.size.max() {
                    // Reserve the slot before releasing the lock so concurrent
                    // growers cannot overshoot the bound.
                    locked.pending += 1;
                    Step::Grow
                } else {
                    locked.waiting += 1;
                    wait.parked += 1;
                    Step::Park
                }
            };

            match step {
                Step::Ready(conn) => return Ok(conn),
                Step::Grow => {
                    let mut slot = PendingSlot {
                        shared: &self.inner,
                        armed: true,
                    };

                    debug!("pool growing: opening a new connection");
                    let result = self.inner.manager.connect().await;

                    slot.armed = false;
                    let result = {
                        let mut locked = self.inner.internals.lock().unwrap();
                        locked.pending -= 1;
                        match result {
                            Ok(conn) => {
                                locked.borrowed += 1;
                                Ok(conn)
                            }
                            Err(err) => Err(BorrowError::Connect(err)),
                        }
                    };
                    return result;
                }
                Step::Park => {}
            }

            trace!("pool saturated, parking borrower");
            if timeout_at(deadline, self.inner.vacancy.notified())
                .await
                .is_err()
            {
                debug!("borrow deadline passed while parked");
                return Err(BorrowError::TimedOut);
            }
        }
    }

    /// Returns a connection to the pool for reuse.
    ///
    /// The connection goes to the top of the idle stack, so the next
    /// [`borrow`](Pool::borrow) hands it out again. One parked waiter is
    /// woken if any are waiting.
    pub fn put_back(&self, conn: M::Connection) {
        let mut locked = self.inner.internals.lock().unwrap();
        locked.idle.push(conn);
        locked.borrowed -= 1;
        trace!("connection returned ({} idle)", locked.idle.len());
        if locked.waiting > 0 {
            self.inner.vacancy.notify_one();
        }
    }

    /// Destroys a connection instead of returning it.
    ///
    /// Waiters are not signaled: the freed capacity is found by the next
    /// borrower through the grow branch of [`borrow`](Pool::borrow).
    pub fn dispose(&self, conn: M::Connection) {
        {
            let mut locked = self.inner.internals.lock().unwrap();
            locked.borrowed -= 1;
            debug!("disposing connection ({} still borrowed)", locked.borrowed);
        }
        drop(conn);
    }

    /// Returns a snapshot of the pool's counters.
    pub fn state(&self) -> State {
        let locked = self.inner.internals.lock().unwrap();
        State {
            borrowed: locked.borrowed,
            idle: locked.idle.len() as u32,
            waiting: locked.waiting,
        }
    }
}
