//! Reentrant, thread-owned mutual exclusion.
//!
//! [`ReentrantMutex`] is the only blocking point of the crate. It is composed
//! from a plain `parking_lot` mutex guarding the owner/depth bookkeeping and a
//! condition variable that waiting threads park on.
//!
//! Waiters are served in arrival order. A thread that already owns the lock
//! never waits, it only increments its depth.
//!
//! Besides ordinary acquisitions the lock tracks *pins*: depth units held on
//! behalf of an open transaction rather than an in-flight call. A pinned unit
//! can only be given back with [`ReentrantMutex::unpin`], and an owner holding
//! nothing but pins is considered idle, which lets
//! [`ReentrantMutex::acquire_or_reclaim`] take the lock away from it.

use crate::error::LockError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use tracing::trace;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    pinned: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

impl LockState {
    fn grant(&mut self, thread: ThreadId) {
        self.owner = Some(thread);
        self.depth = 1;
        self.pinned = 0;
    }

    fn is_turn(&self, ticket: u64) -> bool {
        self.owner.is_none() && self.waiters.front() == Some(&ticket)
    }

    fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.push_back(ticket);
        ticket
    }
}

/// Ownership taken over from an idle transaction holder by
/// [`ReentrantMutex::acquire_or_reclaim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reclaimed {
    /// Thread that held the lock.
    pub owner: ThreadId,
    /// Depth it held, all of it pinned.
    pub depth: usize,
}

/// A lock that the owning thread may acquire repeatedly without blocking.
///
/// The lock becomes free once the owner has released it as many times as it
/// acquired it.
#[derive(Debug, Default)]
pub struct ReentrantMutex {
    state: Mutex<LockState>,
    released: Condvar,
}

impl ReentrantMutex {
    /// Creates a free lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the calling thread owns the lock, then increments its depth.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            state.depth += 1;
            trace!(depth = state.depth, "lock re-entered");
            return;
        }

        if state.owner.is_none() && state.waiters.is_empty() {
            state.grant(me);
            trace!("lock acquired");
            return;
        }

        let ticket = state.enqueue();
        while !state.is_turn(ticket) {
            self.released.wait(&mut state);
        }
        state.waiters.pop_front();
        state.grant(me);
        trace!(ticket, "lock acquired after wait");
    }

    /// Acquires the lock if that is possible without blocking.
    pub fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();

        match state.owner {
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            None if state.waiters.is_empty() => {
                state.grant(me);
                true
            }
            _ => false,
        }
    }

    /// Gives back one acquisition made by the calling thread.
    ///
    /// Fails without touching the bookkeeping when the caller does not own the
    /// lock or has no unpinned acquisition left.
    pub fn release(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        match state.owner {
            None => return Err(LockError::NotHeld),
            Some(owner) if owner != me => {
                return Err(LockError::NotOwner { owner, current: me });
            }
            Some(_) => {}
        }
        if state.depth <= state.pinned {
            return Err(LockError::NotHeld);
        }

        state.depth -= 1;
        trace!(depth = state.depth, "lock released");
        self.after_decrement(&mut state);
        Ok(())
    }

    /// Adds a depth unit held on behalf of an open transaction.
    ///
    /// The caller must already own the lock.
    pub fn pin(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        match state.owner {
            None => Err(LockError::NotHeld),
            Some(owner) if owner != me => Err(LockError::NotOwner { owner, current: me }),
            Some(_) => {
                state.depth += 1;
                state.pinned += 1;
                trace!(depth = state.depth, pinned = state.pinned, "lock pinned");
                Ok(())
            }
        }
    }

    /// Gives back a depth unit added by [`pin`](Self::pin).
    pub fn unpin(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        match state.owner {
            None => return Err(LockError::NotPinned),
            Some(owner) if owner != me => {
                return Err(LockError::NotOwner { owner, current: me });
            }
            Some(_) => {}
        }
        if state.pinned == 0 {
            return Err(LockError::NotPinned);
        }

        state.pinned -= 1;
        state.depth -= 1;
        trace!(depth = state.depth, pinned = state.pinned, "lock unpinned");
        self.after_decrement(&mut state);
        Ok(())
    }

    /// Acquires like [`acquire`](Self::acquire), except that an owner holding
    /// nothing but pins is dispossessed instead of waited for.
    ///
    /// On reclaim the caller owns the lock with depth 1 and the previous
    /// owner's pins are discarded.
    pub fn acquire_or_reclaim(&self) -> Option<Reclaimed> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            state.depth += 1;
            return None;
        }
        if state.owner.is_none() && state.waiters.is_empty() {
            state.grant(me);
            return None;
        }

        let ticket = state.enqueue();
        loop {
            if state.is_turn(ticket) {
                state.waiters.pop_front();
                state.grant(me);
                return None;
            }
            if let Some(owner) = state.owner {
                if state.pinned > 0 && state.depth == state.pinned {
                    let reclaimed = Reclaimed {
                        owner,
                        depth: state.depth,
                    };
                    state.waiters.retain(|t| *t != ticket);
                    state.grant(me);
                    trace!(?owner, depth = reclaimed.depth, "lock reclaimed");
                    return Some(reclaimed);
                }
            }
            self.released.wait(&mut state);
        }
    }

    /// Acquires the lock and returns a guard releasing it on drop.
    pub fn lock(&self) -> LockTicket<'_> {
        self.acquire();
        LockTicket::adopt(self)
    }

    /// Thread currently owning the lock.
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    /// Total depth held by the owner, pins included.
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    /// Returns true while any thread owns the lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Returns true if the calling thread owns the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    fn after_decrement(&self, state: &mut LockState) {
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_all();
        } else if state.depth == state.pinned {
            // Owner went idle; a pending reclaim may proceed.
            self.released.notify_all();
        }
    }
}

/// One acquisition of a [`ReentrantMutex`], released when dropped.
///
/// Tickets cannot cross threads: the release must come from the thread that
/// acquired.
#[must_use = "the lock is released as soon as the ticket is dropped"]
pub struct LockTicket<'a> {
    lock: &'a ReentrantMutex,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockTicket<'a> {
    /// Wraps an acquisition the calling thread already made.
    pub(crate) fn adopt(lock: &'a ReentrantMutex) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for LockTicket<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            tracing::error!(%err, "failed to release lock ticket");
        }
    }
}

impl std::fmt::Debug for LockTicket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTicket").finish_non_exhaustive()
    }
}
