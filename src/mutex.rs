//! Recursive mutex for script threads.
//!
//! Ownership is handed over directly on unlock: the head of the wait queue
//! becomes the owner with a count of 1 and is made Runnable. A woken locker
//! never has to race for the lock again.

use crate::error::{ThreadError, ThreadResult};
use crate::observability::Counter;
use crate::scheduler;
use crate::thread::{BlockedOn, Suspension, ThreadId, ThreadRef};
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct MutexState {
    owner: Option<ThreadRef>,
    count: usize,
    waiters: VecDeque<ThreadRef>,
}

struct MutexInner {
    name: Option<String>,
    state: spin::Mutex<MutexState>,
}

/// A recursive lock owned by at most one script thread.
#[derive(Clone)]
pub struct Mutex {
    inner: Arc<MutexInner>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()))
    }

    fn build(name: Option<String>) -> Self {
        Mutex {
            inner: Arc::new(MutexInner {
                name,
                state: spin::Mutex::new(MutexState::default()),
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn owner(&self) -> Option<ThreadRef> {
        self.inner.state.lock().owner.clone()
    }

    pub fn lock_count(&self) -> usize {
        self.inner.state.lock().count
    }

    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().owner.is_some()
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    pub fn ptr_eq(&self, other: &Mutex) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Acquire the mutex for the running thread. Suspends while another
    /// thread owns it.
    pub fn lock(&self) -> Lock {
        Lock {
            mutex: self.clone(),
            waiting: None,
        }
    }

    /// Acquire the mutex and return a guard that releases it when dropped.
    pub async fn lock_guard(&self) -> ThreadResult<MutexGuard> {
        self.lock().await?;
        let owner = scheduler::current()?;
        Ok(MutexGuard {
            mutex: self.clone(),
            owner,
        })
    }

    /// Release one level of ownership held by the running thread.
    pub fn unlock(&self) -> ThreadResult<()> {
        let me = scheduler::current()?;
        self.release(&me)
    }

    /// How many times `thread` holds the mutex (0 if it is not the owner).
    pub(crate) fn held_by(&self, thread: &ThreadRef) -> usize {
        let state = self.inner.state.lock();
        match &state.owner {
            Some(owner) if owner == thread => state.count,
            _ => 0,
        }
    }

    pub(crate) fn release(&self, owner: &ThreadRef) -> ThreadResult<()> {
        let mut state = self.inner.state.lock();
        if state.owner.as_ref() != Some(owner) {
            return Err(ThreadError::NotOwner);
        }
        state.count -= 1;
        if state.count > 0 {
            return Ok(());
        }
        state.owner = None;
        let next = state.waiters.pop_front();
        if let Some(next) = &next {
            state.owner = Some(next.clone());
            state.count = 1;
        }
        drop(state);

        if let Some(next) = next {
            log::debug!(
                "mutex {:?} handed from thread {} to thread {}",
                self.name(),
                owner.id(),
                next.id()
            );
            next.make_runnable();
        }
        Ok(())
    }

    pub(crate) fn remove_waiter(&self, id: ThreadId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|t| t.id() != id);
        state.waiters.len() != before
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Mutex")
            .field("name", &self.inner.name)
            .field("owner", &state.owner.as_ref().map(|t| t.id()))
            .field("count", &state.count)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless awaited"]
pub struct Lock {
    mutex: Mutex,
    waiting: Option<ThreadRef>,
}

impl Future for Lock {
    type Output = ThreadResult<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(me) = this.waiting.take() else {
            return this.first_attempt();
        };

        let granted = this.mutex.held_by(&me) > 0;
        if let Some(signal) = me.take_pending_signal() {
            if granted {
                let _ = this.mutex.release(&me);
            } else {
                this.mutex.remove_waiter(me.id());
            }
            return Poll::Ready(Err(signal.into()));
        }
        if granted {
            return Poll::Ready(Ok(()));
        }
        me.block(BlockedOn::Mutex(this.mutex.clone()), Suspension::MutexLock);
        this.waiting = Some(me);
        Poll::Pending
    }
}

impl Lock {
    fn first_attempt(&mut self) -> Poll<ThreadResult<()>> {
        let me = match scheduler::current() {
            Ok(me) => me,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let mut state = self.mutex.inner.state.lock();
        match state.owner.as_ref().map(ThreadRef::id) {
            None => {
                state.owner = Some(me);
                state.count = 1;
                Poll::Ready(Ok(()))
            }
            Some(owner) if owner == me.id() => {
                state.count += 1;
                Poll::Ready(Ok(()))
            }
            Some(owner) => {
                debug_assert!(!state.waiters.contains(&me));
                log::debug!(
                    "thread {} blocks on mutex {:?} held by thread {}",
                    me.id(),
                    self.mutex.name(),
                    owner
                );
                state.waiters.push_back(me.clone());
                drop(state);
                me.block(BlockedOn::Mutex(self.mutex.clone()), Suspension::MutexLock);
                scheduler::record(Counter::MutexContentions);
                self.waiting = Some(me);
                Poll::Pending
            }
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Some(me) = self.waiting.take() {
            if !self.mutex.remove_waiter(me.id()) && self.mutex.held_by(&me) > 0 {
                // granted while suspended but never resumed
                let _ = self.mutex.release(&me);
            }
        }
    }
}

/// Holds one level of a [`Mutex`] on behalf of the thread that locked it.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexGuard {
    mutex: Mutex,
    owner: ThreadRef,
}

impl MutexGuard {
    pub fn mutex(&self) -> &Mutex {
        &self.mutex
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        // A condition wait interrupted during re-acquisition leaves the
        // thread without ownership; nothing to release then.
        let _ = self.mutex.release(&self.owner);
    }
}

/// Run `body` while holding `mutex`, releasing it on every exit path.
pub async fn with_mutex<F, Fut, T>(mutex: &Mutex, body: F) -> ThreadResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ThreadResult<T>>,
{
    let _guard = mutex.lock_guard().await?;
    body().await
}
