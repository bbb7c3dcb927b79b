//! Condition variables bound to a [`Mutex`].

use crate::error::{ThreadError, ThreadResult};
use crate::mutex::{Lock, Mutex};
use crate::observability::Counter;
use crate::scheduler;
use crate::thread::{BlockedOn, Suspension, ThreadId, ThreadRef};
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::VecDeque;
use std::sync::Arc;

struct CondVarInner {
    name: Option<String>,
    mutex: Mutex,
    waiters: spin::Mutex<VecDeque<ThreadRef>>,
}

/// A FIFO wait queue tied to one mutex for its whole life.
#[derive(Clone)]
pub struct CondVar {
    inner: Arc<CondVarInner>,
}

impl CondVar {
    pub fn new(mutex: &Mutex) -> Self {
        Self::build(mutex, None)
    }

    pub fn named(mutex: &Mutex, name: impl Into<String>) -> Self {
        Self::build(mutex, Some(name.into()))
    }

    fn build(mutex: &Mutex, name: Option<String>) -> Self {
        CondVar {
            inner: Arc::new(CondVarInner {
                name,
                mutex: mutex.clone(),
                waiters: spin::Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn mutex(&self) -> &Mutex {
        &self.inner.mutex
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.lock().len()
    }

    pub fn ptr_eq(&self, other: &CondVar) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Release the bound mutex, wait for a notification, then re-acquire
    /// the mutex before returning.
    ///
    /// The caller must hold the mutex exactly once. Wakes can be spurious
    /// and another thread may take the mutex first, so re-check the awaited
    /// condition in a loop.
    pub fn wait(&self) -> Wait {
        Wait {
            condvar: self.clone(),
            state: WaitState::Start,
        }
    }

    /// Wake one waiter (FIFO), or every waiter when `all` is set.
    ///
    /// The caller must hold the bound mutex and keeps holding it; woken
    /// threads contend for it once they run. Returns the number of threads
    /// woken.
    ///
    /// The mutex is never released here, so `notify` is not a suspension
    /// point and never switches threads. Woken threads get their chance when
    /// the caller unlocks and next suspends.
    pub fn notify(&self, all: bool) -> ThreadResult<usize> {
        let me = scheduler::current()?;
        if self.inner.mutex.held_by(&me) == 0 {
            return Err(ThreadError::MutexNotHeld);
        }
        let woken: Vec<ThreadRef> = {
            let mut waiters = self.inner.waiters.lock();
            if all {
                waiters.drain(..).collect()
            } else {
                waiters.pop_front().into_iter().collect()
            }
        };
        for thread in &woken {
            thread.make_runnable();
        }
        log::debug!(
            "thread {} notified {} waiter(s) on {:?}",
            me.id(),
            woken.len(),
            self.name()
        );
        Ok(woken.len())
    }

    pub fn notify_one(&self) -> ThreadResult<usize> {
        self.notify(false)
    }

    pub fn notify_all(&self) -> ThreadResult<usize> {
        self.notify(true)
    }

    pub(crate) fn remove_waiter(&self, id: ThreadId) -> bool {
        let mut waiters = self.inner.waiters.lock();
        let before = waiters.len();
        waiters.retain(|t| t.id() != id);
        waiters.len() != before
    }

    fn is_waiting(&self, id: ThreadId) -> bool {
        self.inner.waiters.lock().iter().any(|t| t.id() == id)
    }
}

impl fmt::Debug for CondVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondVar")
            .field("name", &self.inner.name)
            .field("mutex", &self.inner.mutex.name())
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

enum WaitState {
    Start,
    Waiting(ThreadRef),
    Reacquire {
        lock: Lock,
        interrupted: Option<ThreadError>,
    },
    Done,
}

/// Future returned by [`CondVar::wait`].
#[must_use = "futures do nothing unless awaited"]
pub struct Wait {
    condvar: CondVar,
    state: WaitState,
}

impl Wait {
    fn start(&mut self) -> Result<ThreadRef, ThreadError> {
        let me = scheduler::current()?;
        let mutex = &self.condvar.inner.mutex;
        match mutex.held_by(&me) {
            0 => return Err(ThreadError::MutexNotHeld),
            1 => {}
            n => return Err(ThreadError::NestedWait(n)),
        }
        mutex.release(&me)?;
        self.condvar.inner.waiters.lock().push_back(me.clone());
        me.block(BlockedOn::CondVar(self.condvar.clone()), Suspension::CondWait);
        scheduler::record(Counter::CondWaits);
        log::debug!("thread {} waits on {:?}", me.id(), self.condvar.name());
        Ok(me)
    }
}

impl Future for Wait {
    type Output = ThreadResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match core::mem::replace(&mut this.state, WaitState::Done) {
                WaitState::Start => match this.start() {
                    Ok(me) => {
                        this.state = WaitState::Waiting(me);
                        return Poll::Pending;
                    }
                    Err(err) => return Poll::Ready(Err(err)),
                },
                WaitState::Waiting(me) => {
                    let interrupted = me.take_pending_signal().map(ThreadError::from);
                    if interrupted.is_none() && this.condvar.is_waiting(me.id()) {
                        me.block(BlockedOn::CondVar(this.condvar.clone()), Suspension::CondWait);
                        this.state = WaitState::Waiting(me);
                        return Poll::Pending;
                    }
                    this.condvar.remove_waiter(me.id());
                    this.state = WaitState::Reacquire {
                        lock: this.condvar.inner.mutex.lock(),
                        interrupted,
                    };
                }
                WaitState::Reacquire {
                    mut lock,
                    interrupted,
                } => {
                    return match Pin::new(&mut lock).poll(cx) {
                        Poll::Pending => {
                            this.state = WaitState::Reacquire { lock, interrupted };
                            Poll::Pending
                        }
                        Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
                        Poll::Ready(Ok(())) => match interrupted {
                            Some(err) => Poll::Ready(Err(err)),
                            None => Poll::Ready(Ok(())),
                        },
                    };
                }
                WaitState::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if let WaitState::Waiting(me) = &self.state {
            self.condvar.remove_waiter(me.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Runtime;
    use crate::value::Value;

    #[test]
    fn wait_without_mutex_fails() {
        let rt = Runtime::new().unwrap();
        let m = Mutex::new();
        let cv = CondVar::new(&m);
        let result = rt.block_on(async move {
            let err = cv.wait().await.unwrap_err();
            Ok(Value::from(err.as_str()))
        });
        assert_eq!(result, Ok(Value::from("Condition mutex not held")));
    }

    #[test]
    fn wait_with_nested_hold_fails() {
        let rt = Runtime::new().unwrap();
        let m = Mutex::new();
        let cv = CondVar::new(&m);
        let result = rt.block_on(async move {
            cv.mutex().lock().await?;
            cv.mutex().lock().await?;
            let err = cv.wait().await.unwrap_err();
            assert_eq!(cv.mutex().lock_count(), 2);
            Err(err)
        });
        assert_eq!(result, Err(ThreadError::NestedWait(2)));
    }

    #[test]
    fn notify_without_waiters_is_a_no_op() {
        let rt = Runtime::new().unwrap();
        let m = Mutex::new();
        let cv = CondVar::named(&m, "ready");
        let result = rt.block_on(async move {
            assert_eq!(cv.notify(false), Err(ThreadError::MutexNotHeld));
            cv.mutex().lock().await?;
            let woken = cv.notify_all()?;
            assert!(cv.mutex().is_locked());
            cv.mutex().unlock()?;
            Ok(Value::Int(woken as i64))
        });
        assert_eq!(result, Ok(Value::Int(0)));
    }
}
