//! Thread-level operations available to script code: spawn, yield, join
//! and the registry queries.

use crate::error::{ThreadError, ThreadResult};
use crate::observability::Counter;
use crate::scheduler;
use crate::thread::{BlockedOn, Suspension, ThreadBuilder, ThreadRef};
use crate::value::Value;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

/// Register a new unnamed thread running `body`.
pub fn spawn<F>(body: F) -> ThreadResult<ThreadRef>
where
    F: Future<Output = ThreadResult<Value>> + 'static,
{
    ThreadBuilder::new().spawn(body)
}

pub fn current_thread() -> ThreadResult<ThreadRef> {
    scheduler::current()
}

pub fn main_thread() -> ThreadResult<ThreadRef> {
    scheduler::with_core(|core| core.main())
}

/// Every live thread in registration order, the main thread included.
pub fn all_threads() -> ThreadResult<Vec<ThreadRef>> {
    scheduler::with_core(|core| core.all())
}

/// The last error that terminated a thread. `cleanup` clears it.
pub fn last_error(cleanup: bool) -> ThreadResult<Option<ThreadError>> {
    scheduler::with_core(|core| core.last_error(cleanup))
}

/// Give other Runnable threads a turn. Completes at once when no other
/// thread is Runnable.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ThreadResult<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let me = match scheduler::current() {
            Ok(me) => me,
            Err(err) => return Poll::Ready(Err(err)),
        };
        if this.yielded {
            return Poll::Ready(match me.take_pending_signal() {
                Some(signal) => Err(signal.into()),
                None => Ok(()),
            });
        }
        let contended = match scheduler::with_core(|core| core.other_runnable(me.id())) {
            Ok(contended) => contended,
            Err(err) => return Poll::Ready(Err(err)),
        };
        if !contended {
            return Poll::Ready(Ok(()));
        }
        this.yielded = true;
        me.suspend(Suspension::Yield);
        scheduler::record(Counter::Yields);
        Poll::Pending
    }
}

/// Wait until `target` exits and return its result.
pub fn join(target: &ThreadRef) -> Join {
    Join {
        target: target.clone(),
        waiting: None,
    }
}

/// Future returned by [`join`].
#[must_use = "futures do nothing unless awaited"]
pub struct Join {
    target: ThreadRef,
    waiting: Option<ThreadRef>,
}

impl Join {
    fn start(&mut self) -> ThreadResult<ThreadRef> {
        let me = scheduler::with_core(|core| {
            core.check_owned(&self.target)?;
            Ok::<_, ThreadError>(core.current())
        })??;
        if me == self.target {
            return Err(ThreadError::JoinSelf);
        }
        Ok(me)
    }
}

impl Future for Join {
    type Output = ThreadResult<Value>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let me = match this.waiting.take() {
            Some(me) => {
                if let Some(signal) = me.take_pending_signal() {
                    this.target.remove_joiner(me.id());
                    return Poll::Ready(Err(signal.into()));
                }
                me
            }
            None => match this.start() {
                Ok(me) => me,
                Err(err) => return Poll::Ready(Err(err)),
            },
        };

        if let Some(result) = this.target.exit_result() {
            return Poll::Ready(result);
        }
        log::debug!("thread {} joins thread {}", me.id(), this.target.id());
        this.target.add_joiner(me.clone());
        me.block(BlockedOn::Thread(this.target.clone()), Suspension::Join);
        this.waiting = Some(me);
        Poll::Pending
    }
}

impl Drop for Join {
    fn drop(&mut self) {
        if let Some(me) = self.waiting.take() {
            self.target.remove_joiner(me.id());
        }
    }
}
