//! Blocking I/O waits routed through the scheduler.
//!
//! [`begin_io`] hands out a [`IoCompletion`] for the I/O collaborator and an
//! [`IoWait`] future for the script thread. Awaiting the future blocks the
//! thread on the I/O source; completing the handle, from any OS thread,
//! stores the result, queues the source in the run loop's inbox and unparks
//! the run loop, which then wakes the thread exactly like a mutex handoff.

use crate::error::ThreadResult;
use crate::observability::Counter;
use crate::scheduler::{self, Shared};
use crate::thread::{BlockedOn, Suspension, ThreadId, ThreadRef};
use crate::value::Value;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

pub(crate) struct IoTicket {
    label: String,
    thread: ThreadId,
    result: spin::Mutex<Option<ThreadResult<Value>>>,
}

impl IoTicket {
    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    fn take(&self) -> Option<ThreadResult<Value>> {
        self.result.lock().take()
    }
}

/// The I/O source a thread is blocked on.
#[derive(Clone)]
pub struct IoSource {
    ticket: Arc<IoTicket>,
}

impl IoSource {
    pub fn label(&self) -> &str {
        &self.ticket.label
    }

    pub(crate) fn is(&self, ticket: &Arc<IoTicket>) -> bool {
        Arc::ptr_eq(&self.ticket, ticket)
    }
}

impl fmt::Debug for IoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoSource")
            .field("label", &self.ticket.label)
            .field("thread", &self.ticket.thread)
            .finish()
    }
}

/// Completion side of an I/O wait. `Send`, so the collaborator can finish
/// the operation on a worker thread.
pub struct IoCompletion {
    ticket: Arc<IoTicket>,
    shared: Arc<Shared>,
}

impl IoCompletion {
    pub fn label(&self) -> &str {
        &self.ticket.label
    }

    pub fn complete(self, result: ThreadResult<Value>) {
        *self.ticket.result.lock() = Some(result);
        self.shared.post_io_completion(self.ticket);
    }
}

impl fmt::Debug for IoCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoCompletion")
            .field("label", &self.ticket.label)
            .finish()
    }
}

/// Future returned by [`begin_io`].
#[must_use = "futures do nothing unless awaited"]
pub struct IoWait {
    ticket: Arc<IoTicket>,
    waiting: Option<ThreadRef>,
}

impl Future for IoWait {
    type Output = ThreadResult<Value>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let me = match this.waiting.take() {
            Some(me) => {
                if let Some(signal) = me.take_pending_signal() {
                    return Poll::Ready(Err(signal.into()));
                }
                me
            }
            None => match scheduler::current() {
                Ok(me) => {
                    scheduler::record(Counter::IoWaits);
                    me
                }
                Err(err) => return Poll::Ready(Err(err)),
            },
        };
        if let Some(result) = this.ticket.take() {
            return Poll::Ready(result);
        }
        log::debug!("thread {} waits on io {:?}", me.id(), this.ticket.label);
        let source = IoSource {
            ticket: this.ticket.clone(),
        };
        me.block(BlockedOn::Io(source), Suspension::Io);
        this.waiting = Some(me);
        Poll::Pending
    }
}

/// Start an I/O wait for the running thread.
pub fn begin_io(label: impl Into<String>) -> ThreadResult<(IoCompletion, IoWait)> {
    let (me, shared) = scheduler::with_core(|core| (core.current(), core.shared.clone()))?;
    let ticket = Arc::new(IoTicket {
        label: label.into(),
        thread: me.id(),
        result: spin::Mutex::new(None),
    });
    let completion = IoCompletion {
        ticket: ticket.clone(),
        shared,
    };
    let wait = IoWait {
        ticket,
        waiting: None,
    };
    Ok((completion, wait))
}
