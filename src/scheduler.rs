//! The cooperative scheduler and its run loop.
//!
//! Every script thread's body is a future driven by one OS thread. A body
//! only gives up the processor by awaiting one of the runtime's suspension
//! points (yield, join, mutex lock, condition wait, I/O wait); those futures
//! update the thread's state and return `Pending`, and the run loop then
//! switches to the next Runnable thread in registration order.
//!
//! The scheduler is reached through a per-OS-thread access point installed
//! by [`Runtime::new`] and cleared when the runtime is dropped.

use crate::config::RuntimeConfig;
use crate::context::{ContextHost, ContextSlot};
use crate::error::{ThreadError, ThreadResult};
use crate::introspection::ThreadInfo;
use crate::io::IoTicket;
use crate::observability::{Counter, MetricsSnapshot, Report, SchedulerMetrics};
use crate::thread::{BlockedOn, Suspension, ThreadId, ThreadRef, ThreadState};
use crate::value::Value;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use portable_atomic::{AtomicU64, Ordering};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::task::Wake;

pub(crate) type ThreadBody = Pin<Box<dyn Future<Output = ThreadResult<Value>>>>;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE: RefCell<Option<Rc<Core>>> = const { RefCell::new(None) };
}

/// Run `f` against the scheduler active on this OS thread.
pub(crate) fn with_core<R>(f: impl FnOnce(&Rc<Core>) -> R) -> ThreadResult<R> {
    let core = ACTIVE
        .with(|active| active.borrow().clone())
        .ok_or(ThreadError::NoRuntime)?;
    Ok(f(&core))
}

/// The running thread.
pub(crate) fn current() -> ThreadResult<ThreadRef> {
    with_core(|core| core.current())
}

pub(crate) fn record(counter: Counter) {
    let _ = with_core(|core| core.metrics.record(counter));
}

/// State reachable from other OS threads: the I/O completion inbox and the
/// handle used to unpark the run loop.
pub(crate) struct Shared {
    inbox: spin::Mutex<VecDeque<Arc<IoTicket>>>,
    run_loop: std::thread::Thread,
}

impl Shared {
    pub(crate) fn post_io_completion(&self, ticket: Arc<IoTicket>) {
        self.inbox.lock().push_back(ticket);
        self.run_loop.unpark();
    }
}

struct RunLoopWaker(Arc<Shared>);

impl Wake for RunLoopWaker {
    fn wake(self: Arc<Self>) {
        self.0.run_loop.unpark();
    }
}

struct Scheduler {
    /// Live threads in registration order
    registry: Vec<ThreadRef>,
    bodies: HashMap<ThreadId, ThreadBody>,
    current: ThreadRef,
    main: ThreadRef,
    next_id: u64,
    last_run: ThreadId,
    last_error: Option<ThreadError>,
    reports: Vec<Report>,
}

pub(crate) struct Core {
    pub(crate) id: u64,
    pub(crate) config: RuntimeConfig,
    pub(crate) metrics: SchedulerMetrics,
    pub(crate) shared: Arc<Shared>,
    pub(crate) context: Box<dyn ContextHost>,
    sched: RefCell<Scheduler>,
}

impl Core {
    pub(crate) fn current(&self) -> ThreadRef {
        self.sched.borrow().current.clone()
    }

    pub(crate) fn main(&self) -> ThreadRef {
        self.sched.borrow().main.clone()
    }

    pub(crate) fn all(&self) -> Vec<ThreadRef> {
        self.sched.borrow().registry.clone()
    }

    /// Reject handles created by another runtime.
    pub(crate) fn check_owned(&self, thread: &ThreadRef) -> ThreadResult<()> {
        if thread.runtime_id() == self.id {
            Ok(())
        } else {
            Err(ThreadError::InvalidThreadId)
        }
    }

    pub(crate) fn report(&self, report: Report) {
        self.sched.borrow_mut().reports.push(report);
    }

    pub(crate) fn last_error(&self, cleanup: bool) -> Option<ThreadError> {
        let mut sched = self.sched.borrow_mut();
        if cleanup {
            sched.last_error.take()
        } else {
            sched.last_error.clone()
        }
    }

    /// Whether any thread other than `me` is Runnable.
    pub(crate) fn other_runnable(&self, me: ThreadId) -> bool {
        self.sched
            .borrow()
            .registry
            .iter()
            .any(|t| t.id() != me && t.state() == ThreadState::Runnable)
    }

    pub(crate) fn spawn(&self, name: Option<String>, body: ThreadBody) -> ThreadResult<ThreadRef> {
        let context = self.context.current();
        let mut sched = self.sched.borrow_mut();
        if sched.registry.len() >= self.config.max_threads {
            return Err(ThreadError::MaxThreadsReached);
        }
        let id = ThreadId::from_raw(sched.next_id).ok_or(ThreadError::MaxThreadsReached)?;
        sched.next_id += 1;

        let thread = ThreadRef::new(id, self.id, name, ThreadState::Runnable, context);
        let starting = thread.clone();
        let body: ThreadBody = Box::pin(async move {
            // signalled before it ever ran
            if let Some(signal) = starting.take_pending_signal() {
                return Err(signal.into());
            }
            drop(starting);
            body.await
        });
        sched.registry.push(thread.clone());
        sched.bodies.insert(id, body);
        drop(sched);

        self.metrics.record(Counter::Spawned);
        log::debug!("spawned thread {} ({:?})", id, thread.name());
        Ok(thread)
    }

    /// Next Runnable thread after the last one run, wrapping around.
    fn pick_next(&self) -> Option<ThreadRef> {
        let sched = self.sched.borrow();
        let last = sched.last_run;
        let mut runnable = sched
            .registry
            .iter()
            .filter(|t| t.state() == ThreadState::Runnable);
        let first = runnable.clone().next();
        let next = runnable.find(|t| t.id() > last).or(first).cloned();
        next
    }

    /// Make `next` the running thread, swapping dynamic bindings and the
    /// current context when it differs from the previous one.
    fn switch_to(&self, next: &ThreadRef) {
        self.swap_in(next);
        next.resume();
    }

    /// Install `next`'s view (bindings, context) without changing its state.
    fn swap_in(&self, next: &ThreadRef) {
        let previous = {
            let mut sched = self.sched.borrow_mut();
            sched.last_run = next.id();
            if sched.current == *next {
                None
            } else {
                Some(core::mem::replace(&mut sched.current, next.clone()))
            }
        };

        if let Some(previous) = previous {
            if previous.state() != ThreadState::Exited {
                previous.with_bindings(|stack| stack.unbind_for_switch());
                let saved = self.context.current();
                previous.with_data(|data| data.context = saved);
            }
            let restored = next.with_data(|data| data.context.clone());
            self.context.set_current(restored);
            next.with_bindings(|stack| stack.rebind_for_switch());

            self.metrics.record(Counter::ContextSwitches);
            log::trace!("switch {} -> {}", previous.id(), next.id());
        }
    }

    fn take_body(&self, id: ThreadId) -> Option<ThreadBody> {
        self.sched.borrow_mut().bodies.remove(&id)
    }

    fn put_body(&self, id: ThreadId, body: ThreadBody) {
        self.sched.borrow_mut().bodies.insert(id, body);
    }

    fn finish(&self, thread: &ThreadRef, result: ThreadResult<Value>) {
        if let Err(err) = &result {
            log::debug!("thread {} exited with error: {}", thread.id(), err);
            self.metrics.record(Counter::Failed);
            self.sched.borrow_mut().last_error = Some(err.clone());
        } else {
            log::debug!("thread {} exited", thread.id());
        }

        for joiner in thread.finish(result) {
            joiner.make_runnable();
        }
        if !thread.is_main() {
            self.sched.borrow_mut().registry.retain(|t| t != thread);
            self.metrics.record(Counter::Exited);
        }
    }

    fn drain_io_completions(&self) {
        let tickets: Vec<Arc<IoTicket>> = self.shared.inbox.lock().drain(..).collect();
        for ticket in tickets {
            let thread = self
                .sched
                .borrow()
                .registry
                .iter()
                .find(|t| t.id() == ticket.thread())
                .cloned();
            let Some(thread) = thread else { continue };
            if let Some(BlockedOn::Io(source)) = thread.blocked_on() {
                if source.is(&ticket) {
                    thread.make_runnable();
                }
            }
        }
    }

    fn has_io_waiters(&self) -> bool {
        self.sched
            .borrow()
            .registry
            .iter()
            .any(|t| matches!(t.blocked_on(), Some(BlockedOn::Io(_))))
    }

    fn deadlock(&self) -> ThreadResult<Value> {
        let blocked: Vec<ThreadInfo> = self
            .all()
            .iter()
            .filter(|t| t.state() == ThreadState::Blocked)
            .map(ThreadRef::info)
            .collect();
        log::warn!("no runnable thread remains; {} thread(s) blocked", blocked.len());
        // the caller of block_on sees the main thread's view again
        self.swap_in(&self.main());
        self.metrics.record(Counter::Deadlocks);
        self.report(Report::Deadlock { blocked });
        Err(ThreadError::Deadlock)
    }
}

/// Owner of a scheduler instance.
///
/// Creating a runtime registers the calling code as the main thread.
/// Spawned threads run while [`Runtime::block_on`] drives the main body.
pub struct Runtime {
    core: Rc<Core>,
}

impl Runtime {
    pub fn new() -> ThreadResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> ThreadResult<Self> {
        Self::with_context_host(config, ContextSlot::default())
    }

    /// Create a runtime whose current-context slot is provided by the
    /// embedder.
    pub fn with_context_host(config: RuntimeConfig, host: impl ContextHost) -> ThreadResult<Self> {
        if ACTIVE.with(|active| active.borrow().is_some()) {
            return Err(ThreadError::RuntimeActive);
        }

        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        let main = ThreadRef::new(
            ThreadId::MAIN,
            id,
            Some(config.main_thread_name.clone()),
            ThreadState::Running,
            None,
        );
        let core = Rc::new(Core {
            id,
            metrics: SchedulerMetrics::new(config.enable_metrics),
            shared: Arc::new(Shared {
                inbox: spin::Mutex::new(VecDeque::new()),
                run_loop: std::thread::current(),
            }),
            context: Box::new(host),
            sched: RefCell::new(Scheduler {
                registry: vec![main.clone()],
                bodies: HashMap::new(),
                current: main.clone(),
                main,
                next_id: ThreadId::MAIN.get() + 1,
                last_run: ThreadId::MAIN,
                last_error: None,
                reports: Vec::new(),
            }),
            config,
        });

        ACTIVE.with(|active| *active.borrow_mut() = Some(core.clone()));
        log::debug!("runtime {} started", id);
        Ok(Runtime { core })
    }

    pub fn main_thread(&self) -> ThreadRef {
        self.core.main()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core.config
    }

    /// Drive `main` as the main thread's body, running other threads at
    /// its suspension points, until it returns.
    ///
    /// Returns `ThreadError::Deadlock` if every live thread is blocked and
    /// none waits on I/O.
    pub fn block_on<F>(&self, main: F) -> ThreadResult<Value>
    where
        F: Future<Output = ThreadResult<Value>> + 'static,
    {
        let core = &self.core;
        let main_thread = core.main();
        if let Some(result) = main_thread.exit_result() {
            return result;
        }
        core.put_body(main_thread.id(), Box::pin(main));

        let waker = Waker::from(Arc::new(RunLoopWaker(core.shared.clone())));
        let mut cx = Context::from_waker(&waker);
        let mut next = (main_thread.state() == ThreadState::Running).then(|| main_thread.clone());

        loop {
            core.drain_io_completions();
            let thread = match next.take().or_else(|| core.pick_next()) {
                Some(thread) => thread,
                None if core.has_io_waiters() => {
                    std::thread::park_timeout(core.config.idle_park_interval);
                    continue;
                }
                None => return core.deadlock(),
            };

            let foreign = thread.with_data(|data| data.suspended_at == Some(Suspension::Foreign));
            core.switch_to(&thread);
            let Some(mut body) = core.take_body(thread.id()) else {
                core.finish(&thread, Err(ThreadError::InvalidThreadId));
                continue;
            };

            // Runtime suspension points raise pending signals themselves;
            // a foreign await does not, so raise it here instead of polling.
            let interrupted = if foreign {
                thread.take_pending_signal()
            } else {
                None
            };
            let polled = match interrupted {
                Some(signal) => {
                    log::debug!("thread {} interrupted by {} at a foreign await", thread.id(), signal);
                    Poll::Ready(Err(signal.into()))
                }
                None => body.as_mut().poll(&mut cx),
            };

            match polled {
                Poll::Ready(result) => {
                    drop(body);
                    core.finish(&thread, result.clone());
                    if thread == main_thread {
                        if let Err(err) = &result {
                            log::error!("error in main thread: {}", err);
                            core.report(Report::MainFailed { error: err.clone() });
                        }
                        return result;
                    }
                }
                Poll::Pending => {
                    core.put_body(thread.id(), body);
                    if thread.state() == ThreadState::Running {
                        // suspended on something other than a runtime
                        // suspension point: reschedule it like a yield
                        thread.suspend(Suspension::Foreign);
                    }
                }
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Drain the reports addressed to the embedder.
    pub fn take_reports(&self) -> Vec<Report> {
        core::mem::take(&mut self.core.sched.borrow_mut().reports)
    }

    /// The last error that terminated any thread; `cleanup` clears it.
    pub fn last_error(&self, cleanup: bool) -> Option<ThreadError> {
        self.core.last_error(cleanup)
    }

    fn shutdown(&mut self) {
        let (bodies, current, others) = {
            let mut sched = self.core.sched.borrow_mut();
            let bodies: Vec<ThreadBody> = sched.bodies.drain().map(|(_, body)| body).collect();
            let current = sched.current.clone();
            let others: Vec<ThreadRef> = sched
                .registry
                .iter()
                .filter(|t| **t != current)
                .cloned()
                .collect();
            (bodies, current, others)
        };

        if matches!(current.state(), ThreadState::Blocked | ThreadState::Runnable) {
            current.with_bindings(|stack| stack.unbind_for_switch());
            current.set_state(ThreadState::Exited);
        }
        for thread in &others {
            thread.set_state(ThreadState::Exited);
        }
        // Guards inside unfinished bodies only pop frames now that their
        // owners have exited.
        drop(bodies);

        // queues and blockers reference each other
        for thread in others.iter().chain(Some(&current)) {
            thread.with_data(|data| {
                data.blocked_on = None;
                data.joiners.clear();
            });
        }

        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active.as_ref().is_some_and(|core| Rc::ptr_eq(core, &self.core)) {
                *active = None;
            }
        });
        log::debug!("runtime {} shut down", self.core.id);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
