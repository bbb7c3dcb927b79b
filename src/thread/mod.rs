//! Thread control blocks.
//!
//! A [`ThreadRef`] is a reference-counted handle to one logical script
//! thread. The scheduler keeps one in its registry while the thread is live;
//! user code keeps others for `join`, `signal` and introspection. The exit
//! result lives in the control block, so a handle stays joinable after the
//! registry has dropped the thread.

use crate::binding::BindingStack;
use crate::condvar::CondVar;
use crate::error::{Signal, ThreadResult};
use crate::io::IoSource;
use crate::mutex::Mutex;
use crate::value::Value;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::num::NonZeroU64;
use portable_atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub mod builder;

pub use builder::ThreadBuilder;

/// Unique identifier for threads.
///
/// Thread IDs are never reused within a runtime and are guaranteed to be
/// non-zero. The main thread is always `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    pub(crate) const MAIN: ThreadId = ThreadId(NonZeroU64::MIN);

    pub(crate) fn from_raw(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(ThreadId)
    }

    /// Get the raw ID value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is ready to run
    Runnable = 0,
    /// Thread is the one executing script code
    Running = 1,
    /// Thread is waiting on a join, mutex, condition variable or I/O source
    Blocked = 2,
    /// Thread body has returned or raised
    Exited = 3,
}

impl ThreadState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ThreadState::Runnable,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            _ => ThreadState::Exited,
        }
    }
}

/// Where a suspended thread's continuation is parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    NotStarted,
    Yield,
    Join,
    MutexLock,
    CondWait,
    Io,
    /// Pending on a future the runtime does not know about
    Foreign,
}

impl Suspension {
    pub fn as_str(self) -> &'static str {
        match self {
            Suspension::NotStarted => "not-started",
            Suspension::Yield => "thread-yield",
            Suspension::Join => "thread-join",
            Suspension::MutexLock => "mutex-lock",
            Suspension::CondWait => "condition-wait",
            Suspension::Io => "io-wait",
            Suspension::Foreign => "foreign-await",
        }
    }
}

/// The object a blocked thread waits on.
#[derive(Clone)]
pub enum BlockedOn {
    Thread(ThreadRef),
    Mutex(Mutex),
    CondVar(CondVar),
    Io(IoSource),
}

impl fmt::Debug for BlockedOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedOn::Thread(t) => write!(f, "Thread({})", t.id()),
            BlockedOn::Mutex(m) => write!(f, "Mutex({:?})", m.name()),
            BlockedOn::CondVar(cv) => write!(f, "CondVar({:?})", cv.name()),
            BlockedOn::Io(src) => write!(f, "Io({:?})", src.label()),
        }
    }
}

/// Mutable part of a control block.
pub(crate) struct ThreadData {
    pub(crate) blocked_on: Option<BlockedOn>,
    pub(crate) suspended_at: Option<Suspension>,
    pub(crate) pending_signal: Option<Signal>,
    pub(crate) interrupted: bool,
    pub(crate) exit_result: Option<ThreadResult<Value>>,
    pub(crate) bindings: BindingStack,
    /// Saved current context while the thread is switched out
    pub(crate) context: Option<Value>,
    pub(crate) joiners: Vec<ThreadRef>,
}

pub(crate) struct ThreadInner {
    id: ThreadId,
    runtime: u64,
    name: Option<String>,
    main: bool,
    state: AtomicU8,
    data: spin::Mutex<ThreadData>,
}

/// Handle to a script thread.
#[derive(Clone)]
pub struct ThreadRef {
    inner: Arc<ThreadInner>,
}

impl ThreadRef {
    pub(crate) fn new(
        id: ThreadId,
        runtime: u64,
        name: Option<String>,
        state: ThreadState,
        context: Option<Value>,
    ) -> Self {
        let suspended_at = (state == ThreadState::Runnable).then_some(Suspension::NotStarted);
        let inner = ThreadInner {
            id,
            runtime,
            name,
            main: id == ThreadId::MAIN,
            state: AtomicU8::new(state as u8),
            data: spin::Mutex::new(ThreadData {
                blocked_on: None,
                suspended_at,
                pending_signal: None,
                interrupted: false,
                exit_result: None,
                bindings: BindingStack::default(),
                context,
                joiners: Vec::new(),
            }),
        };
        ThreadRef {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn is_main(&self) -> bool {
        self.inner.main
    }

    pub(crate) fn runtime_id(&self) -> u64 {
        self.inner.runtime
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.state() != ThreadState::Exited
    }

    pub fn blocked_on(&self) -> Option<BlockedOn> {
        self.inner.data.lock().blocked_on.clone()
    }

    /// The thread's result once it has exited.
    pub fn exit_result(&self) -> Option<ThreadResult<Value>> {
        self.inner.data.lock().exit_result.clone()
    }

    pub fn has_pending_signal(&self) -> bool {
        self.inner.data.lock().pending_signal.is_some()
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut ThreadData) -> R) -> R {
        f(&mut self.inner.data.lock())
    }

    pub(crate) fn with_bindings<R>(&self, f: impl FnOnce(&mut BindingStack) -> R) -> R {
        f(&mut self.inner.data.lock().bindings)
    }

    /// Park the running thread on `on`.
    pub(crate) fn block(&self, on: BlockedOn, site: Suspension) {
        self.with_data(|data| {
            debug_assert!(data.blocked_on.is_none(), "thread blocked on two objects");
            data.blocked_on = Some(on);
            data.suspended_at = Some(site);
        });
        self.set_state(ThreadState::Blocked);
    }

    /// Park the running thread without a blocker (yield).
    pub(crate) fn suspend(&self, site: Suspension) {
        self.with_data(|data| data.suspended_at = Some(site));
        self.set_state(ThreadState::Runnable);
    }

    /// Move a blocked thread back to the run queue. Returns false if the
    /// thread was not blocked.
    pub(crate) fn make_runnable(&self) -> bool {
        if self.state() != ThreadState::Blocked {
            return false;
        }
        self.with_data(|data| data.blocked_on = None);
        self.set_state(ThreadState::Runnable);
        true
    }

    pub(crate) fn resume(&self) {
        self.with_data(|data| data.suspended_at = None);
        self.set_state(ThreadState::Running);
    }

    /// Store `signal` in the pending slot. Returns the blocker if the thread
    /// is currently blocked.
    pub(crate) fn deposit_signal(&self, signal: Signal) -> Option<BlockedOn> {
        let blocked = self.state() == ThreadState::Blocked;
        self.with_data(|data| {
            data.pending_signal = Some(signal);
            if blocked {
                data.blocked_on.clone()
            } else {
                None
            }
        })
    }

    /// Wake a blocked thread because a signal arrived.
    pub(crate) fn interrupt(&self) {
        self.with_data(|data| {
            data.interrupted = true;
            data.blocked_on = None;
        });
        self.set_state(ThreadState::Runnable);
    }

    pub(crate) fn take_pending_signal(&self) -> Option<Signal> {
        self.with_data(|data| {
            data.interrupted = false;
            data.pending_signal.take()
        })
    }

    pub(crate) fn add_joiner(&self, joiner: ThreadRef) {
        self.with_data(|data| {
            if !data.joiners.contains(&joiner) {
                data.joiners.push(joiner);
            }
        });
    }

    pub(crate) fn remove_joiner(&self, id: ThreadId) -> bool {
        self.with_data(|data| {
            let before = data.joiners.len();
            data.joiners.retain(|t| t.id() != id);
            data.joiners.len() != before
        })
    }

    /// Record the exit result and hand back the threads waiting in `join`.
    pub(crate) fn finish(&self, result: ThreadResult<Value>) -> Vec<ThreadRef> {
        let joiners = self.with_data(|data| {
            data.exit_result = Some(result);
            data.blocked_on = None;
            data.suspended_at = None;
            data.pending_signal = None;
            core::mem::take(&mut data.joiners)
        });
        self.set_state(ThreadState::Exited);
        joiners
    }
}

impl PartialEq for ThreadRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ThreadRef {}

impl Hash for ThreadRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.runtime.hash(state);
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRef")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(id: u64, state: ThreadState) -> ThreadRef {
        ThreadRef::new(ThreadId::from_raw(id).unwrap(), 7, None, state, None)
    }

    #[test]
    fn test_thread_state_transitions() {
        let t = thread(2, ThreadState::Runnable);
        assert_eq!(t.state(), ThreadState::Runnable);
        assert!(!t.is_main());

        t.resume();
        assert_eq!(t.state(), ThreadState::Running);

        t.block(BlockedOn::Mutex(Mutex::new()), Suspension::MutexLock);
        assert_eq!(t.state(), ThreadState::Blocked);
        assert!(t.blocked_on().is_some());

        assert!(t.make_runnable());
        assert!(t.blocked_on().is_none());
        assert!(!t.make_runnable());

        let joiners = t.finish(Ok(Value::Int(1)));
        assert!(joiners.is_empty());
        assert_eq!(t.state(), ThreadState::Exited);
        assert!(!t.is_alive());
        assert_eq!(t.exit_result(), Some(Ok(Value::Int(1))));
    }

    #[test]
    fn test_main_thread_id() {
        let main = thread(1, ThreadState::Running);
        assert!(main.is_main());
        assert_eq!(main.id().get(), 1);
        assert_eq!(main.id().to_string(), "#1");
    }

    #[test]
    fn test_signal_deposit_reports_blocker_only_when_blocked() {
        let t = thread(3, ThreadState::Runnable);
        assert!(t.deposit_signal(Signal::bare("quit")).is_none());
        assert!(t.has_pending_signal());
        assert_eq!(t.take_pending_signal(), Some(Signal::bare("quit")));

        t.resume();
        t.block(BlockedOn::Mutex(Mutex::new()), Suspension::MutexLock);
        assert!(t.deposit_signal(Signal::bare("quit")).is_some());
        t.interrupt();
        assert_eq!(t.state(), ThreadState::Runnable);
        assert!(t.blocked_on().is_none());
    }

    #[test]
    fn test_joiners_are_released_on_finish() {
        let target = thread(4, ThreadState::Runnable);
        let waiter = thread(5, ThreadState::Blocked);
        target.add_joiner(waiter.clone());
        target.add_joiner(waiter.clone());
        let joiners = target.finish(Ok(Value::Nil));
        assert_eq!(joiners, vec![waiter]);
    }
}
