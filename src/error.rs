use crate::value::Value;
use core::fmt;
use thiserror::Error;

/// An error raised inside a script thread.
///
/// Both errors a thread body raises on its own and signals injected by the
/// signal router travel as a `Signal`: a kind (the error symbol) plus an
/// arbitrary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: String,
    pub payload: Value,
}

impl Signal {
    pub fn new(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Signal {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// A signal with a `Nil` payload.
    pub fn bare(kind: impl Into<String>) -> Self {
        Signal::new(kind, Value::Nil)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_nil() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.payload)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThreadError {
    #[error("mutex is not owned by the calling thread")]
    NotOwner,
    #[error("condition variable's mutex is not held by the calling thread")]
    MutexNotHeld,
    #[error("condition wait requires the mutex to be held exactly once, held {0} times")]
    NestedWait(usize),
    #[error("thread reference does not belong to the active runtime")]
    InvalidThreadId,
    #[error("a thread cannot join itself")]
    JoinSelf,
    #[error("no runtime is active on this OS thread")]
    NoRuntime,
    #[error("a runtime is already active on this OS thread")]
    RuntimeActive,
    #[error("maximum number of threads reached")]
    MaxThreadsReached,
    #[error("no runnable thread remains")]
    Deadlock,
    #[error("{0}")]
    Signal(Signal),
}

impl ThreadError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadError::NotOwner => "Mutex not owned by caller",
            ThreadError::MutexNotHeld => "Condition mutex not held",
            ThreadError::NestedWait(_) => "Condition wait with nested mutex hold",
            ThreadError::InvalidThreadId => "Invalid thread ID provided",
            ThreadError::JoinSelf => "Thread joined itself",
            ThreadError::NoRuntime => "No active runtime",
            ThreadError::RuntimeActive => "Runtime already active",
            ThreadError::MaxThreadsReached => "Maximum number of threads reached",
            ThreadError::Deadlock => "No runnable thread remains",
            ThreadError::Signal(_) => "Signal raised",
        }
    }

    /// Shorthand for raising a script error from a thread body.
    pub fn raise(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        ThreadError::Signal(Signal::new(kind, payload))
    }

    pub fn signal(&self) -> Option<&Signal> {
        match self {
            ThreadError::Signal(signal) => Some(signal),
            _ => None,
        }
    }
}

impl From<Signal> for ThreadError {
    fn from(signal: Signal) -> Self {
        ThreadError::Signal(signal)
    }
}

pub type ThreadResult<T> = Result<T, ThreadError>;
