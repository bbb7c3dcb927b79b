//! The per-thread "current context" slot.
//!
//! Other subsystems read one process-wide current-context slot (the document
//! or buffer script code is "inside"). The scheduler saves the slot into the
//! outgoing thread's control block and loads the incoming thread's value on
//! every switch, so each thread observes its own context.

use crate::error::ThreadResult;
use crate::scheduler;
use crate::value::Value;
use std::rc::Rc;
use std::sync::Arc;

/// Accessor for the embedder's current-context slot.
pub trait ContextHost: 'static {
    fn current(&self) -> Option<Value>;
    fn set_current(&self, context: Option<Value>);
}

/// Default in-memory context slot.
#[derive(Debug, Default)]
pub struct ContextSlot {
    slot: spin::Mutex<Option<Value>>,
}

impl ContextSlot {
    pub fn new(initial: Option<Value>) -> Self {
        Self {
            slot: spin::Mutex::new(initial),
        }
    }
}

impl ContextHost for ContextSlot {
    fn current(&self) -> Option<Value> {
        self.slot.lock().clone()
    }

    fn set_current(&self, context: Option<Value>) {
        *self.slot.lock() = context;
    }
}

impl<T: ContextHost> ContextHost for Rc<T> {
    fn current(&self) -> Option<Value> {
        (**self).current()
    }

    fn set_current(&self, context: Option<Value>) {
        (**self).set_current(context)
    }
}

impl<T: ContextHost> ContextHost for Arc<T> {
    fn current(&self) -> Option<Value> {
        (**self).current()
    }

    fn set_current(&self, context: Option<Value>) {
        (**self).set_current(context)
    }
}

/// The running thread's current context.
pub fn current_context() -> ThreadResult<Option<Value>> {
    scheduler::with_core(|core| core.context.current())
}

/// Replace the running thread's current context.
pub fn set_current_context(context: Option<Value>) -> ThreadResult<()> {
    scheduler::with_core(|core| core.context.set_current(context))
}
