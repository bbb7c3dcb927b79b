//! Dynamic variables and per-thread binding stacks.
//!
//! A [`DynamicVar`] is a process-wide cell. [`bind`] pushes a frame on the
//! running thread's binding stack and installs the new value; dropping the
//! returned guard pops back to the guard's depth and restores the saved
//! values, on normal exit and on `?` propagation alike.
//!
//! While a thread is switched out its frames are swapped out of the cells:
//! each frame stashes the thread's value and the cell gets the shared value
//! back. Switching in swaps them again, bottom to top. The cell therefore
//! always holds the value visible to the running thread.

use crate::error::ThreadResult;
use crate::scheduler;
use crate::thread::{ThreadRef, ThreadState};
use crate::value::Value;
use core::fmt;
use core::future::Future;
use std::sync::Arc;

struct VarCell {
    name: String,
    value: spin::Mutex<Value>,
}

/// A dynamically scoped global variable.
#[derive(Clone)]
pub struct DynamicVar {
    inner: Arc<VarCell>,
}

impl DynamicVar {
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        DynamicVar {
            inner: Arc::new(VarCell {
                name: name.into(),
                value: spin::Mutex::new(default.into()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The value visible to the running thread.
    pub fn get(&self) -> Value {
        self.inner.value.lock().clone()
    }

    /// Assign the innermost binding visible to the running thread, or the
    /// shared value if it has none.
    pub fn set(&self, value: impl Into<Value>) {
        *self.inner.value.lock() = value.into();
    }

    pub fn ptr_eq(&self, other: &DynamicVar) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn swap(&self, value: &mut Value) {
        core::mem::swap(&mut *self.inner.value.lock(), value);
    }
}

impl fmt::Debug for DynamicVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicVar")
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

struct Frame {
    var: DynamicVar,
    /// Prior value while the owner runs; the owner's value while it is
    /// switched out.
    saved: Value,
}

#[derive(Default)]
pub(crate) struct BindingStack {
    frames: Vec<Frame>,
}

impl BindingStack {
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind `var` to `value` for the running owner.
    pub(crate) fn push(&mut self, var: DynamicVar, value: Value) {
        let mut saved = value;
        var.swap(&mut saved);
        self.frames.push(Frame { var, saved });
    }

    /// Pop frames down to `depth`. Cells are only restored when the owner is
    /// the running thread; otherwise they hold someone else's view.
    pub(crate) fn unwind_to(&mut self, depth: usize, active: bool) {
        while self.frames.len() > depth {
            if let Some(frame) = self.frames.pop() {
                if active {
                    frame.var.set(frame.saved);
                }
            }
        }
    }

    pub(crate) fn unbind_for_switch(&mut self) {
        for frame in self.frames.iter_mut().rev() {
            frame.var.swap(&mut frame.saved);
        }
    }

    pub(crate) fn rebind_for_switch(&mut self) {
        for frame in self.frames.iter_mut() {
            frame.var.swap(&mut frame.saved);
        }
    }

    /// (name, value) pairs as the owner sees them, outermost first.
    pub(crate) fn visible(&self, active: bool) -> Vec<(String, Value)> {
        self.frames
            .iter()
            .map(|frame| {
                let value = if active {
                    frame.var.get()
                } else {
                    frame.saved.clone()
                };
                (frame.var.name().to_string(), value)
            })
            .collect()
    }
}

/// Restores a dynamic binding when dropped.
#[must_use = "the binding is undone as soon as the guard is dropped"]
pub struct BindingGuard {
    owner: ThreadRef,
    depth: usize,
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let active = self.owner.state() == ThreadState::Running;
        self.owner
            .with_bindings(|stack| stack.unwind_to(self.depth, active));
    }
}

/// Dynamically bind `var` to `value` in the running thread.
pub fn bind(var: &DynamicVar, value: impl Into<Value>) -> ThreadResult<BindingGuard> {
    let owner = scheduler::current()?;
    let value = value.into();
    let depth = owner.with_bindings(|stack| {
        let depth = stack.depth();
        stack.push(var.clone(), value);
        depth
    });
    log::trace!("thread {} bound {} at depth {}", owner.id(), var.name(), depth);
    Ok(BindingGuard { owner, depth })
}

/// Run `body` with `var` bound to `value`.
pub async fn with_binding<F, Fut, T>(var: &DynamicVar, value: impl Into<Value>, body: F) -> ThreadResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ThreadResult<T>>,
{
    let _guard = bind(var, value)?;
    body().await
}
