//! Thread builder for configuring thread creation.

use super::ThreadRef;
use crate::error::ThreadResult;
use crate::scheduler;
use crate::value::Value;
use core::future::Future;

/// Builder for configuring and creating new script threads.
///
/// This provides a convenient interface for setting thread parameters
/// before spawning, similar to std::thread::Builder.
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    /// Thread name (for introspection)
    name: Option<String>,
}

impl ThreadBuilder {
    /// Create a new thread builder with default settings.
    pub fn new() -> Self {
        Self { name: None }
    }

    /// Set the thread's display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Register a new thread running `body`.
    ///
    /// The thread starts Runnable with an empty binding stack and a copy of
    /// the spawner's current context. It does not run until the spawner
    /// reaches a suspension point.
    pub fn spawn<F>(self, body: F) -> ThreadResult<ThreadRef>
    where
        F: Future<Output = ThreadResult<Value>> + 'static,
    {
        scheduler::with_core(|core| core.spawn(self.name, Box::pin(body)))?
    }
}
