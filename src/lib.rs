//! Cooperative threads for an embedded scripting runtime.
//!
//! Script threads are futures multiplexed on one OS thread. Exactly one of
//! them runs at a time, and control only changes hands at the suspension
//! points this crate provides: [`yield_now`], [`join`], [`Mutex::lock`],
//! [`CondVar::wait`] and [`io::begin_io`]. Each thread keeps its own view of
//! dynamic variables and of the current context across switches, and can be
//! interrupted by a [`signal`] from another thread.
//!
//! ```no_run
//! use coop_threads::{sync, Mutex, Runtime, Value};
//!
//! let rt = Runtime::new()?;
//! let counter = Mutex::named("counter");
//! let worker = sync::spawn({
//!     let counter = counter.clone();
//!     async move {
//!         counter.lock().await?;
//!         counter.unlock()?;
//!         Ok(Value::Int(1))
//!     }
//! })?;
//! let result = rt.block_on(async move { sync::join(&worker).await })?;
//! assert_eq!(result, Value::Int(1));
//! # Ok::<(), coop_threads::ThreadError>(())
//! ```

pub mod binding;
pub mod condvar;
pub mod config;
pub mod context;
pub mod error;
pub mod introspection;
pub mod io;
pub mod mutex;
pub mod observability;
pub mod scheduler;
pub mod signal;
pub mod sync;
pub mod thread;
pub mod value;


pub use binding::{bind, with_binding, BindingGuard, DynamicVar};
pub use condvar::CondVar;
pub use config::RuntimeConfig;
pub use context::{current_context, set_current_context, ContextHost, ContextSlot};
pub use error::{Signal, ThreadError, ThreadResult};
pub use introspection::{BlockerInfo, ThreadInfo, ThreadSnapshot};
pub use mutex::{with_mutex, Mutex, MutexGuard};
pub use observability::{MetricsSnapshot, Report};
pub use scheduler::Runtime;
pub use signal::signal;
pub use sync::{join, spawn, yield_now};
pub use thread::{Suspension, ThreadBuilder, ThreadId, ThreadRef, ThreadState};
pub use value::Value;
