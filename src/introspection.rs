//! Read-only views of live threads for list/inspection front ends.

use crate::error::Signal;
use crate::scheduler;
use crate::thread::{BlockedOn, Suspension, ThreadId, ThreadRef, ThreadState};
use crate::value::Value;

/// What a blocked thread waits on, without keeping the object alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockerInfo {
    Thread(ThreadId),
    Mutex(Option<String>),
    CondVar(Option<String>),
    Io(String),
}

impl From<&BlockedOn> for BlockerInfo {
    fn from(on: &BlockedOn) -> Self {
        match on {
            BlockedOn::Thread(t) => BlockerInfo::Thread(t.id()),
            BlockedOn::Mutex(m) => BlockerInfo::Mutex(m.name().map(str::to_string)),
            BlockedOn::CondVar(cv) => BlockerInfo::CondVar(cv.name().map(str::to_string)),
            BlockedOn::Io(src) => BlockerInfo::Io(src.label().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: Option<String>,
    pub state: ThreadState,
    pub blocked_on: Option<BlockerInfo>,
}

/// A display snapshot of a thread's suspended continuation.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub info: ThreadInfo,
    pub suspended_at: Option<Suspension>,
    /// Dynamic bindings as the thread sees them, outermost first
    pub bindings: Vec<(String, Value)>,
    pub context: Option<Value>,
    pub pending_signal: Option<Signal>,
    pub interrupted: bool,
}

impl ThreadRef {
    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id(),
            name: self.name().map(str::to_string),
            state: self.state(),
            blocked_on: self.blocked_on().as_ref().map(BlockerInfo::from),
        }
    }

    /// Capture the thread's suspension site, bindings and context without
    /// touching scheduling state.
    pub fn snapshot(&self) -> ThreadSnapshot {
        let info = self.info();
        let active = info.state == ThreadState::Running;
        let live_context = if active {
            scheduler::with_core(|core| core.context.current()).ok()
        } else {
            None
        };
        self.with_data(|data| ThreadSnapshot {
            suspended_at: data.suspended_at,
            bindings: data.bindings.visible(active),
            context: match live_context {
                Some(context) => context,
                None => data.context.clone(),
            },
            pending_signal: data.pending_signal.clone(),
            interrupted: data.interrupted,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{bind, DynamicVar};
    use crate::mutex::Mutex;
    use crate::scheduler::Runtime;
    use crate::sync;

    #[test]
    fn running_thread_snapshot_reads_live_values() {
        let _rt = Runtime::new().unwrap();
        let var = DynamicVar::new("fill-column", 70);
        let _guard = bind(&var, 80).unwrap();
        let snapshot = sync::current_thread().unwrap().snapshot();
        assert_eq!(snapshot.info.state, ThreadState::Running);
        assert_eq!(snapshot.suspended_at, None);
        assert_eq!(snapshot.bindings, vec![("fill-column".to_string(), Value::Int(80))]);
    }

    #[test]
    fn blocked_thread_reports_its_blocker() {
        let rt = Runtime::new().unwrap();
        let m = Mutex::named("lock");
        let worker = sync::spawn({
            let m = m.clone();
            async move {
                m.lock().await?;
                m.unlock()?;
                Ok(Value::Nil)
            }
        })
        .unwrap();

        let result = rt.block_on({
            let m = m.clone();
            let worker = worker.clone();
            async move {
                m.lock().await?;
                sync::yield_now().await?;
                let info = worker.info();
                let snapshot = worker.snapshot();
                m.unlock()?;
                sync::join(&worker).await?;
                assert_eq!(info.state, ThreadState::Blocked);
                assert_eq!(info.blocked_on, Some(BlockerInfo::Mutex(Some("lock".into()))));
                assert_eq!(snapshot.suspended_at, Some(Suspension::MutexLock));
                Ok(Value::Nil)
            }
        });
        assert_eq!(result, Ok(Value::Nil));
    }
}
