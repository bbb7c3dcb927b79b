//! Cross-thread signal delivery.
//!
//! A signal is deposited in the target's pending slot. If the target is
//! blocked it is pulled out of the wait queue holding it and made Runnable;
//! the suspension point it was parked in raises the signal as an error once
//! the thread runs again.

use crate::error::{Signal, ThreadError, ThreadResult};
use crate::observability::{Counter, Report};
use crate::scheduler;
use crate::thread::{BlockedOn, ThreadRef};
use crate::value::Value;

/// Raise `kind`/`payload` in `target`.
///
/// Signalling the running thread fails immediately with the signal itself.
/// Signals aimed at the main thread are turned into a
/// [`Report::MainSignaled`] instead of being delivered.
pub fn signal(target: &ThreadRef, kind: impl Into<String>, payload: impl Into<Value>) -> ThreadResult<()> {
    deliver(target, Signal::new(kind, payload))
}

pub fn deliver(target: &ThreadRef, signal: Signal) -> ThreadResult<()> {
    let core = scheduler::with_core(|core| core.clone())?;
    core.check_owned(target)?;

    if *target == core.current() {
        return Err(ThreadError::Signal(signal));
    }
    if !target.is_alive() {
        log::trace!("signal {} to exited thread {} dropped", signal, target.id());
        return Ok(());
    }
    if target.is_main() {
        log::info!("signal {} aimed at the main thread", signal);
        core.report(Report::MainSignaled { signal });
        return Ok(());
    }

    log::debug!("signal {} delivered to thread {}", signal, target.id());
    if let Some(blocker) = target.deposit_signal(signal) {
        let removed = match &blocker {
            BlockedOn::Thread(joined) => joined.remove_joiner(target.id()),
            BlockedOn::Mutex(mutex) => mutex.remove_waiter(target.id()),
            BlockedOn::CondVar(condvar) => condvar.remove_waiter(target.id()),
            BlockedOn::Io(_) => true,
        };
        debug_assert!(removed, "blocked thread missing from its wait queue");
        target.interrupt();
    }
    core.metrics.record(Counter::SignalsDelivered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condvar::CondVar;
    use crate::mutex::Mutex;
    use crate::scheduler::Runtime;
    use crate::sync;
    use crate::thread::ThreadState;

    #[test]
    fn signal_to_self_raises_synchronously() {
        let _rt = Runtime::new().unwrap();
        let me = sync::current_thread().unwrap();
        assert_eq!(
            signal(&me, "quit", Value::Nil),
            Err(ThreadError::raise("quit", Value::Nil))
        );
    }

    #[test]
    fn signal_to_main_is_reported() {
        let rt = Runtime::new().unwrap();
        let main = rt.main_thread();
        let worker = sync::spawn(async move {
            signal(&main, "error", "from worker")?;
            Ok(Value::Nil)
        })
        .unwrap();
        let result = rt.block_on(async move { sync::join(&worker).await });
        assert_eq!(result, Ok(Value::Nil));
        assert_eq!(
            rt.take_reports(),
            vec![Report::MainSignaled {
                signal: Signal::new("error", "from worker")
            }]
        );
    }

    #[test]
    fn signal_to_exited_thread_is_a_no_op() {
        let rt = Runtime::new().unwrap();
        let worker = sync::spawn(async { Ok(Value::Int(1)) }).unwrap();
        let result = rt.block_on({
            let worker = worker.clone();
            async move {
                sync::join(&worker).await?;
                signal(&worker, "quit", Value::Nil)?;
                sync::join(&worker).await
            }
        });
        assert_eq!(result, Ok(Value::Int(1)));
        assert_eq!(rt.metrics().signals_delivered, 0);
    }

    #[test]
    fn signal_unblocks_mutex_waiter() {
        let rt = Runtime::new().unwrap();
        let m = Mutex::named("held");
        let waiter = sync::spawn({
            let m = m.clone();
            async move {
                m.lock().await?;
                Ok(Value::from("acquired"))
            }
        })
        .unwrap();

        let result = rt.block_on({
            let m = m.clone();
            let waiter = waiter.clone();
            async move {
                m.lock().await?;
                sync::yield_now().await?;
                assert_eq!(m.waiter_count(), 1);
                signal(&waiter, "quit", Value::Nil)?;
                assert_eq!(m.waiter_count(), 0);
                assert_eq!(waiter.state(), ThreadState::Runnable);
                let joined = sync::join(&waiter).await;
                m.unlock()?;
                joined
            }
        });
        assert_eq!(result, Err(ThreadError::raise("quit", Value::Nil)));
        assert!(!m.is_locked());
    }

    #[test]
    fn signal_unblocks_condition_waiter_and_reacquires() {
        let rt = Runtime::new().unwrap();
        let m = Mutex::new();
        let cv = CondVar::named(&m, "never");
        let waiter = sync::spawn({
            let cv = cv.clone();
            async move {
                cv.mutex().lock().await?;
                let waited = cv.wait().await;
                let held = cv.mutex().lock_count();
                cv.mutex().unlock()?;
                waited?;
                Ok(Value::Int(held as i64))
            }
        })
        .unwrap();

        let result = rt.block_on({
            let waiter = waiter.clone();
            let cv = cv.clone();
            async move {
                sync::yield_now().await?;
                assert_eq!(cv.waiter_count(), 1);
                signal(&waiter, "timeout", 5)?;
                sync::join(&waiter).await
            }
        });
        assert_eq!(result, Err(ThreadError::raise("timeout", 5)));
        assert_eq!(cv.waiter_count(), 0);
        assert!(!m.is_locked());
    }

    #[test]
    fn signal_before_start_terminates_the_thread() {
        let rt = Runtime::new().unwrap();
        let ran = std::rc::Rc::new(core::cell::Cell::new(false));
        let worker = sync::spawn({
            let ran = ran.clone();
            async move {
                ran.set(true);
                Ok(Value::Nil)
            }
        })
        .unwrap();
        signal(&worker, "quit", Value::Nil).unwrap();
        let result = rt.block_on(async move { sync::join(&worker).await });
        assert_eq!(result, Err(ThreadError::raise("quit", Value::Nil)));
        assert!(!ran.get());
    }
}
