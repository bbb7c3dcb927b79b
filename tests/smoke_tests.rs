//! Smoke tests to verify basic functionality through the public API

use std::cell::Cell;
use std::rc::Rc;

use coop_threads::{
    bind, io, signal, sync, with_mutex, BlockerInfo, CondVar, DynamicVar, Mutex, Report, Runtime,
    RuntimeConfig, Signal, ThreadBuilder, ThreadError, ThreadState, Value,
};

/// Basic thread spawn and join test
#[test]
fn test_basic_thread_spawn_join() {
    let rt = Runtime::new().expect("runtime");
    let worker = ThreadBuilder::new()
        .name("basic-test-thread")
        .spawn(async { Ok(Value::Int(42)) })
        .expect("spawn");

    assert_eq!(worker.name(), Some("basic-test-thread"));
    assert_eq!(worker.state(), ThreadState::Runnable);

    let result = rt.block_on({
        let worker = worker.clone();
        async move { sync::join(&worker).await }
    });
    assert_eq!(result, Ok(Value::Int(42)));
    assert!(!worker.is_alive());
}

/// Test multiple thread spawning
#[test]
fn test_multiple_threads() {
    let rt = Runtime::new().unwrap();
    let counter = Rc::new(Cell::new(0));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let counter = counter.clone();
            ThreadBuilder::new()
                .name(format!("worker-{}", i))
                .spawn(async move {
                    counter.set(counter.get() + 1);
                    Ok(Value::Nil)
                })
                .unwrap()
        })
        .collect();

    rt.block_on(async move {
        for handle in &handles {
            sync::join(handle).await?;
        }
        Ok(Value::Nil)
    })
    .unwrap();

    assert_eq!(counter.get(), 10);
    let metrics = rt.metrics();
    assert_eq!(metrics.spawned, 10);
    assert_eq!(metrics.live_spawned(), 0);
}

/// Test mutex functionality
#[test]
fn test_mutex_basic() {
    let rt = Runtime::new().unwrap();
    let m = Mutex::named("basic");
    let result = rt.block_on({
        let m = m.clone();
        async move {
            let held = m.clone();
            with_mutex(&m, || async move {
                assert!(held.is_locked());
                assert_eq!(held.owner().map(|t| t.is_main()), Some(true));
                Ok(Value::Nil)
            })
            .await
        }
    });
    assert_eq!(result, Ok(Value::Nil));
    assert!(!m.is_locked());
}

/// Unlocking from a thread that does not own the mutex fails loudly
#[test]
fn test_mutex_unlock_from_other_thread() {
    let rt = Runtime::new().unwrap();
    let m = Mutex::new();
    let intruder = sync::spawn({
        let m = m.clone();
        async move {
            m.unlock()?;
            Ok(Value::Nil)
        }
    })
    .unwrap();

    let result = rt.block_on({
        let m = m.clone();
        async move {
            m.lock().await?;
            let joined = sync::join(&intruder).await;
            m.unlock()?;
            joined
        }
    });
    assert_eq!(result, Err(ThreadError::NotOwner));
}

/// Condition variable handshake through the public API
#[test]
fn test_condition_variable_basic() {
    let rt = Runtime::new().unwrap();
    let m = Mutex::new();
    let cv = CondVar::named(&m, "flag");
    let flag = Rc::new(Cell::new(false));

    let setter = sync::spawn({
        let cv = cv.clone();
        let flag = flag.clone();
        async move {
            cv.mutex().lock().await?;
            flag.set(true);
            cv.notify_all()?;
            cv.mutex().unlock()?;
            Ok(Value::Nil)
        }
    })
    .unwrap();

    let result = rt.block_on({
        let cv = cv.clone();
        let flag = flag.clone();
        async move {
            cv.mutex().lock().await?;
            while !flag.get() {
                cv.wait().await?;
            }
            cv.mutex().unlock()?;
            sync::join(&setter).await?;
            Ok(Value::Bool(flag.get()))
        }
    });
    assert_eq!(result, Ok(Value::Bool(true)));
}

/// Dynamic bindings made by one thread are invisible to another
#[test]
fn test_dynamic_binding_visibility() {
    let rt = Runtime::new().unwrap();
    let var = DynamicVar::new("default-directory", "/");
    let worker = sync::spawn({
        let var = var.clone();
        async move {
            let _guard = bind(&var, "/tmp")?;
            sync::yield_now().await?;
            Ok(var.get())
        }
    })
    .unwrap();

    let result = rt.block_on({
        let var = var.clone();
        async move {
            sync::yield_now().await?;
            let mine = var.get();
            let theirs = sync::join(&worker).await?;
            Ok(Value::list([mine, theirs]))
        }
    });
    assert_eq!(
        result,
        Ok(Value::list([Value::from("/"), Value::from("/tmp")]))
    );
}

/// Test signal delivery to a thread blocked in condition-wait
#[test]
fn test_signal_wakes_condition_waiter() {
    let rt = Runtime::new().unwrap();
    let m = Mutex::new();
    let cv = CondVar::named(&m, "forever");
    let waiter = sync::spawn({
        let cv = cv.clone();
        async move {
            cv.mutex().lock().await?;
            let waited = cv.wait().await;
            cv.mutex().unlock()?;
            waited?;
            Ok(Value::Nil)
        }
    })
    .unwrap();

    let result = rt.block_on({
        let waiter = waiter.clone();
        async move {
            sync::yield_now().await?;
            let info = waiter.info();
            assert_eq!(info.blocked_on, Some(BlockerInfo::CondVar(Some("forever".into()))));
            signal(&waiter, "quit", Value::Nil)?;
            sync::join(&waiter).await
        }
    });
    assert_eq!(result, Err(ThreadError::Signal(Signal::bare("quit"))));
    assert_eq!(rt.metrics().signals_delivered, 1);
}

/// A cycle of waits is reported to the embedder instead of hanging
#[test]
fn test_deadlock_surfaces_report() {
    let rt = Runtime::new().unwrap();
    let a = Mutex::named("a");
    let b = Mutex::named("b");
    sync::spawn({
        let (a, b) = (a.clone(), b.clone());
        async move {
            b.lock().await?;
            sync::yield_now().await?;
            a.lock().await?;
            Ok(Value::Nil)
        }
    })
    .unwrap();

    let result = rt.block_on(async move {
        a.lock().await?;
        sync::yield_now().await?;
        b.lock().await?;
        Ok(Value::Nil)
    });
    assert_eq!(result, Err(ThreadError::Deadlock));
    let reports = rt.take_reports();
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        Report::Deadlock { blocked } => {
            assert_eq!(blocked.len(), 2);
            assert!(blocked.iter().all(|t| t.state == ThreadState::Blocked));
        }
        other => panic!("unexpected report {:?}", other),
    }
    assert_eq!(rt.metrics().deadlocks, 1);
}

/// I/O completions from a worker OS thread wake the waiting script thread
#[test]
fn test_io_wait_between_threads() {
    let rt = Runtime::with_config(
        RuntimeConfig::new().idle_park_interval(std::time::Duration::from_millis(1)),
    )
    .unwrap();
    let reader = sync::spawn(async {
        let (completion, wait) = io::begin_io("stdin")?;
        std::thread::spawn(move || completion.complete(Ok(Value::from("line"))));
        wait.await
    })
    .unwrap();

    let result = rt.block_on(async move { sync::join(&reader).await });
    assert_eq!(result, Ok(Value::from("line")));
    assert_eq!(rt.metrics().io_waits, 1);
}
