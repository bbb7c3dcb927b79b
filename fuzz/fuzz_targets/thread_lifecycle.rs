#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use coop_threads::{signal, sync, Runtime, RuntimeConfig, ThreadBuilder, ThreadError, ThreadRef, Value};
use libfuzzer_sys::fuzz_target;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Arbitrary)]
struct ThreadConfig {
    name: Option<u8>,
    yields: u8,
    fail: bool,
    joins: Option<u8>,
}

#[derive(Debug, Arbitrary)]
enum ThreadOperation {
    Spawn(ThreadConfig),
    Join(u8),
    Signal(u8),
    GetState(u8),
    Yield,
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);

    let operations: Result<Vec<ThreadOperation>, _> = (0..64)
        .map(|_| ThreadOperation::arbitrary(&mut u))
        .collect();

    if let Ok(ops) = operations {
        fuzz_thread_lifecycle(ops);
    }
});

fn pick(threads: &RefCell<Vec<ThreadRef>>, idx: u8) -> Option<ThreadRef> {
    let threads = threads.borrow();
    if threads.is_empty() {
        None
    } else {
        Some(threads[idx as usize % threads.len()].clone())
    }
}

fn fuzz_thread_lifecycle(operations: Vec<ThreadOperation>) {
    let Ok(rt) = Runtime::with_config(RuntimeConfig::new().max_threads(32)) else {
        return;
    };
    let threads: Rc<RefCell<Vec<ThreadRef>>> = Rc::new(RefCell::new(Vec::new()));

    let result = rt.block_on({
        let threads = threads.clone();
        async move {
            for op in operations {
                match op {
                    ThreadOperation::Spawn(config) => {
                        let mut builder = ThreadBuilder::new();
                        if let Some(n) = config.name {
                            builder = builder.name(format!("fuzz-{}", n));
                        }
                        let target = config.joins.and_then(|idx| pick(&threads, idx));
                        let spawned = builder.spawn(async move {
                            for _ in 0..config.yields % 8 {
                                sync::yield_now().await?;
                            }
                            if let Some(target) = target {
                                let _ = sync::join(&target).await;
                            }
                            if config.fail {
                                return Err(ThreadError::raise("error", "fuzz"));
                            }
                            Ok(Value::Int(config.yields as i64))
                        });
                        match spawned {
                            Ok(thread) => threads.borrow_mut().push(thread),
                            Err(err) => assert_eq!(err, ThreadError::MaxThreadsReached),
                        }
                    }
                    ThreadOperation::Join(idx) => {
                        if let Some(thread) = pick(&threads, idx) {
                            let _ = sync::join(&thread).await;
                            assert!(!thread.is_alive());
                        }
                    }
                    ThreadOperation::Signal(idx) => {
                        if let Some(thread) = pick(&threads, idx) {
                            signal(&thread, "quit", Value::Nil)?;
                        }
                    }
                    ThreadOperation::GetState(idx) => {
                        if let Some(thread) = pick(&threads, idx) {
                            let _ = thread.snapshot();
                        }
                    }
                    ThreadOperation::Yield => {
                        sync::yield_now().await?;
                    }
                }
            }

            let all: Vec<ThreadRef> = threads.borrow().clone();
            for thread in &all {
                let _ = sync::join(thread).await;
            }
            Ok(Value::Nil)
        }
    });

    // threads only ever join ones spawned before them
    assert_eq!(result, Ok(Value::Nil));
}
