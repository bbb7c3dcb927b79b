#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use coop_threads::{bind, sync, CondVar, DynamicVar, Mutex, Runtime, ThreadError, Value};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Copy, Arbitrary)]
enum SyncOperation {
    Lock,
    Unlock,
    Wait,
    Notify { all: bool },
    Bind(i8),
    Yield,
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let scripts: Result<Vec<Vec<SyncOperation>>, _> = (0..4)
        .map(|_| Vec::<SyncOperation>::arbitrary(&mut u))
        .collect();
    if let Ok(scripts) = scripts {
        fuzz_sync_primitives(scripts);
    }
});

fn fuzz_sync_primitives(scripts: Vec<Vec<SyncOperation>>) {
    let Ok(rt) = Runtime::new() else { return };
    let m = Mutex::named("fuzz");
    let cv = CondVar::new(&m);
    let var = DynamicVar::new("fuzz-var", 0);

    let threads: Vec<_> = scripts
        .into_iter()
        .filter_map(|script| {
            let (m, cv, var) = (m.clone(), cv.clone(), var.clone());
            sync::spawn(async move {
                let mut guards = Vec::new();
                let mut held = 0usize;
                for op in script.into_iter().take(64) {
                    match op {
                        SyncOperation::Lock => {
                            m.lock().await?;
                            held += 1;
                            assert_eq!(m.lock_count(), held);
                        }
                        SyncOperation::Unlock => match m.unlock() {
                            Ok(()) => held -= 1,
                            Err(err) => {
                                assert_eq!(held, 0);
                                assert_eq!(err, ThreadError::NotOwner);
                            }
                        },
                        SyncOperation::Wait => match cv.wait().await {
                            Ok(()) => assert_eq!(m.lock_count(), 1),
                            Err(ThreadError::MutexNotHeld) => assert_eq!(held, 0),
                            Err(ThreadError::NestedWait(n)) => assert_eq!(n, held),
                            Err(err) => return Err(err),
                        },
                        SyncOperation::Notify { all } => {
                            let _ = cv.notify(all);
                        }
                        SyncOperation::Bind(n) => {
                            guards.push(bind(&var, n as i64)?);
                            assert_eq!(var.get(), Value::Int(n as i64));
                        }
                        SyncOperation::Yield => sync::yield_now().await?,
                    }
                }
                drop(guards);
                for _ in 0..held {
                    m.unlock()?;
                }
                Ok(Value::Nil)
            })
            .ok()
        })
        .collect();

    let result = rt.block_on(async move {
        for thread in &threads {
            sync::join(thread).await?;
        }
        Ok(Value::Nil)
    });

    // threads may wait on the condition with nobody left to notify
    match result {
        Ok(_) => {
            assert!(!m.is_locked());
            assert_eq!(var.get(), Value::Int(0));
        }
        Err(err) => assert_eq!(err, ThreadError::Deadlock),
    }
}
