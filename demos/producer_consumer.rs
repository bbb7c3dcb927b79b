//! Producer-Consumer example using thread coordination
//!
//! This example demonstrates:
//! - A bounded work queue guarded by a mutex and two condition variables
//! - Per-thread dynamic bindings
//! - Stopping a blocked consumer with a signal
//!
//! Run with `RUST_LOG=debug` to watch the scheduler.

use coop_threads::{
    bind, signal, sync, CondVar, DynamicVar, Mutex, Runtime, ThreadBuilder, ThreadError, Value,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

const QUEUE_CAPACITY: usize = 4;
const ITEMS: i64 = 12;

fn main() -> Result<(), ThreadError> {
    env_logger::init();

    let rt = Runtime::new()?;
    let lock = Mutex::named("queue");
    let not_empty = CondVar::named(&lock, "not-empty");
    let not_full = CondVar::named(&lock, "not-full");
    let queue = Rc::new(RefCell::new(VecDeque::new()));
    let role = DynamicVar::new("role", "idle");

    let producer = ThreadBuilder::new().name("producer").spawn({
        let (not_empty, not_full, queue, role) =
            (not_empty.clone(), not_full.clone(), queue.clone(), role.clone());
        async move {
            let _role = bind(&role, "producer")?;
            for item in 0..ITEMS {
                not_full.mutex().lock().await?;
                while queue.borrow().len() >= QUEUE_CAPACITY {
                    not_full.wait().await?;
                }
                queue.borrow_mut().push_back(item);
                println!("[{}] produced {}", role.get(), item);
                not_empty.notify_one()?;
                not_full.mutex().unlock()?;
            }
            Ok(Value::Int(ITEMS))
        }
    })?;

    let consumer = ThreadBuilder::new().name("consumer").spawn({
        let (not_empty, not_full, queue, role) =
            (not_empty.clone(), not_full.clone(), queue.clone(), role.clone());
        async move {
            let _role = bind(&role, "consumer")?;
            let mut total = 0;
            loop {
                not_empty.mutex().lock().await?;
                while queue.borrow().is_empty() {
                    if let Err(err) = not_empty.wait().await {
                        not_empty.mutex().unlock()?;
                        println!("[{}] stopped by {}, total {}", role.get(), err, total);
                        return Ok(Value::Int(total));
                    }
                }
                let item = queue.borrow_mut().pop_front().unwrap_or_default();
                total += item;
                println!("[{}] consumed {}", role.get(), item);
                not_full.notify_one()?;
                not_empty.mutex().unlock()?;
                sync::yield_now().await?;
            }
        }
    })?;

    let result = rt.block_on({
        let consumer = consumer.clone();
        async move {
            let produced = sync::join(&producer).await?;
            // drained, and the consumer parked waiting for more
            while !queue.borrow().is_empty() || not_empty.waiter_count() == 0 {
                sync::yield_now().await?;
            }
            signal(&consumer, "done", Value::Nil)?;
            let total = sync::join(&consumer).await?;
            Ok(Value::list([produced, total]))
        }
    })?;

    println!("[{}] produced/consumed: {}", role.get(), result);
    let metrics = rt.metrics();
    println!(
        "switches: {}, condition waits: {}, signals: {}",
        metrics.context_switches, metrics.cond_waits, metrics.signals_delivered
    );
    Ok(())
}
