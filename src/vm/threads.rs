//! Forked executors and their futures.
//!
//! Each forked call runs on its own named OS thread with a fresh executor.
//! The parent receives a [`FutureCell`] immediately and observes the result
//! only through [`FutureCell::wait_for`] or [`FutureCell::block`].

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::error::Fault;
use super::value::Value;

/// Fork ID counter for generating unique IDs.
static NEXT_FORK_ID: AtomicUsize = AtomicUsize::new(1);

fn next_fork_id() -> usize {
    NEXT_FORK_ID.fetch_add(1, Ordering::Relaxed)
}

/// One-shot completion slot for a forked call.
///
/// States are Pending (`None`) and Completed (`Some`). Completion happens at
/// most once; later completions are ignored.
pub struct FutureCell {
    id: usize,
    slot: Mutex<Option<Value>>,
    ready: Condvar,
}

impl FutureCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_fork_id(),
            slot: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Option<Value>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the result and wake every waiter.
    pub fn complete(&self, value: Value) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(value);
            drop(slot);
            self.ready.notify_all();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.lock().is_some()
    }

    pub fn try_get(&self) -> Option<Value> {
        self.lock().clone()
    }

    /// Wait at most `timeout` for completion. A zero timeout only polls.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        true
    }

    /// Wait without bound for the result.
    pub fn block(&self) -> Value {
        let mut slot = self.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Run `task` on a new thread and return the future for its result.
///
/// A task that ends in a fault never completes its future; the fault is
/// logged and otherwise dropped.
pub fn fork<F>(task: F) -> io::Result<Arc<FutureCell>>
where
    F: FnOnce() -> Result<Value, Fault> + Send + 'static,
{
    let future = FutureCell::new();
    let id = future.id();
    let cell = Arc::clone(&future);
    thread::Builder::new()
        .name(format!("kiln-fork-{}", id))
        .spawn(move || match task() {
            Ok(value) => {
                debug!(fork = id, "forked executor completed");
                cell.complete(value);
            }
            Err(fault) => {
                warn!(fork = id, code = %fault.code(), "forked executor faulted: {}", fault);
            }
        })?;
    debug!(fork = id, "forked executor spawned");
    Ok(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_and_block() {
        let future = fork(|| {
            thread::sleep(Duration::from_millis(10));
            Ok(Value::Int32(42))
        })
        .unwrap();

        assert_eq!(future.block(), Value::Int32(42));
        assert!(future.is_complete());
    }

    #[test]
    fn test_multiple_forks() {
        let futures: Vec<_> = (0..3)
            .map(|i| fork(move || Ok(Value::Int32(i))).unwrap())
            .collect();

        let results: Vec<_> = futures.iter().map(|f| f.block()).collect();
        assert_eq!(results, vec![Value::Int32(0), Value::Int32(1), Value::Int32(2)]);
    }

    #[test]
    fn test_zero_timeout_polls() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let inner = Arc::clone(&gate);
        let future = fork(move || {
            let _g = inner.lock().unwrap();
            Ok(Value::UNIT)
        })
        .unwrap();

        assert!(!future.wait_for(Duration::ZERO));
        drop(held);
        assert!(future.wait_for(Duration::from_secs(5)));
    }

    #[test]
    fn test_faulted_fork_never_completes() {
        let future = fork(|| Err(Fault::DivByZero { ip: 0 })).unwrap();
        assert!(!future.wait_for(Duration::from_millis(50)));
        assert_eq!(future.try_get(), None);
    }

    #[test]
    fn test_complete_is_one_shot() {
        let future = FutureCell::new();
        future.complete(Value::Int32(1));
        future.complete(Value::Int32(2));
        assert_eq!(future.block(), Value::Int32(1));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = FutureCell::new();
        let b = FutureCell::new();
        assert_ne!(a.id(), b.id());
    }
}
