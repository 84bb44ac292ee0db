//! Per-backend-identity serialization
//!
//! Calls addressed to the same identity run one at a time in arrival order.
//! `tokio::sync::Mutex` is fair, so waiters are served FIFO. The map entry is
//! dropped as soon as nobody holds or waits for it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
pub struct IdentityQueue {
    slots: Mutex<HashMap<String, Slot>>,
}

impl IdentityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` once every earlier call for `identity` has settled
    pub async fn run_exclusive<F, T>(&self, identity: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(identity.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let guard = SlotGuard {
            queue: self,
            identity,
            slot: Some(slot),
        };

        let output = match guard.slot.as_ref() {
            Some(slot) => {
                let _turn = slot.lock().await;
                fut.await
            }
            None => fut.await,
        };

        drop(guard);
        output
    }

    /// Identities with a call in flight or waiting
    pub fn active_identities(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, identity: &str, slot: Slot) {
        let mut slots = self.slots.lock();
        let idle = match slots.get(identity) {
            // map + our clone; clones are only taken under this lock
            Some(current) => Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2,
            None => false,
        };
        drop(slot);
        if idle {
            slots.remove(identity);
        }
    }
}

/// Releases the slot even if the caller's future is dropped mid-wait
struct SlotGuard<'a> {
    queue: &'a IdentityQueue,
    identity: &'a str,
    slot: Option<Slot>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.queue.release(self.identity, slot);
        }
    }
}
