//! The worker registry.
//!
//! The supervisor owns this exclusively: it inserts a slot when a worker is
//! spawned, scans it opportunistically to reap finished workers, and drains
//! it entirely during shutdown. Workers touch only their own slot's
//! `completed` flag; they never insert or remove.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// One registry entry: a spawned worker's join handle plus the flag it sets
/// as its last action before returning.
struct Slot {
    id: u64,
    peer: SocketAddr,
    completed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A fresh, unset completion flag handed to a worker at spawn time. The
/// worker stores `true` here as its last action; nothing else may write it.
pub type CompletionFlag = Arc<AtomicBool>;

pub fn new_completion_flag() -> CompletionFlag {
    Arc::new(AtomicBool::new(false))
}

/// The live-worker registry. Cloning shares the same underlying queue.
#[derive(Clone, Default)]
pub struct Registry {
    slots: Arc<Mutex<VecDeque<Slot>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly spawned worker. Returns its registry id (used only
    /// for diagnostics).
    pub async fn register(
        &self,
        peer: SocketAddr,
        completed: CompletionFlag,
        handle: JoinHandle<()>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().await.push_back(Slot {
            id,
            peer,
            completed,
            handle,
        });
        id
    }

    /// Scans the registry and joins/removes every worker whose completion
    /// flag is set. Bounds registry growth at steady state to the number of
    /// truly in-flight connections.
    ///
    /// Joins happen after the slots to remove are collected and the lock is
    /// released, since a finished task's `JoinHandle` resolves immediately
    /// and holding the registry mutex across an `.await` point is otherwise
    /// unnecessary contention.
    pub async fn reap(&self) {
        let finished = {
            let mut slots = self.slots.lock().await;
            let mut finished = Vec::new();
            let mut i = 0;
            while i < slots.len() {
                if slots[i].completed.load(Ordering::Acquire) {
                    finished.push(slots.remove(i).expect("index in bounds"));
                } else {
                    i += 1;
                }
            }
            finished
        };

        for slot in finished {
            debug!(id = slot.id, peer = %slot.peer, "reaping completed worker");
            let _ = slot.handle.await;
        }
    }

    /// Drains every remaining worker, in FIFO order: pop the head, release
    /// the lock, join it, then reacquire and continue. Releasing the lock
    /// across the join is mandatory — the worker needs to be able to flip its
    /// own completion flag under the same mutex without deadlocking against
    /// this loop.
    ///
    /// Callers are expected to have already triggered shutdown (so that every
    /// worker's blocked read races against the shutdown notification and
    /// unblocks promptly); this only waits for them to actually finish.
    pub async fn drain(&self) {
        loop {
            let slot = {
                let mut slots = self.slots.lock().await;
                slots.pop_front()
            };

            match slot {
                Some(slot) => {
                    debug!(id = slot.id, peer = %slot.peer, "draining worker");
                    let _ = slot.handle.await;
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn dummy_peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn reap_removes_only_completed_slots() {
        let registry = Registry::new();

        let still_running = new_completion_flag();
        let handle = tokio::spawn(std::future::pending::<()>());
        registry
            .register(dummy_peer(), still_running.clone(), handle)
            .await;

        let done = new_completion_flag();
        done.store(true, Ordering::Release);
        let handle = tokio::spawn(async {});
        registry.register(dummy_peer(), done, handle).await;

        registry.reap().await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn drain_joins_every_slot_in_order() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u32 {
            let order = order.clone();
            let flag = new_completion_flag();
            let handle = tokio::spawn(async move {
                order.lock().await.push(i);
            });
            registry.register(dummy_peer(), flag, handle).await;
        }

        registry.drain().await;
        assert_eq!(registry.len().await, 0);
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }
}
