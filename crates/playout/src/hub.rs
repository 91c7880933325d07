//! # Broadcast Hub
//!
//! Fan-out of one producer's byte chunks to N independently-paced client
//! queues. Each client gets its own bounded queue; a full queue drops chunks
//! for that client only, so a stalled consumer can never block the producer
//! or starve its peers. There is no replay buffer — a late joiner sees only
//! bytes published after it attached.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// What a client reads from its queue
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Chunk(Bytes),
    /// End-of-stream sentinel; the consumer terminates its read loop
    End,
}

/// Counters accumulated over the hub's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub published_chunks: u64,
    pub published_bytes: u64,
    /// Chunks discarded because a client queue was full
    pub dropped_chunks: u64,
}

struct Registry {
    clients: HashMap<u64, mpsc::Sender<ClientEvent>>,
    next_id: u64,
}

/// Single-producer / multi-consumer chunk distributor.
///
/// The attached-client set is mutated only under its own mutex; `publish`
/// iterates a snapshot so the lock is never held across an enqueue.
pub struct BroadcastHub {
    registry: Mutex<Registry>,
    queue_capacity: usize,
    published_chunks: AtomicU64,
    published_bytes: AtomicU64,
    dropped_chunks: AtomicU64,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                clients: HashMap::new(),
                next_id: 0,
            }),
            queue_capacity,
            published_chunks: AtomicU64::new(0),
            published_bytes: AtomicU64::new(0),
            dropped_chunks: AtomicU64::new(0),
        }
    }

    /// Register a new client queue and return the reading handle.
    ///
    /// The handle detaches itself when dropped.
    pub fn attach(self: &Arc<Self>) -> ClientHandle {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let (id, total) = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.clients.insert(id, tx);
            (id, registry.clients.len())
        };
        debug!(client = id, attached = total, "client attached");
        ClientHandle {
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Remove a client queue. Safe to call for ids already removed.
    pub fn detach(&self, client_id: u64) {
        let removed = self.registry.lock().clients.remove(&client_id).is_some();
        if removed {
            debug!(client = client_id, "client detached");
        }
    }

    /// Push `chunk` to every attached queue without blocking.
    ///
    /// A full queue drops the chunk for that client only; a closed queue is
    /// pruned from the set.
    pub fn publish(&self, chunk: Bytes) {
        let targets: Vec<(u64, mpsc::Sender<ClientEvent>)> = {
            let registry = self.registry.lock();
            registry
                .clients
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        self.published_chunks.fetch_add(1, Ordering::Relaxed);
        self.published_bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(ClientEvent::Chunk(chunk.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                    trace!(client = id, "client queue full, chunk dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut registry = self.registry.lock();
            for id in closed {
                registry.clients.remove(&id);
            }
        }
    }

    /// Signal end-of-stream to every attached queue and clear the set.
    ///
    /// Saturated queues may miss the sentinel itself, but dropping the
    /// senders closes every queue, so a consumer still observes termination
    /// after draining.
    pub fn end_all(&self) {
        let drained: Vec<(u64, mpsc::Sender<ClientEvent>)> = {
            let mut registry = self.registry.lock();
            registry.clients.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.try_send(ClientEvent::End);
        }
        if count > 0 {
            debug!(clients = count, "signalled end of stream");
        }
    }

    pub fn client_count(&self) -> usize {
        self.registry.lock().clients.len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            published_chunks: self.published_chunks.load(Ordering::Relaxed),
            published_bytes: self.published_bytes.load(Ordering::Relaxed),
            dropped_chunks: self.dropped_chunks.load(Ordering::Relaxed),
        }
    }
}

/// Reading side of one attached client queue
pub struct ClientHandle {
    id: u64,
    rx: mpsc::Receiver<ClientEvent>,
    hub: Arc<BroadcastHub>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next event; `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 16])
    }

    #[tokio::test]
    async fn fan_out_delivers_to_all_clients_in_order() {
        let hub = Arc::new(BroadcastHub::new(8));
        let mut a = hub.attach();
        let mut b = hub.attach();

        for i in 0..3 {
            hub.publish(chunk(i));
        }

        for client in [&mut a, &mut b] {
            for i in 0..3 {
                assert_eq!(client.recv().await, Some(ClientEvent::Chunk(chunk(i))));
            }
        }
    }

    #[tokio::test]
    async fn saturated_client_drops_without_affecting_others() {
        let hub = Arc::new(BroadcastHub::new(5));
        let mut fast = hub.attach();
        let _slow = hub.attach(); // never reads

        // Five chunks fill the slow queue; the rest drop for it only.
        for i in 0..9 {
            hub.publish(chunk(i));
            // the fast client keeps draining
            assert_eq!(fast.recv().await, Some(ClientEvent::Chunk(chunk(i))));
        }

        let stats = hub.stats();
        assert_eq!(stats.published_chunks, 9);
        assert_eq!(stats.dropped_chunks, 4);
    }

    #[tokio::test]
    async fn late_joiner_sees_only_later_chunks() {
        let hub = Arc::new(BroadcastHub::new(8));
        let mut early = hub.attach();
        hub.publish(chunk(1));

        let mut late = hub.attach();
        hub.publish(chunk(2));
        hub.end_all();

        assert_eq!(early.recv().await, Some(ClientEvent::Chunk(chunk(1))));
        assert_eq!(early.recv().await, Some(ClientEvent::Chunk(chunk(2))));
        assert_eq!(late.recv().await, Some(ClientEvent::Chunk(chunk(2))));
        assert_eq!(late.recv().await, Some(ClientEvent::End));
    }

    #[tokio::test]
    async fn end_all_terminates_even_saturated_clients() {
        let hub = Arc::new(BroadcastHub::new(2));
        let mut stuck = hub.attach();

        for i in 0..4 {
            hub.publish(chunk(i));
        }
        hub.end_all();
        assert_eq!(hub.client_count(), 0);

        // The sentinel did not fit, but the closed queue still drains to None.
        assert_eq!(stuck.recv().await, Some(ClientEvent::Chunk(chunk(0))));
        assert_eq!(stuck.recv().await, Some(ClientEvent::Chunk(chunk(1))));
        assert_eq!(stuck.recv().await, None);
    }

    #[tokio::test]
    async fn detach_is_idempotent_and_handles_drop_detaches() {
        let hub = Arc::new(BroadcastHub::new(4));
        let handle = hub.attach();
        let id = handle.id();
        assert_eq!(hub.client_count(), 1);

        drop(handle);
        assert_eq!(hub.client_count(), 0);
        hub.detach(id);
        hub.detach(id);
        assert_eq!(hub.client_count(), 0);
    }
}
