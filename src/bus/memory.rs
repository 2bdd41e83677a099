//! In-memory bus
//!
//! Process-local queues with SQS semantics: FIFO queues deliver one message
//! per group at a time in arrival order and drop duplicates by dedup ID;
//! standard queues deliver any visible message. Undeleted messages become
//! visible again after their visibility timeout with an incremented receive
//! count.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Bus, BusError, BusMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Standard,
    Fifo,
}

#[derive(Debug)]
struct QueuedMessage {
    body: Vec<u8>,
    group_id: Option<String>,
    /// Invisible until this instant while a delivery is outstanding
    invisible_until: Option<Instant>,
    /// Receipt of the latest delivery; superseded deliveries cannot delete
    receipt: Option<String>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct Queue {
    messages: Vec<QueuedMessage>,
    dedup_seen: HashSet<String>,
}

#[derive(Debug)]
struct State {
    queues: HashMap<String, (QueueKind, Queue)>,
    receipt_counter: u64,
}

/// In-memory [`Bus`] implementation
#[derive(Debug)]
pub struct MemoryBus {
    state: Mutex<State>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queues: HashMap::new(),
                receipt_counter: 0,
            }),
        }
    }

    /// Declare a standard queue
    pub fn create_queue(&self, name: &str) {
        let mut state = self.state.lock().expect("bus mutex poisoned");
        state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| (QueueKind::Standard, Queue::default()));
    }

    /// Declare a FIFO queue
    pub fn create_fifo_queue(&self, name: &str) {
        let mut state = self.state.lock().expect("bus mutex poisoned");
        state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| (QueueKind::Fifo, Queue::default()));
    }

    /// Number of messages currently in a queue, visible or not
    pub fn depth(&self, name: &str) -> usize {
        let state = self.state.lock().expect("bus mutex poisoned");
        state
            .queues
            .get(name)
            .map(|(_, q)| q.messages.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BusError> {
        let mut state = self.state.lock().expect("bus mutex poisoned");
        let (kind, q) = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;

        if *kind != QueueKind::Standard {
            return Err(BusError::Transport(format!(
                "queue {queue} requires a group and dedup id"
            )));
        }

        q.messages.push(QueuedMessage {
            body,
            group_id: None,
            invisible_until: None,
            receipt: None,
            receive_count: 0,
        });
        Ok(())
    }

    async fn send_fifo(
        &self,
        queue: &str,
        body: Vec<u8>,
        dedup_id: &str,
        group_id: &str,
    ) -> Result<(), BusError> {
        let mut state = self.state.lock().expect("bus mutex poisoned");
        let (kind, q) = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;

        if *kind != QueueKind::Fifo {
            return Err(BusError::Transport(format!("queue {queue} is not FIFO")));
        }

        // Duplicate sends are acknowledged and dropped, like SQS.
        if !q.dedup_seen.insert(dedup_id.to_string()) {
            tracing::debug!(queue, dedup_id, "duplicate send dropped");
            return Ok(());
        }

        q.messages.push(QueuedMessage {
            body,
            group_id: Some(group_id.to_string()),
            invisible_until: None,
            receipt: None,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        visibility: Duration,
    ) -> Result<Option<BusMessage>, BusError> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("bus mutex poisoned");
        let receipt_counter = {
            state.receipt_counter += 1;
            state.receipt_counter
        };
        let (kind, q) = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;

        let mut groups_seen: HashSet<&str> = HashSet::new();
        let mut candidate: Option<usize> = None;

        for (idx, msg) in q.messages.iter().enumerate() {
            // For FIFO queues only the first message of each group is a
            // candidate; an in-flight head blocks the whole group.
            if *kind == QueueKind::Fifo {
                let group = msg.group_id.as_deref().unwrap_or("");
                if !groups_seen.insert(group) {
                    continue;
                }
            }

            let visible = msg.invisible_until.map_or(true, |t| t <= now);
            if visible {
                candidate = Some(idx);
                break;
            }
        }

        let Some(idx) = candidate else {
            return Ok(None);
        };

        let receipt = format!("{queue}-{receipt_counter}");
        let msg = &mut q.messages[idx];
        msg.invisible_until = Some(now + visibility);
        msg.receipt = Some(receipt.clone());
        msg.receive_count += 1;

        Ok(Some(BusMessage {
            body: msg.body.clone(),
            receipt,
            receive_count: msg.receive_count,
        }))
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<(), BusError> {
        let mut state = self.state.lock().expect("bus mutex poisoned");
        let (_, q) = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;

        let position = q
            .messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt));

        match position {
            Some(idx) => {
                q.messages.remove(idx);
                Ok(())
            }
            // The visibility timeout lapsed and the message was re-delivered
            // under a newer receipt; this delete no longer owns it.
            None => Err(BusError::InvalidReceipt(receipt.to_string())),
        }
    }
}
