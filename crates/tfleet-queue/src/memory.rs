//! In-memory broker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::broker::{Broker, Delivery};
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Delivery>,
    unacked: HashMap<String, Delivery>,
    dead_letters: Vec<String>,
    next_tag: u64,
    connects: u64,
    fail_connects: u32,
    fail_operations: u32,
    fail_logical: u32,
}

/// Queue held in process memory.
///
/// Clones share the same queue, so a test can keep one handle for
/// inspection while the client owns another. Failures can be injected to
/// exercise reconnect and retry paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    connected: bool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the queue from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_connects(&self, n: u32) {
        self.state().fail_connects = n;
    }

    /// Fail the next `n` operations with a connection error.
    pub fn fail_operations(&self, n: u32) {
        self.state().fail_operations = n;
    }

    /// Fail the next `n` operations with a broker-side error.
    pub fn fail_logical(&self, n: u32) {
        self.state().fail_logical = n;
    }

    /// Payloads waiting for delivery, in order.
    pub fn ready(&self) -> Vec<String> {
        self.state().ready.iter().map(|d| d.payload.clone()).collect()
    }

    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }

    pub fn dead_letters(&self) -> Vec<String> {
        self.state().dead_letters.clone()
    }

    /// Successful connections made so far.
    pub fn connects(&self) -> u64 {
        self.state().connects
    }

    fn check(&self) -> QueueResult<()> {
        if !self.connected {
            return Err(QueueError::connection_failed("Not connected"));
        }
        let mut state = self.state();
        if state.fail_operations > 0 {
            state.fail_operations -= 1;
            return Err(QueueError::connection_failed("Injected connection loss"));
        }
        if state.fail_logical > 0 {
            state.fail_logical -= 1;
            return Err(QueueError::operation_failed("Injected broker failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&mut self) -> QueueResult<()> {
        if self.connected {
            return Ok(());
        }
        let mut state = self.state();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(QueueError::connection_failed("Injected connection refusal"));
        }
        state.connects += 1;
        drop(state);
        self.connected = true;
        Ok(())
    }

    async fn publish(&mut self, payload: String) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state();
        state.next_tag += 1;
        let tag = state.next_tag.to_string();
        state.ready.push_back(Delivery { tag, payload });
        Ok(())
    }

    async fn pop(&mut self) -> QueueResult<Option<Delivery>> {
        self.check()?;
        let mut state = self.state();
        let delivery = state.ready.pop_front();
        if let Some(delivery) = &delivery {
            state.unacked.insert(delivery.tag.clone(), delivery.clone());
        }
        Ok(delivery)
    }

    async fn ack(&mut self, tag: String) -> QueueResult<()> {
        self.check()?;
        self.state().unacked.remove(&tag);
        Ok(())
    }

    async fn reject(&mut self, tag: String, requeue: bool) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state();
        if let Some(delivery) = state.unacked.remove(&tag) {
            if requeue {
                state.ready.push_back(delivery);
            } else {
                state.dead_letters.push(delivery.payload);
            }
        }
        Ok(())
    }

    async fn message_count(&mut self) -> QueueResult<Option<u64>> {
        self.check()?;
        Ok(Some(self.state().ready.len() as u64))
    }

    fn reset(&mut self) {
        self.connected = false;
    }
}
