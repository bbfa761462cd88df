// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Null native backend — no GPU, every queue instruction recorded.
//!
//! Fence completion is driven from outside: [`NullBackend::complete_fence`]
//! advances one counter and fires armed completion events, and
//! [`NullBackend::retire_all`] completes everything signaled so far (a GPU
//! that finishes instantly). Clones of the backend handle share state, so a
//! test can keep one clone for inspection while the adapter owns another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use strix_common::{DeviceError, Event};

use super::{NativeBackend, NativeFence, NativeQueue};
use crate::queue::QueueType;

/// One queue instruction recorded by the null backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    Signal { fence_id: u64, value: u64 },
    Wait { fence_id: u64, value: u64 },
    Execute { list_ids: Vec<u64> },
}

struct FenceSlot {
    /// Value the simulated GPU has reached.
    completed: u64,
    /// Highest value any queue signal has been issued for.
    signaled: u64,
    armed: Vec<(u64, Arc<Event>)>,
}

#[derive(Default)]
struct NullState {
    fences: Mutex<HashMap<u64, FenceSlot>>,
    ops: Mutex<HashMap<(u32, QueueType), Vec<QueueOp>>>,
    next_fence_id: AtomicU64,
}

impl NullState {
    fn complete_fence(&self, fence_id: u64, value: u64) {
        let mut fences = self.fences.lock();
        let slot = fences.get_mut(&fence_id).expect("unknown fence id");
        slot.completed = slot.completed.max(value);
        let completed = slot.completed;
        slot.armed.retain(|(target, event)| {
            if *target <= completed {
                event.set();
                false
            } else {
                true
            }
        });
    }

    fn record(&self, node_index: u32, queue_type: QueueType, op: QueueOp) {
        self.ops
            .lock()
            .entry((node_index, queue_type))
            .or_default()
            .push(op);
    }
}

/// Shared-handle null backend.
#[derive(Clone, Default)]
pub struct NullBackend {
    state: Arc<NullState>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance a fence's completed value and fire armed completion events.
    pub fn complete_fence(&self, fence_id: u64, value: u64) {
        log::trace!("null backend: fence {fence_id} completes {value}");
        self.state.complete_fence(fence_id, value);
    }

    /// Complete every value signaled so far, on every fence.
    pub fn retire_all(&self) {
        let signaled: Vec<(u64, u64)> = {
            let fences = self.state.fences.lock();
            fences.iter().map(|(id, slot)| (*id, slot.signaled)).collect()
        };
        for (fence_id, value) in signaled {
            self.state.complete_fence(fence_id, value);
        }
    }

    /// Snapshot of one queue's recorded instruction log.
    pub fn ops(&self, node_index: u32, queue_type: QueueType) -> Vec<QueueOp> {
        self.state
            .ops
            .lock()
            .get(&(node_index, queue_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Drain one queue's recorded instruction log.
    pub fn take_ops(&self, node_index: u32, queue_type: QueueType) -> Vec<QueueOp> {
        self.state
            .ops
            .lock()
            .get_mut(&(node_index, queue_type))
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Current completed value of a fence.
    pub fn completed_value(&self, fence_id: u64) -> u64 {
        self.state.fences.lock()[&fence_id].completed
    }
}

impl NativeBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn create_fence(
        &self,
        initial_value: u64,
        _node_index: u32,
    ) -> Result<Box<dyn NativeFence>, DeviceError> {
        let id = self.state.next_fence_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.fences.lock().insert(
            id,
            FenceSlot {
                completed: initial_value,
                signaled: initial_value,
                armed: Vec::new(),
            },
        );
        Ok(Box::new(NullFence {
            id,
            state: self.state.clone(),
        }))
    }

    fn create_queue(
        &self,
        node_index: u32,
        queue_type: QueueType,
    ) -> Result<Box<dyn NativeQueue>, DeviceError> {
        self.state
            .ops
            .lock()
            .entry((node_index, queue_type))
            .or_default();
        Ok(Box::new(NullQueue {
            node_index,
            queue_type,
            state: self.state.clone(),
        }))
    }
}

struct NullFence {
    id: u64,
    state: Arc<NullState>,
}

impl NativeFence for NullFence {
    fn fence_id(&self) -> u64 {
        self.id
    }

    fn completed_value(&self) -> u64 {
        self.state.fences.lock()[&self.id].completed
    }

    fn set_event_on_completion(&self, value: u64, event: Arc<Event>) -> Result<(), DeviceError> {
        let mut fences = self.state.fences.lock();
        let slot = fences.get_mut(&self.id).expect("unknown fence id");
        if value <= slot.completed {
            event.set();
        } else {
            slot.armed.push((value, event));
        }
        Ok(())
    }
}

struct NullQueue {
    node_index: u32,
    queue_type: QueueType,
    state: Arc<NullState>,
}

impl NativeQueue for NullQueue {
    fn signal(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError> {
        let fence_id = fence.fence_id();
        {
            let mut fences = self.state.fences.lock();
            let slot = fences.get_mut(&fence_id).expect("unknown fence id");
            slot.signaled = slot.signaled.max(value);
        }
        self.state
            .record(self.node_index, self.queue_type, QueueOp::Signal { fence_id, value });
        Ok(())
    }

    fn wait(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError> {
        self.state.record(
            self.node_index,
            self.queue_type,
            QueueOp::Wait {
                fence_id: fence.fence_id(),
                value,
            },
        );
        Ok(())
    }

    fn execute_command_lists(&self, list_ids: &[u64]) -> Result<(), DeviceError> {
        self.state.record(
            self.node_index,
            self.queue_type,
            QueueOp::Execute {
                list_ids: list_ids.to_vec(),
            },
        );
        Ok(())
    }
}
