// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-node submission queues.
//!
//! A [`NodeQueue`] owns one hardware-visible submission channel and all the
//! bookkeeping needed to issue batched work with correct cross-queue
//! ordering: pending payload queues, remote-fence wait deduplication, its
//! own signal fence, and pools of reusable command objects.
//!
//! Producers only touch the pending queues and the pools. Everything else is
//! consumer-side state, serialized to the single submission consumer behind
//! one mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use strix_common::{check_native, Settings, MAX_GPU_NODES};

use crate::backend::{NativeFence, NativeQueue};
use crate::command::{CommandAllocator, CommandContext, CommandList};
use crate::fence::FenceCore;
use crate::payload::Payload;
use crate::pool::ObjectPool;

/// Class of hardware submission channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Direct,
    Copy,
    Async,
}

pub const QUEUE_TYPE_COUNT: usize = 3;

/// Upper bound on queues across all nodes of one adapter.
pub const MAX_QUEUES: usize = MAX_GPU_NODES * QUEUE_TYPE_COUNT;

impl QueueType {
    pub const ALL: [QueueType; QUEUE_TYPE_COUNT] =
        [QueueType::Direct, QueueType::Copy, QueueType::Async];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            QueueType::Direct => "3D",
            QueueType::Async => "Compute",
            QueueType::Copy => "Copy",
        }
    }
}

/// FIFO of payloads crossing the producer/consumer boundary.
pub struct PayloadQueue {
    items: Mutex<VecDeque<Box<Payload>>>,
}

impl PayloadQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, payload: Box<Payload>) {
        self.items.lock().push_back(payload);
    }

    /// Take the front payload for processing.
    pub(crate) fn pop(&self) -> Option<Box<Payload>> {
        self.items.lock().pop_front()
    }

    /// Put a payload back at the front, preserving FIFO order, when
    /// processing had to pause.
    pub(crate) fn requeue_front(&self, payload: Box<Payload>) {
        self.items.lock().push_front(payload);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Wait bookkeeping for one remote fence.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteFenceState {
    /// Highest value a GPU wait instruction has actually been issued for.
    /// Only increases.
    pub max_value_awaited: u64,
    /// Highest value requested since the last flush.
    pub next_value_to_await: u64,
}

/// Consumer-side submission state. Taken only by the queue's single
/// submission consumer.
struct SubmissionState {
    payload_to_submit: Option<Box<Payload>>,
    requires_signal: bool,
    fences_to_await: Vec<Arc<FenceCore>>,
    /// Keyed by native fence id.
    remote_fence_states: HashMap<u64, RemoteFenceState>,
}

/// Pools of reusable command objects, shared with the owning device.
pub struct ObjectPools {
    pub contexts: ObjectPool<CommandContext>,
    pub allocators: ObjectPool<CommandAllocator>,
    pub lists: ObjectPool<CommandList>,
}

pub struct NodeQueue {
    node_index: u32,
    queue_type: QueueType,
    native: Box<dyn NativeQueue>,
    /// This queue's own signal fence.
    fence: Arc<FenceCore>,
    pub pending_submission: PayloadQueue,
    pub pending_interrupt: PayloadQueue,
    state: Mutex<SubmissionState>,
    pub pools: ObjectPools,
    settings: Settings,
}

impl NodeQueue {
    pub(crate) fn new(
        native: Box<dyn NativeQueue>,
        fence: Arc<FenceCore>,
        node_index: u32,
        queue_type: QueueType,
        settings: Settings,
    ) -> Self {
        Self {
            node_index,
            queue_type,
            native,
            fence,
            pending_submission: PayloadQueue::new(),
            pending_interrupt: PayloadQueue::new(),
            state: Mutex::new(SubmissionState {
                payload_to_submit: None,
                requires_signal: false,
                fences_to_await: Vec::new(),
                remote_fence_states: HashMap::new(),
            }),
            pools: ObjectPools {
                contexts: ObjectPool::new(),
                allocators: ObjectPool::new(),
                lists: ObjectPool::new(),
            },
            settings,
        }
    }

    pub fn node_index(&self) -> u32 {
        self.node_index
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// This queue's own signal fence.
    pub fn fence(&self) -> &Arc<FenceCore> {
        &self.fence
    }

    /// Issue a native queue signal for `fence`/`value`.
    pub fn gpu_signal(&self, fence: &FenceCore, value: u64) {
        check_native(self.native.signal(fence.native(), value));
    }

    /// Issue a native GPU-timeline wait for `fence`/`value`.
    pub fn gpu_wait(&self, fence: &FenceCore, value: u64) {
        check_native(self.native.wait(fence.native(), value));
    }

    /// Record that this queue must wait for `remote_fence` to reach at
    /// least `value` before its next execution. Requests for the same fence
    /// merge to the maximum value.
    pub fn enqueue_fence_wait(&self, remote_fence: &Arc<FenceCore>, value: u64) {
        let mut state = self.state.lock();
        let entry = state
            .remote_fence_states
            .entry(remote_fence.native().fence_id())
            .or_default();
        entry.next_value_to_await = entry.next_value_to_await.max(value);

        if !state
            .fences_to_await
            .iter()
            .any(|fence| Arc::ptr_eq(fence, remote_fence))
        {
            state.fences_to_await.push(remote_fence.clone());
        }
    }

    /// Issue at most one GPU wait per remote fence accumulated since the
    /// last flush, skipping values at or below the high-water mark.
    pub fn flush_fence_waits(&self) {
        let mut state = self.state.lock();
        self.flush_fence_waits_locked(&mut state);
    }

    fn flush_fence_waits_locked(&self, state: &mut SubmissionState) {
        let fences = std::mem::take(&mut state.fences_to_await);
        for fence in &fences {
            let remote_state = state
                .remote_fence_states
                .get_mut(&fence.native().fence_id())
                .expect("remote fence accumulated without wait state");

            // A wait already issued with an equal or higher value covers us.
            if remote_state.next_value_to_await > remote_state.max_value_awaited {
                check_native(
                    self.native
                        .wait(fence.native(), remote_state.next_value_to_await),
                );
                remote_state.max_value_awaited = remote_state
                    .max_value_awaited
                    .max(remote_state.next_value_to_await);
            }
        }
    }

    /// Snapshot of the wait bookkeeping for one remote fence.
    pub fn remote_fence_state(&self, remote_fence: &FenceCore) -> Option<RemoteFenceState> {
        self.state
            .lock()
            .remote_fence_states
            .get(&remote_fence.native().fence_id())
            .copied()
    }

    /// Signal this queue's fence if outstanding work requires it, returning
    /// the fence value that covers all submitted work. Idempotent when no
    /// new work was submitted since the last signal.
    pub fn signal_fence(&self) -> u64 {
        let mut state = self.state.lock();
        self.signal_fence_locked(&mut state)
    }

    fn signal_fence_locked(&self, state: &mut SubmissionState) -> u64 {
        if state.requires_signal {
            state.requires_signal = false;
            let value = self.fence.advance_value_available();
            check_native(self.native.signal(self.fence.native(), value));
            value
        } else {
            self.fence.value_available_at()
        }
    }

    /// Install the payload the next `execute_payload` call submits.
    pub(crate) fn begin_payload(&self, payload: Box<Payload>) {
        let mut state = self.state.lock();
        debug_assert!(
            state.payload_to_submit.is_none(),
            "previous payload was never executed"
        );
        state.payload_to_submit = Some(payload);
    }

    /// Execute the queue's current payload: wait on its manual fences,
    /// submit its command lists, signal the queue fence and everything the
    /// payload attached, then hand it to the interrupt queue. Returns the
    /// fence value that marks the payload's GPU completion.
    pub fn execute_payload(&self) -> u64 {
        let mut state = self.state.lock();
        self.execute_payload_locked(&mut state)
    }

    fn execute_payload_locked(&self, state: &mut SubmissionState) -> u64 {
        let mut payload = state
            .payload_to_submit
            .take()
            .expect("execute_payload with no payload installed");

        for pair in &payload.fences_to_wait {
            check_native(self.native.wait(pair.fence.native(), pair.value));
        }

        if !payload.command_lists.is_empty() {
            let lists = std::mem::take(&mut payload.command_lists);
            self.execute_command_lists(&lists);

            let device = payload.device().clone();
            for list in lists {
                device.release_command_list(list);
            }

            // Future sync points need a fresh signaled fence value.
            state.requires_signal = true;
        }

        state.requires_signal |= payload.always_signal;

        let fence_value = self.signal_fence_locked(state);
        payload.completion_fence_value = fence_value;

        for pair in &payload.fences_to_signal {
            check_native(self.native.signal(pair.fence.native(), pair.value));
        }

        for sync_point in &payload.sync_points_to_signal {
            sync_point.resolve(self.fence.clone(), fence_value);
        }

        if let Some(event) = &payload.submission_event {
            event.set();
        }
        payload.submission_time = Some(Instant::now());

        log::debug!(
            "queue [{}/{}]: executed payload, completion fence value {}",
            self.node_index,
            self.queue_type.name(),
            fence_value
        );

        self.pending_interrupt.enqueue(payload);
        fence_value
    }

    /// Submit closed command lists in batches bounded by the settings.
    fn execute_command_lists(&self, lists: &[CommandList]) {
        let ids: Vec<u64> = lists
            .iter()
            .map(|list| {
                assert!(list.is_closed(), "submitting an open command list");
                list.id()
            })
            .collect();

        let max_batch = self.settings.max_execute_batch_size.max(1);
        let command_budget = self.settings.max_commands_per_batch;

        let mut offset = 0;
        while offset < ids.len() {
            let mut dispatch = (ids.len() - offset).min(max_batch);

            if command_budget > 0 {
                // Limit the batch by its total recorded command count.
                let mut index = 0;
                let mut num_commands = 0;
                while index < dispatch && num_commands < command_budget {
                    num_commands += lists[offset + index].num_commands();
                    index += 1;
                }
                dispatch = index;
            }

            check_native(
                self.native
                    .execute_command_lists(&ids[offset..offset + dispatch]),
            );
            offset += dispatch;
        }
    }
}
