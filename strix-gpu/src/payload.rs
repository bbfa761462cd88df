// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Payloads: one unit of GPU work, bound to a single (device, queue type).
//!
//! A payload is built by a producer, enqueued on its queue, and consumed by
//! the submission pipe exactly once: wait on sync points and fences, execute
//! the command lists, signal fences and sync points, then release the
//! allocators once the GPU is done. No backward transitions exist.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use strix_common::Event;

use crate::breadcrumbs::BreadcrumbStack;
use crate::command::{CommandAllocator, CommandList};
use crate::device::NodeDevice;
use crate::fence::FenceCore;
use crate::queue::{NodeQueue, QueueType};
use crate::sync_point::SyncPointRef;

/// A fence plus the value to wait for or signal.
pub struct FenceValuePair {
    pub fence: Arc<FenceCore>,
    pub value: u64,
}

impl FenceValuePair {
    pub fn new(fence: Arc<FenceCore>, value: u64) -> Self {
        Self { fence, value }
    }
}

pub struct Payload {
    device: Arc<NodeDevice>,
    queue_type: QueueType,

    // Wait
    pub sync_points_to_wait: Vec<SyncPointRef>,
    /// Resume position in `sync_points_to_wait`; entries below it resolved
    /// on an earlier submission attempt and are never re-scanned.
    pub(crate) wait_cursor: usize,
    pub fences_to_wait: Vec<FenceValuePair>,

    // Execute
    pub command_lists: Vec<CommandList>,

    // Signal
    pub fences_to_signal: Vec<FenceValuePair>,
    pub sync_points_to_signal: Vec<SyncPointRef>,
    pub(crate) completion_fence_value: u64,
    pub submission_event: Option<Arc<Event>>,
    pub(crate) submission_time: Option<Instant>,
    /// Force a fence signal even when the payload executed no command lists.
    pub always_signal: bool,

    // Cleanup
    pub allocators_to_release: Vec<CommandAllocator>,

    // Diagnostics
    pub breadcrumb_stacks: Vec<Arc<Mutex<BreadcrumbStack>>>,
}

impl Payload {
    pub fn new(device: &Arc<NodeDevice>, queue_type: QueueType) -> Box<Self> {
        Box::new(Self {
            device: device.clone(),
            queue_type,
            sync_points_to_wait: Vec::new(),
            wait_cursor: 0,
            fences_to_wait: Vec::new(),
            command_lists: Vec::new(),
            fences_to_signal: Vec::new(),
            sync_points_to_signal: Vec::new(),
            completion_fence_value: 0,
            submission_event: None,
            submission_time: None,
            always_signal: false,
            allocators_to_release: Vec::new(),
            breadcrumb_stacks: Vec::new(),
        })
    }

    pub fn device(&self) -> &Arc<NodeDevice> {
        &self.device
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// The queue this payload executes on.
    pub fn queue(&self) -> Arc<NodeQueue> {
        self.device.queue(self.queue_type)
    }

    /// Fence value representing "this payload's GPU work is complete".
    /// Valid once the payload has been executed.
    pub fn completion_fence_value(&self) -> u64 {
        self.completion_fence_value
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        // Allocators recycle on the parent device once the payload dies,
        // which only happens after GPU completion (or teardown).
        for allocator in self.allocators_to_release.drain(..) {
            self.device.release_command_allocator(allocator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null_backend::NullBackend;
    use crate::device::Adapter;
    use strix_common::Settings;

    #[test]
    fn test_drop_releases_allocators_to_device() {
        let backend = NullBackend::new();
        let adapter = Adapter::new(Box::new(backend), 1, Settings::cooperative());
        let device = adapter.device(0).clone();

        let allocator = device.obtain_command_allocator(QueueType::Direct);
        let allocator_id = allocator.id();

        let mut payload = Payload::new(&device, QueueType::Direct);
        payload.allocators_to_release.push(allocator);
        drop(payload);

        // The allocator is back in the pool and comes out on the next obtain.
        let recycled = device.obtain_command_allocator(QueueType::Direct);
        assert_eq!(recycled.id(), allocator_id);
    }

    #[test]
    fn test_bound_to_queue() {
        let backend = NullBackend::new();
        let adapter = Adapter::new(Box::new(backend), 1, Settings::cooperative());
        let device = adapter.device(0).clone();

        let payload = Payload::new(&device, QueueType::Async);
        assert_eq!(payload.queue_type(), QueueType::Async);
        assert_eq!(payload.queue().queue_type(), QueueType::Async);
    }
}
