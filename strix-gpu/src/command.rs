// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Opaque command-recording objects pooled by the submission core.
//!
//! The core never inspects recorded GPU commands; it tracks identity, the
//! owning queue type, closed state, and an approximate command count used
//! for batch splitting. Real recording lives with the context/command-list
//! providers outside this crate.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::breadcrumbs::BreadcrumbStack;
use crate::queue::QueueType;

/// Backing storage for command-list recording, recycled across submissions.
pub struct CommandAllocator {
    id: u64,
    queue_type: QueueType,
}

impl CommandAllocator {
    pub(crate) fn new(id: u64, queue_type: QueueType) -> Self {
        Self { id, queue_type }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Recycle the allocator's backing memory. Called when the allocator
    /// returns to the device, after the GPU finished with it.
    pub fn reset(&mut self) {
        log::trace!("allocator {}: reset", self.id);
    }
}

/// One recorded batch of GPU commands. Must be closed before submission.
pub struct CommandList {
    id: u64,
    queue_type: QueueType,
    allocator_id: u64,
    num_commands: u32,
    closed: bool,
}

impl CommandList {
    pub(crate) fn new(id: u64, allocator: &CommandAllocator) -> Self {
        Self {
            id,
            queue_type: allocator.queue_type(),
            allocator_id: allocator.id(),
            num_commands: 0,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn allocator_id(&self) -> u64 {
        self.allocator_id
    }

    pub fn num_commands(&self) -> u32 {
        self.num_commands
    }

    /// Account for `count` commands recorded into this list.
    pub fn record_commands(&mut self, count: u32) {
        assert!(!self.closed, "recording into a closed command list");
        self.num_commands += count;
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Rebind a pooled list to a fresh allocator and reopen it.
    pub(crate) fn reset(&mut self, allocator: &CommandAllocator) {
        debug_assert_eq!(self.queue_type, allocator.queue_type());
        self.allocator_id = allocator.id();
        self.num_commands = 0;
        self.closed = false;
    }
}

/// A pooled recording context; carries the per-context breadcrumb stack.
pub struct CommandContext {
    context_id: i32,
    queue_type: QueueType,
    pub breadcrumbs: Arc<Mutex<BreadcrumbStack>>,
}

impl CommandContext {
    pub(crate) fn new(context_id: i32, queue_type: QueueType, max_markers: u32) -> Self {
        Self {
            context_id,
            queue_type,
            breadcrumbs: Arc::new(Mutex::new(BreadcrumbStack::new(context_id, max_markers))),
        }
    }

    pub fn context_id(&self) -> i32 {
        self.context_id
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_lifecycle() {
        let allocator = CommandAllocator::new(1, QueueType::Direct);
        let mut list = CommandList::new(10, &allocator);

        assert!(!list.is_closed());
        list.record_commands(3);
        list.record_commands(2);
        assert_eq!(list.num_commands(), 5);

        list.close();
        assert!(list.is_closed());
    }

    #[test]
    fn test_list_reset_rebinds() {
        let allocator_a = CommandAllocator::new(1, QueueType::Copy);
        let allocator_b = CommandAllocator::new(2, QueueType::Copy);

        let mut list = CommandList::new(10, &allocator_a);
        list.record_commands(4);
        list.close();

        list.reset(&allocator_b);
        assert_eq!(list.allocator_id(), 2);
        assert_eq!(list.num_commands(), 0);
        assert!(!list.is_closed());
    }

    #[test]
    #[should_panic(expected = "closed command list")]
    fn test_record_into_closed_list() {
        let allocator = CommandAllocator::new(1, QueueType::Direct);
        let mut list = CommandList::new(10, &allocator);
        list.close();
        list.record_commands(1);
    }
}
