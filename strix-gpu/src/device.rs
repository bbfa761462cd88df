// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Adapters and node devices.
//!
//! An [`Adapter`] owns the native backend and one [`NodeDevice`] per GPU
//! node; each device owns one [`NodeQueue`] per queue type. The devices are
//! also the obtain/release surface for pooled command objects: a pool miss
//! constructs a fresh instance, a release recycles into the matching
//! queue-type pool.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use strix_common::{check_native, NodeIndex, Settings, MAX_GPU_NODES};

use crate::backend::NativeBackend;
use crate::command::{CommandAllocator, CommandContext, CommandList};
use crate::fence::FenceCore;
use crate::queue::{NodeQueue, QueueType};

/// One GPU node: per-queue-type submission queues plus object recycling.
pub struct NodeDevice {
    node_index: NodeIndex,
    queues: Vec<Arc<NodeQueue>>,
    next_allocator_id: AtomicU64,
    next_list_id: AtomicU64,
    next_context_id: AtomicI32,
    settings: Settings,
}

impl NodeDevice {
    fn new(backend: &dyn NativeBackend, node_index: NodeIndex, settings: &Settings) -> Arc<Self> {
        let queues = QueueType::ALL
            .iter()
            .map(|&queue_type| {
                let native_fence = check_native(backend.create_fence(0, node_index));
                let fence = Arc::new(FenceCore::new(native_fence, node_index));
                let native_queue = check_native(backend.create_queue(node_index, queue_type));
                Arc::new(NodeQueue::new(
                    native_queue,
                    fence,
                    node_index,
                    queue_type,
                    settings.clone(),
                ))
            })
            .collect();

        Arc::new(Self {
            node_index,
            queues,
            next_allocator_id: AtomicU64::new(1),
            next_list_id: AtomicU64::new(1),
            next_context_id: AtomicI32::new(1),
            settings: settings.clone(),
        })
    }

    pub fn node_index(&self) -> NodeIndex {
        self.node_index
    }

    pub fn queue(&self, queue_type: QueueType) -> Arc<NodeQueue> {
        self.queues[queue_type.index()].clone()
    }

    pub fn queues(&self) -> &[Arc<NodeQueue>] {
        &self.queues
    }

    /// Pooled allocator for `queue_type`, or a fresh one on a miss.
    pub fn obtain_command_allocator(&self, queue_type: QueueType) -> CommandAllocator {
        self.queues[queue_type.index()]
            .pools
            .allocators
            .pop()
            .unwrap_or_else(|| {
                let id = self.next_allocator_id.fetch_add(1, Ordering::Relaxed);
                CommandAllocator::new(id, queue_type)
            })
    }

    /// Recycle an allocator once the GPU is done with it.
    pub fn release_command_allocator(&self, mut allocator: CommandAllocator) {
        allocator.reset();
        self.queues[allocator.queue_type().index()]
            .pools
            .allocators
            .push(allocator);
    }

    /// Pooled command list rebound to `allocator`, or a fresh one on a miss.
    pub fn obtain_command_list(&self, allocator: &CommandAllocator) -> CommandList {
        match self.queues[allocator.queue_type().index()].pools.lists.pop() {
            Some(mut list) => {
                list.reset(allocator);
                list
            }
            None => {
                let id = self.next_list_id.fetch_add(1, Ordering::Relaxed);
                CommandList::new(id, allocator)
            }
        }
    }

    /// Recycle an executed command list.
    pub fn release_command_list(&self, list: CommandList) {
        self.queues[list.queue_type().index()].pools.lists.push(list);
    }

    /// Pooled recording context, or a fresh one on a miss.
    pub fn obtain_context(&self, queue_type: QueueType) -> CommandContext {
        self.queues[queue_type.index()]
            .pools
            .contexts
            .pop()
            .unwrap_or_else(|| {
                let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
                CommandContext::new(id, queue_type, self.settings.breadcrumb_max_markers)
            })
    }

    pub fn release_context(&self, context: CommandContext) {
        self.queues[context.queue_type().index()]
            .pools
            .contexts
            .push(context);
    }
}

/// Owns the native backend and one device per GPU node.
pub struct Adapter {
    backend: Box<dyn NativeBackend>,
    devices: Vec<Arc<NodeDevice>>,
    settings: Settings,
}

impl Adapter {
    pub fn new(backend: Box<dyn NativeBackend>, node_count: u32, settings: Settings) -> Arc<Self> {
        assert!(
            node_count >= 1 && node_count as usize <= MAX_GPU_NODES,
            "node count out of range"
        );

        let devices = (0..node_count)
            .map(|node_index| NodeDevice::new(backend.as_ref(), node_index, &settings))
            .collect();

        log::debug!(
            "adapter: {} node(s) on '{}' backend",
            node_count,
            backend.name()
        );

        Arc::new(Self {
            backend,
            devices,
            settings,
        })
    }

    pub fn device(&self, node_index: NodeIndex) -> &Arc<NodeDevice> {
        &self.devices[node_index as usize]
    }

    pub fn devices(&self) -> &[Arc<NodeDevice>] {
        &self.devices
    }

    pub fn node_count(&self) -> u32 {
        self.devices.len() as u32
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create a native fence core on `node_index`.
    pub(crate) fn create_fence_core(
        &self,
        initial_value: u64,
        node_index: NodeIndex,
    ) -> Arc<FenceCore> {
        let native = check_native(self.backend.create_fence(initial_value, node_index));
        Arc::new(FenceCore::new(native, node_index))
    }

    /// Visit every queue of every device, in node and queue-type order.
    pub fn for_each_queue(&self, mut callback: impl FnMut(&Arc<NodeQueue>)) {
        for device in &self.devices {
            for queue in device.queues() {
                callback(queue);
            }
        }
    }
}
