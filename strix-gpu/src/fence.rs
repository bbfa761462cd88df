// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fences: monotone GPU progress counters.
//!
//! [`FenceCore`] wraps one native fence together with its completion event,
//! scoped to one GPU node. [`Fence`] layers value reservation and a cached
//! completed-value fast path on top, one core per node; [`ManualFence`] lets
//! the caller pick signaled values, so a value can be reserved before the
//! work that produces it is submitted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use strix_common::{check_native, Event, NodeIndex, NodeMask, MAX_GPU_NODES};

use crate::backend::NativeFence;
use crate::device::Adapter;
use crate::queue::QueueType;

/// One native fence counter plus its OS completion notification.
pub struct FenceCore {
    native: Box<dyn NativeFence>,
    completion_event: Arc<Event>,
    /// Next value this fence will be signaled with.
    value_available_at: AtomicU64,
    /// Set while the interrupt pump has a wake-up armed on this fence.
    interrupt_awaited: AtomicBool,
    node_index: NodeIndex,
}

impl FenceCore {
    pub(crate) fn new(native: Box<dyn NativeFence>, node_index: NodeIndex) -> Self {
        Self {
            native,
            completion_event: Arc::new(Event::manual_reset()),
            value_available_at: AtomicU64::new(0),
            interrupt_awaited: AtomicBool::new(false),
            node_index,
        }
    }

    pub fn native(&self) -> &dyn NativeFence {
        self.native.as_ref()
    }

    pub fn completion_event(&self) -> &Arc<Event> {
        &self.completion_event
    }

    pub fn node_index(&self) -> NodeIndex {
        self.node_index
    }

    /// Next value this fence will be signaled with.
    pub fn value_available_at(&self) -> u64 {
        self.value_available_at.load(Ordering::Acquire)
    }

    pub(crate) fn set_value_available_at(&self, value: u64) {
        self.value_available_at.store(value, Ordering::Release);
    }

    /// Reserve the next signal value.
    pub(crate) fn advance_value_available(&self) -> u64 {
        self.value_available_at.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// True once the GPU has reached the last value made available.
    pub fn is_available(&self) -> bool {
        self.value_available_at() <= self.native.completed_value()
    }

    pub(crate) fn interrupt_awaited(&self) -> &AtomicBool {
        &self.interrupt_awaited
    }
}

/// A multi-node fence with value reservation and a cached fast path.
pub struct Fence {
    adapter: Arc<Adapter>,
    node_mask: NodeMask,
    label: String,
    cores: [Option<Arc<FenceCore>>; MAX_GPU_NODES],
    /// Last observed completed value; raised with an atomic max so
    /// concurrent refreshes stay monotone.
    last_completed: AtomicU64,
    /// Next value to signal.
    next_value: AtomicU64,
}

impl Fence {
    pub fn new(adapter: Arc<Adapter>, node_mask: NodeMask, label: impl Into<String>) -> Self {
        Self {
            adapter,
            node_mask,
            label: label.into(),
            cores: Default::default(),
            last_completed: AtomicU64::new(0),
            next_value: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn node_mask(&self) -> NodeMask {
        self.node_mask
    }

    /// Create the native fence core for this fence's node.
    pub fn create_fence(&mut self) {
        let node_index = self.node_mask.to_index();
        let core = self.adapter.create_fence_core(0, node_index);
        self.cores[node_index as usize] = Some(core);

        self.last_completed.store(0, Ordering::Release);
        self.next_value.store(1, Ordering::Release);
    }

    /// Drop every per-node core.
    pub fn destroy(&mut self) {
        for slot in &mut self.cores {
            *slot = None;
        }
    }

    /// The core for `node_index`. The slot must have been created.
    pub fn core(&self, node_index: NodeIndex) -> &Arc<FenceCore> {
        self.cores[node_index as usize]
            .as_ref()
            .expect("fence core not created for node")
    }

    fn own_core(&self) -> &Arc<FenceCore> {
        self.core(self.node_mask.to_index())
    }

    /// Reserve the next fence value and instruct the owning node's queue of
    /// `queue_type` to signal it after prior work. Returns the reserved
    /// value as a submission id.
    pub fn signal(&self, queue_type: QueueType) -> u64 {
        let id = self.next_value.fetch_add(1, Ordering::AcqRel);
        self.internal_signal(queue_type, id);
        self.update_last_completed();
        id
    }

    fn internal_signal(&self, queue_type: QueueType, value: u64) {
        let node_index = self.node_mask.to_index();
        let queue = self.adapter.device(node_index).queue(queue_type);
        queue.gpu_signal(self.core(node_index), value);
        log::trace!("fence '{}': signal {} on [{}/{}]", self.label, value, node_index, queue_type.name());
    }

    /// Block the given queue on the GPU timeline until this fence reaches
    /// `value`. No CPU blocking occurs.
    pub fn gpu_wait(
        &self,
        device_index: NodeIndex,
        queue_type: QueueType,
        value: u64,
        fence_node_index: NodeIndex,
    ) {
        let queue = self.adapter.device(device_index).queue(queue_type);
        queue.gpu_wait(self.core(fence_node_index), value);
    }

    /// [`Fence::gpu_wait`] against this fence's own node.
    pub fn gpu_wait_local(&self, queue_type: QueueType, value: u64) {
        let node_index = self.node_mask.to_index();
        self.gpu_wait(node_index, queue_type, value, node_index);
    }

    /// Whether `value` has completed, refreshing the cache when the cached
    /// fast path cannot answer. Safe to call from any thread.
    pub fn is_fence_complete(&self, value: u64) -> bool {
        if value < self.last_completed.load(Ordering::Acquire) {
            return true;
        }
        value <= self.update_last_completed()
    }

    /// Cached-only completion check; never queries the native counter.
    pub fn is_fence_complete_fast(&self, value: u64) -> bool {
        value <= self.last_completed.load(Ordering::Acquire)
    }

    /// Refresh the cached completed value from the native counter.
    /// Returns the value read by this call; the cache itself is raised with
    /// a max-update so racing refreshes can never move it backwards.
    pub fn update_last_completed(&self) -> u64 {
        let completed = self.own_core().native().completed_value();
        self.last_completed.fetch_max(completed, Ordering::AcqRel);
        completed
    }

    pub fn get_last_completed_fast(&self) -> u64 {
        self.last_completed.load(Ordering::Acquire)
    }

    /// Next value to be signaled.
    pub fn get_current_fence(&self) -> u64 {
        self.next_value.load(Ordering::Acquire)
    }

    /// Block the calling thread until `value` completes. Arms the native
    /// completion notification and waits with unbounded timeout.
    pub fn wait_for_fence(&self, value: u64) {
        if self.is_fence_complete(value) {
            return;
        }

        let core = self.own_core();
        if value > core.native().completed_value() {
            let event = core.completion_event();
            event.reset();
            check_native(core.native().set_event_on_completion(value, event.clone()));
            event.wait();
        }

        self.update_last_completed();
    }
}

/// A fence whose signaled values are chosen by the caller.
pub struct ManualFence {
    fence: Fence,
}

impl ManualFence {
    pub fn new(adapter: Arc<Adapter>, node_mask: NodeMask, label: impl Into<String>) -> Self {
        Self {
            fence: Fence::new(adapter, node_mask, label),
        }
    }

    /// Signal the given value on the owning node's queue of `queue_type`.
    pub fn signal_value(&self, queue_type: QueueType, value: u64) -> u64 {
        self.fence.internal_signal(queue_type, value);
        self.fence.update_last_completed();
        value
    }

    /// Reserve the current fence value, returning it and advancing the
    /// counter. Used to hold a value before the matching work exists.
    pub fn increment_current(&self) -> u64 {
        self.fence.next_value.fetch_add(1, Ordering::AcqRel)
    }
}

impl std::ops::Deref for ManualFence {
    type Target = Fence;

    fn deref(&self) -> &Fence {
        &self.fence
    }
}

impl std::ops::DerefMut for ManualFence {
    fn deref_mut(&mut self) -> &mut Fence {
        &mut self.fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null_backend::{NullBackend, QueueOp};
    use strix_common::Settings;

    fn test_adapter(backend: &NullBackend) -> Arc<Adapter> {
        Adapter::new(Box::new(backend.clone()), 1, Settings::cooperative())
    }

    fn test_fence(adapter: &Arc<Adapter>) -> Fence {
        let mut fence = Fence::new(adapter.clone(), NodeMask::from_index(0), "test");
        fence.create_fence();
        fence
    }

    #[test]
    fn test_signal_ids_strictly_increase() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = test_fence(&adapter);

        assert_eq!(fence.signal(QueueType::Direct), 1);
        assert_eq!(fence.signal(QueueType::Direct), 2);
        assert_eq!(fence.signal(QueueType::Direct), 3);
        assert_eq!(fence.get_current_fence(), 4);
    }

    #[test]
    fn test_completion_scenario() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = test_fence(&adapter);
        let fence_id = fence.core(0).native().fence_id();

        assert_eq!(fence.signal(QueueType::Direct), 1);
        assert_eq!(fence.signal(QueueType::Direct), 2);
        assert_eq!(fence.signal(QueueType::Direct), 3);

        // Nothing completed on the simulated GPU yet.
        assert!(!fence.is_fence_complete(2));

        backend.complete_fence(fence_id, 2);
        assert!(fence.is_fence_complete(2));
        assert!(!fence.is_fence_complete(3));
    }

    #[test]
    fn test_completion_never_regresses() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = test_fence(&adapter);
        let fence_id = fence.core(0).native().fence_id();

        fence.signal(QueueType::Direct);
        backend.complete_fence(fence_id, 1);

        assert!(fence.is_fence_complete(1));
        for _ in 0..10 {
            // Repeated refreshes must agree with the earlier answer.
            assert!(fence.is_fence_complete(1));
            assert!(fence.is_fence_complete_fast(1));
        }
    }

    #[test]
    fn test_fast_path_consistent_with_refresh() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = test_fence(&adapter);
        let fence_id = fence.core(0).native().fence_id();

        fence.signal(QueueType::Direct);
        fence.signal(QueueType::Direct);
        backend.complete_fence(fence_id, 2);
        fence.update_last_completed();

        assert!(fence.is_fence_complete_fast(1));
        // A forced refresh must not contradict the fast path.
        assert!(fence.is_fence_complete(1));
        assert_eq!(fence.update_last_completed(), 2);
    }

    #[test]
    fn test_wait_for_fence_already_complete() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = test_fence(&adapter);
        let fence_id = fence.core(0).native().fence_id();

        fence.signal(QueueType::Direct);
        backend.complete_fence(fence_id, 1);
        fence.wait_for_fence(1);
        assert_eq!(fence.get_last_completed_fast(), 1);
    }

    #[test]
    fn test_wait_for_fence_cross_thread() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = Arc::new(test_fence(&adapter));
        let fence_id = fence.core(0).native().fence_id();

        fence.signal(QueueType::Direct);

        let waiter = {
            let fence = fence.clone();
            std::thread::spawn(move || fence.wait_for_fence(1))
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        backend.complete_fence(fence_id, 1);
        waiter.join().unwrap();
        assert!(fence.is_fence_complete_fast(1));
    }

    #[test]
    fn test_gpu_wait_issues_queue_instruction() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = test_fence(&adapter);
        let fence_id = fence.core(0).native().fence_id();

        fence.gpu_wait_local(QueueType::Async, 5);

        let ops = backend.take_ops(0, QueueType::Async);
        assert_eq!(ops, vec![QueueOp::Wait { fence_id, value: 5 }]);
    }

    #[test]
    fn test_manual_fence_signals_chosen_value() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let mut manual = ManualFence::new(adapter, NodeMask::from_index(0), "manual");
        manual.create_fence();
        let fence_id = manual.core(0).native().fence_id();

        assert_eq!(manual.signal_value(QueueType::Copy, 42), 42);

        let ops = backend.take_ops(0, QueueType::Copy);
        assert_eq!(ops, vec![QueueOp::Signal { fence_id, value: 42 }]);
    }

    #[test]
    fn test_manual_fence_increment_returns_previous() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let mut manual = ManualFence::new(adapter, NodeMask::from_index(0), "manual");
        manual.create_fence();

        assert_eq!(manual.increment_current(), 1);
        assert_eq!(manual.increment_current(), 2);
        assert_eq!(manual.get_current_fence(), 3);
    }

    #[test]
    #[should_panic(expected = "fence core not created")]
    fn test_unset_node_slot_is_contract_violation() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let fence = Fence::new(adapter, NodeMask::from_index(0), "uncreated");
        fence.core(0);
    }

    #[test]
    #[should_panic(expected = "fence core not created")]
    fn test_destroy_drops_cores() {
        let backend = NullBackend::new();
        let adapter = test_adapter(&backend);
        let mut fence = test_fence(&adapter);

        fence.signal(QueueType::Direct);
        fence.destroy();
        fence.core(0);
    }
}
