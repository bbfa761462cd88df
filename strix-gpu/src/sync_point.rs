// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync points: reference-counted completion tokens.
//!
//! A sync point starts unresolved. The submission consumer resolves it to a
//! (fence, value) pair when the payload that signals it is executed; the
//! interrupt consumer marks it complete once the GPU reaches that value.
//! Whether the CPU can observe completion is fixed at creation.

use std::sync::Arc;

use parking_lot::Mutex;

use strix_common::{check_native, Event};

use crate::backend::NativeFence;
use crate::fence::FenceCore;

/// CPU observability of a sync point, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPointType {
    /// No completion event; `wait`/`is_complete` are not meaningful and the
    /// sync point is only usable for GPU-side ordering.
    GpuOnly,

    /// Carries a completion event usable for CPU-side polling and blocking.
    GpuAndCpu,
}

/// The fence/value pair a sync point resolves to at submission time.
#[derive(Clone)]
pub struct ResolvedFence {
    pub fence: Arc<FenceCore>,
    pub value: u64,
}

pub type SyncPointRef = Arc<SyncPoint>;

type Continuation = Box<dyn FnOnce() + Send>;

pub struct SyncPoint {
    resolved: Mutex<Option<ResolvedFence>>,
    completion_event: Option<Arc<Event>>,
    /// Continuations registered while incomplete; run by whichever thread
    /// services the completion event.
    continuations: Mutex<Vec<Continuation>>,
    waited_callback: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl SyncPoint {
    pub fn create(sync_point_type: SyncPointType) -> SyncPointRef {
        Arc::new(Self {
            resolved: Mutex::new(None),
            completion_event: match sync_point_type {
                SyncPointType::GpuOnly => None,
                SyncPointType::GpuAndCpu => Some(Arc::new(Event::manual_reset())),
            },
            continuations: Mutex::new(Vec::new()),
            waited_callback: Mutex::new(None),
        })
    }

    /// A CPU-observable sync point pre-resolved against `fence`, for callers
    /// that reserve a completion value before submitting the matching work
    /// (see [`SyncPoint::set_event_on_completion`]).
    pub fn with_fence(fence: Arc<FenceCore>) -> SyncPointRef {
        Arc::new(Self {
            resolved: Mutex::new(Some(ResolvedFence { fence, value: 0 })),
            completion_event: Some(Arc::new(Event::manual_reset())),
            continuations: Mutex::new(Vec::new()),
            waited_callback: Mutex::new(None),
        })
    }

    pub fn has_cpu_event(&self) -> bool {
        self.completion_event.is_some()
    }

    /// The CPU completion event, present only for `GpuAndCpu` sync points.
    /// Hand this to a cooperative interrupt pump to block until completion.
    pub fn completion_event(&self) -> Option<&Arc<Event>> {
        self.completion_event.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.lock().is_some()
    }

    /// The resolved fence/value pair, once submission determined it.
    pub fn resolved_fence(&self) -> Option<ResolvedFence> {
        self.resolved.lock().clone()
    }

    /// Bind this sync point to the fence value that marks its completion.
    /// Called exactly once, by the submitting queue.
    pub(crate) fn resolve(&self, fence: Arc<FenceCore>, value: u64) {
        let mut resolved = self.resolved.lock();
        assert!(resolved.is_none(), "sync point resolved twice");
        *resolved = Some(ResolvedFence { fence, value });
    }

    /// Non-blocking poll against the resolved fence. Unresolved sync points
    /// are never ready.
    pub fn is_ready(&self) -> bool {
        match &*self.resolved.lock() {
            Some(resolved) => resolved.value <= resolved.fence.native().completed_value(),
            None => false,
        }
    }

    /// Non-blocking poll of the CPU completion event.
    pub fn is_complete(&self) -> bool {
        self.completion_event
            .as_ref()
            .expect("is_complete() on a GPU-only sync point")
            .ready()
    }

    /// Block until the completion event fires, then run the waited callback.
    pub fn wait(&self) {
        let event = self
            .completion_event
            .as_ref()
            .expect("wait() on a GPU-only sync point");
        event.wait();

        if let Some(callback) = &*self.waited_callback.lock() {
            callback();
        }
    }

    /// Retarget this sync point's completion to `value` and arm the native
    /// notification for it. Must be called before the GPU work that signals
    /// `value` is submitted, or the signal can be missed.
    pub fn set_event_on_completion(&self, value: u64) {
        let mut resolved = self.resolved.lock();
        let resolved = resolved
            .as_mut()
            .expect("set_event_on_completion() on an unresolved sync point");
        let event = self
            .completion_event
            .clone()
            .expect("set_event_on_completion() on a GPU-only sync point");

        resolved.value = value;
        resolved.fence.set_value_available_at(value);
        check_native(resolved.fence.native().set_event_on_completion(value, event));
    }

    /// Register a continuation to run once this sync point completes.
    ///
    /// If the sync point is already complete the continuation runs inline on
    /// the calling thread; otherwise it runs on whichever thread services
    /// the completion event, followed by the waited callback.
    pub fn on_completed(&self, continuation: impl FnOnce() + Send + 'static) {
        let mut continuations = self.continuations.lock();
        let already_complete = self
            .completion_event
            .as_ref()
            .map_or(false, |event| event.ready());

        if already_complete {
            drop(continuations);
            continuation();
        } else {
            continuations.push(Box::new(continuation));
        }
    }

    /// Callback invoked after a waiter resumes, whether it blocked in
    /// [`SyncPoint::wait`] or suspended via [`SyncPoint::on_completed`].
    pub fn set_on_waited(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.waited_callback.lock() = Some(Box::new(callback));
    }

    /// Mark the sync point complete: set the CPU event and run registered
    /// continuations on the calling thread.
    pub(crate) fn signal_completed(&self) {
        if let Some(event) = &self.completion_event {
            event.set();
        }

        let continuations = std::mem::take(&mut *self.continuations.lock());
        if continuations.is_empty() {
            return;
        }
        for continuation in continuations {
            continuation();
        }
        if let Some(callback) = &*self.waited_callback.lock() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null_backend::NullBackend;
    use crate::backend::NativeBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_core(backend: &NullBackend) -> Arc<FenceCore> {
        Arc::new(FenceCore::new(backend.create_fence(0, 0).unwrap(), 0))
    }

    #[test]
    fn test_unresolved_is_not_ready() {
        let sync_point = SyncPoint::create(SyncPointType::GpuAndCpu);
        assert!(!sync_point.is_resolved());
        assert!(!sync_point.is_ready());
        assert!(!sync_point.is_complete());
    }

    #[test]
    fn test_gpu_only_has_no_event() {
        let sync_point = SyncPoint::create(SyncPointType::GpuOnly);
        assert!(!sync_point.has_cpu_event());
    }

    #[test]
    #[should_panic(expected = "GPU-only sync point")]
    fn test_wait_on_gpu_only_is_contract_violation() {
        SyncPoint::create(SyncPointType::GpuOnly).wait();
    }

    #[test]
    fn test_ready_follows_resolved_fence() {
        let backend = NullBackend::new();
        let core = test_core(&backend);
        let fence_id = core.native().fence_id();

        let sync_point = SyncPoint::create(SyncPointType::GpuAndCpu);
        sync_point.resolve(core, 3);

        assert!(!sync_point.is_ready());
        backend.complete_fence(fence_id, 3);
        assert!(sync_point.is_ready());
    }

    #[test]
    #[should_panic(expected = "resolved twice")]
    fn test_double_resolve_is_contract_violation() {
        let backend = NullBackend::new();
        let sync_point = SyncPoint::create(SyncPointType::GpuOnly);
        sync_point.resolve(test_core(&backend), 1);
        sync_point.resolve(test_core(&backend), 2);
    }

    #[test]
    fn test_signal_completed_wakes_waiter() {
        let sync_point = SyncPoint::create(SyncPointType::GpuAndCpu);
        let waiter = {
            let sync_point = sync_point.clone();
            std::thread::spawn(move || sync_point.wait())
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        sync_point.signal_completed();
        waiter.join().unwrap();
        assert!(sync_point.is_complete());
    }

    #[test]
    fn test_continuation_runs_on_signaling_thread() {
        let sync_point = SyncPoint::create(SyncPointType::GpuAndCpu);
        let hits = Arc::new(AtomicU32::new(0));

        {
            let hits = hits.clone();
            sync_point.on_completed(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        sync_point.signal_completed();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Late registration runs inline.
        {
            let hits = hits.clone();
            sync_point.on_completed(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_waited_callback_after_continuation() {
        let sync_point = SyncPoint::create(SyncPointType::GpuAndCpu);
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = order.clone();
            sync_point.set_on_waited(move || order.lock().push("waited"));
        }
        {
            let order = order.clone();
            sync_point.on_completed(move || order.lock().push("continuation"));
        }

        sync_point.signal_completed();
        assert_eq!(*order.lock(), vec!["continuation", "waited"]);
    }

    #[test]
    fn test_set_event_on_completion_prearmed() {
        let backend = NullBackend::new();
        let core = test_core(&backend);
        let fence_id = core.native().fence_id();

        let sync_point = SyncPoint::with_fence(core.clone());
        sync_point.set_event_on_completion(2);
        assert!(!sync_point.is_complete());
        assert!(!core.is_available());

        backend.complete_fence(fence_id, 2);
        assert!(sync_point.is_complete());
        assert!(core.is_available());
        sync_point.wait();
    }
}
